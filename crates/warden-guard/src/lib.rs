//! # Warden Guard
//!
//! Content-security pipeline for chat over a local LLM.
//!
//! Every chat turn is mediated: the user's message is scanned before it
//! can reach the model, and the model's reply is scanned before it can
//! reach the user.
//!
//! - **Scanners**: single-purpose checks (prompt injection, toxicity,
//!   banned topics, secrets, code, refusals, relevance, PII)
//! - **Policy**: per-scanner thresholds and fail actions combined into one
//!   allow / block / sanitize decision
//! - **Anonymization**: sensitive values swapped for `<CATEGORY_n>`
//!   placeholders before generation and restored afterwards
//! - **Audit**: every verdict logged with full scanner detail
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warden_guard::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let generator = LlamaServerGenerator::new(
//!         "http://127.0.0.1:8080",
//!         std::time::Duration::from_secs(120),
//!     )?;
//!     let pipeline = Pipeline::new(WardenConfig::default(), Arc::new(generator))?;
//!
//!     let outcome = pipeline
//!         .process(ChatRequest::new("What is the capital of France?", "session-1"))
//!         .await?;
//!
//!     if outcome.was_blocked {
//!         println!("refused: {}", outcome.text);
//!     } else {
//!         println!("{}", outcome.text);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────┐   ┌────────────────┐   ┌───────────┐   ┌─────────────────┐   ┌──────┐
//! │ User │──►│ Input scanners │──►│ Anonymize │──►│    Generator    │──►│      │
//! └──────┘   └───────┬────────┘   └───────────┘   └────────┬────────┘   │      │
//!                    │ block                               ▼            │      │
//!                    ▼                            ┌─────────────────┐   │ User │
//!               refusal ◄──────────── block ──────│ Output scanners │   │      │
//!                                                 └────────┬────────┘   │      │
//!                                                          ▼            │      │
//!                                                 ┌─────────────────┐   │      │
//!                                                 │   Deanonymize   │──►│      │
//!                                                 └─────────────────┘   └──────┘
//! ```

pub mod anonymize;
pub mod audit;
pub mod config;
pub mod error;
pub mod generator;
pub mod pii;
pub mod pipeline;
pub mod policy;
#[cfg(feature = "rate-limit")]
pub mod rate_limit;
pub mod runner;
pub mod scanners;
pub mod types;
pub mod vault;

pub use config::WardenConfig;
pub use error::{Result, WardenError};
pub use pipeline::{HealthReport, Pipeline};
pub use types::*;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::anonymize::Anonymizer;
    pub use crate::config::{GenerationParams, ScannerConfig, WardenConfig};
    pub use crate::error::{Result, WardenError};
    pub use crate::generator::{BlockingGenerator, Generator, LlamaServerGenerator};
    pub use crate::pipeline::{HealthReport, Pipeline};
    pub use crate::policy::ScanPolicy;
    pub use crate::scanners::Scanner;
    pub use crate::types::*;
    pub use crate::vault::Vault;
}
