//! Property tests for placeholder anonymization

use proptest::prelude::*;
use std::sync::Arc;
use tokio_test::block_on;
use warden_guard::anonymize::Anonymizer;
use warden_guard::config::PiiConfig;
use warden_guard::vault::Vault;

const SENSITIVE: &[&str] = &[
    "SSN-123-45-6789",
    "alice@example.com",
    "bob.smith@corp.io",
    "555-123-4567",
    "10.20.30.40",
    "4111 1111 1111 1111",
];

const TYPED_CATEGORIES: &[&str] = &[
    "SSN",
    "EMAIL_ADDRESS",
    "PHONE_NUMBER",
    "IP_ADDRESS",
    "CREDIT_CARD",
    "NOTE",
];

/// Placeholder-shaped text a user might type themselves
fn typed_placeholder() -> impl Strategy<Value = String> {
    (prop::sample::select(TYPED_CATEGORIES), 1..4usize)
        .prop_map(|(category, n)| format!("<{category}_{n}>"))
}

/// Filler chunks: words, possibly with typed placeholders, never PII
fn filler() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => "[a-z ]{1,12}".prop_map(|s| format!(" {s} ")),
        1 => typed_placeholder().prop_map(|p| format!(" {p} ")),
    ]
}

/// Text interleaving filler with known sensitive values
fn message() -> impl Strategy<Value = String> {
    prop::collection::vec((filler(), prop::sample::select(SENSITIVE)), 0..5).prop_map(|parts| {
        parts
            .into_iter()
            .map(|(chunk, value)| format!("{chunk}{value}"))
            .collect::<String>()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn deanonymize_restores_original(text in message()) {
        let anonymizer = Anonymizer::new(PiiConfig::default(), Arc::new(Vault::new()));

        let restored = block_on(async {
            let anonymized = anonymizer.anonymize(&text, "s1").await;
            anonymizer.deanonymize(&anonymized.text, "s1").await
        });

        prop_assert_eq!(restored, text);
    }

    #[test]
    fn anonymized_text_hides_every_value(text in message()) {
        let anonymizer = Anonymizer::new(PiiConfig::default(), Arc::new(Vault::new()));

        let anonymized = block_on(anonymizer.anonymize(&text, "s1"));

        for value in SENSITIVE {
            prop_assert!(!anonymized.text.contains(*value));
        }
    }

    #[test]
    fn anonymize_is_stable_within_a_session(text in message()) {
        let anonymizer = Anonymizer::new(PiiConfig::default(), Arc::new(Vault::new()));

        let (first, second) = block_on(async {
            let first = anonymizer.anonymize(&text, "s1").await;
            let second = anonymizer.anonymize(&text, "s1").await;
            (first, second)
        });

        prop_assert_eq!(&first.text, &second.text);
        prop_assert_eq!(first.mapping, second.mapping);
    }

    #[test]
    fn anonymizing_placeholders_is_a_no_op(text in message()) {
        let anonymizer = Anonymizer::new(PiiConfig::default(), Arc::new(Vault::new()));

        let (once, twice) = block_on(async {
            let once = anonymizer.anonymize(&text, "s1").await;
            let twice = anonymizer.anonymize(&once.text, "s1").await;
            (once, twice)
        });

        prop_assert_eq!(&once.text, &twice.text);
        prop_assert!(!twice.is_modified());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_anonymize_assigns_one_placeholder_per_value() {
    let anonymizer = Arc::new(Anonymizer::new(PiiConfig::default(), Arc::new(Vault::new())));

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let anonymizer = anonymizer.clone();
            let value = SENSITIVE[i % 2];
            tokio::spawn(async move { anonymizer.anonymize(&format!("x {value} y"), "s1").await })
        })
        .collect();

    let mut texts = Vec::new();
    for handle in handles {
        texts.push(handle.await.unwrap().text);
    }
    texts.sort();
    texts.dedup();

    assert_eq!(texts, vec!["x <EMAIL_ADDRESS_1> y", "x <SSN_1> y"]);
    let mapping = anonymizer.vault().mapping("s1").await.unwrap();
    assert_eq!(mapping.len(), 2);
}
