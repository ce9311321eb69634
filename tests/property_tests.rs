//! Property-based tests using proptest
//!
//! These tests verify invariants across randomized inputs, helping catch
//! edge cases that might be missed by example-based testing.

use civitai_fetcher::ledger::DownloadLedger;
use civitai_fetcher::{FetchError, ModelIdentifier};
use proptest::prelude::*;

// =============================================================================
// Identifier parsing
// =============================================================================

proptest! {
    /// Any `<int>` / `<int>@<int>` string parses to the matching pair and
    /// the parsed identifier displays back to the same string
    #[test]
    fn identifier_roundtrip(model_id in 0u64..=u64::MAX, version_id in prop::option::of(0u64..=u64::MAX)) {
        let text = match version_id {
            Some(version_id) => format!("{model_id}@{version_id}"),
            None => model_id.to_string(),
        };

        let parsed = ModelIdentifier::parse(&text).expect("valid identifier must parse");
        prop_assert_eq!(parsed.model_id, model_id);
        prop_assert_eq!(parsed.version_id, version_id);
        prop_assert_eq!(parsed.to_string(), text);
    }

    /// Surrounding whitespace never changes the result
    #[test]
    fn identifier_ignores_surrounding_whitespace(model_id in 0u64..1_000_000, pad in "[ \t]{0,4}") {
        let text = format!("{pad}{model_id}{pad}");
        let parsed = ModelIdentifier::parse(&text).expect("padded identifier must parse");
        prop_assert_eq!(parsed.model_id, model_id);
    }

    /// A non-numeric left segment is always a validation error
    #[test]
    fn identifier_rejects_non_numeric_model(junk in "[a-zA-Z_][a-zA-Z0-9_]{0,10}") {
        let result = ModelIdentifier::parse(&junk);
        prop_assert!(matches!(result, Err(FetchError::Validation(_))));
    }

    /// A non-numeric right segment is always a validation error
    #[test]
    fn identifier_rejects_non_numeric_version(model_id in 0u64..1_000_000, junk in "[a-zA-Z_][a-zA-Z0-9_]{0,10}") {
        let text = format!("{model_id}@{junk}");
        let result = ModelIdentifier::parse(&text);
        prop_assert!(matches!(result, Err(FetchError::Validation(_))));
    }
}

// =============================================================================
// Ledger invariants
// =============================================================================

fn arb_file_name() -> impl Strategy<Value = String> {
    "[a-z0-9_]{1,12}\\.(safetensors|ckpt|pt)"
}

proptest! {
    /// Recording the same (model, version, name) twice never grows the ledger
    #[test]
    fn ledger_record_is_idempotent(
        model_id in 1u64..1_000_000,
        version_id in prop::option::of(1u64..1_000_000),
        name in arb_file_name(),
    ) {
        let mut ledger = DownloadLedger::default();

        prop_assert!(ledger.record(model_id, version_id, &name, "https://example.test/dl"));
        let after_first = ledger.versions(model_id).unwrap()[0].files.len();

        prop_assert!(!ledger.record(model_id, version_id, &name, "https://example.test/dl"));
        let after_second = ledger.versions(model_id).unwrap()[0].files.len();

        prop_assert_eq!(after_first, after_second);
    }

    /// Distinct file names under one version all survive
    #[test]
    fn ledger_keeps_distinct_files(
        model_id in 1u64..1_000_000,
        version_id in 1u64..1_000_000,
        names in prop::collection::hash_set(arb_file_name(), 1..6),
    ) {
        let mut ledger = DownloadLedger::default();
        for name in &names {
            prop_assert!(ledger.record(model_id, Some(version_id), name, "u"));
        }

        let records = ledger.versions(model_id).unwrap();
        prop_assert_eq!(records.len(), 1);
        prop_assert_eq!(records[0].files.len(), names.len());
    }

    /// The ledger's JSON wire format round-trips exactly
    #[test]
    fn ledger_json_roundtrip(
        entries in prop::collection::vec(
            (1u64..10_000, prop::option::of(1u64..10_000), arb_file_name()),
            0..8,
        ),
    ) {
        let mut ledger = DownloadLedger::default();
        for (model_id, version_id, name) in &entries {
            ledger.record(*model_id, *version_id, name, "https://example.test/dl");
        }

        let json = serde_json::to_string(&ledger).unwrap();
        let reloaded: DownloadLedger = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(reloaded, ledger);
    }
}
