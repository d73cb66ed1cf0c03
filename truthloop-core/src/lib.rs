//! Truthloop Core - Entity Types
//!
//! Pure data structures shared by every other crate: identifiers, enums,
//! rules, cases, insights, deltas, the persisted playbook document, the error
//! taxonomy and configuration. No I/O beyond reading a config file.

mod config;
mod delta;
mod document;
mod entities;
mod enums;
mod error;
mod identity;

pub use config::*;
pub use delta::*;
pub use document::*;
pub use entities::*;
pub use enums::*;
pub use error::*;
pub use identity::*;

// ============================================================================
// PROPERTY TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_memory() -> impl Strategy<Value = MemoryType> {
        prop_oneof![Just(MemoryType::Detection), Just(MemoryType::Trust)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property: generated rule ids always parse back to their memory prefix and sequence.
        #[test]
        fn prop_rule_id_sequence_roundtrip(memory in arb_memory(), seq in 0u32..1_000_000) {
            let id = RuleId::for_sequence(memory, seq);
            prop_assert_eq!(id.prefix(), Some(memory.id_prefix()));
            prop_assert_eq!(id.sequence(), Some(seq));
        }

        /// Property: next_rule_id never collides with an existing id.
        #[test]
        fn prop_next_rule_id_is_fresh(
            seqs in proptest::collection::vec((arb_memory(), 1u32..500), 0..20),
            target in arb_memory(),
        ) {
            let rules = seqs.iter().map(|(memory, seq)| {
                Rule::new(
                    RuleId::for_sequence(*memory, *seq),
                    *memory,
                    RuleKind::Strategy,
                    "ALWAYS",
                    "act",
                    0.5,
                )
            });
            let doc = PlaybookDocument::seeded(rules);
            let next = doc.next_rule_id(target);
            prop_assert!(!doc.contains(&next));
        }

        /// Property: memory for an outcome implies that same outcome.
        #[test]
        fn prop_memory_for_outcome(truth in any::<bool>()) {
            let outcome = if truth { Outcome::True } else { Outcome::False };
            prop_assert_eq!(MemoryType::for_outcome(outcome).implied_outcome(), outcome);
            prop_assert_ne!(outcome.opposite(), outcome);
        }
    }
}
