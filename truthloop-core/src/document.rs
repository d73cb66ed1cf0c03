//! Persisted playbook document

use crate::{content_hash_hex, MemoryType, Rule, RuleId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// One version of a playbook: two rule memories plus counters.
///
/// This is exactly what gets written to history for every applied delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookDocument {
    pub version: u64,
    pub detection_rules: Vec<Rule>,
    pub trust_rules: Vec<Rule>,
    /// Number of feedback deltas applied since the seed. Feedback that ends in
    /// no change is not counted, and a recovery re-commit does not count either.
    pub total_cases_processed: u64,
    pub last_updated: Timestamp,
}

impl PlaybookDocument {
    /// Version 1 document holding the given seed rules, partitioned by memory.
    pub fn seeded(rules: impl IntoIterator<Item = Rule>) -> Self {
        let (detection_rules, trust_rules) = rules
            .into_iter()
            .partition(|rule| rule.memory_type == MemoryType::Detection);
        Self {
            version: 1,
            detection_rules,
            trust_rules,
            total_cases_processed: 0,
            last_updated: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::seeded(Vec::new())
    }

    pub fn rules(&self, memory: MemoryType) -> &[Rule] {
        match memory {
            MemoryType::Detection => &self.detection_rules,
            MemoryType::Trust => &self.trust_rules,
        }
    }

    pub fn rules_mut(&mut self, memory: MemoryType) -> &mut Vec<Rule> {
        match memory {
            MemoryType::Detection => &mut self.detection_rules,
            MemoryType::Trust => &mut self.trust_rules,
        }
    }

    /// All rules, detection memory first.
    pub fn all_rules(&self) -> impl Iterator<Item = &Rule> {
        self.detection_rules.iter().chain(self.trust_rules.iter())
    }

    pub fn find(&self, id: &RuleId) -> Option<&Rule> {
        self.all_rules().find(|rule| &rule.id == id)
    }

    pub fn find_mut(&mut self, id: &RuleId) -> Option<&mut Rule> {
        self.detection_rules
            .iter_mut()
            .chain(self.trust_rules.iter_mut())
            .find(|rule| &rule.id == id)
    }

    pub fn contains(&self, id: &RuleId) -> bool {
        self.find(id).is_some()
    }

    pub fn active_count(&self, memory: MemoryType) -> usize {
        self.rules(memory).iter().filter(|rule| rule.active).count()
    }

    /// Next free id in `memory`: highest existing sequence with the same
    /// prefix (in either memory) plus one.
    pub fn next_rule_id(&self, memory: MemoryType) -> RuleId {
        let next = self
            .all_rules()
            .filter(|rule| rule.id.prefix() == Some(memory.id_prefix()))
            .filter_map(|rule| rule.id.sequence())
            .max()
            .unwrap_or(0)
            .saturating_add(1);
        RuleId::for_sequence(memory, next)
    }

    /// Hex SHA-256 of the canonical JSON encoding.
    pub fn checksum(&self) -> Result<String, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        Ok(content_hash_hex(&bytes))
    }
}
