//! Persisted document validation.
//!
//! A document is trusted only when its envelope checksum matches, rule ids are
//! unique across both memories, every rule sits in the partition of its
//! memory type, and every confidence is a finite number in `[0, 1]`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use truthloop_core::{MemoryType, PlaybookDocument, RuleId};
use truthloop_storage::{DocumentEnvelope, EnvelopeError};

/// Type of validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueType {
    /// Envelope bytes are not a decodable document
    Malformed,
    /// Stored checksum does not match the document
    ChecksumMismatch,
    /// The same rule id appears more than once
    DuplicateRuleId,
    /// A rule sits in the wrong memory partition
    MisplacedRule,
    /// Confidence is NaN, infinite or outside [0, 1]
    ConfidenceOutOfRange,
    /// History entry version does not match its key
    VersionMismatch,
}

/// A validation issue found in a persisted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub issue_type: IssueType,
    pub message: String,
    pub rule_id: Option<RuleId>,
}

/// Result of validating one document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn add_issue(&mut self, issue_type: IssueType, message: String, rule_id: Option<RuleId>) {
        self.issues.push(ValidationIssue {
            issue_type,
            message,
            rule_id,
        });
    }

    pub fn issues_of_type(&self, issue_type: IssueType) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.issue_type == issue_type)
            .collect()
    }

    /// One-line summary for logs and error messages.
    pub fn summary(&self) -> String {
        self.issues
            .iter()
            .map(|i| i.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Structural checks on a decoded document.
pub fn validate_document(doc: &PlaybookDocument) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut seen = HashSet::new();

    for memory in MemoryType::ALL {
        for rule in doc.rules(memory) {
            if !seen.insert(&rule.id) {
                report.add_issue(
                    IssueType::DuplicateRuleId,
                    format!("rule id {} appears more than once", rule.id),
                    Some(rule.id.clone()),
                );
            }
            if rule.memory_type != memory {
                report.add_issue(
                    IssueType::MisplacedRule,
                    format!(
                        "rule {} has memory type {} but is stored in {}",
                        rule.id, rule.memory_type, memory
                    ),
                    Some(rule.id.clone()),
                );
            }
            if !(rule.confidence.is_finite() && (0.0..=1.0).contains(&rule.confidence)) {
                report.add_issue(
                    IssueType::ConfidenceOutOfRange,
                    format!("rule {} has confidence {}", rule.id, rule.confidence),
                    Some(rule.id.clone()),
                );
            }
        }
    }

    report
}

/// Decode envelope bytes and validate the document inside.
pub fn open_and_validate(bytes: &[u8]) -> Result<PlaybookDocument, ValidationReport> {
    let envelope = match DocumentEnvelope::open(bytes) {
        Ok(envelope) => envelope,
        Err(e) => {
            let issue_type = match e {
                EnvelopeError::Malformed(_) => IssueType::Malformed,
                EnvelopeError::ChecksumMismatch { .. } => IssueType::ChecksumMismatch,
            };
            let mut report = ValidationReport::default();
            report.add_issue(issue_type, e.to_string(), None);
            return Err(report);
        }
    };
    let report = validate_document(&envelope.document);
    if report.is_valid() {
        Ok(envelope.document)
    } else {
        Err(report)
    }
}

/// Like [`open_and_validate`], additionally requiring `document.version == version`.
pub fn open_history_entry(bytes: &[u8], version: u64) -> Result<PlaybookDocument, ValidationReport> {
    let doc = open_and_validate(bytes)?;
    if doc.version != version {
        let mut report = ValidationReport::default();
        report.add_issue(
            IssueType::VersionMismatch,
            format!("history entry {} holds version {}", version, doc.version),
            None,
        );
        return Err(report);
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use truthloop_storage::encode_document;
    use truthloop_test_utils::{always_rule, seed_document};

    #[test]
    fn test_seed_document_is_valid() {
        assert!(validate_document(&seed_document()).is_valid());
    }

    #[test]
    fn test_duplicate_ids_across_memories() {
        let mut doc = seed_document();
        doc.trust_rules
            .push(always_rule("det-00001", MemoryType::Trust, 0.5));
        let report = validate_document(&doc);
        assert_eq!(report.issues_of_type(IssueType::DuplicateRuleId).len(), 1);
    }

    #[test]
    fn test_misplaced_rule() {
        let mut doc = seed_document();
        doc.detection_rules
            .push(always_rule("tru-00009", MemoryType::Trust, 0.5));
        let report = validate_document(&doc);
        assert_eq!(report.issues_of_type(IssueType::MisplacedRule).len(), 1);
    }

    #[test]
    fn test_confidence_out_of_range() {
        let mut doc = seed_document();
        doc.detection_rules[0].confidence = 1.5;
        doc.trust_rules[0].confidence = f64::NAN;
        let report = validate_document(&doc);
        assert_eq!(report.issues_of_type(IssueType::ConfidenceOutOfRange).len(), 2);
        assert!(!report.summary().is_empty());
    }

    #[test]
    fn test_open_history_entry_checks_version() {
        let doc = seed_document();
        let bytes = encode_document(&doc).unwrap();
        assert!(open_history_entry(&bytes, 1).is_ok());
        let err = open_history_entry(&bytes, 2).unwrap_err();
        assert_eq!(err.issues[0].issue_type, IssueType::VersionMismatch);
    }

    #[test]
    fn test_open_reports_checksum_mismatch() {
        let bytes = encode_document(&seed_document()).unwrap();
        let tampered = String::from_utf8(bytes)
            .unwrap()
            .replace("\"confidence\":0.6", "\"confidence\":0.65");
        let err = open_and_validate(tampered.as_bytes()).unwrap_err();
        assert_eq!(err.issues[0].issue_type, IssueType::ChecksumMismatch);
    }
}
