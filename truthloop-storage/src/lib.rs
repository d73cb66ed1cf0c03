//! Truthloop Storage - Storage Traits, Mock and LMDB Implementations
//!
//! Defines the persistence seams used by the playbook store and the agents:
//! [`PlaybookBackend`] for versioned playbook envelopes and [`CaseStore`] for
//! the append-only case log. [`LmdbStore`] implements both on one LMDB
//! environment; the mocks keep everything in memory.

mod envelope;
mod lmdb;
mod mock;
mod query;
mod traits;

pub use envelope::{encode_document, DocumentEnvelope, EnvelopeError};
pub use lmdb::{LmdbStore, LmdbStoreError};
pub use mock::{MockCaseStore, MockPlaybookBackend};
pub use query::{CaseFilter, CasePage, CaseStats, PageRequest};
pub use traits::{CaseStore, PlaybookBackend};
