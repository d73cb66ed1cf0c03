//! HTTP JSON provider implementations
//!
//! Both capabilities speak plain JSON over `POST` to a configured endpoint
//! and share one rate-limited client.

pub mod client;
pub mod reasoning;
pub mod retrieval;
pub mod types;

pub use client::HttpClient;
pub use reasoning::HttpReasoningProvider;
pub use retrieval::HttpEvidenceRetriever;
