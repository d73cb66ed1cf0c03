//! Truthloop CLI
//!
//! Thin front end over [`truthloop_agents::FactChecker`]: argument parsing,
//! config loading, dataset loading and tracing setup. Every playbook change
//! goes through the checker's feedback and warmup paths.

pub mod app;
pub mod args;
pub mod dataset;
pub mod error;
pub mod telemetry;

pub use app::{build_checker, load_config, run};
pub use args::{parse, Command, Invocation, CONFIG_ENV, USAGE};
pub use dataset::{detect_delimiter, load_rows, parse_rows};
pub use error::{CliError, CliResult};
