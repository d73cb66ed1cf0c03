//! Wiring and command execution.

use crate::args::Command;
use crate::dataset::load_rows;
use crate::error::CliResult;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use truthloop_agents::{FactChecker, FeedbackOutcome, LabelledClaim};
use truthloop_core::{
    Feedback, MemoryType, Outcome, PlaybookError, RuleId, TruthloopConfig, TruthloopError,
};
use truthloop_llm::ProviderRegistry;
use truthloop_playbook::PlaybookRegistry;
use truthloop_storage::{CaseFilter, CaseStore, LmdbStore, PageRequest, PlaybookBackend};

/// Load the config file if one was given, otherwise use defaults. Always validated.
pub fn load_config(path: Option<&Path>) -> CliResult<TruthloopConfig> {
    let config = match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config");
            TruthloopConfig::from_path(path)?
        }
        None => TruthloopConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Open LMDB storage under the configured data dir and build the checker.
pub fn build_checker(config: &TruthloopConfig) -> CliResult<FactChecker> {
    let store = Arc::new(
        LmdbStore::open(&config.storage.data_dir, config.storage.map_size_bytes())
            .map_err(TruthloopError::from)?,
    );
    let backend: Arc<dyn PlaybookBackend> = store.clone();
    let cases: Arc<dyn CaseStore> = store;
    let registry = PlaybookRegistry::new(
        backend,
        config.matching.clone(),
        &config.storage.active_playbook,
        Vec::new(),
    )?;
    let providers = ProviderRegistry::from_config(&config.providers)?;
    tracing::debug!(?providers, data_dir = %config.storage.data_dir.display(), "checker ready");
    Ok(FactChecker::new(Arc::new(registry), cases, providers, config)?)
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run one command against `checker`, printing its result on stdout.
pub async fn run(checker: &FactChecker, command: Command) -> CliResult<()> {
    match command {
        Command::Status => {
            print_json(&checker.playbook_status()?)?;
            println!("{}", checker.registry().active()?.brief_summary()?);
        }
        Command::Rules { memory } => {
            let memories = match memory {
                Some(memory) => vec![memory],
                None => MemoryType::ALL.to_vec(),
            };
            let mut rules = Vec::new();
            for memory in memories {
                rules.extend(checker.rules(memory)?);
            }
            print_json(&rules)?;
        }
        Command::Rule { id } => match checker.rule(&id)? {
            Some(rule) => print_json(&rule)?,
            None => return Err(rule_not_found(id)),
        },
        Command::Verify { claim, mode } => {
            let case = checker.verify(&claim, mode).await?;
            print_json(&case)?;
        }
        Command::Feedback {
            case_id,
            ground_truth,
            comment,
        } => {
            let mut feedback = Feedback::new(case_id);
            if let Some(truth) = ground_truth {
                feedback = feedback.with_ground_truth(truth);
            }
            if let Some(comment) = comment {
                feedback = feedback.with_comment(comment);
            }
            match checker.submit_feedback(&feedback).await? {
                FeedbackOutcome::Applied(report) => print_json(&report)?,
                FeedbackOutcome::NoChange { note } => println!("no change: {note}"),
                FeedbackOutcome::Unresolved { reason } => println!("unresolved: {reason}"),
            }
        }
        Command::Warmup { dataset } => {
            let rows = load_rows(&dataset)?;
            print_json(&checker.warmup(&rows).await?)?;
        }
        Command::Evaluate { dataset } => {
            let labelled: Vec<LabelledClaim> = load_rows(&dataset)?
                .into_iter()
                .filter_map(|row| {
                    let label = row.label.parse::<Outcome>().ok()?;
                    (!row.claim.is_empty()).then_some(LabelledClaim {
                        claim: row.claim,
                        label,
                    })
                })
                .collect();
            print_json(&checker.evaluate(&labelled, 4).await)?;
        }
        Command::Cases { offset, limit } => {
            print_json(&checker.cases(&CaseFilter::default(), PageRequest::new(offset, limit))?)?;
        }
        Command::Case { id } => match checker.case(id)? {
            Some(case) => print_json(&case)?,
            None => println!("case {id} not found"),
        },
        Command::DeleteCase { id } => {
            if checker.delete_case(id)? {
                println!("deleted {id}");
            } else {
                println!("case {id} not found");
            }
        }
        Command::Stats => print_json(&checker.stats()?)?,
        Command::History { version } => match version {
            Some(version) => print_json(&checker.history_version(version)?)?,
            None => print_json(&checker.history()?)?,
        },
        Command::Playbooks => {
            let active = checker.registry().active_name()?;
            for name in checker.registry().names()? {
                let marker = if name == active { "*" } else { " " };
                println!("{marker} {name}");
            }
        }
        Command::Create { name } => {
            let store = checker.registry().create(&name, Vec::new())?;
            print_json(&store.status()?)?;
        }
        Command::Switch { name } => print_json(&checker.switch_playbook(&name)?)?,
        Command::Audit => print_json(&checker.audit()?)?,
    }
    Ok(())
}

fn rule_not_found(rule_id: RuleId) -> crate::error::CliError {
    TruthloopError::Playbook(PlaybookError::RuleNotFound { rule_id }).into()
}
