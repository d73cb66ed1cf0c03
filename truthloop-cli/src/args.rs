//! Command-line parsing.

use crate::error::{CliError, CliResult};
use std::path::PathBuf;
use truthloop_core::{CaseId, MemoryType, Outcome, RuleId, VerificationMode};

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "TRUTHLOOP_CONFIG";

pub const USAGE: &str = "\
usage: truthloop [--config <path>] <command> [args]

commands:
  status                               active playbook summary
  rules [detection|trust]              list rules
  rule <rule-id>                       show one rule
  verify [--static] <claim...>         verify a claim (evolving mode by default)
  feedback <case-id> [--truth <true|false>] [--comment <text>]
  warmup <dataset.csv>                 train the active playbook on labelled rows
  evaluate <dataset.csv>               score static verification on labelled rows
  cases [--offset <n>] [--limit <n>]   list cases, newest first
  case <case-id>                       show one case
  delete-case <case-id>                delete an unreferenced case
  stats                                case log statistics
  history [<version>]                  playbook history, or one historical version
  playbooks                            list playbooks
  create <name>                        create an empty playbook
  switch <name>                        make a playbook active
  audit                                check rule provenance";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Status,
    Rules { memory: Option<MemoryType> },
    Rule { id: RuleId },
    Verify { claim: String, mode: VerificationMode },
    Feedback {
        case_id: CaseId,
        ground_truth: Option<Outcome>,
        comment: Option<String>,
    },
    Warmup { dataset: PathBuf },
    Evaluate { dataset: PathBuf },
    Cases { offset: usize, limit: usize },
    Case { id: CaseId },
    DeleteCase { id: CaseId },
    Stats,
    History { version: Option<u64> },
    Playbooks,
    Create { name: String },
    Switch { name: String },
    Audit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub config_path: Option<PathBuf>,
    pub command: Command,
}

impl Invocation {
    /// Parse the process arguments, falling back to `TRUTHLOOP_CONFIG`.
    pub fn from_env() -> CliResult<Self> {
        let mut invocation = parse(std::env::args().skip(1))?;
        if invocation.config_path.is_none() {
            invocation.config_path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        }
        Ok(invocation)
    }
}

/// Parse arguments (program name already stripped).
pub fn parse(args: impl IntoIterator<Item = String>) -> CliResult<Invocation> {
    let mut config_path = None;
    let mut rest = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            let path = args
                .next()
                .ok_or_else(|| CliError::usage("--config needs a path"))?;
            config_path = Some(PathBuf::from(path));
        } else {
            rest.push(arg);
        }
    }

    let mut rest = rest.into_iter();
    let name = rest.next().ok_or_else(|| CliError::usage("missing command"))?;
    let args: Vec<String> = rest.collect();
    let command = match name.as_str() {
        "status" => no_args(&name, &args, Command::Status)?,
        "rules" => Command::Rules {
            memory: match args.as_slice() {
                [] => None,
                [memory] => Some(memory.parse().map_err(|e| CliError::usage(format!("{e}")))?),
                _ => return Err(CliError::usage("rules takes at most one memory type")),
            },
        },
        "rule" => Command::Rule {
            id: RuleId::new(single(&name, &args)?),
        },
        "verify" => parse_verify(&args)?,
        "feedback" => parse_feedback(&args)?,
        "warmup" => Command::Warmup {
            dataset: PathBuf::from(single(&name, &args)?),
        },
        "evaluate" => Command::Evaluate {
            dataset: PathBuf::from(single(&name, &args)?),
        },
        "cases" => parse_cases(&args)?,
        "case" => Command::Case {
            id: case_id(single(&name, &args)?)?,
        },
        "delete-case" => Command::DeleteCase {
            id: case_id(single(&name, &args)?)?,
        },
        "stats" => no_args(&name, &args, Command::Stats)?,
        "history" => Command::History {
            version: match args.as_slice() {
                [] => None,
                [v] => Some(number(v, "version")?),
                _ => return Err(CliError::usage("history takes at most one version")),
            },
        },
        "playbooks" => no_args(&name, &args, Command::Playbooks)?,
        "create" => Command::Create {
            name: single(&name, &args)?.to_string(),
        },
        "switch" => Command::Switch {
            name: single(&name, &args)?.to_string(),
        },
        "audit" => no_args(&name, &args, Command::Audit)?,
        other => return Err(CliError::usage(format!("unknown command '{other}'"))),
    };
    Ok(Invocation {
        config_path,
        command,
    })
}

fn no_args(name: &str, args: &[String], command: Command) -> CliResult<Command> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(CliError::usage(format!("{name} takes no arguments")))
    }
}

fn single<'a>(name: &str, args: &'a [String]) -> CliResult<&'a str> {
    match args {
        [value] => Ok(value.as_str()),
        _ => Err(CliError::usage(format!("{name} takes exactly one argument"))),
    }
}

fn case_id(value: &str) -> CliResult<CaseId> {
    value
        .parse()
        .map_err(|e| CliError::usage(format!("invalid case id '{value}': {e}")))
}

fn number<T: std::str::FromStr>(value: &str, what: &str) -> CliResult<T> {
    value
        .parse()
        .map_err(|_| CliError::usage(format!("invalid {what} '{value}'")))
}

fn parse_verify(args: &[String]) -> CliResult<Command> {
    let mut mode = VerificationMode::Evolving;
    let mut words = Vec::new();
    for arg in args {
        match arg.as_str() {
            "--static" => mode = VerificationMode::Static,
            "--evolving" => mode = VerificationMode::Evolving,
            _ => words.push(arg.as_str()),
        }
    }
    let claim = words.join(" ");
    if claim.trim().is_empty() {
        return Err(CliError::usage("verify needs a claim"));
    }
    Ok(Command::Verify { claim, mode })
}

fn parse_feedback(args: &[String]) -> CliResult<Command> {
    let mut args = args.iter();
    let id = args
        .next()
        .ok_or_else(|| CliError::usage("feedback needs a case id"))?;
    let mut ground_truth = None;
    let mut comment = None;
    while let Some(flag) = args.next() {
        let value = args
            .next()
            .ok_or_else(|| CliError::usage(format!("{flag} needs a value")))?;
        match flag.as_str() {
            "--truth" => {
                ground_truth = Some(
                    value
                        .parse::<Outcome>()
                        .map_err(|e| CliError::usage(format!("{e}")))?,
                )
            }
            "--comment" => comment = Some(value.clone()),
            other => return Err(CliError::usage(format!("unknown feedback flag '{other}'"))),
        }
    }
    if ground_truth.is_none() && comment.is_none() {
        return Err(CliError::usage("feedback needs --truth or --comment"));
    }
    Ok(Command::Feedback {
        case_id: case_id(id)?,
        ground_truth,
        comment,
    })
}

fn parse_cases(args: &[String]) -> CliResult<Command> {
    let mut offset = 0;
    let mut limit = 20;
    let mut args = args.iter();
    while let Some(flag) = args.next() {
        let value = args
            .next()
            .ok_or_else(|| CliError::usage(format!("{flag} needs a value")))?;
        match flag.as_str() {
            "--offset" => offset = number(value, "offset")?,
            "--limit" => limit = number(value, "limit")?,
            other => return Err(CliError::usage(format!("unknown cases flag '{other}'"))),
        }
    }
    Ok(Command::Cases { offset, limit })
}
