use chrono::{DateTime, Utc};
use opm::quota::{time_until_reset, QuotaResult, QuotaWindow};
use opm::{OpmError, PresetManager, PresetSummary, SwitchOutcome};
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "OPM_LOG";

#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    message: String,
    exit_code: i32,
}

impl CliError {
    fn new(message: impl Into<String>, exit_code: i32) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }
}

impl From<OpmError> for CliError {
    fn from(err: OpmError) -> Self {
        Self::new(err.to_string(), err.exit_code())
    }
}

type CliResult<T> = Result<T, CliError>;

#[derive(Debug, PartialEq)]
enum CliCommand {
    Help,
    List,
    Save {
        name: String,
        description: String,
        watched_services: Option<Vec<String>>,
    },
    Switch {
        name: String,
        only: Option<Vec<String>>,
        backup: bool,
    },
    Delete(String),
    Info(String),
    Detect,
    Quota {
        json: bool,
    },
    AuthPath(Option<PathBuf>),
}

const SAVE_USAGE: &str = "usage: opm save <name> [--description <text>] [--watch <svc,..>]";
const SWITCH_USAGE: &str = "usage: opm switch <name> [--only <svc,..>] [--no-backup]";

impl CliCommand {
    fn parse(args: &[String]) -> CliResult<Self> {
        let Some(first) = args.first() else {
            return Ok(Self::List);
        };

        match first.as_str() {
            "-h" | "--help" | "help" => Ok(Self::Help),
            "list" | "ls" => {
                if args.len() != 1 {
                    return Err(CliError::new("usage: opm list", 2));
                }
                Ok(Self::List)
            }
            "save" => {
                let Some(name) = args.get(1).filter(|name| !name.starts_with("--")) else {
                    return Err(CliError::new(SAVE_USAGE, 2));
                };
                let mut description = String::new();
                let mut watched_services = None;
                let mut i = 2;
                while i < args.len() {
                    match args[i].as_str() {
                        "--description" | "-d" => {
                            i += 1;
                            let value = args.get(i).ok_or_else(|| CliError::new(SAVE_USAGE, 2))?;
                            description = value.clone();
                        }
                        "--watch" => {
                            i += 1;
                            let value = args.get(i).ok_or_else(|| CliError::new(SAVE_USAGE, 2))?;
                            watched_services = Some(split_services(value));
                        }
                        _ => return Err(CliError::new(SAVE_USAGE, 2)),
                    }
                    i += 1;
                }
                Ok(Self::Save {
                    name: name.clone(),
                    description,
                    watched_services,
                })
            }
            "switch" | "use" => {
                let Some(name) = args.get(1).filter(|name| !name.starts_with("--")) else {
                    return Err(CliError::new(SWITCH_USAGE, 2));
                };
                let mut only = None;
                let mut backup = true;
                let mut i = 2;
                while i < args.len() {
                    match args[i].as_str() {
                        "--no-backup" => backup = false,
                        "--only" => {
                            i += 1;
                            let value =
                                args.get(i).ok_or_else(|| CliError::new(SWITCH_USAGE, 2))?;
                            only = Some(split_services(value));
                        }
                        _ => return Err(CliError::new(SWITCH_USAGE, 2)),
                    }
                    i += 1;
                }
                Ok(Self::Switch {
                    name: name.clone(),
                    only,
                    backup,
                })
            }
            "delete" | "rm" => {
                if args.len() != 2 {
                    return Err(CliError::new("usage: opm delete <name>", 2));
                }
                Ok(Self::Delete(args[1].clone()))
            }
            "info" => {
                if args.len() != 2 {
                    return Err(CliError::new("usage: opm info <name>", 2));
                }
                Ok(Self::Info(args[1].clone()))
            }
            "detect" => {
                if args.len() != 1 {
                    return Err(CliError::new("usage: opm detect", 2));
                }
                Ok(Self::Detect)
            }
            "quota" => match &args[1..] {
                [] => Ok(Self::Quota { json: false }),
                [flag] if flag == "--json" => Ok(Self::Quota { json: true }),
                _ => Err(CliError::new("usage: opm quota [--json]", 2)),
            },
            "auth-path" => match &args[1..] {
                [] => Ok(Self::AuthPath(None)),
                [path] => Ok(Self::AuthPath(Some(PathBuf::from(path)))),
                _ => Err(CliError::new("usage: opm auth-path [<path>]", 2)),
            },
            _ => Err(CliError::new(format!("unknown command: {}", first), 2)),
        }
    }
}

fn split_services(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|service| !service.is_empty())
        .map(str::to_string)
        .collect()
}

fn print_usage() {
    println!(
        "opm - OAuth preset manager\n\n\
         Usage:\n\
           opm list                                   List saved presets\n\
           opm save <name> [--description <text>]     Save the live auth file as a preset\n\
                           [--watch <svc,..>]\n\
           opm switch <name> [--only <svc,..>]        Make a preset live (backs up first)\n\
                             [--no-backup]\n\
           opm delete <name>                          Delete a preset\n\
           opm info <name>                            Show a preset's services and metadata\n\
           opm detect                                 Find the preset matching the live file\n\
           opm quota [--json]                         Show remaining quota per token\n\
           opm auth-path [<path>]                     Show or set the live auth file path\n\
           opm help                                   Show this help"
    );
}

fn preset_list_lines(presets: &[PresetSummary]) -> Vec<String> {
    if presets.is_empty() {
        return vec!["no presets saved".to_string()];
    }
    presets
        .iter()
        .map(|preset| {
            let marker = if preset.is_current { "*" } else { " " };
            let mut line = format!(
                "{} {} [{}] last used: {}",
                marker,
                preset.name,
                preset.services.join(", "),
                preset.last_used
            );
            if !preset.description.is_empty() {
                line.push_str(&format!(" - {}", preset.description));
            }
            line
        })
        .collect()
}

fn switch_outcome_lines(outcome: &SwitchOutcome) -> Vec<String> {
    let mut lines = vec![format!(
        "switched to {} ({})",
        outcome.preset_name,
        outcome.destination_path.display()
    )];
    if let Some(selected) = &outcome.selected_services {
        lines.push(format!("  only: {}", selected.join(", ")));
    }
    for (label, services) in [
        ("added", &outcome.diff.added),
        ("removed", &outcome.diff.removed),
        ("modified", &outcome.diff.modified),
        ("unchanged", &outcome.diff.unchanged),
    ] {
        if !services.is_empty() {
            lines.push(format!("  {}: {}", label, services.join(", ")));
        }
    }
    if let Some(backup) = &outcome.backup_path {
        lines.push(format!("  backup: {}", backup.display()));
    }
    lines
}

fn window_text(window: &QuotaWindow, now: DateTime<Utc>) -> String {
    format!(
        "{}% (resets {})",
        window.percent_remaining,
        time_until_reset(window.reset_time_iso.as_deref(), now)
    )
}

fn quota_lines(results: &[QuotaResult], now: DateTime<Utc>) -> Vec<String> {
    results
        .iter()
        .map(|result| {
            let provider = serde_json::to_value(result.provider)
                .ok()
                .and_then(|value| value.as_str().map(str::to_string))
                .unwrap_or_default();
            let account = result.account_id.as_deref().unwrap_or("-");
            let head = format!("{} {} [{}]", provider, account, result.presets.join(", "));
            if let Some(error) = &result.error {
                return format!("{}: error: {}", head, error);
            }
            let mut parts = Vec::new();
            if let Some(daily) = &result.daily {
                let label = daily.label.as_deref().unwrap_or("daily");
                parts.push(format!("{} {}", label, window_text(daily, now)));
            }
            if let Some(weekly) = &result.weekly {
                parts.push(format!("weekly {}", window_text(weekly, now)));
            }
            if parts.is_empty() {
                parts.push("--".to_string());
            }
            format!("{}: {}", head, parts.join(" "))
        })
        .collect()
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("opm: {}", err.message);
        std::process::exit(err.exit_code);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> CliResult<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = CliCommand::parse(&args)?;
    if command == CliCommand::Help {
        print_usage();
        return Ok(());
    }
    let mut manager = PresetManager::from_env()?;

    match command {
        CliCommand::Help => print_usage(),
        CliCommand::List => {
            for line in preset_list_lines(&manager.list_presets()?) {
                println!("{}", line);
            }
        }
        CliCommand::Save {
            name,
            description,
            watched_services,
        } => {
            manager.save_preset(&name, &description, watched_services)?;
            println!("saved preset {}", name);
        }
        CliCommand::Switch { name, only, backup } => {
            let outcome = manager.switch_preset_with(&name, only, backup)?;
            for line in switch_outcome_lines(&outcome) {
                println!("{}", line);
            }
        }
        CliCommand::Delete(name) => {
            manager.delete_preset(&name)?;
            println!("deleted preset {}", name);
        }
        CliCommand::Info(name) => {
            let info = manager
                .get_preset_info(&name)?
                .ok_or(OpmError::PresetNotFound(name))?;
            let json = serde_json::to_string_pretty(&info)
                .map_err(|err| CliError::new(format!("failed to serialize preset: {}", err), 1))?;
            println!("{}", json);
        }
        CliCommand::Detect => match manager.detect_current_preset() {
            Some(name) => println!("{}", name),
            None => println!("no preset matches the live auth file"),
        },
        CliCommand::Quota { json } => {
            let results = manager.collect_all_quota();
            if json {
                let json = serde_json::to_string_pretty(&results).map_err(|err| {
                    CliError::new(format!("failed to serialize quota output: {}", err), 1)
                })?;
                println!("{}", json);
            } else {
                for line in quota_lines(&results, Utc::now()) {
                    println!("{}", line);
                }
            }
        }
        CliCommand::AuthPath(None) => println!("{}", manager.auth_path().display()),
        CliCommand::AuthPath(Some(path)) => {
            manager.set_auth_path(path)?;
            println!("auth path set to {}", manager.auth_path().display());
        }
    }
    Ok(())
}
