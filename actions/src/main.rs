//! `actions`: check, upgrade, and exercise rule documents from the command
//! line.

use std::path::{Path, PathBuf};

use actions::check::{check_rules, state_references, upgrade_rules};
use actions::core::expr::display;
use actions::core::patch::{Document, lookup_path};
use actions::core::types::{DispatchOutcome, modified_event};
use actions::error::EngineError;
use actions::exit_codes;
use actions::io::config::{DEFAULT_CONFIG_PATH, load_config};
use actions::io::rules_store::load_rules;
use actions::logging;
use actions::session::{Session, read_state};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(
    name = "actions",
    version,
    about = "Event-driven rule engine over a reactive state store"
)]
struct Cli {
    /// Engine configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a rule document and compile every expression.
    Check { rules: PathBuf },
    /// Print every state variable a rule document touches.
    Refs { rules: PathBuf },
    /// Rewrite a rule document in canonical form.
    Upgrade {
        rules: PathBuf,
        /// Write here instead of replacing the input.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Dispatch one event against the persisted state.
    Dispatch {
        rules: PathBuf,
        origin: String,
        event: String,
        /// Event data as a JSON object.
        #[arg(long)]
        data: Option<String>,
        /// Run the `init` dispatch first.
        #[arg(long)]
        init: bool,
        /// Send the `alt-` variant of the event.
        #[arg(long)]
        alt: bool,
    },
    /// Print the persisted state document, or one (dotted) value.
    State { name: Option<String> },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Check { rules } => cmd_check(&rules),
        Command::Refs { rules } => cmd_refs(&rules),
        Command::Upgrade { rules, output } => cmd_upgrade(&rules, output.as_deref()),
        Command::Dispatch {
            rules,
            origin,
            event,
            data,
            init,
            alt,
        } => {
            let event = modified_event(&event, alt);
            cmd_dispatch(&cli.config, &rules, &origin, &event, data.as_deref(), init)
        }
        Command::State { name } => cmd_state(&cli.config, name.as_deref()),
    }
}

fn cmd_check(rules: &Path) -> Result<i32> {
    let report = check_rules(rules)?;
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    if !report.is_ok() {
        for diagnostic in &report.diagnostics {
            eprintln!("error: {diagnostic}");
        }
        return Ok(exit_codes::INVALID);
    }
    let note = if report.upgraded { " (legacy format)" } else { "" };
    println!("ok: {} rule(s){note}", report.rules);
    Ok(exit_codes::OK)
}

fn cmd_refs(rules: &Path) -> Result<i32> {
    for name in state_references(rules)? {
        println!("{name}");
    }
    Ok(exit_codes::OK)
}

fn cmd_upgrade(rules: &Path, output: Option<&Path>) -> Result<i32> {
    let target = output.unwrap_or(rules);
    let outcome = upgrade_rules(rules, target)?;
    let verb = if outcome.upgraded { "upgraded" } else { "rewrote" };
    println!("{verb} {} rule(s) to {}", outcome.rules, target.display());
    Ok(exit_codes::OK)
}

fn cmd_dispatch(
    config_path: &Path,
    rules: &Path,
    origin: &str,
    event: &str,
    data: Option<&str>,
    init: bool,
) -> Result<i32> {
    let config = load_config(config_path)?;
    let loaded = load_rules(rules)?;
    let data = parse_data(data)?;
    let session = Session::open(&config, &loaded.rules)?;
    let engine = session.engine();

    if init {
        let code = report(engine.init(), "init", "init")?;
        if code != exit_codes::OK {
            return Ok(code);
        }
    }
    report(engine.dispatch(origin, event, data), origin, event)
}

/// Print each cycle of a dispatch. Engine failures map to their own exit
/// code; the state applied before the failure is already persisted.
fn report(
    outcome: Result<DispatchOutcome, EngineError>,
    origin: &str,
    event: &str,
) -> Result<i32> {
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(err) => {
            eprintln!("dispatch {origin}/{event} failed: {err}");
            return Ok(exit_codes::DISPATCH_FAILED);
        }
    };
    for (index, cycle) in outcome.cycles.iter().enumerate() {
        let fired = cycle
            .fired
            .map_or_else(|| "no rule".to_string(), |rule| format!("rule {rule}"));
        let changed = cycle.changes.iter().collect::<Vec<_>>().join(", ");
        println!(
            "cycle {index}: {}/{} -> {fired} [{changed}]",
            cycle.origin, cycle.event
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_state(config_path: &Path, name: Option<&str>) -> Result<i32> {
    let config = load_config(config_path)?;
    let state = read_state(&config)?;
    match name {
        None => println!(
            "{}",
            serde_json::to_string_pretty(&state).context("serialize state")?
        ),
        Some(name) => {
            let value = lookup_path(&state, name).cloned().unwrap_or(Value::Null);
            match value {
                Value::Object(_) | Value::Array(_) => println!(
                    "{}",
                    serde_json::to_string_pretty(&value).context("serialize value")?
                ),
                other => println!("{}", display(&other)),
            }
        }
    }
    Ok(exit_codes::OK)
}

fn parse_data(data: Option<&str>) -> Result<Document> {
    let Some(text) = data else {
        return Ok(Document::new());
    };
    match serde_json::from_str::<Value>(text).context("parse --data")? {
        Value::Object(map) => Ok(map),
        _ => Err(anyhow!("--data must be a JSON object")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dispatch_with_data_and_init() {
        let cli = Cli::parse_from([
            "actions",
            "dispatch",
            "rules.json",
            "btn1",
            "press",
            "--data",
            r#"{"label":"a"}"#,
            "--init",
        ]);
        let Command::Dispatch {
            origin, data, init, ..
        } = cli.command
        else {
            panic!("expected dispatch");
        };
        assert_eq!(origin, "btn1");
        assert_eq!(data.as_deref(), Some(r#"{"label":"a"}"#));
        assert!(init);
        assert_eq!(cli.config, PathBuf::from("actions.toml"));
    }

    #[test]
    fn alt_flag_prefixes_the_event() {
        let cli = Cli::parse_from(["actions", "dispatch", "rules.json", "kb", "press", "--alt"]);
        let Command::Dispatch { event, alt, .. } = cli.command else {
            panic!("expected dispatch");
        };
        assert_eq!(modified_event(&event, alt), "alt-press");
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::parse_from(["actions", "state", "$count", "--config", "alt.toml"]);
        assert_eq!(cli.config, PathBuf::from("alt.toml"));
        assert!(matches!(cli.command, Command::State { name: Some(ref n) } if n == "$count"));
    }

    #[test]
    fn data_must_be_an_object() {
        assert!(parse_data(None).expect("none").is_empty());
        assert_eq!(
            parse_data(Some(r#"{"a":1}"#)).expect("object").get("a"),
            Some(&serde_json::json!(1))
        );
        assert!(parse_data(Some("[1]")).is_err());
    }
}
