use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use autofix_analyzer::{Annotation, Catalog, LogAnalyzer};
use autofix_core::{Orchestrator, Publisher, RemedyConfig, SessionStatus};
use autofix_ledger::{FixHistoryLedger, SystemClock};
use autofix_pipeline::{DocumentPolicy, PatchEngine, PipelineDocument, StepGuard, Unguarded};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde_json::json;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod local;

use local::{DirectoryCiClient, FilePublisher};

fn cli() -> Command {
    let path = |name: &'static str, help: &'static str| {
        Arg::new(name)
            .value_parser(value_parser!(PathBuf))
            .help(help)
    };
    let json = Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Output as JSON");
    let catalog = path("catalog", "Extra catalog rules (YAML) appended to the built-ins").long("catalog");

    Command::new("autofix")
        .version(autofix_core::VERSION)
        .about("CI pipeline triage and remediation")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::Count)
                .help("Increase log verbosity"),
        )
        .subcommand(
            Command::new("analyze")
                .about("Classify a run log")
                .arg(path("log", "Raw run log").required(true))
                .arg(path("annotations", "Annotations JSON array").long("annotations"))
                .arg(catalog.clone())
                .arg(json.clone()),
        )
        .subcommand(
            Command::new("patch")
                .about("Apply a catalog rule's remedy to a workflow file")
                .arg(path("workflow", "Workflow file to patch").required(true))
                .arg(
                    Arg::new("rule")
                        .long("rule")
                        .required(true)
                        .help("Catalog rule id"),
                )
                .arg(path("ledger", "Ledger whose protected steps are honoured").long("ledger"))
                .arg(catalog.clone())
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Print the patched document instead of writing it"),
                ),
        )
        .subcommand(
            Command::new("ledger")
                .about("Summarise a ledger file")
                .arg(path("ledger", "Ledger file").required(true))
                .arg(json),
        )
        .subcommand(
            Command::new("verify")
                .about("Mark steps as verified in a real run")
                .arg(path("ledger", "Ledger file").required(true))
                .arg(
                    Arg::new("steps")
                        .required(true)
                        .num_args(1..)
                        .help("Step identities"),
                ),
        )
        .subcommand(
            Command::new("run-once")
                .about("Run one remediation iteration against local files")
                .arg(path("config", "Configuration file (TOML)").long("config"))
                .arg(path("workflow", "Workflow file").long("workflow"))
                .arg(path("ledger", "Ledger file").long("ledger"))
                .arg(path("runs-dir", "Directory of run records").long("runs-dir"))
                .arg(catalog),
        )
}

fn main() -> ExitCode {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"), matches.get_count("verbose"));

    let result = match matches.subcommand() {
        Some(("analyze", args)) => analyze(args),
        Some(("patch", args)) => patch(args),
        Some(("ledger", args)) => ledger(args),
        Some(("verify", args)) => verify(args),
        Some(("run-once", args)) => run_once(args),
        _ => Ok(ExitCode::FAILURE),
    };
    result.unwrap_or_else(|e| {
        eprintln!("error: {e:#}");
        ExitCode::FAILURE
    })
}

fn init_tracing(json: bool, verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .init();
    }
}

fn load_catalog(overlay: Option<&PathBuf>) -> Result<Catalog> {
    let mut catalog = Catalog::builtin()?;
    if let Some(path) = overlay {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading catalog {}", path.display()))?;
        let added = catalog.overlay_from_yaml(&text)?;
        info!("loaded {} rule(s) from {}", added, path.display());
    }
    Ok(catalog)
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn analyze(args: &ArgMatches) -> Result<ExitCode> {
    let log = read(args.get_one::<PathBuf>("log").context("log path")?)?;
    let annotations: Vec<Annotation> = match args.get_one::<PathBuf>("annotations") {
        Some(path) => serde_json::from_str(&read(path)?)
            .with_context(|| format!("parsing {}", path.display()))?,
        None => Vec::new(),
    };
    let catalog = load_catalog(args.get_one("catalog"))?;
    let analysis = LogAnalyzer::default().analyze(&log, &annotations, &catalog);
    let signatures = analysis.failure_signatures();

    if args.get_flag("json") {
        let out = json!({
            "events": analysis.events,
            "signatures": signatures,
            "candidates": analysis.candidates,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "{} event(s), {} failure signature(s)",
            analysis.events.len(),
            signatures.len()
        );
        for event in &analysis.events {
            let line = event.line.map_or_else(|| "-".to_string(), |l| l.to_string());
            println!(
                "  [{:?}] line {} {}: {}",
                event.kind,
                line,
                event.pattern_id.as_deref().unwrap_or("unmatched"),
                event.raw_text.lines().last().unwrap_or_default()
            );
            if let Some(step) = &event.associated_step {
                println!("      step: {step}");
            }
        }
        if !analysis.candidates.is_empty() {
            println!("candidate patterns:");
            for candidate in &analysis.candidates {
                println!("  {} ({})", candidate.pattern, candidate.example);
            }
        }
    }
    Ok(if analysis.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn patch(args: &ArgMatches) -> Result<ExitCode> {
    let workflow = args.get_one::<PathBuf>("workflow").context("workflow path")?;
    let rule_id = args.get_one::<String>("rule").context("rule id")?;
    let catalog = load_catalog(args.get_one("catalog"))?;
    let rule = catalog
        .get(rule_id)
        .with_context(|| format!("no catalog rule `{rule_id}`"))?;
    let Some(remedy) = rule.remedy() else {
        bail!("rule `{rule_id}` is informational and has no remedy");
    };

    let engine = PatchEngine::new(DocumentPolicy::default());
    let document = PipelineDocument::parse(&read(workflow)?, engine.policy())
        .with_context(|| format!("parsing {}", workflow.display()))?;
    let ledger = args
        .get_one::<PathBuf>("ledger")
        .map(FixHistoryLedger::open)
        .transpose()?;
    let guard: &dyn StepGuard = match &ledger {
        Some(ledger) => ledger,
        None => &Unguarded,
    };
    let patched = engine.apply(&document, &remedy.to_request(), guard)?;

    if args.get_flag("dry-run") {
        print!("{}", patched.to_yaml()?);
    } else {
        FilePublisher::new(workflow, None)
            .publish(&patched, &format!("autofix: apply {rule_id}"))?;
        println!("applied `{rule_id}` to {}", workflow.display());
    }
    Ok(ExitCode::SUCCESS)
}

fn ledger(args: &ArgMatches) -> Result<ExitCode> {
    let path = args.get_one::<PathBuf>("ledger").context("ledger path")?;
    let ledger = FixHistoryLedger::open(path)?;
    let record = ledger.record();

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(ExitCode::SUCCESS);
    }
    println!("ledger {} (schema v{})", path.display(), record.version);
    println!("  signatures: {}", record.signatures.len());
    for (signature, history) in &record.signatures {
        let attempts: Vec<String> = history
            .attempted
            .iter()
            .map(|a| format!("{}={}", a.remedy_id, a.outcome))
            .collect();
        println!("    {signature}: {}", attempts.join(", "));
        if let Some(remedy) = &history.successful_remedy {
            println!("      fixed by {remedy}");
        }
    }
    println!("  protected steps: {}", record.protected_steps.len());
    for (step, at) in ledger.protected_steps() {
        println!("    {step} (since {})", at.to_rfc3339());
    }
    println!("  pending: {}", ledger.pending().len());
    println!("  untried: {}", ledger.untried().len());
    if let Some(session) = ledger.session() {
        println!("  session {} at iteration {}", session.id, session.iteration);
    }
    Ok(ExitCode::SUCCESS)
}

fn verify(args: &ArgMatches) -> Result<ExitCode> {
    let path = args.get_one::<PathBuf>("ledger").context("ledger path")?;
    let mut ledger = FixHistoryLedger::open(path)?;
    for step in args.get_many::<String>("steps").into_iter().flatten() {
        if ledger.mark_verified(step)? {
            println!("protected `{step}`");
        } else {
            println!("`{step}` already protected");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_once(args: &ArgMatches) -> Result<ExitCode> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => RemedyConfig::load(path)?,
        None => RemedyConfig::default(),
    };
    let paths = &mut config.paths;
    for (arg, slot) in [
        ("workflow", &mut paths.workflow),
        ("ledger", &mut paths.ledger),
        ("runs-dir", &mut paths.runs_dir),
        ("catalog", &mut paths.catalog),
    ] {
        if let Some(value) = args.get_one::<PathBuf>(arg) {
            *slot = Some(value.clone());
        }
    }
    let workflow = config
        .paths
        .workflow
        .clone()
        .context("no workflow file given (--workflow or paths.workflow)")?;
    let runs_dir = config
        .paths
        .runs_dir
        .clone()
        .context("no runs directory given (--runs-dir or paths.runs_dir)")?;
    let ledger_path = config
        .paths
        .ledger
        .clone()
        .unwrap_or_else(|| PathBuf::from(".autofix/ledger.json"));
    let overlay = config
        .paths
        .catalog
        .as_ref()
        .map(|p| read(p))
        .transpose()?;

    let clock = Arc::new(SystemClock);
    let ledger = FixHistoryLedger::open_with_clock(&ledger_path, clock.clone())?;
    let publisher = FilePublisher::new(&workflow, config.paths.backup_dir.clone());
    let mut orchestrator = Orchestrator::new(
        config,
        DirectoryCiClient::new(runs_dir),
        publisher,
        ledger,
        clock,
    )?;
    if let Some(yaml) = overlay {
        orchestrator = orchestrator.with_catalog_overlay(&yaml)?;
    }

    let report = orchestrator.run_once()?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(match report.status {
        SessionStatus::Success | SessionStatus::Pending => ExitCode::SUCCESS,
        SessionStatus::Exhausted => ExitCode::from(3),
    })
}
