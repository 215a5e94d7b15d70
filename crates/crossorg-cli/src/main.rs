//! `crossorg` command-line entry point

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use crossorg_core::{build_output_key, MigrationReport, MigrationRequest, Orchestrator, Severity, TargetOutcome};
use crossorg_engine::{build_collaborators, OrgRoster, Settings, DEFAULT_ROSTER_FILE};
use crossorg_store::{IdentityRecord, JsonFileStore, MappingStore};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn cli() -> Command {
    Command::new("crossorg")
        .version(crossorg_core::VERSION)
        .about("Migrate configuration entities between cloud organizations")
        .subcommand_required(true)
        .arg(
            Arg::new("settings")
                .long("settings")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Settings file (default: ./crossorg.toml when present)"),
        )
        .arg(
            Arg::new("orgs")
                .long("orgs")
                .global(true)
                .default_value(DEFAULT_ROSTER_FILE)
                .value_parser(value_parser!(PathBuf))
                .help("Org roster file"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("migrate")
                .about("Create, update or delete one entity in every target org")
                .arg(
                    Arg::new("type")
                        .long("type")
                        .required(true)
                        .help("Resource type"),
                )
                .arg(
                    Arg::new("id")
                        .long("id")
                        .required(true)
                        .help("Source entity id"),
                )
                .arg(
                    Arg::new("delete")
                        .long("delete")
                        .action(ArgAction::SetTrue)
                        .help("Remove the entity from the targets"),
                )
                .arg(
                    Arg::new("target")
                        .long("target")
                        .action(ArgAction::Append)
                        .help("Only this target org (repeatable; default: all)"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the report as JSON"),
                ),
        )
        .subcommand(
            Command::new("mappings")
                .about("Inspect the identity mapping store")
                .subcommand_required(true)
                .subcommand(Command::new("list").about("List every mapped entity"))
                .subcommand(
                    Command::new("show")
                        .about("Show one source entity's mappings")
                        .arg(Arg::new("id").required(true).help("Source entity id")),
                ),
        )
        .subcommand(
            Command::new("output-key")
                .about("Print the output key used to capture an entity's target id")
                .arg(Arg::new("id").required(true).help("Source entity id")),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a String> {
    args.get_one::<String>(name)
        .with_context(|| format!("missing --{name}"))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    let settings = Settings::load(matches.get_one::<PathBuf>("settings").map(PathBuf::as_path))
        .context("loading settings")?;

    match matches.subcommand() {
        Some(("migrate", args)) => migrate(&matches, args, &settings).await,
        Some(("mappings", args)) => mappings(args, &settings).await,
        Some(("output-key", args)) => {
            println!("{}", build_output_key(required(args, "id")?));
            Ok(ExitCode::SUCCESS)
        }
        _ => Ok(ExitCode::FAILURE),
    }
}

async fn migrate(global: &ArgMatches, args: &ArgMatches, settings: &Settings) -> Result<ExitCode> {
    let roster_path = global
        .get_one::<PathBuf>("orgs")
        .context("missing --orgs")?;
    let roster = OrgRoster::load(roster_path).context("loading org roster")?;
    let selected: Vec<String> = args
        .get_many::<String>("target")
        .map(|ids| ids.cloned().collect())
        .unwrap_or_default();
    let targets = roster.select(&selected)?;

    let resource_type = required(args, "type")?;
    let source_id = required(args, "id")?;
    let request = if args.get_flag("delete") {
        MigrationRequest::delete(resource_type, source_id)
    } else {
        MigrationRequest::create_or_update(resource_type, source_id)
    };

    tracing::info!(
        source_org = %roster.source.id,
        targets = targets.len(),
        "starting migration"
    );
    let orchestrator = Orchestrator::new(build_collaborators(settings), settings.orchestrator_options());
    let report = orchestrator.migrate(&request, &targets).await;

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(if report.has_errors() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn print_report(report: &MigrationReport) {
    println!(
        "{} {} ({}): {:?}",
        report.request.resource_type, report.request.source_entity_id, report.request.operation, report.state
    );
    for target in &report.targets {
        match &target.outcome {
            TargetOutcome::Migrated { target_entity_id } => {
                println!("  {} -> {target_entity_id}", target.target_org);
            }
            TargetOutcome::Deleted => println!("  {} deleted", target.target_org),
            TargetOutcome::Failed { kind } => println!("  {} FAILED ({kind})", target.target_org),
        }
    }
    for diagnostic in &report.diagnostics {
        let label = match diagnostic.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        println!("{label}: {}", diagnostic.summary);
        if let Some(detail) = &diagnostic.detail {
            println!("  {detail}");
        }
    }
}

async fn mappings(args: &ArgMatches, settings: &Settings) -> Result<ExitCode> {
    let store = JsonFileStore::new(&settings.store_path);
    match args.subcommand() {
        Some(("list", _)) => {
            for record in store.list().await? {
                print_record(&record);
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(("show", sub)) => {
            let id = required(sub, "id")?;
            match store.get(id).await? {
                Some(record) => {
                    print_record(&record);
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    eprintln!("no mapping for {id}");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        _ => Ok(ExitCode::FAILURE),
    }
}

fn print_record(record: &IdentityRecord) {
    println!(
        "{} {} (updated {})",
        record.resource_type,
        record.source_entity_id,
        record.updated_at.to_rfc3339()
    );
    for (org, target_id) in &record.target_mappings {
        println!("  {org} -> {target_id}");
    }
}
