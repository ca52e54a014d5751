//! bdc CLI
//!
//! Deploys views, local tables and replication flows to a Datasphere space.
//!
//! # Usage
//!
//! ```bash
//! # Log in (browser flow on first use, cached tokens afterwards)
//! bdc --host https://tenant.eu10.hcs.cloud.sap --space SALES --oauth-file oauth.json login
//!
//! # Create or update a local table from a CSN document
//! bdc upsert local-table ./orders.json T_ORDERS
//!
//! # Upsert a replication flow with its target tables and start it
//! bdc upsert replication-flow ./rf.json RF_SALES --run
//! ```

mod settings;

use anyhow::{bail, Context, Result};
use bdc_core::{BdcClient, Existence, ResourceKind, RunOutcome, SchemaDocument, UpsertOutcome};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "bdc")]
#[command(about = "Deploy objects to a SAP Datasphere space")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Service URL, e.g. https://tenant.eu10.hcs.cloud.sap
    #[arg(long, global = true)]
    host: Option<String>,

    /// Space that owns the objects
    #[arg(long, global = true)]
    space: Option<String>,

    /// OAuth options file (client-id, client-secret, authorization-url, token-url)
    #[arg(long, global = true)]
    oauth_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and cache tokens for the host
    Login,

    /// Print an object's definition
    Read {
        /// Object kind (view, local-table, replication-flow)
        kind: ResourceKind,

        /// Object name
        name: String,
    },

    /// Check whether an object exists (exit 1 if absent, 2 if unknown)
    Exists {
        kind: ResourceKind,
        name: String,
    },

    /// Create an object from a CSN document
    Create {
        kind: ResourceKind,

        /// CSN document (JSON)
        file: PathBuf,

        /// Name of the object inside the document
        name: String,
    },

    /// Update an object from a CSN document
    Update {
        kind: ResourceKind,
        file: PathBuf,
        name: String,
    },

    /// Create or update an object; replication flows bring their target tables along
    Upsert {
        kind: ResourceKind,
        file: PathBuf,
        name: String,

        /// Run the replication flow after a successful upsert
        #[arg(long)]
        run: bool,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete an object
    Delete {
        kind: ResourceKind,
        name: String,
    },

    /// Start a replication flow run
    Run {
        /// Replication flow name
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let overrides = settings::Overrides {
        config: cli.config,
        host: cli.host,
        space: cli.space,
        oauth_file: cli.oauth_file,
    };
    let config = settings::load(&overrides)?;
    let client = BdcClient::new(config)?;

    match cli.command {
        Commands::Login => login(&client).await,
        Commands::Read { kind, name } => {
            let body = client.objects(kind).read(&name).await?;
            println!("{}", body);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Exists { kind, name } => exists(&client, kind, &name).await,
        Commands::Create { kind, file, name } => {
            let document = read_document(&file)?;
            let body = client.objects(kind).create(&document, &name).await?;
            info!("Created {} {}", kind.label(), name);
            print_body(&body);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Update { kind, file, name } => {
            let document = read_document(&file)?;
            let body = client.objects(kind).update(&document, &name).await?;
            info!("Updated {} {}", kind.label(), name);
            print_body(&body);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Upsert {
            kind,
            file,
            name,
            run,
            json,
        } => upsert(&client, kind, &file, &name, run, json).await,
        Commands::Delete { kind, name } => {
            client.objects(kind).delete(&name).await?;
            println!("Deleted {} {}", kind.label(), name);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run { name } => {
            let outcome = client.run_replication_flow(&name).await?;
            print_run(&name, &outcome);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Logs go to stderr so stdout carries only command output.
fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn read_document(path: &Path) -> Result<SchemaDocument> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    SchemaDocument::from_json_str(&raw).with_context(|| format!("invalid document {}", path.display()))
}

fn print_body(body: &str) {
    if !body.trim().is_empty() {
        println!("{}", body);
    }
}

async fn login(client: &BdcClient) -> Result<ExitCode> {
    let tokens = client.login().await?;
    println!(
        "Logged in to {} (access token expires {})",
        client.config().host,
        format_expiry(tokens.expires_after)
    );
    Ok(ExitCode::SUCCESS)
}

fn format_expiry(expires_after: i64) -> String {
    chrono::DateTime::from_timestamp(expires_after, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| expires_after.to_string())
}

async fn exists(client: &BdcClient, kind: ResourceKind, name: &str) -> Result<ExitCode> {
    let existence = client.objects(kind).exists(name).await;
    println!("{}", existence);
    Ok(match existence {
        Existence::Present => ExitCode::SUCCESS,
        Existence::Absent => ExitCode::from(1),
        Existence::Unknown { .. } => ExitCode::from(2),
    })
}

async fn upsert(
    client: &BdcClient,
    kind: ResourceKind,
    file: &Path,
    name: &str,
    run: bool,
    json: bool,
) -> Result<ExitCode> {
    if run && kind != ResourceKind::ReplicationFlow {
        bail!("--run only applies to replication flows");
    }

    let document = read_document(file)?;
    let (outcome, run_outcome) = if kind == ResourceKind::ReplicationFlow {
        client.upsert_replication_flow(&document, name, run).await?
    } else {
        (client.objects(kind).upsert(&document, name).await?, None)
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_upsert(kind, name, &outcome);
    }
    if let Some(run_outcome) = run_outcome {
        print_run(name, &run_outcome);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_upsert(kind: ResourceKind, name: &str, outcome: &UpsertOutcome) {
    for dependency in &outcome.dependencies {
        println!(
            "  {} {}: {}",
            dependency.kind.label(),
            dependency.name,
            dependency.action
        );
    }
    println!("{} {}: {}", kind.label(), name, outcome.action);
}

fn print_run(name: &str, outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Started { status, run_status } => println!(
            "Replication flow {} started (HTTP {}, run status: {})",
            name, status, run_status
        ),
        RunOutcome::AlreadyRunning => println!("Replication flow {} is already running", name),
    }
}
