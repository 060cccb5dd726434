use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use facegate_core::admin::{self, AdminAuthority, AdminContext};
use facegate_core::{AccessPipeline, EventId, GateError, IdentityId, ImageSource, TemplateStore};
use facegate_store::{FsSnapshotStore, SqliteStore};
use facegate_vision::{OnnxExtractor, DETECTOR_MODEL_FILE, RECOGNIZER_MODEL_FILE};

mod config;

use config::Config;

const EXIT_INPUT: u8 = 2;
const EXIT_DENIED: u8 = 3;

#[derive(Parser)]
#[command(name = "facegate", about = "Two-factor access gate: credential token plus face match")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new person and print their credential token
    Enroll {
        /// Display name shown in the access log
        #[arg(short, long)]
        name: String,
        /// Enrollment photo (JPEG or PNG)
        #[arg(short, long)]
        photo: PathBuf,
    },
    /// Decide one access attempt
    Verify {
        /// Credential token read from the QR code
        #[arg(short, long)]
        token: String,
        /// Live camera frame (JPEG or PNG)
        #[arg(short, long)]
        frame: PathBuf,
    },
    /// List enrolled people
    Users,
    /// Remove an enrolled person
    Remove {
        /// Identity ID to remove
        id: i64,
    },
    /// Show the most recent access events
    Logs {
        /// Number of events (default: FACEGATE_LOG_LIMIT)
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Show one access event
    Event {
        /// Event ID
        id: i64,
    },
    /// Show configuration and store status
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match run(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code_for(&e)
        }
    }
}

async fn run(cli: Cli, config: Config) -> Result<ExitCode> {
    match cli.command {
        Commands::Verify { token, frame } => {
            let pipeline = open_pipeline(&config)?;
            let decision =
                tokio::task::spawn_blocking(move || pipeline.decide(&token, ImageSource::FilePath(frame))).await??;
            print_json(&decision)?;
            if decision.outcome.is_granted() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(EXIT_DENIED))
            }
        }
        Commands::Enroll { name, photo } => {
            let ctx = admin_context(&config, &mut std::io::stdin().lock())?;
            let pipeline = open_pipeline(&config)?;
            let identity =
                tokio::task::spawn_blocking(move || pipeline.enroll(&name, ImageSource::FilePath(photo))).await??;
            tracing::info!(id = %identity.id, session = &ctx.session_id()[..8], "enrolled");
            print_json(&identity)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Users => {
            let ctx = admin_context(&config, &mut std::io::stdin().lock())?;
            let store = SqliteStore::open(&config.db_path)?;
            print_json(&admin::list_identities(&ctx, &store)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Remove { id } => {
            let ctx = admin_context(&config, &mut std::io::stdin().lock())?;
            let store = SqliteStore::open(&config.db_path)?;
            let photos = FsSnapshotStore::open(&config.faces_dir)?;
            let removed = admin::remove_identity(&ctx, &store, &photos, IdentityId(id))?;
            print_json(&serde_json::json!({ "id": id, "removed": removed }))?;
            Ok(if removed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::Logs { limit } => {
            let ctx = admin_context(&config, &mut std::io::stdin().lock())?;
            let store = SqliteStore::open(&config.db_path)?;
            let events = admin::recent_events(&ctx, &store, limit.unwrap_or(config.log_limit))?;
            print_json(&events)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Event { id } => {
            let ctx = admin_context(&config, &mut std::io::stdin().lock())?;
            let store = SqliteStore::open(&config.db_path)?;
            match admin::event(&ctx, &store, EventId(id))? {
                Some(event) => {
                    print_json(&event)?;
                    Ok(ExitCode::SUCCESS)
                }
                None => bail!("no access event with id {id}"),
            }
        }
        Commands::Status => {
            let store = SqliteStore::open(&config.db_path)?;
            print_json(&Status {
                data_dir: &config.data_dir,
                db_path: &config.db_path,
                schema_version: store.schema_version()?,
                identities: store.list_all()?.len(),
                detector_model: config.model_present(DETECTOR_MODEL_FILE),
                recognizer_model: config.model_present(RECOGNIZER_MODEL_FILE),
                admin_configured: config.admin_password.is_some(),
            })?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[derive(Serialize)]
struct Status<'a> {
    data_dir: &'a Path,
    db_path: &'a Path,
    schema_version: i64,
    identities: usize,
    detector_model: bool,
    recognizer_model: bool,
    admin_configured: bool,
}

/// Wire the pipeline: one SQLite file for templates and ledger, two image directories.
fn open_pipeline(config: &Config) -> Result<AccessPipeline> {
    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    let incidents = Arc::new(FsSnapshotStore::open(&config.incident_dir)?);
    let photos = Arc::new(FsSnapshotStore::open(&config.faces_dir)?);
    let extractor = OnnxExtractor::load(&config.model_dir, config.detection_threshold)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;

    Ok(AccessPipeline::new(
        Arc::new(extractor),
        store.clone(),
        store,
        incidents,
        photos,
    ))
}

/// Admin commands take the password on stdin only, never from argv.
fn admin_context(config: &Config, input: &mut impl BufRead) -> Result<AdminContext> {
    let authority = AdminAuthority::new(config.admin_password.as_deref());
    if !authority.is_configured() {
        bail!("administration is disabled: set FACEGATE_ADMIN_PASSWORD");
    }
    let password = read_password(input)?;
    Ok(authority.issue(&password)?)
}

fn read_password(input: &mut impl BufRead) -> Result<String> {
    let mut line = String::new();
    input
        .read_line(&mut line)
        .context("reading administrator password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code_for(e: &anyhow::Error) -> ExitCode {
    match e.downcast_ref::<GateError>() {
        Some(GateError::Input(_) | GateError::NoFaceDetected) => ExitCode::from(EXIT_INPUT),
        _ => ExitCode::FAILURE,
    }
}
