use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::{CascadeLocator, RawImage};
use facegate_engine::{Config, Engine, Outcome, Session};
use facegate_store::{CredentialStore, SqliteCredentialStore};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "facegate", about = "Local face enrollment and authentication")]
struct Cli {
    /// TOML config file (overrides FACEGATE_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of status lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register the face in an image under an identity
    Register {
        #[arg(short, long)]
        image: PathBuf,
        #[arg(short = 'n', long)]
        identity: String,
    },
    /// Authenticate an image against the latest stored enrollment of an identity
    Authenticate {
        #[arg(short, long)]
        image: PathBuf,
        #[arg(short = 'n', long)]
        identity: String,
    },
    /// Register once, then authenticate several images in the same session
    Session {
        /// Image to register
        #[arg(long)]
        register: PathBuf,
        #[arg(short = 'n', long)]
        identity: String,
        /// Images to authenticate, in order
        #[arg(long, num_args = 1..)]
        authenticate: Vec<PathBuf>,
    },
    /// Run the face locator only and print every detected region
    Detect {
        #[arg(short, long)]
        image: PathBuf,
    },
    /// List stored credential records
    List,
}

#[derive(Serialize)]
struct Report<'a> {
    image: &'a Path,
    #[serde(flatten)]
    outcome: &'a Outcome,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(Some(path.as_path())),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    match cli.command {
        Commands::Register { image, identity } => {
            let mut engine = Engine::from_config(&config)?;
            let mut session = Session::new();
            session.capture(open_image(&image)?);
            let outcome = engine.register(&mut session, &identity)?;
            report(cli.json, &image, &outcome)?;
            Ok(exit_code(&outcome))
        }
        Commands::Authenticate { image, identity } => {
            let mut engine = Engine::from_config(&config)?;
            let mut session = Session::new();
            session.capture(open_image(&image)?);
            if !engine.restore(&mut session, &identity)? {
                tracing::info!(identity = %identity, "no stored enrollment");
            }
            let outcome = engine.authenticate(&session)?;
            report(cli.json, &image, &outcome)?;
            Ok(exit_code(&outcome))
        }
        Commands::Session {
            register,
            identity,
            authenticate,
        } => {
            let mut engine = Engine::from_config(&config)?;
            let mut session = Session::new();
            session.capture(open_image(&register)?);
            let outcome = engine.register(&mut session, &identity)?;
            report(cli.json, &register, &outcome)?;

            let mut all_accepted = outcome.is_accepted();
            for path in &authenticate {
                session.capture(open_image(path)?);
                let outcome = engine.authenticate(&session)?;
                report(cli.json, path, &outcome)?;
                all_accepted &= outcome.is_accepted();
            }
            Ok(if all_accepted {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Detect { image } => {
            let mut locator = CascadeLocator::load(config.cascade_path(), config.locator_config())?;
            let frame = open_image(&image)?;
            let faces = locator.detect(&frame.to_grayscale(), frame.width(), frame.height())?;
            let chosen = locator.config().choose(&faces);

            if cli.json {
                let body = serde_json::json!({
                    "image": image,
                    "width": frame.width(),
                    "height": frame.height(),
                    "faces": faces,
                    "chosen": chosen,
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else if faces.is_empty() {
                println!("No face detected in {}", image.display());
            } else {
                for (i, bbox) in faces.iter().enumerate() {
                    let mark = if Some(*bbox) == chosen { "*" } else { " " };
                    println!(
                        "{mark} [{i}] x={} y={} w={} h={}",
                        bbox.x, bbox.y, bbox.width, bbox.height
                    );
                }
            }
            Ok(if chosen.is_some() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::List => {
            let store = SqliteCredentialStore::open(&config.db_path)?;
            let records = store.list()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No faces registered");
            } else {
                for r in &records {
                    println!(
                        "{:>5}  {:<24} {}  template={}B photo={}B v{}",
                        r.id, r.identity, r.created_at, r.template_bytes, r.photo_bytes, r.template_version
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open_image(path: &Path) -> Result<RawImage> {
    RawImage::open(path).with_context(|| format!("cannot read image {}", path.display()))
}

fn report(json: bool, image: &Path, outcome: &Outcome) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(&Report { image, outcome })?);
    } else {
        match outcome {
            Outcome::Accepted {
                distance: Some(d), ..
            }
            | Outcome::Rejected { distance: d } => {
                println!("{}  {}  (distance {d:.4})", outcome.label(), outcome.message());
            }
            _ => println!("{}  {}", outcome.label(), outcome.message()),
        }
    }
    Ok(())
}

fn exit_code(outcome: &Outcome) -> ExitCode {
    if outcome.is_accepted() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
