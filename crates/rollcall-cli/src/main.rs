use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::Frame;
use rollcalld::config::Config;
use rollcalld::engine::{spawn_engine, EngineHandle};
use rollcalld::faces::FaceStore;
use rollcalld::logging::init_tracing;
use rollcalld::store::StudentStore;

#[derive(Parser)]
#[command(name = "rollcall", version, about = "Roll Call attendance admin CLI")]
struct Cli {
    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the students table if it does not exist
    InitDb,
    /// List registered students
    List,
    /// Run face detection on an image file
    Detect {
        /// Image to inspect
        path: PathBuf,
    },
    /// Match an image file against the registered faces
    Identify {
        /// Image to identify
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(if config.debug { "debug" } else { "warn" });

    let cli = Cli::parse();

    match cli.command {
        Commands::InitDb => {
            let store = open_store(&config).await?;
            store.init_schema().await?;
            println!("Database tables created/verified successfully!");
        }
        Commands::List => {
            let students = open_store(&config).await?.list().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&students)?);
            } else if students.is_empty() {
                println!("No students registered");
            } else {
                println!("{:<6} {:<16} {:<32} REGISTERED", "ID", "MAT NUMBER", "NAME");
                for s in &students {
                    println!("{:<6} {:<16} {:<32} {}", s.id, s.mat_number, s.name, s.registered_at);
                }
            }
        }
        Commands::Detect { path } => {
            let frame = open_frame(&path)?;
            let faces = start_engine(&config)?.detect(frame).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&faces)?);
            } else {
                println!("{} face(s) in {}", faces.len(), path.display());
                for (i, f) in faces.iter().enumerate() {
                    println!(
                        "  #{i}: confidence {:.3} at ({:.0}, {:.0}) size {:.0}x{:.0}",
                        f.confidence, f.x, f.y, f.width, f.height
                    );
                }
            }
        }
        Commands::Identify { path } => {
            let frame = open_frame(&path)?;
            let store = open_store(&config).await?;
            let references = FaceStore::open(&config.data_dir)?.references()?;
            if references.is_empty() {
                eprintln!("No students registered");
                return Ok(ExitCode::FAILURE);
            }

            let count = references.len();
            let candidate = start_engine(&config)?.identify(frame, references).await?;
            let student = match &candidate {
                Some(c) => store.find_by_mat_number(&c.mat_number).await?,
                None => None,
            };

            match (candidate, student) {
                (Some(c), Some(s)) => {
                    if cli.json {
                        let out = serde_json::json!({
                            "matched": true,
                            "name": s.name,
                            "mat_number": s.mat_number,
                            "distance": c.distance,
                        });
                        println!("{}", serde_json::to_string_pretty(&out)?);
                    } else {
                        println!("{} ({}) distance {:.4}", s.name, s.mat_number, c.distance);
                    }
                }
                _ => {
                    if cli.json {
                        println!("{}", serde_json::json!({ "matched": false, "references": count }));
                    } else {
                        println!("Face not recognized ({count} reference image(s) searched)");
                    }
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn open_store(config: &Config) -> Result<StudentStore> {
    StudentStore::connect(&config.database)
        .await
        .with_context(|| format!("opening database {}", config.database))
}

fn open_frame(path: &std::path::Path) -> Result<Arc<Frame>> {
    let frame = Frame::open(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(Arc::new(frame))
}

fn start_engine(config: &Config) -> Result<EngineHandle> {
    spawn_engine(
        &config.scrfd_model_path(),
        &config.arcface_model_path(),
        config.distance_threshold,
        1,
    )
    .with_context(|| format!("loading models from {}", config.model_dir.display()))
}
