use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facefind_core::recognizer::ARCFACE_EMBEDDING_DIM;
use facefind_core::{ArcFaceEmbedder, ScrfdDetector};
use facefind_engine::{rank_matches, Engine, PipelineConfig};
use facefind_store::{GalleryStore, SqliteGallery};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "facefind", about = "Find known people in folders of images")]
struct Cli {
    /// Pipeline thresholds (TOML). FACEFIND_* variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a folder of reference images as one new identity
    Ingest {
        /// Display name for the identity
        #[arg(short, long)]
        name: String,
        /// Free-text description stored with the identity
        #[arg(short, long, default_value = "")]
        description: String,
        /// Folder of reference images
        dir: PathBuf,
    },
    /// Match every face in a folder of probe images against the gallery
    Match {
        /// Folder of probe images
        dir: PathBuf,
        /// Override the similarity threshold for this run
        #[arg(short, long)]
        threshold: Option<f64>,
        /// Print matches as JSON
        #[arg(long)]
        json: bool,
    },
    /// List identities in the gallery
    List,
    /// Show model and gallery locations
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let paths = Config::from_env();
    let mut pipeline = PipelineConfig::load(cli.config.as_deref())
        .context("failed to load pipeline configuration")?;

    match cli.command {
        Commands::Ingest {
            name,
            description,
            dir,
        } => {
            let report = run_blocking(move || {
                let mut engine = load_engine(&paths, pipeline)?;
                let store = open_gallery(&paths, &engine.config().recognition_model_id)?;
                Ok(engine.ingest(&store, &dir, &name, &description)?)
            })
            .await?;

            println!(
                "Identity {} ({}): {} of {} images embedded",
                report.identity_id, report.name, report.embedded, report.files_seen
            );
            for diag in &report.skipped {
                println!("  skipped {}: {}", diag.path.display(), diag.reason);
            }
            if !report.aggregate_committed {
                println!("No usable reference images; this identity cannot be matched.");
            }
        }
        Commands::Match {
            dir,
            threshold,
            json,
        } => {
            if let Some(threshold) = threshold {
                pipeline.similarity_threshold = threshold;
                pipeline.validate()?;
            }

            let mut report = run_blocking(move || {
                let mut engine = load_engine(&paths, pipeline)?;
                let store = open_gallery(&paths, &engine.config().recognition_model_id)?;
                Ok(engine.find_matches(&store, &dir)?)
            })
            .await?;
            rank_matches(&mut report.matches);

            if json {
                println!("{}", serde_json::to_string_pretty(&report.matches)?);
            } else {
                for m in &report.matches {
                    println!(
                        "{:.4}  {}  face {}  {} ({})",
                        m.similarity,
                        m.probe_image_path.display(),
                        m.face_index,
                        m.identity_name,
                        m.identity_description
                    );
                }
                println!(
                    "{} matches, {} faces compared in {} files, {} skipped",
                    report.matches.len(),
                    report.faces_compared,
                    report.files_seen,
                    report.skipped.len()
                );
            }
        }
        Commands::List => {
            if !paths.db_path.exists() {
                println!("No identities enrolled");
                return Ok(());
            }
            let store = open_gallery(&paths, &pipeline.recognition_model_id)?;
            let identities = store.list_identities()?;
            if identities.is_empty() {
                println!("No identities enrolled");
            }
            for summary in identities {
                let id = &summary.identity;
                println!(
                    "{:>4}  {}  {}  {} embeddings{}  {}",
                    id.id,
                    id.name,
                    id.created_at,
                    summary.raw_embeddings,
                    if summary.has_aggregate { "" } else { ", no aggregate" },
                    id.description
                );
            }
        }
        Commands::Status => {
            println!("gallery:     {}", paths.db_path.display());
            println!("detector:    {}", paths.detector_model_path());
            println!(
                "recognizer:  {}",
                paths.recognition_model_path(&pipeline.recognition_model_id)
            );
            println!("threshold:   {}", pipeline.similarity_threshold);
            if !paths.db_path.exists() {
                println!("identities:  none (gallery not created yet)");
                return Ok(());
            }
            match open_gallery(&paths, &pipeline.recognition_model_id) {
                Ok(store) => {
                    let identities = store.list_identities()?;
                    let matchable = identities.iter().filter(|s| s.has_aggregate).count();
                    println!(
                        "identities:  {} ({} matchable)",
                        identities.len(),
                        matchable
                    );
                }
                Err(e) => println!("identities:  unavailable ({e:#})"),
            }
        }
    }

    Ok(())
}

/// Run a pipeline on a blocking worker; Ctrl-C exits the process.
///
/// Each gallery write is durable on its own, so an interrupted ingestion
/// leaves whatever it had stored so far.
async fn run_blocking<T, F>(job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let worker = tokio::task::spawn_blocking(job);
    tokio::select! {
        joined = worker => joined.context("pipeline worker panicked")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted");
            std::process::exit(130);
        }
    }
}

fn load_engine(
    paths: &Config,
    pipeline: PipelineConfig,
) -> Result<Engine<ScrfdDetector, ArcFaceEmbedder>> {
    let detector_path = paths.detector_model_path();
    let detector = ScrfdDetector::load(&detector_path)
        .with_context(|| format!("failed to load detector {detector_path}"))?;

    let model_id = pipeline.recognition_model_id.clone();
    let recognizer_path = paths.recognition_model_path(&model_id);
    let embedder = ArcFaceEmbedder::load(&recognizer_path, &model_id)
        .with_context(|| format!("failed to load recognizer {recognizer_path}"))?;

    Ok(Engine::new(detector, embedder, pipeline))
}

fn open_gallery(paths: &Config, model_id: &str) -> Result<SqliteGallery> {
    SqliteGallery::open(&paths.db_path, model_id, ARCFACE_EMBEDDING_DIM)
        .with_context(|| format!("failed to open gallery {}", paths.db_path.display()))
}
