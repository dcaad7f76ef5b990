//! # Ingesta CLI (`ingesta`)
//!
//! The `ingesta` binary drives the document pipeline: database
//! initialization, single-file processing, bundle analysis and
//! separation, status inspection, stage retries, and the HTTP server.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ingesta init` | Create the SQLite database and run schema migrations |
//! | `ingesta process <file>` | Run one file through the full pipeline |
//! | `ingesta analyze <file>` | Boundary-detection report, no persistence |
//! | `ingesta separate <file> --out <dir>` | Split a bundle into fragment files |
//! | `ingesta status <id>` | Stage statuses for one document |
//! | `ingesta retry <id> <stage>` | Re-run a failed stage |
//! | `ingesta serve` | Start the HTTP upload/status server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use ingesta::analyze::Analyzer;
use ingesta::extract::TextExtractor;
use ingesta::models::Stage;
use ingesta::pipeline::{Pipeline, UploadRequest, MIN_FRAGMENT_CHARS};
use ingesta::{ai, config, db, migrate, server, store};

/// Ingesta — document ingestion for property-management communities.
///
/// All commands accept a `--config` flag pointing to a TOML
/// configuration file. See `config/ingesta.example.toml` for a full
/// example.
#[derive(Parser)]
#[command(
    name = "ingesta",
    about = "Ingesta — document ingestion pipeline for property-management communities",
    version,
    long_about = "Ingesta extracts text from uploaded documents through a cost-ordered cascade, \
    splits multi-document bundles, classifies documents into Spanish property-management types, \
    extracts structured fields per type, and chunks text for retrieval, tracking every stage \
    per document in SQLite."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ingesta.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (documents, classification_results, extracted_* tables, chunks).
    /// This command is idempotent; running it multiple times is safe.
    Init,

    /// Run one file through the full pipeline.
    ///
    /// Extracts text, splits bundles into child documents, classifies,
    /// extracts structured fields, and chunks — up to the requested
    /// processing level. Prints a per-document stage summary.
    Process {
        /// Path to the file to ingest.
        file: PathBuf,

        /// Owning organization id stamped on every persisted record.
        #[arg(long)]
        org: String,

        /// Community the document belongs to, if known.
        #[arg(long)]
        community: Option<String>,

        /// Processing depth: 1 extraction, 2 +classification,
        /// 3 +structured fields, 4 +chunking.
        #[arg(long, default_value_t = 4)]
        level: i64,
    },

    /// Analyze a file for internal document boundaries.
    ///
    /// Extracts text and prints the boundary-detection report as JSON.
    /// Nothing is written to the database.
    Analyze {
        /// Path to the file to analyze.
        file: PathBuf,
    },

    /// Split a multi-document file into per-fragment text files.
    Separate {
        /// Path to the file to split.
        file: PathBuf,

        /// Directory to write fragment files into.
        #[arg(long)]
        out: PathBuf,
    },

    /// Show stage statuses for a document.
    Status {
        /// Document UUID.
        id: String,
    },

    /// Re-run a failed stage and resume automatic progression.
    Retry {
        /// Document UUID.
        id: String,

        /// Stage to retry: extraction, classification, metadata, chunking.
        stage: String,
    },

    /// Start the HTTP upload and status server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Process {
            file,
            org,
            community,
            level,
        } => {
            let bytes = std::fs::read(&file)?;
            let filename = file
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.display().to_string());
            let storage_path = std::fs::canonicalize(&file)
                .map(|p| p.display().to_string())
                .ok();

            let pool = db::connect(&cfg).await?;
            let client = ai::create_client(&cfg.ai)?;
            let pipeline = Pipeline::new(pool, cfg.clone(), client);

            let outcome = pipeline
                .process_upload(
                    &bytes,
                    &UploadRequest {
                        filename,
                        organization_id: org,
                        community_id: community,
                        processing_level: level,
                        storage_path,
                    },
                )
                .await?;

            print_outcome(&outcome.document);
            for child in &outcome.children {
                print_outcome(child);
            }
        }
        Commands::Analyze { file } => {
            let bytes = std::fs::read(&file)?;
            let filename = file
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.display().to_string());

            let report = analyzer(&cfg)?.analyze(&bytes, &filename).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Separate { file, out } => {
            let bytes = std::fs::read(&file)?;
            let filename = file
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.display().to_string());

            let analyzer = analyzer(&cfg)?;
            let report = analyzer.analyze(&bytes, &filename).await?;
            if !report.is_multi_document {
                println!("Single document, nothing to separate.");
                return Ok(());
            }
            let separation = analyzer.separate(
                &report.extracted_text,
                &filename,
                &report.detected_documents,
                &out,
            )?;
            for path in &separation.output_files {
                println!("Wrote {}", path.display());
            }
        }
        Commands::Status { id } => {
            let pool = db::connect(&cfg).await?;
            let doc = store::get_document(&pool, &id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("document {} not found", id))?;

            println!("Document:       {}", doc.id);
            println!("Filename:       {}", doc.filename);
            println!(
                "Type:           {}",
                doc.document_type.as_deref().unwrap_or("-")
            );
            println!("Level:          {}", doc.processing_level);
            println!("Extraction:     {}", doc.extraction_status);
            println!("Classification: {}", doc.classification_status);
            println!("Metadata:       {}", doc.metadata_status);
            println!("Chunking:       {}", doc.chunking_status);
        }
        Commands::Retry { id, stage } => {
            let stage = Stage::parse(&stage).ok_or_else(|| {
                anyhow::anyhow!(
                    "unknown stage '{}': expected extraction, classification, metadata, or chunking",
                    stage
                )
            })?;

            let pool = db::connect(&cfg).await?;
            let client = ai::create_client(&cfg.ai)?;
            let pipeline = Pipeline::new(pool, cfg.clone(), client);

            let failures = pipeline.retry_stage(&id, stage).await?;
            if failures.is_empty() {
                println!("Retry of {} succeeded; all runnable stages completed.", stage);
            } else {
                for failure in failures {
                    println!("Stage {} failed: {}", failure.stage, failure.message);
                }
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn analyzer(cfg: &config::Config) -> anyhow::Result<Analyzer> {
    let client = ai::create_client(&cfg.ai)?;
    let extractor = TextExtractor::new(&cfg.extraction, Arc::clone(&client));
    Ok(Analyzer::new(extractor, client, MIN_FRAGMENT_CHARS))
}

fn print_outcome(outcome: &ingesta::pipeline::DocumentOutcome) {
    println!(
        "{}  {}  type={}  extraction={} classification={} metadata={} chunking={}",
        outcome.document_id,
        outcome.filename,
        outcome.document_type.as_deref().unwrap_or("-"),
        outcome.extraction_status,
        outcome.classification_status,
        outcome.metadata_status,
        outcome.chunking_status,
    );
    for failure in &outcome.failures {
        println!("  failure in {}: {}", failure.stage, failure.message);
    }
}
