use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use docvault::{
    audio::{AudioMetadataExtractor, FfprobeAudioProbe, HeaderAudioProbe},
    config::{self, Config},
    intake::FileCategory,
    logging::{self, LogOptions},
    processing::{Collaborators, FileService},
    records::{FileFilter, JsonRecordStore, Page, ProcessingStatus},
    storage::{ContentSniffer, LocalBlobStore},
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "docvault",
    about = "Ingest files, extract their text, and keep storage consistent"
)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a file and wait until processing finishes.
    Upload {
        path: PathBuf,
        #[arg(long)]
        uploader: Uuid,
        #[arg(long)]
        project: Option<Uuid>,
        #[arg(long)]
        task: Option<Uuid>,
        /// Name to record instead of the file's own name.
        #[arg(long)]
        name: Option<String>,
    },
    /// Show one record.
    Get { id: Uuid },
    /// List records, newest first.
    List {
        #[arg(long)]
        project: Option<Uuid>,
        #[arg(long)]
        task: Option<Uuid>,
        #[arg(long)]
        category: Option<FileCategory>,
        #[arg(long)]
        uploader: Option<Uuid>,
        #[arg(long)]
        status: Option<ProcessingStatus>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Delete a record and its stored blob.
    Delete { id: Uuid },
    /// Remove stored blobs that no record references.
    Reconcile,
    /// Requeue pending records and fail records stuck in processing.
    Recover,
    /// Summarize stored records by status and category.
    Stats,
}

#[derive(Serialize)]
struct StoreStats {
    total: usize,
    total_bytes: u64,
    by_status: BTreeMap<&'static str, usize>,
    by_category: BTreeMap<&'static str, usize>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(LogOptions {
        default_filter: if cli.verbose { "debug" } else { "info" },
        ..LogOptions::default()
    });
    config::init_config().context("failed to load configuration")?;
    let service = build_service(config::get_config()).await?;

    let outcome = execute(&service, cli.command).await;
    service.shutdown().await;
    outcome
}

async fn build_service(config: &Config) -> Result<FileService> {
    let blobs = LocalBlobStore::new(&config.upload_dir)
        .await
        .with_context(|| format!("failed to open upload dir {}", config.upload_dir.display()))?;
    let records = JsonRecordStore::new(&config.record_dir)
        .await
        .with_context(|| format!("failed to open record dir {}", config.record_dir.display()))?;
    let audio: Arc<dyn AudioMetadataExtractor> = match &config.ffprobe_path {
        Some(path) => {
            let probe = FfprobeAudioProbe::new(path.clone());
            Arc::new(match config.extraction_timeout {
                Some(limit) => probe.with_timeout(limit),
                None => probe,
            })
        }
        None => Arc::new(HeaderAudioProbe),
    };

    Ok(FileService::new(
        Collaborators {
            records: Arc::new(records),
            blobs: Arc::new(blobs),
            sniffer: Arc::new(ContentSniffer),
            audio,
        },
        config,
    ))
}

async fn execute(service: &FileService, command: Command) -> Result<()> {
    match command {
        Command::Upload {
            path,
            uploader,
            project,
            task,
            name,
        } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let name = match name {
                Some(name) => name,
                None => path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            };
            let record = service
                .upload_and_wait(&bytes, &name, uploader, project, task)
                .await?;
            print_json(&record)
        }
        Command::Get { id } => match service.get_file(id).await? {
            Some(record) => print_json(&record),
            None => bail!("file {id} not found"),
        },
        Command::List {
            project,
            task,
            category,
            uploader,
            status,
            limit,
            offset,
        } => {
            let filter = FileFilter {
                project_id: project,
                task_id: task,
                category,
                uploader_id: uploader,
                status,
            };
            let records = service.list_files(&filter, Page { limit, offset }).await?;
            print_json(&records)
        }
        Command::Delete { id } => {
            if !service.delete_file(id).await? {
                bail!("file {id} not found");
            }
            print_json(&serde_json::json!({ "deleted": id }))
        }
        Command::Reconcile => print_json(&service.reconcile_report().await?),
        Command::Recover => print_json(&service.recover().await?),
        Command::Stats => {
            let records = service
                .list_files(
                    &FileFilter::default(),
                    Page {
                        limit: usize::MAX,
                        offset: 0,
                    },
                )
                .await?;
            let mut stats = StoreStats {
                total: records.len(),
                total_bytes: 0,
                by_status: BTreeMap::new(),
                by_category: BTreeMap::new(),
            };
            for record in &records {
                stats.total_bytes += record.size_bytes;
                *stats.by_status.entry(record.status().as_str()).or_default() += 1;
                *stats.by_category.entry(record.category.as_str()).or_default() += 1;
            }
            print_json(&stats)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{rendered}");
    Ok(())
}
