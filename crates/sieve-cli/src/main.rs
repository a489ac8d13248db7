use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sieve_core::{Document, Result, SieveConfig, SieveError};
use sieve_engines::{AnthropicClient, BackendSet};
use sieve_tasks::{BridgeRegistry, Pipeline, PipelineConfig, TaskKind};

#[derive(Parser)]
#[command(name = "sieve")]
#[command(about = "Run zero- and few-shot language model task pipelines over documents", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a serialized pipeline over a JSONL file of documents
    Run {
        /// Pipeline snapshot (JSON)
        #[arg(short, long)]
        pipeline: PathBuf,

        /// Input documents, one JSON object per line
        #[arg(short, long)]
        docs: PathBuf,

        /// Where to write the processed documents (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Export the results of this task as a dataset
        #[arg(long, requires = "dataset_output")]
        dataset: Option<String>,

        /// Where to write the exported dataset (JSONL)
        #[arg(long)]
        dataset_output: Option<PathBuf>,
    },
    /// List the engine kinds each task supports
    Engines,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sieve=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            pipeline,
            docs,
            output,
            dataset,
            dataset_output,
        } => {
            cmd_run(
                &pipeline,
                &docs,
                output.as_deref(),
                dataset.as_deref().zip(dataset_output.as_deref()),
            )
            .await
        }
        Commands::Engines => cmd_engines(),
    }
}

async fn cmd_run(
    pipeline_path: &Path,
    docs_path: &Path,
    output: Option<&Path>,
    dataset: Option<(&str, &Path)>,
) -> Result<()> {
    let config = SieveConfig::from_env()?;
    if config.anthropic.api_key.is_empty() {
        return Err(SieveError::Config("ANTHROPIC_API_KEY must be set".to_string()));
    }

    let client = Arc::new(AnthropicClient::new(config.anthropic)?);
    let backends = BackendSet::new()
        .with_chat(client.clone())
        .with_constrained(client);

    let mut snapshot = PipelineConfig::from_reader(BufReader::new(File::open(pipeline_path)?))?;
    // SIEVE_BATCH_SIZE and SIEVE_STRICT override what the snapshot recorded.
    snapshot.apply_overrides(&config.generation);
    let pipeline = Pipeline::from_config(&snapshot, &backends)?;
    info!(tasks = pipeline.len(), path = %pipeline_path.display(), "Loaded pipeline");

    let mut docs = read_documents(docs_path)?;
    info!(docs = docs.len(), "Loaded documents");

    pipeline.run(&mut docs).await?;

    match output {
        Some(path) => write_documents(&docs, BufWriter::new(File::create(path)?))?,
        None => write_documents(&docs, io::stdout().lock())?,
    }

    if let Some((task_id, path)) = dataset {
        let task = pipeline
            .task(task_id)
            .ok_or_else(|| SieveError::Config(format!("pipeline has no task '{task_id}'")))?;
        let exported = task.to_dataset(&docs)?;
        exported.write_jsonl(BufWriter::new(File::create(path)?))?;
        info!(task_id, rows = exported.len(), path = %path.display(), "Exported dataset");
    }

    Ok(())
}

fn cmd_engines() -> Result<()> {
    let registry = BridgeRegistry::builtin();
    let mut out = io::stdout().lock();
    for task in TaskKind::ALL {
        let engines: Vec<String> = registry
            .supported_engines(task)
            .iter()
            .map(ToString::to_string)
            .collect();
        writeln!(out, "{:<24} {}", task.as_str(), engines.join(", "))?;
    }
    Ok(())
}

fn read_documents(path: &Path) -> Result<Vec<Document>> {
    let reader = BufReader::new(File::open(path)?);
    let mut docs = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc = serde_json::from_str(&line).map_err(|e| {
            SieveError::Config(format!("{}:{}: invalid document: {e}", path.display(), line_no + 1))
        })?;
        docs.push(doc);
    }
    Ok(docs)
}

fn write_documents<W: Write>(docs: &[Document], mut writer: W) -> Result<()> {
    for doc in docs {
        serde_json::to_writer(&mut writer, doc)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}
