//! archbatch CLI: apply or check change documents against a model.
//!
//! Usage:
//!   archbatch apply <document> [--model model.json] [options]
//!   archbatch check <document> [--model model.json] [options]

use archbatch::client::{
    op_histogram, FlattenedDocument, LocalTransport, Orchestrator, OrchestratorConfig,
    OrchestratorError, Profile,
};
use archbatch::{ChangeApi, ModelEngine, QueueConfig};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;

#[derive(Parser)]
#[command(
    name = "archbatch",
    version,
    about = "Apply batched change documents to an architecture model"
)]
struct Cli {
    /// More logging (debug)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Less logging (warnings only)
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a document chunk by chunk and print the run report
    Apply {
        document: PathBuf,
        #[command(flatten)]
        options: RunOptions,
    },
    /// Flatten and check a document without submitting anything
    Check {
        document: PathBuf,
        #[command(flatten)]
        options: RunOptions,
    },
}

#[derive(Args)]
struct RunOptions {
    /// Model JSON to start from (empty model if omitted)
    #[arg(long)]
    model: Option<PathBuf>,
    /// Orchestrator config YAML
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    chunk_size: Option<usize>,
    /// Use the fast profile
    #[arg(long)]
    fast: bool,
    #[arg(long)]
    skip_existing: bool,
    #[arg(long)]
    continue_on_error: bool,
    /// Submit without waiting for each chunk
    #[arg(long)]
    no_poll: bool,
    /// Write the final tempId map here
    #[arg(long)]
    save_ids: Option<PathBuf>,
    #[arg(long)]
    allow_incomplete_id_files: bool,
    /// Bind unresolved references by exact concept name
    #[arg(long)]
    resolve_names: bool,
}

impl RunOptions {
    fn config(&self) -> Result<OrchestratorConfig, String> {
        let path = self
            .config
            .clone()
            .or_else(|| OrchestratorConfig::default_path().filter(|p| p.exists()));
        let mut config = match path {
            Some(path) => OrchestratorConfig::from_yaml_file(&path).map_err(|e| e.to_string())?,
            None => OrchestratorConfig::default(),
        };
        if self.fast {
            config = config.with_profile(Profile::Fast);
        }
        if let Some(size) = self.chunk_size {
            config.chunk_size = size;
        }
        config.skip_existing |= self.skip_existing;
        config.continue_on_error |= self.continue_on_error;
        config.allow_incomplete_id_files |= self.allow_incomplete_id_files;
        config.resolve_names |= self.resolve_names;
        if self.no_poll {
            config.poll = false;
        }
        if self.save_ids.is_some() {
            config.save_ids = self.save_ids.clone();
        }
        Ok(config)
    }

    fn setup(&self) -> Result<(OrchestratorConfig, ModelEngine), String> {
        Ok((self.config()?, self.engine()?))
    }

    fn engine(&self) -> Result<ModelEngine, String> {
        match &self.model {
            Some(path) => ModelEngine::from_json_file(path)
                .map_err(|e| format!("failed to load model {}: {}", path.display(), e)),
            None => Ok(ModelEngine::new()),
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        Level::DEBUG
    } else if quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn report_error(e: &OrchestratorError) {
    eprintln!("Error [{}] ({}): {}", e.code(), e.origin().as_str(), e);
    if let Some(recovery) = e.recovery() {
        match serde_json::to_string_pretty(recovery) {
            Ok(json) => eprintln!("Recovery snapshot:\n{}", json),
            Err(err) => eprintln!("Recovery snapshot unavailable: {}", err),
        }
    }
}

async fn cmd_apply(document: &Path, options: &RunOptions) -> i32 {
    let (config, engine) = match options.setup() {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let api = ChangeApi::start(Arc::new(engine), QueueConfig::default());
    let orchestrator = Orchestrator::new(Arc::new(LocalTransport::new(api.clone())), config);

    let code = match orchestrator.run_file(document).await {
        Ok(report) => {
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Error: cannot render report: {}", e),
            }
            eprintln!(
                "{} chunk(s), {} operation(s), {} duplicate(s) skipped, {} warning(s)",
                report.chunks.len(),
                report.operations(),
                report.duplicates_skipped(),
                report.warnings.len()
            );
            if report.succeeded() {
                0
            } else {
                2
            }
        }
        Err(e) => {
            report_error(&e);
            1
        }
    };
    api.shutdown().await;
    code
}

async fn cmd_check(document: &Path, options: &RunOptions) -> i32 {
    let (config, engine) = match options.setup() {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let flat = match FlattenedDocument::load(document) {
        Ok(flat) => flat,
        Err(e) => {
            report_error(&e.into());
            return 1;
        }
    };
    let api = ChangeApi::start(Arc::new(engine), QueueConfig::default());
    let chunk_size = config.chunk_size;
    let orchestrator = Orchestrator::new(Arc::new(LocalTransport::new(api.clone())), config);

    let code = match orchestrator.prepare(flat).await {
        Ok(prepared) => {
            println!("changes:  {}", prepared.document.len());
            println!("chunks:   {} (size {})", prepared.chunk_count(chunk_size), chunk_size);
            println!("idFiles:  {}", prepared.document.id_files.len());
            println!("bound:    {}", prepared.ids.len());
            let mut ops: Vec<_> = op_histogram(&prepared.document.changes).into_iter().collect();
            ops.sort();
            for (op, count) in ops {
                println!("  {:<26} {:>6}", op, count);
            }
            for warning in &prepared.warnings {
                println!("warning: {}", warning);
            }
            0
        }
        Err(e) => {
            report_error(&e);
            1
        }
    };
    api.shutdown().await;
    code
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };
    let code = rt.block_on(async {
        match &cli.command {
            Commands::Apply { document, options } => cmd_apply(document, options).await,
            Commands::Check { document, options } => cmd_check(document, options).await,
        }
    });
    std::process::exit(code);
}
