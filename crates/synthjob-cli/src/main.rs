use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use log::{error, info};
use tracing::instrument::WithSubscriber;
use tracing::Dispatch;

use synthjob::db::process_repo::ListFilter;
use synthjob::db::search_repo::SearchFilter;
use synthjob::dispatch::{Dispatcher, LocalQueue, SqliteQueue, Submission, Submitter, SubmitterConfig};
use synthjob::error::SynthError;
use synthjob::pipeline::{Collaborators, Processor, ProcessorConfig};
use synthjob::storage::ObjectAdmin;
use synthjob::{ArtifactKind, Config, Database, History, ProcessStatus};

/// Runs long synthesis jobs and keeps their history.
#[derive(Parser)]
#[command(name = "synthjob", version, about = "Synthesis job pipeline")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, short, global = true, env = "SYNTHJOB_CONFIG", default_value = "synthjob.json")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume queued jobs until interrupted
    Worker,

    /// Queue a score for synthesis and print its request id
    Submit {
        /// Score file (musicxml)
        score: PathBuf,
        /// Synthesis parameter, e.g. --param model=KIRITAN
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },

    /// Synthesize scores in this process, without the queue
    Run {
        /// Score files (musicxml)
        #[arg(required = true)]
        scores: Vec<PathBuf>,
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },

    /// Show one job
    Status { rid: String },

    /// List the most recent jobs
    List {
        #[arg(long)]
        status: Option<ProcessStatus>,
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Search job history
    Search {
        #[arg(long)]
        status: Option<ProcessStatus>,
        /// Title prefix
        #[arg(long)]
        prefix: Option<String>,
        /// Created at or after (RFC3339)
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        /// Created before (RFC3339)
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Download an artifact: log, config, musicxml, wav or world_wav
    Fetch {
        rid: String,
        kind: ArtifactKind,
        /// Output file; defaults to the artifact's file name
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))
}

/// Everything the subcommands are built from.
struct App {
    config: Config,
    db: Database,
    objects: Arc<ObjectAdmin>,
}

impl App {
    async fn open(config: Config) -> Result<Self, SynthError> {
        let db_path = config.database.resolve_path().ok_or_else(|| {
            synthjob::ConfigError::Validation {
                message: "cannot determine database path".to_string(),
            }
        })?;
        let db = Database::open(&db_path)?;
        let store = synthjob::storage::open(&config.storage).await?;
        let objects = Arc::new(ObjectAdmin::with_database(store, &db));
        Ok(Self {
            config,
            db,
            objects,
        })
    }

    fn processor(&self) -> Result<Arc<Processor>, SynthError> {
        let notifier = synthjob::notify::from_config(&self.config.notification)?;
        let deps = Collaborators::from_database(&self.db, self.objects.clone(), notifier);
        Ok(Arc::new(Processor::new(
            Arc::new(ProcessorConfig::from_config(&self.config)),
            deps,
        )))
    }

    fn queue(&self) -> SqliteQueue {
        SqliteQueue::new(self.db.clone(), self.config.worker.max_retry)
            .with_attempt_timeout(self.config.worker.process_timeout())
    }

    fn history(&self) -> History {
        History::with_database(&self.db, self.objects.clone())
    }
}

fn read_submission(path: &Path, params: &[(String, String)]) -> Result<Submission, String> {
    let score = std::fs::read(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    Ok(Submission {
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        score,
        params: params.iter().cloned().collect::<BTreeMap<_, _>>(),
    })
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to render output: {}", e),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match synthjob::load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    config.logging.debug |= cli.debug;

    let dispatch = match synthjob::logging::build_dispatch(&config.logging) {
        Ok(dispatch) => dispatch,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Warning: log bridge unavailable: {}", e);
    }
    let _guard = tracing::dispatcher::set_default(&dispatch);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(
        async {
            let app = App::open(config).await.map_err(|e| e.to_string())?;
            run_command(cli.command, app, dispatch.clone()).await
        }
        .with_subscriber(dispatch.clone()),
    );

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_command(command: Commands, app: App, dispatch: Dispatch) -> Result<(), String> {
    match command {
        Commands::Worker => run_worker(app, dispatch).await,
        Commands::Submit { score, params } => {
            let submission = read_submission(&score, &params)?;
            let submitter = Submitter::with_database(
                SubmitterConfig::from_config(&app.config),
                app.objects.clone(),
                &app.db,
                Arc::new(app.queue()),
            );
            let rid = submitter.submit(submission).await.map_err(|e| e.to_string())?;
            println!("{}", rid);
            Ok(())
        }
        Commands::Run { scores, params } => run_local(app, scores, params).await,
        Commands::Status { rid } => {
            let view = app.history().status(&rid).map_err(|e| e.to_string())?;
            print_json(&view);
            Ok(())
        }
        Commands::List { status, limit } => {
            let views = app
                .history()
                .list(&ListFilter { status, limit })
                .map_err(|e| e.to_string())?;
            print_json(&views);
            Ok(())
        }
        Commands::Search {
            status,
            prefix,
            from,
            until,
            limit,
        } => {
            let views = app
                .history()
                .search(&SearchFilter {
                    status,
                    title_prefix: prefix,
                    created_from: from,
                    created_until: until,
                    limit,
                })
                .map_err(|e| e.to_string())?;
            print_json(&views);
            Ok(())
        }
        Commands::Fetch { rid, kind, output } => {
            let artifact = app
                .history()
                .artifact(&rid, kind)
                .await
                .map_err(|e| e.to_string())?;
            let path = output.unwrap_or_else(|| PathBuf::from(&artifact.file_name));
            std::fs::write(&path, &artifact.bytes)
                .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
            info!(
                "Wrote {} ({}, {} bytes)",
                path.display(),
                artifact.content_type,
                artifact.bytes.len()
            );
            Ok(())
        }
    }
}

async fn run_worker(app: App, dispatch: Dispatch) -> Result<(), String> {
    let processor = app.processor().map_err(|e| e.to_string())?;
    let worker_count = app.config.worker.concurrency.max(1);
    let dispatcher = Dispatcher::start(
        Arc::new(app.queue()),
        processor,
        worker_count,
        app.config.worker.poll_interval(),
        dispatch,
    );

    let (signal_tx, signal_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = signal_tx.send(());
    })
    .map_err(|e| format!("failed to install signal handler: {}", e))?;

    info!("Worker running, press Ctrl+C to stop");
    tokio::task::spawn_blocking(move || {
        let _ = signal_rx.recv();
        dispatcher.shutdown();

        // A second interrupt cancels the running attempts.
        let cancel = dispatcher.cancel_token();
        std::thread::spawn(move || {
            if signal_rx.recv().is_ok() {
                info!("Cancelling running jobs");
                cancel.cancel();
            }
        });
        dispatcher.wait();
    })
    .await
    .map_err(|e| e.to_string())
}

async fn run_local(
    app: App,
    scores: Vec<PathBuf>,
    params: Vec<(String, String)>,
) -> Result<(), String> {
    let processor = app.processor().map_err(|e| e.to_string())?;
    let (queue, mut results) = LocalQueue::new(
        processor,
        app.config.worker.concurrency,
        tokio::runtime::Handle::current(),
    );
    let queue = Arc::new(queue);
    let submitter = Submitter::with_database(
        SubmitterConfig::from_config(&app.config),
        app.objects.clone(),
        &app.db,
        queue.clone(),
    );

    let mut rids = Vec::with_capacity(scores.len());
    for score in &scores {
        let submission = read_submission(score, &params)?;
        let rid = submitter.submit(submission).await.map_err(|e| e.to_string())?;
        info!("Submitted {} as {}", score.display(), rid);
        rids.push(rid);
    }

    let closer = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.wait_and_close().await }.with_current_subscriber())
    };

    let mut failed = 0;
    while let Some(done) = results.recv().await {
        let rid = &done.waiter.task().rid;
        match done.result {
            Ok(()) => info!("{} succeeded", rid),
            Err(e) => {
                failed += 1;
                error!("{} failed: {}", rid, e);
            }
        }
    }
    closer.await.map_err(|e| e.to_string())?;

    let history = app.history();
    let views = rids
        .iter()
        .map(|rid| history.status(rid))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;
    print_json(&views);

    if failed > 0 {
        Err(format!("{} of {} jobs failed", failed, rids.len()))
    } else {
        Ok(())
    }
}
