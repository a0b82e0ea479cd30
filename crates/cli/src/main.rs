//! `taskwatch`: submit, watch and cancel remote agent tasks from a terminal.

mod render;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use tw_core::config::loader::load_config;
use tw_core::engine::credentials::API_TOKEN_ENV;
use tw_core::engine::{CredentialProvider, EnvCredentials, ExecutionEngine, HttpEngine};
use tw_core::ExecutionController;
use tw_protocol::config_models::{TrackerConfig, TransportKind};
use tw_protocol::ipc::{Event, SubmitRequest};

/// Environment variable holding the log filter directive.
const LOG_ENV: &str = "TASKWATCH_LOG";

#[derive(Parser)]
#[command(name = "taskwatch", version, about = "Submit and watch remote agent tasks")]
struct Cli {
    /// Directory containing `.taskwatch/config.toml`
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Override the configured transport (stream, poll or change_feed)
    #[arg(long, global = true)]
    transport: Option<TransportKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a new task to the execution engine
    Submit {
        /// Instruction for the agent
        #[arg(long)]
        prompt: String,

        #[arg(long, default_value = "general")]
        task_type: String,

        #[arg(long, default_value = "agent")]
        mode: String,

        /// Follow the task until it finishes
        #[arg(long)]
        watch: bool,
    },

    /// Follow an existing task until it finishes
    Watch { task_id: String },

    /// Ask the engine to cancel a task
    Cancel { task_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    let mut config = load_config(&cli.root).await?.tracker;
    if let Some(transport) = cli.transport {
        config.transport = transport;
    }

    let engine: Arc<dyn ExecutionEngine> = Arc::new(HttpEngine::from_config(&config)?);
    let credentials = Arc::new(EnvCredentials);

    match cli.command {
        Commands::Submit {
            prompt,
            task_type,
            mode,
            watch,
        } => {
            let (controller, events) = build_controller(engine, credentials, config);
            let request = SubmitRequest::new(prompt, task_type).with_mode(mode);
            let task = controller.start(request).await?;
            println!("{} Submitted task {}", "→".blue().bold(), task.id.bold());
            if watch {
                follow(&controller, events).await?;
            } else {
                controller.reset();
            }
        }
        Commands::Watch { task_id } => {
            let (controller, events) = build_controller(engine, credentials, config);
            controller.load(&task_id)?;
            println!("{} Watching task {}", "→".blue().bold(), task_id.bold());
            follow(&controller, events).await?;
        }
        Commands::Cancel { task_id } => {
            let token = credentials
                .bearer_token()
                .ok_or_else(|| eyre!("Not authenticated: {API_TOKEN_ENV} is not set"))?;
            engine.cancel(&task_id, &token).await?;
            println!("{} Cancellation requested for {}", "✓".green().bold(), task_id.bold());
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_controller(
    engine: Arc<dyn ExecutionEngine>,
    credentials: Arc<EnvCredentials>,
    config: TrackerConfig,
) -> (ExecutionController, mpsc::UnboundedReceiver<Event>) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let controller = ExecutionController::builder(engine, credentials)
        .config(config)
        .events(events_tx)
        .build();
    (controller, events_rx)
}

/// Print notifications until the task reaches a terminal outcome.
///
/// Ctrl-C stops the task locally and requests a remote cancel.
async fn follow(
    controller: &ExecutionController,
    mut events: mpsc::UnboundedReceiver<Event>,
) -> Result<()> {
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    return Err(eyre!("Controller closed before the task finished"));
                };
                println!("{}", render::render_event(&event));
                match event {
                    Event::Completed { .. } => return Ok(()),
                    Event::Failed { error, .. } => return Err(eyre!("Task failed: {error}")),
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping task");
                controller.stop();
                // Let the best-effort remote cancel go out before the runtime shuts down.
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                println!("{} Stopped", "■".yellow().bold());
                return Ok(());
            }
        }
    }
}
