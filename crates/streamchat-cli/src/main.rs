use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use streamchat_core::repositories::{
    DurableStorage, InMemoryStorage, JsonFileStorage, ThreadRepository,
};
use streamchat_core::services::{HttpTransport, MarkerScan, ReducerMode, SystemClock};
use streamchat_core::settings::{ClientSettings, SettingsJsonRepository, SettingsRepository};
use streamchat_core::{
    ConversationStore, SendOutcome, SessionController, StreamEvent, StreamStatus, Turn,
};

mod commands;
mod render;

use commands::{Command, HELP, parse_command};
use render::{TurnPrinter, render_groups, render_transcript};

#[derive(Parser, Debug)]
#[command(name = "streamchat")]
#[command(about = "Chat with a streaming completion endpoint from the terminal", long_about = None)]
#[command(version)]
struct Args {
    /// Completion endpoint URL
    #[arg(long)]
    endpoint: Option<String>,

    /// How replies are split into reasoning and final answer
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Recognize the final-answer marker even when it straddles two chunks
    #[arg(long)]
    windowed_marker: bool,

    /// Give up on a reply after this many seconds without data
    #[arg(long, value_name = "SECS")]
    idle_timeout: Option<u64>,

    /// Settings file (default: <config dir>/streamchat/settings.json)
    #[arg(long, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Directory for saved chats (default: <config dir>/streamchat/storage)
    #[arg(long, value_name = "DIR", conflicts_with = "ephemeral")]
    data_dir: Option<PathBuf>,

    /// Keep chats in memory only
    #[arg(long)]
    ephemeral: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    DualPhase,
    SinglePhase,
}

impl From<ModeArg> for ReducerMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::DualPhase => ReducerMode::DualPhase,
            ModeArg::SinglePhase => ReducerMode::SinglePhase,
        }
    }
}

async fn load_settings(args: &Args) -> Result<ClientSettings> {
    let repository = match &args.settings {
        Some(path) => SettingsJsonRepository::with_path(path),
        None => SettingsJsonRepository::new().context("Failed to locate settings file")?,
    };
    let mut settings = repository.load().await.with_context(|| {
        format!("Failed to load settings from {}", repository.file_path().display())
    })?;

    if let Some(endpoint) = &args.endpoint {
        settings.endpoint = endpoint.clone();
    }
    if let Some(mode) = args.mode {
        settings.reducer_mode = mode.into();
    }
    if args.windowed_marker {
        settings.marker_scan = MarkerScan::Windowed;
    }
    if let Some(secs) = args.idle_timeout {
        settings.idle_timeout_secs = Some(secs);
    }

    Ok(settings)
}

fn open_storage(args: &Args) -> Result<Arc<dyn DurableStorage>> {
    if args.ephemeral {
        return Ok(Arc::new(InMemoryStorage::new()));
    }
    let storage = match &args.data_dir {
        Some(dir) => JsonFileStorage::with_dir(dir),
        None => JsonFileStorage::new().context("Failed to locate storage directory")?,
    };
    debug!(dir = %storage.storage_dir().display(), "Using file storage");
    Ok(Arc::new(storage))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so they never interleave with the transcript
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = load_settings(&args).await?;
    info!(endpoint = %settings.endpoint, mode = ?settings.reducer_mode, "Starting streamchat");

    let transport = HttpTransport::new(settings.endpoint.clone(), settings.idle_timeout())
        .context("Failed to build HTTP client")?;
    let store = ConversationStore::load(ThreadRepository::new(open_storage(&args)?)).await;

    let mut controller = SessionController::new(
        store,
        Arc::new(transport),
        Arc::new(SystemClock),
        settings.session_options(),
    );

    run(&mut controller).await
}

enum Step {
    Input(String),
    InputClosed,
    Stream(StreamEvent),
}

async fn run(controller: &mut SessionController) -> Result<()> {
    let (line_tx, mut line_rx) = mpsc::channel::<String>(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    let mut printer = TurnPrinter::default();
    let mut input_open = true;
    emit("Type /help for commands.\n")?;
    prompt(controller)?;

    loop {
        if !input_open && !controller.needs_poll() {
            break;
        }

        let step = tokio::select! {
            line = line_rx.recv(), if input_open => match line {
                Some(line) => Step::Input(line),
                None => Step::InputClosed,
            },
            Some(event) = controller.next_event(), if controller.needs_poll() => {
                Step::Stream(event)
            }
            else => break,
        };

        match step {
            Step::InputClosed => {
                debug!("Input closed");
                input_open = false;
            }
            Step::Stream(event) => {
                render_event(controller, &mut printer, &event)?;
                if matches!(event, StreamEvent::Finished { .. }) {
                    prompt(controller)?;
                }
            }
            Step::Input(line) => {
                let command = parse_command(&line);
                let keep_going = handle_command(controller, &mut printer, command).await?;
                if !keep_going {
                    break;
                }
                prompt(controller)?;
            }
        }
    }

    Ok(())
}

/// Returns false when the session should end
async fn handle_command(
    controller: &mut SessionController,
    printer: &mut TurnPrinter,
    command: Command,
) -> Result<bool> {
    match command {
        Command::Send(text) => {
            let streaming = controller.streaming_index();
            match controller.send(&text).await {
                SendOutcome::Streaming => start_reply(printer)?,
                SendOutcome::Stopped => report_stopped(controller, printer, streaming)?,
                SendOutcome::Ignored => {}
            }
        }
        Command::Stop => {
            if !stop(controller, printer).await? {
                emit("(nothing to stop)\n")?;
            }
        }
        Command::Regenerate(index) => {
            stop(controller, printer).await?;
            let index = index.or_else(|| {
                controller
                    .turns()
                    .iter()
                    .rposition(|turn| turn.as_assistant().is_some())
            });
            match index {
                Some(index) => match controller.regenerate(index).await {
                    Ok(()) => start_reply(printer)?,
                    Err(e) => emit(&format!("{e}\n"))?,
                },
                None => emit("No reply to regenerate\n")?,
            }
        }
        Command::NewThread => {
            stop(controller, printer).await?;
            controller.new_thread().await;
            emit("Started a new chat\n")?;
        }
        Command::Threads => {
            emit(&render_groups(&controller.group_threads(chrono::Local::now())))?;
        }
        Command::Open(prefix) => match resolve_thread(controller, &prefix) {
            Ok(id) => {
                stop(controller, printer).await?;
                controller.open_thread(&id).await;
                emit(&render_transcript(controller.turns()))?;
            }
            Err(message) => emit(&message)?,
        },
        Command::Delete(prefix) => match resolve_thread(controller, &prefix) {
            Ok(id) => {
                if controller.active_thread_id() == Some(id.as_str()) {
                    stop(controller, printer).await?;
                }
                controller.delete_thread(&id).await;
                emit("Deleted\n")?;
            }
            Err(message) => emit(&message)?,
        },
        Command::System(None) => match controller.system_prompt() {
            Some(prompt) => emit(&format!("{prompt}\n"))?,
            None => emit("(no system prompt)\n")?,
        },
        Command::System(Some(prompt)) => {
            controller.set_system_prompt(prompt).await;
            emit("System prompt saved\n")?;
        }
        Command::Clear => {
            stop(controller, printer).await?;
            controller.clear_history().await;
            emit("All chats deleted\n")?;
        }
        Command::Help => emit(HELP)?,
        Command::Quit => {
            stop(controller, printer).await?;
            return Ok(false);
        }
        Command::Invalid(message) => emit(&format!("{message}\n"))?,
    }

    Ok(true)
}

fn render_event(
    controller: &SessionController,
    printer: &mut TurnPrinter,
    event: &StreamEvent,
) -> Result<()> {
    let (index, status) = match event {
        StreamEvent::TurnUpdated { index } => (*index, None),
        StreamEvent::Finished { index, status } => (*index, Some(status)),
    };
    let Some(turn) = controller.turns().get(index).and_then(Turn::as_assistant) else {
        return Ok(());
    };

    let text = match status {
        Some(status) => printer.finish(turn, status),
        None => printer.delta(turn),
    };
    emit(&text)
}

/// Stop the stream in flight, printing the frozen reply. Returns false when idle.
async fn stop(controller: &mut SessionController, printer: &mut TurnPrinter) -> Result<bool> {
    let streaming = controller.streaming_index();
    if !controller.stop().await {
        return Ok(false);
    }
    report_stopped(controller, printer, streaming)?;
    Ok(true)
}

fn report_stopped(
    controller: &SessionController,
    printer: &mut TurnPrinter,
    index: Option<usize>,
) -> Result<()> {
    let Some(index) = index else {
        return Ok(());
    };
    render_event(
        controller,
        printer,
        &StreamEvent::Finished {
            index,
            status: StreamStatus::Cancelled,
        },
    )
}

fn start_reply(printer: &mut TurnPrinter) -> Result<()> {
    *printer = TurnPrinter::default();
    emit("assistant:\n")
}

/// Find the single thread whose id starts with `prefix`
fn resolve_thread(controller: &SessionController, prefix: &str) -> Result<String, String> {
    let matches: Vec<&str> = controller
        .store()
        .threads()
        .iter()
        .map(|thread| thread.id.as_str())
        .filter(|id| id.starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [id] => Ok(id.to_string()),
        [] => Err(format!("No chat id starts with {prefix}\n")),
        _ => Err(format!("{} chats match {prefix}, use a longer prefix\n", matches.len())),
    }
}

fn prompt(controller: &SessionController) -> Result<()> {
    if controller.is_sending() {
        return Ok(());
    }
    emit("> ")
}

fn emit(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
