use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use autochat_core::{socket_endpoint, Config, Connection, Interpreter, Session};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod app;
mod handler;
mod tui;
mod ui;

use app::App;
use tui::{AppEvent, EventHandler, Tui};

#[derive(Parser)]
#[command(name = "autochat")]
#[command(about = "Chat with an assistant backend over a WebSocket session")]
struct Cli {
    /// Backend base address, e.g. http://localhost:8001
    #[arg(short, long)]
    backend_url: Option<String>,
    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Log file (defaults to the user cache directory)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    init_logging(&config, cli.log_file.as_deref())?;

    let base = config.backend_url(cli.backend_url.as_deref())?;
    let endpoint = socket_endpoint(&base)?;
    info!(%base, %endpoint, "Starting chat session");

    let (connection, connection_events) = Connection::open(endpoint.clone());
    let session = Session::new(connection, Interpreter::new(&base))
        .with_response_timeout(config.response_timeout());
    let mut app = App::new(session, endpoint);
    let mut events = EventHandler::new(connection_events);

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let result = run(&mut terminal, &mut app, &mut events).await;
    tui::restore()?;

    app.session.shutdown().await;
    info!("Chat session ended");
    result
}

async fn run(terminal: &mut Tui, app: &mut App, events: &mut EventHandler) -> Result<()> {
    terminal.draw(|frame| ui::render(app, frame))?;

    while !app.should_quit {
        let Some(event) = events.next().await else {
            break;
        };
        // Ticks only matter while the thinking animation runs
        let redraw = !matches!(event, AppEvent::Tick) || app.session.state().awaiting_response;

        handler::handle_event(app, event);

        if app.take_changes() || redraw {
            terminal.draw(|frame| ui::render(app, frame))?;
        }
    }

    Ok(())
}

fn init_logging(config: &Config, log_file: Option<&Path>) -> Result<()> {
    let path = match log_file {
        Some(path) => path.to_path_buf(),
        None => dirs::cache_dir()
            .ok_or_else(|| anyhow!("Could not determine cache directory"))?
            .join("autochat")
            .join("autochat.log"),
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(&path)
        .with_context(|| format!("creating log file {}", path.display()))?;

    // Logs go to a file; stderr belongs to the terminal UI
    let filter = EnvFilter::try_from_env("AUTOCHAT_LOG").unwrap_or_else(|_| {
        EnvFilter::new(config.log_filter.as_deref().unwrap_or("info"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(file)
        .with_ansi(false)
        .init();

    Ok(())
}
