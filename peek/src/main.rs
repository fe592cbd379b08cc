mod config;
mod editor;
mod error;
mod keymap;
mod preview;
mod search;
mod sink;
mod tree;
mod ui;
mod vcs;
mod watch;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use crossterm::event::{self, Event, KeyEventKind};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use search::{driver_for, Orchestrator, SearchOptions};
use sink::Sink;
use tree::{FsReader, Loader};
use ui::{App, EditRequest, Keymaps};
use vcs::IgnoreClassifier;
use watch::WatchBridge;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "peek")]
#[command(about = "Terminal file browser with a live tree, preview and search")]
#[command(version)]
struct Cli {
    /// Directory to browse (default: current dir)
    root: Option<PathBuf>,

    /// Search tool to use: ag or rg
    #[arg(short, long)]
    driver: Option<String>,

    /// Config file to use instead of the default location
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("{} {:#}", "error:".red().bold(), err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    init_tracing()?;

    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("Could not determine current directory")?,
    };
    let root = root
        .canonicalize()
        .with_context(|| format!("Cannot open {}", root.display()))?;
    if !root.is_dir() {
        anyhow::bail!("{} is not a directory", root.display());
    }

    let config = Config::load(cli.config.as_deref())?;
    // Bad bindings are reported before the terminal switches to raw mode.
    let keymaps = Keymaps::build(&config.keymap)?;
    let editor = config.editor();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let _enter = runtime.enter();

    let (sink, mut updates) = Sink::channel();
    let ignore = Arc::new(IgnoreClassifier::initialize(&root));

    let mut loader = Loader::new(Arc::new(FsReader), ignore.clone(), sink.clone());
    match WatchBridge::new() {
        Ok((bridge, events)) => {
            runtime.spawn(bridge.clone().run(events, ignore, sink.clone()));
            loader = loader.with_watch(bridge);
        }
        Err(err) => warn!("file watching disabled: {}", err),
    }

    let driver = driver_for(cli.driver.as_deref().unwrap_or(&config.search.driver));
    let options = SearchOptions {
        extra_args: config.search.extra_args.clone(),
        ..SearchOptions::default()
    };
    let orchestrator = Arc::new(Orchestrator::new(driver, root.clone(), options, sink.clone()));
    info!("browsing {} (search: {})", root.display(), orchestrator.driver_name());

    let mut app = App::new(root, loader, orchestrator, keymaps, config.highlight_limit, sink);

    let (mut terminal, _guard) = ui::terminal::enter()?;
    let mut dirty = true;
    loop {
        while let Ok(update) = updates.try_recv() {
            dirty |= app.apply(update);
        }
        if dirty {
            terminal.draw(|frame| app.draw(frame))?;
            dirty = false;
        }

        if event::poll(POLL_INTERVAL)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    app.handle_key(key);
                    dirty = true;
                }
                Event::Resize(..) => dirty = true,
                _ => {}
            }
        }

        if let Some(request) = app.take_edit_request() {
            ui::terminal::suspend(&mut terminal, || launch_editor(&editor, &request))?;
            dirty = true;
        }
        if app.should_quit() {
            break;
        }
    }

    info!("exiting");
    Ok(())
}

fn launch_editor(editor: &str, request: &EditRequest) {
    info!("editing {} with {}", request.path.display(), editor);
    match editor::command(editor, &request.path, request.line).status() {
        Ok(status) if !status.success() => warn!("{} exited with {}", editor, status),
        Ok(_) => {}
        Err(err) => error!("failed to run {}: {}", editor, err),
    }
}

/// Logs go to the file named by `PEEK_LOG`; the terminal belongs to the UI.
/// Without it, tracing stays off.
fn init_tracing() -> Result<()> {
    let Some(path) = std::env::var_os("PEEK_LOG") else {
        return Ok(());
    };
    let path = Path::new(&path);
    let file = File::options()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("peek=debug"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file)),
        )
        .with(filter)
        .try_init()
        .context("Failed to initialize logging")?;
    Ok(())
}
