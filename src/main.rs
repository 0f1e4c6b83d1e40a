//! mrlens - review GitLab merge requests in the terminal.

use std::io::{self, Write};
use std::panic;
use std::process::ExitCode;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::{
    event, execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;

use mrlens::config::Config;
use mrlens::remote::{MrTarget, TOKEN_ENV};
use mrlens::ui::{render, spawn_load, App, CrosstermSession, LoadParams};

/// RAII guard for terminal state. Restores terminal on drop (including panic).
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> io::Result<Self> {
        enable_raw_mode()?;
        execute!(io::stdout(), EnterAlternateScreen)?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        let _ = io::stdout().flush();
    }
}

/// Enable file logging only when `LOG_LEVEL` is set.
fn init_logging() {
    let level = match std::env::var("LOG_LEVEL").ok().as_deref() {
        Some("PANIC" | "FATAL" | "ERROR") => tracing::Level::ERROR,
        Some("WARN") => tracing::Level::WARN,
        Some("INFO") => tracing::Level::INFO,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("TRACE") => tracing::Level::TRACE,
        _ => return,
    };

    let Ok(file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open("mrlens.log")
    else {
        return;
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .init();
}

fn main() -> ExitCode {
    init_logging();
    tracing::debug!("mrlens starting");

    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        eprintln!("mrlens must be invoked with a merge request URL.");
        return ExitCode::from(2);
    };

    let target = match MrTarget::parse(&url) {
        Ok(target) => target,
        Err(e) => {
            eprintln!("unable to parse url: {e}");
            return ExitCode::from(2);
        }
    };
    tracing::debug!(project = %target.project, iid = target.iid, "parsed target");

    match run_tui(target) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn run_tui(target: MrTarget) -> Result<()> {
    let token =
        std::env::var(TOKEN_ENV).with_context(|| format!("{TOKEN_ENV} must be set"))?;
    let config = Config::load();

    let (tx, rx) = mpsc::channel();
    let params = LoadParams {
        api_url: target.api_url(),
        token,
        project: target.project.clone(),
        iid: target.iid,
        width: 80,
        palette: config.palette.clone(),
    };
    let mut app = App::new(config, params.clone(), tx.clone(), rx);
    spawn_load(params, tx);

    // Restore the terminal before printing any panic.
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        let _ = io::stdout().flush();
        default_hook(info);
    }));

    let guard = TerminalGuard::new()?;
    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(backend)?;
    let mut session = CrosstermSession;

    let size = terminal.size()?;
    app.handle_event(event::Event::Resize(size.width, size.height), &mut session);

    loop {
        if app.dirty {
            terminal.draw(|frame| render(frame, &app))?;
            app.dirty = false;
        }

        app.poll_messages();
        app.tick();

        if event::poll(Duration::from_millis(50))? {
            let ev = event::read()?;
            app.handle_event(ev, &mut session);
        }

        if app.should_quit {
            break;
        }
    }

    drop(guard);

    if let Some(fatal) = app.fatal.take() {
        anyhow::bail!(fatal);
    }

    Ok(())
}
