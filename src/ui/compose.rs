//! Comment composition via an external editor.

use std::io::{self, Write};
use std::process::Command;

use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use thiserror::Error;

/// Capability to hand the controlling terminal to another process and take
/// it back. Injected into key handling so regions never touch the terminal
/// directly.
pub trait TerminalSession {
    /// Leave raw mode / the alternate screen so a child process can use the
    /// terminal.
    fn release(&mut self) -> io::Result<()>;
    /// Re-enter raw mode / the alternate screen.
    fn restore(&mut self) -> io::Result<()>;
}

/// The real crossterm-backed terminal session.
#[derive(Debug, Default)]
pub struct CrosstermSession;

impl TerminalSession for CrosstermSession {
    fn release(&mut self) -> io::Result<()> {
        disable_raw_mode()?;
        execute!(io::stdout(), LeaveAlternateScreen)?;
        io::stdout().flush()
    }

    fn restore(&mut self) -> io::Result<()> {
        execute!(io::stdout(), EnterAlternateScreen)?;
        enable_raw_mode()?;
        io::stdout().flush()
    }
}

/// Errors from comment composition.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// The draft temp file could not be created. Fatal: without it there is
    /// nowhere for the editor to write.
    #[error("unable to create temp file for comment: {0}")]
    TempFile(io::Error),
    /// The editor ran but its output could not be read back.
    #[error("unable to read comment temp file: {0}")]
    ReadBack(io::Error),
}

/// Resolve the editor command line: `$VISUAL`, then `$EDITOR`, then `vi`.
fn editor_command() -> Vec<String> {
    for key in ["VISUAL", "EDITOR"] {
        if let Ok(value) = std::env::var(key) {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                continue;
            }
            match shell_words::split(trimmed) {
                Ok(parts) if !parts.is_empty() => return parts,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(var = key, error = %e, "unparseable editor variable, ignoring");
                }
            }
        }
    }
    vec!["vi".to_string()]
}

/// Open the user's editor on a fresh temp file and return what they wrote.
///
/// The terminal is released for the editor's lifetime and restored on every
/// exit path; the temp file is removed when it drops.
pub fn compose_comment(term: &mut dyn TerminalSession) -> Result<String, ComposeError> {
    tracing::debug!("creating temp file for comment");
    let file = tempfile::Builder::new()
        .prefix("mrlens-comment-")
        .suffix(".md")
        .tempfile()
        .map_err(ComposeError::TempFile)?;

    tracing::debug!("releasing terminal for editor");
    if let Err(e) = term.release() {
        tracing::warn!(error = %e, "failed to release terminal");
    }

    let parts = editor_command();
    let (program, args) = parts.split_first().expect("editor command is non-empty");

    tracing::debug!(editor = program, "invoking editor");
    let status = Command::new(program).args(args).arg(file.path()).status();

    let body = match status {
        Ok(_) => std::fs::read_to_string(file.path()).map_err(ComposeError::ReadBack),
        Err(e) => {
            tracing::error!(error = %e, "failed to launch editor");
            Err(ComposeError::ReadBack(e))
        }
    };

    tracing::debug!("restoring terminal");
    if let Err(e) = term.restore() {
        tracing::warn!(error = %e, "failed to restore terminal");
    }

    body
}
