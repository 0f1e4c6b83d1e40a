//! Core diff model (no TUI dependencies).

mod annotate;
mod comment;
mod format;

pub use annotate::*;
pub use comment::*;
pub use format::*;
