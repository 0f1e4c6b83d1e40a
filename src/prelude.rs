//! Common re-exports for convenient importing.
//!
//! # Example
//!
//! ```rust,ignore
//! use mrlens::prelude::*;
//! ```

pub use crate::core::{
    annotate, format_file, AnnotateError, AnnotatedLine, Comment, FormattedFile, FormattedLine,
    Mode, Position,
};
pub use crate::remote::{Change, GitLab, MergeRequest, MrTarget, RemoteError};
