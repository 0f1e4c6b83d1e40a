//! mrlens - a terminal review tool for GitLab merge requests.
//!
//! Point it at a merge request URL and review the change set as a
//! navigable, syntax-highlighted unified diff: fold and unfold context,
//! read existing discussion threads inline, draft new comments in your
//! editor, and submit them as a batch.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use mrlens::prelude::*;
//!
//! let target = MrTarget::parse("https://gitlab.example.com/group/proj/-/merge_requests/42")?;
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod core;
pub mod highlight;
pub mod prelude;
pub mod remote;
pub mod ui;
