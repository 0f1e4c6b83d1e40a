//! Review comments and their diff anchors.

/// Where a comment is attached in the old/new file pair.
///
/// `old_line` is `None` when the anchor sits on an added line, `new_line`
/// is `None` on a removed line; both are set on an unchanged line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    /// Path in the old revision.
    pub old_path: String,
    /// Path in the new revision.
    pub new_path: String,
    /// 1-based old line number, where applicable.
    pub old_line: Option<usize>,
    /// 1-based new line number, where applicable.
    pub new_line: Option<usize>,
}

/// A review comment: either a local draft or a note that already exists on
/// the remote.
#[derive(Debug, Clone)]
pub enum Comment {
    /// Drafted locally, not yet submitted.
    Pending {
        /// Display name of the author.
        author: String,
        /// Comment text.
        body: String,
        /// Diff anchor.
        position: Position,
    },
    /// Fetched from (or confirmed by) the remote.
    Persisted {
        /// Remote note id.
        id: u64,
        /// Remote discussion grouping key.
        discussion_id: String,
        /// Display name of the author.
        author: String,
        /// Comment text.
        body: String,
        /// Diff anchor.
        position: Position,
    },
}

impl Comment {
    /// Whether this comment is a local draft.
    pub fn is_pending(&self) -> bool {
        matches!(self, Comment::Pending { .. })
    }

    /// The comment's author display name.
    pub fn author(&self) -> &str {
        match self {
            Comment::Pending { author, .. } | Comment::Persisted { author, .. } => author,
        }
    }

    /// The comment's body text.
    pub fn body(&self) -> &str {
        match self {
            Comment::Pending { body, .. } | Comment::Persisted { body, .. } => body,
        }
    }

    /// The comment's diff anchor.
    pub fn position(&self) -> &Position {
        match self {
            Comment::Pending { position, .. } | Comment::Persisted { position, .. } => position,
        }
    }

    /// Key identifying the annotated line this comment is anchored to.
    ///
    /// Added lines key on the new line number, removed lines on the old,
    /// unchanged lines on the pair. The same scheme is used when indexing a
    /// region's lines, so a lookup by key lands the comment under its line.
    pub fn anchor_key(&self) -> String {
        let pos = self.position();
        match (pos.old_line, pos.new_line) {
            (None | Some(0), Some(new)) => format!("+{new}"),
            (Some(old), None | Some(0)) => format!("-{old}"),
            (Some(old), Some(new)) => format!(" {new}_{old}"),
            (None, None) => String::new(),
        }
    }
}

/// Anchor key for an annotated line, matching [`Comment::anchor_key`].
pub fn line_anchor_key(
    mode: crate::core::Mode,
    old_line: Option<usize>,
    new_line: Option<usize>,
) -> String {
    match mode {
        crate::core::Mode::Added => format!("+{}", new_line.unwrap_or(0)),
        crate::core::Mode::Removed => format!("-{}", old_line.unwrap_or(0)),
        crate::core::Mode::Unchanged => {
            format!(" {}_{}", new_line.unwrap_or(0), old_line.unwrap_or(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Mode;

    fn position(old: Option<usize>, new: Option<usize>) -> Position {
        Position {
            old_path: "a.rs".to_string(),
            new_path: "a.rs".to_string(),
            old_line: old,
            new_line: new,
        }
    }

    fn pending(old: Option<usize>, new: Option<usize>) -> Comment {
        Comment::Pending {
            author: "(you)".to_string(),
            body: "hm".to_string(),
            position: position(old, new),
        }
    }

    #[test]
    fn anchor_keys_by_mode() {
        assert_eq!(pending(None, Some(2)).anchor_key(), "+2");
        assert_eq!(pending(Some(7), None).anchor_key(), "-7");
        assert_eq!(pending(Some(3), Some(4)).anchor_key(), " 4_3");
    }

    #[test]
    fn zero_wire_values_mean_absent() {
        // GitLab sends 0 for the side that does not apply.
        assert_eq!(pending(Some(0), Some(2)).anchor_key(), "+2");
        assert_eq!(pending(Some(7), Some(0)).anchor_key(), "-7");
    }

    #[test]
    fn line_keys_match_comment_keys() {
        assert_eq!(
            line_anchor_key(Mode::Added, None, Some(2)),
            pending(None, Some(2)).anchor_key()
        );
        assert_eq!(
            line_anchor_key(Mode::Removed, Some(7), None),
            pending(Some(7), None).anchor_key()
        );
        assert_eq!(
            line_anchor_key(Mode::Unchanged, Some(3), Some(4)),
            pending(Some(3), Some(4)).anchor_key()
        );
    }

    #[test]
    fn pending_flag() {
        assert!(pending(None, Some(1)).is_pending());
        let persisted = Comment::Persisted {
            id: 11,
            discussion_id: "abc".to_string(),
            author: "alice".to_string(),
            body: "ship it".to_string(),
            position: position(Some(1), Some(1)),
        };
        assert!(!persisted.is_pending());
    }
}
