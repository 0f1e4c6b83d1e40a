//! Vertical regions: one per changed file.
//!
//! A region owns its file's formatted lines, fold state and comments, and
//! projects them into a dense `line_map` of row descriptors. The screen
//! composer only ever talks to regions through the [`Region`] trait.

use std::collections::HashMap;
use std::collections::VecDeque;

use crossterm::event::{KeyCode, KeyEvent};
use ratatui::style::Style;
use ratatui::text::{Line, Span};

use crate::config::Palette;
use crate::core::{line_anchor_key, Comment, FormattedFile, FormattedLine, Mode, Position};
use crate::highlight::StyleId;
use crate::remote::Change;
use crate::ui::comment_block::{block_height, render_block};
use crate::ui::compose::{compose_comment, ComposeError, TerminalSession};

/// Sizing inputs shared by the region and its comment blocks.
#[derive(Debug, Clone, Copy)]
pub struct ViewParams {
    /// Viewport width in columns.
    pub width: usize,
    /// Width of one line-number gutter column.
    pub lineno_col_width: usize,
}

/// What one viewport row of a region displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    /// The file header bar. Always row 0.
    Header,
    /// A source line, by index into the formatted file.
    Source(usize),
    /// A fold marker, by index into the abridgement list.
    Fold(usize),
    /// First row of a comment block, by index into the comment list.
    Comment(usize),
    /// Continuation row of a comment block. Never navigable.
    Continuation,
}

/// What a key press inside a region asks the composer to do.
#[derive(Debug)]
pub enum RegionOutcome {
    /// Nothing happened.
    None,
    /// Region content or geometry changed; redraw.
    Changed,
    /// A persisted comment was removed locally; delete it on the remote.
    DeleteRemote {
        /// Discussion the note belongs to.
        discussion_id: String,
        /// The note to delete.
        note_id: u64,
    },
    /// Unrecoverable failure; the application should exit.
    Fatal(String),
}

/// Capabilities a region may use while handling a key.
pub struct KeyContext<'a> {
    /// Terminal handover for external-editor composition.
    pub term: &'a mut dyn TerminalSession,
}

/// A vertical slice of the review: anything that can report a height,
/// render a sub-view, and react to keys.
pub trait Region: Send {
    /// Current height in rows (1 when collapsed).
    fn height(&self) -> usize;
    /// Render rows `[start, start + count)`. `cursor` is region-relative.
    fn view(&self, start: usize, count: usize, cursor: Option<usize>) -> Vec<Line<'static>>;
    /// Handle a key pressed while the cursor is on `cursor` (region-relative).
    fn handle_key(&mut self, key: KeyEvent, cursor: usize, ctx: &mut KeyContext<'_>)
        -> RegionOutcome;
    /// Adopt a new viewport width.
    fn resize(&mut self, width: usize);
    /// Nearest navigable row from `row` walking in `direction`, bouncing at
    /// the region edges.
    fn next_navigable_row(&self, row: isize, direction: isize) -> usize;
    /// Force the collapsed flag.
    fn set_collapsed(&mut self, collapsed: bool);
    /// All comments still waiting to be submitted.
    fn pending_comments(&self) -> Vec<Comment>;
}

/// A folded run of unchanged lines, as a closed index interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Abridgement {
    start: usize,
    end: usize,
}

/// How many unchanged lines end a visible stretch.
const FOLD_AFTER: usize = 10;
/// Visible context kept around a change.
const FOLD_MARGIN: usize = 5;

/// Fold every long run of unchanged lines, keeping [`FOLD_MARGIN`] lines of
/// context on each side of a change.
fn build_abridgements(lines: &[FormattedLine]) -> Vec<Abridgement> {
    let Some(first) = lines.first() else {
        return Vec::new();
    };

    let mut abrs = Vec::new();
    let mut in_visible = first.mode != Mode::Unchanged;
    let mut pending_start = 0usize;
    let mut last_change: Option<usize> = None;
    let mut run = 0usize;

    for (idx, line) in lines.iter().enumerate() {
        if line.mode == Mode::Unchanged {
            run += 1;
            if in_visible && run >= FOLD_AFTER {
                in_visible = false;
                pending_start = last_change.map_or(0, |c| c + FOLD_MARGIN + 1);
            }
        } else {
            run = 0;
            if !in_visible {
                in_visible = true;
                let end = idx as isize - FOLD_MARGIN as isize;
                if end >= pending_start as isize {
                    abrs.push(Abridgement {
                        start: pending_start,
                        end: end as usize,
                    });
                }
            }
            last_change = Some(idx);
        }
    }

    if !in_visible {
        let end = lines.len() - 1;
        if end >= pending_start {
            abrs.push(Abridgement {
                start: pending_start,
                end,
            });
        }
    }

    abrs
}

/// One file's region.
pub struct FileRegion {
    file: FormattedFile,
    old_path: String,
    new_path: String,
    added: bool,
    removed: bool,
    collapsed: bool,
    width: usize,
    lineno_col_width: usize,
    abridgements: Vec<Abridgement>,
    comments: Vec<Comment>,
    line_map: Vec<RowKind>,
    palette: Palette,
}

impl FileRegion {
    /// Build a region for one change. Deleted files start collapsed.
    pub fn new(
        file: FormattedFile,
        change: &Change,
        comments: Vec<Comment>,
        width: usize,
        palette: Palette,
    ) -> Self {
        let abridgements = build_abridgements(&file.lines);
        let lineno_col_width = file.lineno_col_width();
        let mut region = Self {
            file,
            old_path: change.old_path.clone(),
            new_path: change.new_path.clone(),
            added: change.new_file,
            removed: change.deleted_file,
            collapsed: change.deleted_file,
            width,
            lineno_col_width,
            abridgements,
            comments,
            line_map: Vec::new(),
            palette,
        };
        region.rebuild_line_map();
        region
    }

    fn view_params(&self) -> ViewParams {
        ViewParams {
            width: self.width,
            lineno_col_width: self.lineno_col_width,
        }
    }

    /// Recompute the row projection from the current lines, folds and
    /// comments. Row 0 is always the header.
    fn rebuild_line_map(&mut self) {
        let vp = self.view_params();
        let mut map = vec![RowKind::Header];

        let mut by_key: HashMap<String, Vec<usize>> = HashMap::new();
        for (cidx, comment) in self.comments.iter().enumerate() {
            by_key.entry(comment.anchor_key()).or_default().push(cidx);
        }

        let mut abrs = self.abridgements.iter().enumerate().peekable();
        let mut idx = 0;
        while idx < self.file.lines.len() {
            if let Some((aidx, abr)) = abrs.peek() {
                if abr.start == idx {
                    map.push(RowKind::Fold(*aidx));
                    idx = abr.end + 1;
                    abrs.next();
                    continue;
                }
            }

            map.push(RowKind::Source(idx));

            let line = &self.file.lines[idx];
            let key = line_anchor_key(line.mode, line.old_line, line.new_line);
            if let Some(indices) = by_key.get(&key) {
                for &cidx in indices {
                    map.push(RowKind::Comment(cidx));
                    let height = block_height(&self.comments[cidx], &vp);
                    for _ in 1..height {
                        map.push(RowKind::Continuation);
                    }
                }
            }

            idx += 1;
        }

        self.line_map = map;
    }

    /// Append a freshly composed draft anchored to `line_idx` and rebuild.
    pub fn insert_pending(&mut self, body: String, line_idx: usize) {
        let Some(line) = self.file.lines.get(line_idx) else {
            return;
        };
        self.comments.push(Comment::Pending {
            author: "(you)".to_string(),
            body,
            position: Position {
                old_path: self.old_path.clone(),
                new_path: self.new_path.clone(),
                old_line: line.old_line,
                new_line: line.new_line,
            },
        });
        self.rebuild_line_map();
    }

    /// Row descriptor at a region-relative row.
    pub fn row_kind(&self, row: usize) -> Option<RowKind> {
        self.line_map.get(row).copied()
    }

    fn header_line(&self, cursor: bool) -> Line<'static> {
        let glyph = if self.collapsed { "▶" } else { "▼" };
        let suffix = if self.added {
            " [NEW]"
        } else if self.removed {
            " [DELETED]"
        } else {
            ""
        };
        let bg = if cursor {
            self.palette.header_bg_cursor
        } else {
            self.palette.header_bg
        };

        let mut row = RowBuilder::new(self.width);
        let style = Style::default().fg(self.palette.header_fg).bg(bg);
        row.push(&format!(" {glyph} {}{suffix}", self.new_path), style);
        row.into_line(style)
    }

    fn source_line(&self, line: &FormattedLine, cursor: bool) -> Line<'static> {
        let bg = self.palette.line_bg(line.mode.palette_index(), cursor);
        let w = self.lineno_col_width;

        let fmt_no = |n: Option<usize>| match n {
            Some(n) => format!("{n:>w$}"),
            None => " ".repeat(w),
        };
        let marker = match line.mode {
            Mode::Unchanged => ' ',
            Mode::Added => '+',
            Mode::Removed => '-',
        };

        let mut row = RowBuilder::new(self.width);
        let gutter_style = Style::default().fg(self.palette.syntax_fg(StyleId::Default)).bg(bg);
        row.push(
            &format!(
                "{} {} {marker} ",
                fmt_no(line.old_line),
                fmt_no(line.new_line)
            ),
            gutter_style,
        );
        for token in &line.tokens {
            let style = Style::default().fg(self.palette.syntax_fg(token.style)).bg(bg);
            row.push(&token.text, style);
        }
        row.into_line(Style::default().bg(bg))
    }

    fn fold_line(&self, cursor: bool) -> Line<'static> {
        let bg = self.palette.line_bg(0, cursor);
        let mut row = RowBuilder::new(self.width);
        let style = Style::default().bg(bg);
        row.push(&" ".repeat(self.width.saturating_sub(1) / 2), style);
        row.push("…", style);
        row.into_line(style)
    }

    fn continuation_line(&self) -> Line<'static> {
        let style = Style::default().bg(self.palette.line_bg(0, false));
        let mut row = RowBuilder::new(self.width);
        row.push(".", style);
        row.into_line(style)
    }
}

impl Region for FileRegion {
    fn height(&self) -> usize {
        if self.collapsed {
            1
        } else {
            self.line_map.len()
        }
    }

    fn view(&self, start: usize, count: usize, cursor: Option<usize>) -> Vec<Line<'static>> {
        if count == 0 {
            return Vec::new();
        }

        if self.collapsed {
            return vec![self.header_line(cursor == Some(0))];
        }

        let mut out = Vec::with_capacity(count);
        let mut block: VecDeque<Line<'static>> = VecDeque::new();

        for row in start..(start + count).min(self.line_map.len()) {
            let is_cursor = cursor == Some(row);
            let line = match self.line_map[row] {
                RowKind::Header => self.header_line(is_cursor),
                RowKind::Source(idx) => self.source_line(&self.file.lines[idx], is_cursor),
                RowKind::Fold(_) => self.fold_line(is_cursor),
                RowKind::Comment(cidx) => {
                    let mut lines: VecDeque<Line<'static>> = render_block(
                        &self.comments[cidx],
                        &self.view_params(),
                        &self.palette,
                        is_cursor,
                    )
                    .into();
                    let first = lines.pop_front().unwrap_or_else(|| self.continuation_line());
                    block = lines;
                    first
                }
                RowKind::Continuation => block
                    .pop_front()
                    .unwrap_or_else(|| self.continuation_line()),
            };
            out.push(line);
        }

        out
    }

    fn handle_key(
        &mut self,
        key: KeyEvent,
        cursor: usize,
        ctx: &mut KeyContext<'_>,
    ) -> RegionOutcome {
        let Some(kind) = self.row_kind(cursor) else {
            return RegionOutcome::None;
        };

        match key.code {
            KeyCode::Enter => match kind {
                RowKind::Fold(aidx) => {
                    self.abridgements.remove(aidx);
                    self.rebuild_line_map();
                    RegionOutcome::Changed
                }
                RowKind::Header => {
                    self.collapsed = !self.collapsed;
                    RegionOutcome::Changed
                }
                _ => RegionOutcome::None,
            },
            KeyCode::Char('t') => {
                self.collapsed = !self.collapsed;
                RegionOutcome::Changed
            }
            KeyCode::Char('d') => {
                let RowKind::Comment(cidx) = kind else {
                    return RegionOutcome::None;
                };
                let removed = self.comments.remove(cidx);
                self.rebuild_line_map();
                match removed {
                    Comment::Persisted {
                        id, discussion_id, ..
                    } => RegionOutcome::DeleteRemote {
                        discussion_id,
                        note_id: id,
                    },
                    Comment::Pending { .. } => RegionOutcome::Changed,
                }
            }
            KeyCode::Char('c') => {
                let RowKind::Source(idx) = kind else {
                    return RegionOutcome::None;
                };
                match compose_comment(ctx.term) {
                    Ok(body) => {
                        self.insert_pending(body, idx);
                        RegionOutcome::Changed
                    }
                    Err(e @ ComposeError::TempFile(_)) => RegionOutcome::Fatal(e.to_string()),
                    Err(ComposeError::ReadBack(e)) => {
                        tracing::error!(error = %e, "unable to read composed comment");
                        RegionOutcome::None
                    }
                }
            }
            _ => RegionOutcome::None,
        }
    }

    fn resize(&mut self, width: usize) {
        self.width = width;
        self.rebuild_line_map();
    }

    fn next_navigable_row(&self, row: isize, direction: isize) -> usize {
        if self.collapsed {
            return 0;
        }

        let len = self.line_map.len() as isize;
        let mut d = if direction < 0 { -1 } else { 1 };
        let mut i = row;

        loop {
            if i < 0 || i >= len {
                d = -d;
                i += d;
                continue;
            }
            if self.line_map[i as usize] != RowKind::Continuation {
                return i as usize;
            }
            i += d;
        }
    }

    fn set_collapsed(&mut self, collapsed: bool) {
        self.collapsed = collapsed;
    }

    fn pending_comments(&self) -> Vec<Comment> {
        self.comments
            .iter()
            .filter(|c| c.is_pending())
            .cloned()
            .collect()
    }
}

/// Accumulates spans for one full-width row, clamping at the viewport edge.
struct RowBuilder {
    spans: Vec<Span<'static>>,
    used: usize,
    width: usize,
}

impl RowBuilder {
    fn new(width: usize) -> Self {
        Self {
            spans: Vec::new(),
            used: 0,
            width,
        }
    }

    fn push(&mut self, text: &str, style: Style) {
        if self.used >= self.width {
            return;
        }
        let remaining = self.width - self.used;
        let clipped: String = text
            .chars()
            .take(remaining)
            .map(sanitize_char)
            .collect();
        if clipped.is_empty() {
            return;
        }
        self.used += clipped.chars().count();
        self.spans.push(Span::styled(clipped, style));
    }

    fn into_line(mut self, fill: Style) -> Line<'static> {
        if self.used < self.width {
            self.spans
                .push(Span::styled(" ".repeat(self.width - self.used), fill));
        }
        Line::from(self.spans)
    }
}

/// Replace control characters that would corrupt the terminal.
fn sanitize_char(c: char) -> char {
    match c {
        '\x00'..='\x1f' | '\x7f' => '\u{FFFD}',
        _ => c,
    }
}
