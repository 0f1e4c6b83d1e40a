//! Framed rendering of a single comment.
//!
//! The line map reserves one row per rendered line, so layout must be a
//! deterministic function of `(comment, viewport params)`. Both the height
//! query and the renderer go through [`layout`].

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

use crate::config::Palette;
use crate::core::Comment;
use crate::ui::region::ViewParams;

/// One laid-out row of the block, pre-wrapping applied.
#[derive(Debug, PartialEq, Eq)]
enum BlockRow {
    Author(String),
    Rule(usize),
    Body(String),
}

/// Left indent of the frame: both line-number gutters plus their separators.
fn indent(vp: &ViewParams) -> usize {
    vp.lineno_col_width * 2 + 2
}

/// Width available for text inside the frame: total width minus indent,
/// border column and two-cell padding on each side.
fn content_width(vp: &ViewParams) -> usize {
    vp.width.saturating_sub(indent(vp) + 5).max(1)
}

/// Hard-wrap one logical line at `width` characters.
fn wrap(text: &str, width: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }

    let mut out = Vec::new();
    let mut current = String::new();
    let mut count = 0;

    for ch in text.chars() {
        if count == width {
            out.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(ch);
        count += 1;
    }
    out.push(current);
    out
}

fn layout(comment: &Comment, vp: &ViewParams) -> Vec<BlockRow> {
    let width = content_width(vp);
    let author = comment.author().to_string();
    let rule_len = author.chars().count().min(width);

    let mut rows = vec![BlockRow::Author(author), BlockRow::Rule(rule_len)];

    for line in comment.body().trim_end_matches('\n').split('\n') {
        for piece in wrap(line, width) {
            rows.push(BlockRow::Body(piece));
        }
    }

    rows
}

/// Rendered height of a comment at the given viewport parameters.
pub fn block_height(comment: &Comment, vp: &ViewParams) -> usize {
    layout(comment, vp).len()
}

/// Render the block as full-width lines, one per row of [`block_height`].
pub fn render_block(
    comment: &Comment,
    vp: &ViewParams,
    palette: &Palette,
    cursor: bool,
) -> Vec<Line<'static>> {
    let (bg, border_fg) = if cursor {
        (palette.comment_bg_cursor, palette.comment_border_cursor)
    } else {
        (palette.comment_bg, palette.comment_border)
    };
    let indent = indent(vp);
    let width = content_width(vp);

    layout(comment, vp)
        .into_iter()
        .map(|row| {
            let (text, emphasis): (String, bool) = match row {
                BlockRow::Author(author) => (author, true),
                BlockRow::Rule(len) => ("─".repeat(len), false),
                BlockRow::Body(text) => (text, false),
            };

            let pad = width.saturating_sub(text.chars().count());
            let mut style = Style::default().fg(Color::White).bg(bg);
            if emphasis {
                style = style.add_modifier(Modifier::BOLD);
            }

            Line::from(vec![
                Span::styled(" ".repeat(indent), Style::default().bg(palette.background)),
                Span::styled("│", Style::default().fg(border_fg).bg(bg)),
                Span::styled("  ", Style::default().bg(bg)),
                Span::styled(text, style),
                Span::styled(" ".repeat(pad + 2), Style::default().bg(bg)),
            ])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Position;

    fn comment(body: &str) -> Comment {
        Comment::Pending {
            author: "(you)".to_string(),
            body: body.to_string(),
            position: Position {
                old_path: "a".to_string(),
                new_path: "a".to_string(),
                old_line: None,
                new_line: Some(1),
            },
        }
    }

    fn vp(width: usize) -> ViewParams {
        ViewParams {
            width,
            lineno_col_width: 3,
        }
    }

    #[test]
    fn height_matches_rendered_lines() {
        let palette = Palette::default();
        for width in [20, 40, 80, 120] {
            let c = comment("a somewhat longer body that will wrap at small widths");
            let vp = vp(width);
            assert_eq!(
                block_height(&c, &vp),
                render_block(&c, &vp, &palette, false).len()
            );
        }
    }

    #[test]
    fn single_line_body_is_three_rows() {
        // author + rule + one body line
        assert_eq!(block_height(&comment("short"), &vp(80)), 3);
    }

    #[test]
    fn body_newlines_add_rows() {
        assert_eq!(block_height(&comment("a\nb\nc"), &vp(80)), 5);
    }

    #[test]
    fn trailing_newline_is_ignored() {
        assert_eq!(
            block_height(&comment("written in an editor\n"), &vp(80)),
            block_height(&comment("written in an editor"), &vp(80))
        );
    }

    #[test]
    fn narrow_viewport_wraps_body() {
        let c = comment("abcdefghij");
        // content width = 20 - (3*2+2) - 5 = 7 → two body rows
        assert_eq!(block_height(&c, &vp(20)), 4);
    }

    #[test]
    fn rows_span_full_width() {
        let palette = Palette::default();
        let vp = vp(60);
        for line in render_block(&comment("hello"), &vp, &palette, false) {
            let rendered: usize = line.spans.iter().map(|s| s.content.chars().count()).sum();
            assert_eq!(rendered, vp.width);
        }
    }
}
