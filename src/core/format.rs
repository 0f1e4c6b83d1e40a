//! Formatting: annotate a change, then syntax-highlight both sides.

use thiserror::Error;

use crate::core::{annotate, AnnotateError, AnnotatedLine, Mode};
use crate::highlight::{highlight_lines, LanguageId, Token};
use crate::remote::Change;

/// One display row with styled tokens in place of raw text.
#[derive(Debug, Clone)]
pub struct FormattedLine {
    /// Styled tokens; concatenated text equals the source line.
    pub tokens: Vec<Token>,
    /// Change mode.
    pub mode: Mode,
    /// 1-based line number in the old revision, where applicable.
    pub old_line: Option<usize>,
    /// 1-based line number in the new revision, where applicable.
    pub new_line: Option<usize>,
}

/// A fully formatted file, ready for a region to display.
#[derive(Debug, Clone, Default)]
pub struct FormattedFile {
    /// Display rows in order.
    pub lines: Vec<FormattedLine>,
}

impl FormattedFile {
    /// Width of one line-number gutter column, from the largest line number
    /// present.
    pub fn lineno_col_width(&self) -> usize {
        let max = self
            .lines
            .iter()
            .flat_map(|l| [l.old_line, l.new_line])
            .flatten()
            .max()
            .unwrap_or(1);
        max.ilog10() as usize + 1
    }
}

/// Errors from file formatting.
#[derive(Debug, Error)]
pub enum FormatError {
    /// The change's diff text could not be annotated.
    #[error("failed to annotate diff: {0}")]
    Annotate(#[from] AnnotateError),
}

/// Rebuild the pre-image and post-image of an annotated file.
///
/// The pre-image is the concatenation of Unchanged and Removed line texts,
/// the post-image of Unchanged and Added, each line newline-terminated.
pub fn reconstruct(lines: &[AnnotatedLine]) -> (String, String) {
    let mut pre = String::new();
    let mut post = String::new();

    for line in lines {
        match line.mode {
            Mode::Unchanged => {
                pre.push_str(&line.text);
                pre.push('\n');
                post.push_str(&line.text);
                post.push('\n');
            }
            Mode::Removed => {
                pre.push_str(&line.text);
                pre.push('\n');
            }
            Mode::Added => {
                post.push_str(&line.text);
                post.push('\n');
            }
        }
    }

    (pre, post)
}

/// Tokens for `line_no` (1-based), or a single plain token from the
/// annotated text when the highlighter produced nothing for that line.
fn tokens_for(highlighted: &[Vec<Token>], line_no: usize, fallback: &str) -> Vec<Token> {
    highlighted
        .get(line_no - 1)
        .cloned()
        .unwrap_or_else(|| vec![Token::plain(fallback)])
}

/// Annotate a change and project syntax highlighting onto every line.
///
/// Unchanged and Removed lines take their tokens from the highlighted
/// pre-image at `old_line`; Added lines from the post-image at `new_line`.
/// The language is detected from the new path's extension.
pub fn format_file(base: &str, change: &Change) -> Result<FormattedFile, FormatError> {
    let annotated = annotate(base, &change.diff, change.deleted_file)?;
    let (pre, post) = reconstruct(&annotated);

    let lang = LanguageId::from_path(&change.new_path);
    let pre_tokens = highlight_lines(&pre, lang);
    let post_tokens = highlight_lines(&post, lang);

    let lines = annotated
        .into_iter()
        .map(|line| {
            let tokens = match line.mode {
                Mode::Unchanged | Mode::Removed => {
                    tokens_for(&pre_tokens, line.old_line.unwrap_or(1), &line.text)
                }
                Mode::Added => tokens_for(&post_tokens, line.new_line.unwrap_or(1), &line.text),
            };
            FormattedLine {
                tokens,
                mode: line.mode,
                old_line: line.old_line,
                new_line: line.new_line,
            }
        })
        .collect();

    Ok(FormattedFile { lines })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(diff: &str) -> Change {
        Change {
            old_path: "file.xyz".to_string(),
            new_path: "file.xyz".to_string(),
            diff: diff.to_string(),
            new_file: false,
            renamed_file: false,
            deleted_file: false,
        }
    }

    fn joined(line: &FormattedLine) -> String {
        line.tokens.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn reconstruct_splits_sides() {
        let lines = annotate("A\nB\nC\nD\n", "@@ -2,2 +2,2 @@\n-B\n-C\n+X\n+Y\n", false).unwrap();
        let (pre, post) = reconstruct(&lines);
        assert_eq!(pre, "A\nB\nC\nD\n");
        assert_eq!(post, "A\nX\nY\nD\n");
    }

    #[test]
    fn tokens_carry_line_text() {
        let ff = format_file("A\nB\nC\nD\n", &change("@@ -2,2 +2,2 @@\n-B\n-C\n+X\n+Y\n")).unwrap();
        let texts: Vec<String> = ff.lines.iter().map(joined).collect();
        assert_eq!(texts, vec!["A", "B", "C", "X", "Y", "D"]);
    }

    #[test]
    fn tokens_never_contain_newlines() {
        let ff = format_file("a\nb\n", &change("@@ -1,1 +1,1 @@\n-a\n+z\n")).unwrap();
        for line in &ff.lines {
            for token in &line.tokens {
                assert!(!token.text.contains('\n'));
            }
        }
    }

    #[test]
    fn deleted_file_formats_every_base_line() {
        let mut ch = change("");
        ch.deleted_file = true;
        let ff = format_file("l1\nl2\n", &ch).unwrap();
        assert_eq!(ff.lines.len(), 2);
        assert!(ff.lines.iter().all(|l| l.mode == Mode::Removed));
    }

    #[test]
    fn lineno_col_width_tracks_largest_number() {
        let ff = format_file("A\nB\nC\nD\n", &change("@@ -2,2 +2,2 @@\n-B\n-C\n+X\n+Y\n")).unwrap();
        assert_eq!(ff.lineno_col_width(), 1);

        let base: String = (0..120).map(|i| format!("line {i}\n")).collect();
        let ff = format_file(&base, &change("@@ -1,1 +1,1 @@\n-line 0\n+LINE 0\n")).unwrap();
        assert_eq!(ff.lineno_col_width(), 3);
    }

    #[test]
    fn empty_file_has_width_one() {
        let ff = FormattedFile::default();
        assert_eq!(ff.lineno_col_width(), 1);
    }
}
