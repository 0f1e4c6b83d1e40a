//! User configuration and render palette.

use std::path::PathBuf;
use std::sync::OnceLock;

use ratatui::style::Color;
use serde::Deserialize;

use crate::highlight::StyleId;

/// Cached config directory path.
static CONFIG_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Get the mrlens config directory (cached).
fn config_dir() -> &'static std::path::Path {
    CONFIG_DIR.get_or_init(|| {
        directories::ProjectDirs::from("", "", "mrlens")
            .map(|d| d.config_dir().to_path_buf())
            .unwrap_or_else(dirs_fallback)
    })
}

/// Fallback config directory if `directories` fails.
fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(|h| std::path::Path::new(&h).join(".config").join("mrlens"))
        .unwrap_or_else(|_| PathBuf::from(".mrlens"))
}

/// JSON config file format.
///
/// Only recognized keys are read; everything else is ignored.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default, rename = "Colors")]
    colors: FileColors,
}

#[derive(Debug, Default, Deserialize)]
struct FileColors {
    #[serde(rename = "Background")]
    background: Option<String>,
}

/// Resolved configuration handed through the application explicitly
/// rather than read from a global.
#[derive(Debug, Clone)]
pub struct Config {
    /// Render palette, with the user's background override applied.
    pub palette: Palette,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            palette: Palette::default(),
        }
    }
}

impl Config {
    /// Load configuration from `~/.config/mrlens/config.json`.
    ///
    /// A missing or unreadable file is not an error; defaults apply.
    pub fn load() -> Self {
        Self::load_from(&config_dir().join("config.json"))
    }

    /// Load configuration from an explicit path (for testing).
    pub fn load_from(path: &std::path::Path) -> Self {
        let mut config = Config::default();

        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(_) => {
                tracing::info!(path = %path.display(), "no user config, using defaults");
                return config;
            }
        };

        let file: FileConfig = match serde_json::from_str(&data) {
            Ok(file) => file,
            Err(e) => {
                tracing::info!(error = %e, "unable to parse user config, using defaults");
                return config;
            }
        };

        if let Some(bg) = file.colors.background.as_deref().and_then(parse_hex_color) {
            config.palette.background = bg;
        }

        config
    }
}

/// Fixed colors for the diff view.
///
/// `line_bgs` is indexed by `(mode | cursor_bit)`: Unchanged = 0, Added = 1,
/// Removed = 2, with bit 2 set when the cursor sits on the row.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct Palette {
    pub background: Color,
    pub line_bgs: [Color; 7],
    pub header_fg: Color,
    pub header_bg: Color,
    pub header_bg_cursor: Color,
    pub comment_bg: Color,
    pub comment_bg_cursor: Color,
    pub comment_border: Color,
    pub comment_border_cursor: Color,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            background: Color::Rgb(0, 0, 0),
            line_bgs: [
                Color::Rgb(0, 0, 0),
                Color::Rgb(0, 68, 0),
                Color::Rgb(68, 0, 0),
                Color::Rgb(0, 0, 0),
                Color::Rgb(68, 68, 68),
                Color::Rgb(68, 119, 68),
                Color::Rgb(119, 68, 68),
            ],
            header_fg: Color::Rgb(0, 0, 0),
            header_bg: Color::Rgb(185, 201, 2),
            header_bg_cursor: Color::Rgb(235, 252, 43),
            comment_bg: Color::Rgb(68, 68, 68),
            comment_bg_cursor: Color::Rgb(102, 102, 102),
            comment_border: Color::Rgb(255, 255, 255),
            comment_border_cursor: Color::Rgb(170, 255, 0),
        }
    }
}

impl Palette {
    /// Background for a source row. `mode_idx` is the annotated line's mode
    /// as an index (Unchanged = 0, Added = 1, Removed = 2).
    pub fn line_bg(&self, mode_idx: usize, cursor: bool) -> Color {
        let idx = if cursor { mode_idx | 4 } else { mode_idx };
        self.line_bgs[idx.min(self.line_bgs.len() - 1)]
    }

    /// Foreground color for a syntax style.
    pub fn syntax_fg(&self, style: StyleId) -> Color {
        match style {
            StyleId::Default => Color::Rgb(175, 175, 185),
            StyleId::Comment => Color::Rgb(92, 99, 112),
            StyleId::Keyword => Color::Rgb(198, 120, 221),
            StyleId::String => Color::Rgb(152, 195, 121),
            StyleId::Number => Color::Rgb(209, 154, 102),
            StyleId::Constant => Color::Rgb(86, 182, 194),
            StyleId::Type => Color::Rgb(229, 192, 123),
            StyleId::Function => Color::Rgb(97, 175, 239),
            StyleId::Property => Color::Rgb(224, 108, 117),
            StyleId::Attribute => Color::Rgb(229, 192, 123),
            StyleId::Operator => Color::Rgb(171, 178, 191),
            StyleId::Punctuation => Color::Rgb(120, 120, 135),
        }
    }
}

/// Parse `#rgb` or `#rrggbb` into a Color.
fn parse_hex_color(s: &str) -> Option<Color> {
    let hex = s.strip_prefix('#')?;
    match hex.len() {
        3 => {
            let r = u8::from_str_radix(&hex[0..1], 16).ok()?;
            let g = u8::from_str_radix(&hex[1..2], 16).ok()?;
            let b = u8::from_str_radix(&hex[2..3], 16).ok()?;
            Some(Color::Rgb(r * 17, g * 17, b * 17))
        }
        6 => {
            let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
            let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
            let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
            Some(Color::Rgb(r, g, b))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_parsing() {
        assert_eq!(parse_hex_color("#000"), Some(Color::Rgb(0, 0, 0)));
        assert_eq!(parse_hex_color("#fff"), Some(Color::Rgb(255, 255, 255)));
        assert_eq!(parse_hex_color("#102030"), Some(Color::Rgb(16, 32, 48)));
        assert_eq!(parse_hex_color("102030"), None);
        assert_eq!(parse_hex_color("#10203"), None);
        assert_eq!(parse_hex_color("#zzz"), None);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = Config::load_from(std::path::Path::new("/nonexistent/config.json"));
        assert_eq!(config.palette.background, Color::Rgb(0, 0, 0));
    }

    #[test]
    fn background_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r##"{"Colors": {"Background": "#123456"}}"##).unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config.palette.background, Color::Rgb(0x12, 0x34, 0x56));
    }

    #[test]
    fn unknown_keys_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r##"{"Colors": {"Background": "#040", "Accent": "#fff"}, "Keys": {}}"##,
        )
        .unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config.palette.background, Color::Rgb(0, 68, 0));
    }

    #[test]
    fn cursor_bit_selects_highlight_variant() {
        let palette = Palette::default();
        assert_ne!(palette.line_bg(0, false), palette.line_bg(0, true));
        assert_eq!(palette.line_bg(1, false), Color::Rgb(0, 68, 0));
        assert_eq!(palette.line_bg(1, true), Color::Rgb(68, 119, 68));
    }
}
