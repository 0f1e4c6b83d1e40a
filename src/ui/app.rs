//! The model: region list, cursor, modes, messages, and frame composition.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use ratatui::layout::Alignment;
use ratatui::style::Style;
use ratatui::text::Line;
use ratatui::widgets::Paragraph;
use ratatui::Frame;

use crate::config::Config;
use crate::core::Comment;
use crate::remote::{GitLab, MergeRequest};
use crate::ui::compose::TerminalSession;
use crate::ui::region::{KeyContext, Region, RegionOutcome};
use crate::ui::worker::{spawn_load, LoadParams};

/// Spinner frames shown while a blocking job runs.
const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// How long transient status messages stay on screen.
const MESSAGE_LIFETIME: Duration = Duration::from_secs(3);

/// Input mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Cursor navigation and region keys.
    #[default]
    Normal,
    /// Collecting an ex command line.
    Ex,
}

/// Everything the loader hands back when a merge request is ready.
pub struct LoadedData {
    /// One region per changed file, in change-set order.
    pub regions: Vec<Box<dyn Region>>,
    /// The loaded snapshot.
    pub merge_request: MergeRequest,
    /// Client handle for later mutations.
    pub client: Arc<GitLab>,
}

/// Messages delivered to the UI loop from background work.
pub enum AppMsg {
    /// The loader pipeline finished (initial load or `:Load`).
    Loaded(Result<LoadedData, String>),
    /// A blocking job (submit, delete) finished.
    JobDone(Result<(), String>),
}

/// A transient status line.
#[derive(Debug)]
struct StatusMessage {
    id: u64,
    text: String,
    expires_at: Instant,
}

/// Application state. All mutation happens on the UI thread in response to
/// events and messages.
pub struct App {
    config: Config,
    load_params: LoadParams,

    regions: Vec<Box<dyn Region>>,
    merge_request: Option<MergeRequest>,
    client: Option<Arc<GitLab>>,
    loaded: bool,

    cursor: usize,
    scroll_y: usize,
    width: usize,
    height: usize,

    mode: Mode,
    ex_buffer: String,

    loading_text: String,
    spinner_idx: usize,

    messages: Vec<StatusMessage>,
    next_msg_id: u64,

    msg_tx: Sender<AppMsg>,
    msg_rx: Receiver<AppMsg>,

    /// Redraw needed.
    pub dirty: bool,
    /// Event loop should exit.
    pub should_quit: bool,
    /// Set when startup failed; reported after the terminal is restored.
    pub fatal: Option<String>,
}

impl App {
    /// Create the model in its initial "loading" state. The caller starts
    /// the loader pipeline separately with the same channel.
    pub fn new(
        config: Config,
        load_params: LoadParams,
        msg_tx: Sender<AppMsg>,
        msg_rx: Receiver<AppMsg>,
    ) -> Self {
        Self {
            config,
            load_params,
            regions: Vec::new(),
            merge_request: None,
            client: None,
            loaded: false,
            cursor: 0,
            scroll_y: 0,
            width: 80,
            height: 24,
            mode: Mode::Normal,
            ex_buffer: String::new(),
            loading_text: "Loading merge request…".to_string(),
            spinner_idx: 0,
            messages: Vec::new(),
            next_msg_id: 0,
            msg_tx,
            msg_rx,
            dirty: true,
            should_quit: false,
            fatal: None,
        }
    }

    /// Current input mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Global cursor row.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Top viewport row.
    pub fn scroll_y(&self) -> usize {
        self.scroll_y
    }

    /// Whether a blocking job is running.
    pub fn is_loading(&self) -> bool {
        !self.loading_text.is_empty()
    }

    /// Texts of the currently visible status messages.
    pub fn message_texts(&self) -> Vec<&str> {
        self.messages.iter().map(|m| m.text.as_str()).collect()
    }

    /// Sum of all region heights.
    pub fn total_height(&self) -> usize {
        self.regions.iter().map(|r| r.height()).sum()
    }

    /// All drafts across regions, in region order.
    pub fn pending_drafts(&self) -> Vec<Comment> {
        self.regions
            .iter()
            .flat_map(|r| r.pending_comments())
            .collect()
    }

    /// The region containing a global row, and the row relative to it.
    pub fn region_at(&self, row: usize) -> Option<(usize, usize)> {
        let mut cum = 0;
        for (idx, region) in self.regions.iter().enumerate() {
            let h = region.height();
            if row < cum + h {
                return Some((idx, row - cum));
            }
            cum += h;
        }
        None
    }

    /// Drain background messages. Returns true if anything arrived.
    pub fn poll_messages(&mut self) -> bool {
        let mut received = false;
        while let Ok(msg) = self.msg_rx.try_recv() {
            received = true;
            match msg {
                AppMsg::Loaded(Ok(data)) => {
                    tracing::debug!(regions = data.regions.len(), "merge request loaded");
                    self.loading_text.clear();
                    self.regions = data.regions;
                    self.merge_request = Some(data.merge_request);
                    self.client = Some(data.client);
                    self.loaded = true;
                    for region in &mut self.regions {
                        region.resize(self.width);
                    }
                    self.clamp_cursor();
                }
                AppMsg::Loaded(Err(e)) => {
                    if self.loaded {
                        self.loading_text.clear();
                        self.display_status(format!("ERR: {e}"));
                    } else {
                        // Initial load failure is unrecoverable.
                        self.fatal = Some(e);
                        self.should_quit = true;
                    }
                }
                AppMsg::JobDone(Ok(())) => {
                    self.loading_text.clear();
                }
                AppMsg::JobDone(Err(e)) => {
                    tracing::error!(error = %e, "background job failed");
                    self.loading_text.clear();
                    self.display_status(format!("ERR: {e}"));
                }
            }
            self.dirty = true;
        }
        received
    }

    /// Advance the spinner and expire old status messages. Called on every
    /// idle tick of the event loop.
    pub fn tick(&mut self) {
        if self.is_loading() {
            self.spinner_idx = self.spinner_idx.wrapping_add(1);
            self.dirty = true;
        }
        let now = Instant::now();
        let before = self.messages.len();
        self.messages.retain(|m| m.expires_at > now);
        if self.messages.len() != before {
            self.dirty = true;
        }
    }

    /// Handle one terminal event.
    pub fn handle_event(&mut self, event: Event, term: &mut dyn TerminalSession) {
        if let Event::Resize(w, h) = event {
            self.resize(w as usize, h as usize);
            return;
        }

        // Blocking jobs swallow input until their completion message lands.
        if self.is_loading() {
            return;
        }

        if let Event::Key(key) = event {
            match self.mode {
                Mode::Normal => self.handle_normal_key(key, term),
                Mode::Ex => self.handle_ex_key(key),
            }
        }
    }

    fn resize(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        for region in &mut self.regions {
            region.resize(width);
        }
        self.clamp_cursor();
        self.dirty = true;
    }

    fn handle_normal_key(&mut self, key: KeyEvent, term: &mut dyn TerminalSession) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('c') if ctrl => self.should_quit = true,
            KeyCode::Up | KeyCode::Char('k') => {
                self.move_cursor(-1);
                if self.cursor < self.scroll_y {
                    self.scroll_y = self.cursor;
                }
                self.dirty = true;
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.move_cursor(1);
                if self.cursor >= self.scroll_y + self.height {
                    self.scroll_y = self.cursor + 1 - self.height;
                }
                self.dirty = true;
            }
            KeyCode::Char('G') => {
                let total = self.total_height();
                if total > 0 {
                    self.scroll_y = total.saturating_sub(self.height);
                    self.cursor = total - 1;
                    self.snap_to_navigable(-1);
                }
                self.dirty = true;
            }
            KeyCode::Char('d') if ctrl => {
                let total = self.total_height();
                let half = (self.height + 1) / 2;
                self.scroll_y = (self.scroll_y + half).min(total.saturating_sub(self.height));
                self.move_cursor(half as isize);
                self.dirty = true;
            }
            KeyCode::Char('u') if ctrl => {
                let half = (self.height + 1) / 2;
                self.scroll_y = self.scroll_y.saturating_sub(self.height / 2);
                self.move_cursor(-(half as isize));
                self.dirty = true;
            }
            KeyCode::Char(':') => {
                self.mode = Mode::Ex;
                self.ex_buffer.clear();
                self.dirty = true;
            }
            _ => self.delegate_to_region(key, term),
        }
    }

    fn handle_ex_key(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => {
                self.ex_buffer.clear();
                self.mode = Mode::Normal;
            }
            KeyCode::Char('c') if ctrl => {
                self.ex_buffer.clear();
                self.mode = Mode::Normal;
            }
            KeyCode::Enter => {
                let cmd = std::mem::take(&mut self.ex_buffer);
                self.mode = Mode::Normal;
                self.execute_ex(&cmd);
            }
            KeyCode::Backspace => {
                self.ex_buffer.pop();
            }
            KeyCode::Char(c) => {
                self.ex_buffer.push(c);
            }
            _ => {}
        }
        self.dirty = true;
    }

    fn execute_ex(&mut self, cmd: &str) {
        match cmd {
            "q" | "quit" => self.should_quit = true,
            "CollapseAll" => {
                for region in &mut self.regions {
                    region.set_collapsed(true);
                }
                self.clamp_cursor();
            }
            "ExpandAll" => {
                for region in &mut self.regions {
                    region.set_collapsed(false);
                }
                self.clamp_cursor();
            }
            "Submit" => self.submit(),
            "Load" => self.reload(),
            _ => self.display_status("ERR: Unrecognized command.".to_string()),
        }
    }

    /// POST every pending draft, then invalidate the remote cache once.
    fn submit(&mut self) {
        let (Some(client), Some(mr)) = (self.client.clone(), self.merge_request.clone()) else {
            self.display_status("ERR: No merge request loaded.".to_string());
            return;
        };
        let drafts = self.pending_drafts();

        self.start_job("Submitting review…", move || {
            for draft in &drafts {
                client.create_discussion(draft, &mr).map_err(|e| e.to_string())?;
            }
            client.invalidate_cache();
            Ok(())
        });
    }

    /// Re-run the loader pipeline against the remote.
    fn reload(&mut self) {
        self.loading_text = "Loading merge request…".to_string();
        self.dirty = true;
        spawn_load(self.load_params.clone(), self.msg_tx.clone());
    }

    fn start_job<F>(&mut self, label: &str, job: F)
    where
        F: FnOnce() -> Result<(), String> + Send + 'static,
    {
        self.loading_text = label.to_string();
        self.dirty = true;
        let tx = self.msg_tx.clone();
        std::thread::spawn(move || {
            let _ = tx.send(AppMsg::JobDone(job()));
        });
    }

    fn display_status(&mut self, text: String) {
        self.next_msg_id += 1;
        let message = StatusMessage {
            id: self.next_msg_id,
            text,
            expires_at: Instant::now() + MESSAGE_LIFETIME,
        };
        tracing::debug!(id = message.id, text = %message.text, "status message");
        self.messages.push(message);
        self.dirty = true;
    }

    fn delegate_to_region(&mut self, key: KeyEvent, term: &mut dyn TerminalSession) {
        let Some((ridx, rel)) = self.region_at(self.cursor) else {
            return;
        };
        let mut ctx = KeyContext { term };
        match self.regions[ridx].handle_key(key, rel, &mut ctx) {
            RegionOutcome::None => {}
            RegionOutcome::Changed => self.clamp_cursor(),
            RegionOutcome::DeleteRemote {
                discussion_id,
                note_id,
            } => {
                self.clamp_cursor();
                let (Some(client), Some(mr)) = (self.client.clone(), self.merge_request.clone())
                else {
                    return;
                };
                self.start_job("Deleting comment…", move || {
                    client
                        .delete_note(&mr, &discussion_id, note_id)
                        .map_err(|e| e.to_string())?;
                    client.invalidate_cache();
                    Ok(())
                });
            }
            RegionOutcome::Fatal(msg) => {
                self.fatal = Some(msg);
                self.should_quit = true;
            }
        }
    }

    /// Move the cursor by `delta`, clamped to the content, landing only on
    /// navigable rows.
    pub fn move_cursor(&mut self, delta: isize) {
        let total = self.total_height();
        if total == 0 {
            return;
        }
        let prospective = (self.cursor as isize + delta).clamp(0, total as isize - 1) as usize;
        let Some((ridx, rel)) = self.region_at(prospective) else {
            return;
        };
        let target = self.regions[ridx].next_navigable_row(rel as isize, delta);
        self.cursor = prospective - rel + target;
    }

    /// Keep the cursor inside the content and on a navigable row after any
    /// geometry change, and keep it on screen.
    fn clamp_cursor(&mut self) {
        let total = self.total_height();
        if total == 0 {
            self.cursor = 0;
            self.scroll_y = 0;
            self.dirty = true;
            return;
        }
        if self.cursor >= total {
            self.cursor = total - 1;
        }
        self.snap_to_navigable(1);
        if self.cursor < self.scroll_y {
            self.scroll_y = self.cursor;
        }
        if self.cursor >= self.scroll_y + self.height {
            self.scroll_y = self.cursor + 1 - self.height;
        }
        self.dirty = true;
    }

    fn snap_to_navigable(&mut self, direction: isize) {
        if let Some((ridx, rel)) = self.region_at(self.cursor) {
            let target = self.regions[ridx].next_navigable_row(rel as isize, direction);
            self.cursor = self.cursor - rel + target;
        }
    }

    /// Compose the frame as full-width lines: visible region slices, then
    /// status messages, then the ex input line.
    pub fn compose_frame(&self) -> Vec<Line<'static>> {
        let mut parts: Vec<Line<'static>> = Vec::new();

        let mut target_h = self.height;
        if self.mode == Mode::Ex {
            target_h = target_h.saturating_sub(1);
        }
        target_h = target_h.saturating_sub(self.messages.len());

        let mut cum = 0usize;
        for region in &self.regions {
            let h = region.height();

            if cum > self.scroll_y + target_h {
                break;
            }
            if cum + h < self.scroll_y {
                cum += h;
                continue;
            }

            let start = self.scroll_y.saturating_sub(cum);
            let already = parts.len();
            let count = (h - start)
                .min((self.scroll_y + target_h).saturating_sub(cum + start))
                .min(target_h.saturating_sub(already));
            let cursor = if self.cursor >= cum && self.cursor < cum + h {
                Some(self.cursor - cum)
            } else {
                None
            };

            parts.extend(region.view(start, count, cursor));
            cum += h;
        }

        for msg in &self.messages {
            parts.push(Line::from(msg.text.clone()));
        }

        if self.mode == Mode::Ex {
            parts.push(Line::from(format!(":{}", self.ex_buffer)));
        }

        parts
    }

    fn spinner_frame(&self) -> &'static str {
        SPINNER[self.spinner_idx % SPINNER.len()]
    }
}

/// Draw the current frame.
pub fn render(frame: &mut Frame, app: &App) {
    let area = frame.area();
    let background = Style::default().bg(app.config.palette.background);

    if app.is_loading() {
        let pad = (area.height as usize).saturating_sub(1) / 2;
        let mut lines: Vec<Line> = std::iter::repeat_with(Line::default).take(pad).collect();
        lines.push(Line::from(format!(
            "{} {}",
            app.spinner_frame(),
            app.loading_text
        )));
        let para = Paragraph::new(lines)
            .alignment(Alignment::Center)
            .style(background);
        frame.render_widget(para, area);
        return;
    }

    let para = Paragraph::new(app.compose_frame()).style(background);
    frame.render_widget(para, area);
}
