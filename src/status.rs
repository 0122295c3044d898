use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::sync::{Mutex, MutexGuard};

use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;

/// Completion of one transfer as far as it can be known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Progress {
    Percent(u8),
    /// The server sent no content length.
    Indeterminate { bytes: u64 },
}

impl Progress {
    pub fn compute(bytes_read: u64, total_bytes: Option<u64>) -> Self {
        match total_bytes {
            Some(total) if total > 0 => {
                let percent = (u128::from(bytes_read) * 100 / u128::from(total)).min(100);
                Progress::Percent(percent as u8)
            }
            _ => Progress::Indeterminate { bytes: bytes_read },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    Info { message: String },
    Rejected { message: String },
    Progress { name: String, progress: Progress },
    Paused { name: String },
    Resumed { name: String },
    Completed { name: String, bytes: u64 },
    Canceled { name: String, bytes: u64 },
    Failed { url: String, reason: String },
}

impl StatusEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self::Info {
            message: message.into(),
        }
    }

    /// Name of the destination file this event belongs to, if any.
    pub fn stream_key(&self) -> Option<&str> {
        match self {
            Self::Progress { name, .. }
            | Self::Paused { name }
            | Self::Resumed { name }
            | Self::Completed { name, .. }
            | Self::Canceled { name, .. } => Some(name),
            Self::Info { .. } | Self::Rejected { .. } | Self::Failed { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Canceled { .. } | Self::Failed { .. }
        )
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info { message } | Self::Rejected { message } => f.write_str(message),
            Self::Progress {
                name,
                progress: Progress::Percent(p),
            } => write!(f, "Downloading {}: {}%", name, p),
            Self::Progress {
                name,
                progress: Progress::Indeterminate { bytes },
            } => write!(f, "Downloading {}: {}", name, HumanBytes(*bytes)),
            Self::Paused { name } => write!(f, "Downloads paused: {}", name),
            Self::Resumed { name } => write!(f, "Downloads resumed: {}", name),
            Self::Completed { name, .. } => write!(f, "Download completed: {}", name),
            Self::Canceled { name, .. } => write!(f, "Downloads canceled: {}", name),
            Self::Failed { reason, .. } => f.write_str(reason),
        }
    }
}

/// Destination for everything the manager wants the operator to see.
///
/// Implementations must serialize concurrent callers so lines never interleave.
pub trait StatusSink: Send + Sync {
    fn publish(&self, event: &StatusEvent);

    fn clear(&self);

    /// Lines currently displayed, oldest first. Streams keep no history.
    fn history(&self) -> Vec<String> {
        Vec::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct Board {
    lines: Vec<String>,
    // index of the live progress line for each destination name
    progress_slots: HashMap<String, usize>,
}

/// In-memory status log.
///
/// Progress for a destination rewrites that destination's own line, so five
/// concurrent transfers keep five live lines. Everything else appends.
#[derive(Default)]
pub struct StatusBoard {
    inner: Mutex<Board>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        lock(&self.inner).lines.clone()
    }

    #[cfg(test)]
    pub fn contains(&self, needle: &str) -> bool {
        lock(&self.inner).lines.iter().any(|l| l.contains(needle))
    }
}

impl StatusSink for StatusBoard {
    fn publish(&self, event: &StatusEvent) {
        let mut board = lock(&self.inner);
        let line = event.to_string();

        if let StatusEvent::Progress { name, .. } = event {
            let slot = board.progress_slots.get(name).copied();
            if let Some(idx) = slot {
                board.lines[idx] = line;
            } else {
                let idx = board.lines.len();
                board.lines.push(line);
                board.progress_slots.insert(name.clone(), idx);
            }
            return;
        }

        board.lines.push(line);
        if event.is_terminal() {
            if let Some(name) = event.stream_key() {
                board.progress_slots.remove(name);
            }
        }
    }

    fn clear(&self) {
        let mut board = lock(&self.inner);
        board.lines.clear();
        board.progress_slots.clear();
    }

    fn history(&self) -> Vec<String> {
        self.lines()
    }
}

/// Terminal renderer: one live progress bar per destination, permanent lines above.
///
/// A [`StatusBoard`] mirrors what has been shown so the console can replay it.
pub struct ConsoleSink {
    multi_progress: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
    board: StatusBoard,
}

impl ConsoleSink {
    pub fn new() -> Self {
        let multi_progress = MultiProgress::new();
        multi_progress.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
        Self {
            multi_progress,
            bars: Mutex::new(HashMap::new()),
            board: StatusBoard::new(),
        }
    }

    fn bar_for(
        &self,
        bars: &mut HashMap<String, ProgressBar>,
        name: &str,
        progress: Progress,
    ) -> ProgressBar {
        bars.entry(name.to_string())
            .or_insert_with(|| {
                let pb = match progress {
                    Progress::Percent(_) => {
                        let pb = self.multi_progress.add(ProgressBar::new(100));
                        pb.set_style(
                            ProgressStyle::with_template(
                                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}",
                            )
                            .unwrap_or_else(|_| ProgressStyle::default_bar())
                            .progress_chars("=>-"),
                        );
                        pb
                    }
                    Progress::Indeterminate { .. } => {
                        let pb = self.multi_progress.add(ProgressBar::new_spinner());
                        pb.set_style(
                            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                        );
                        pb
                    }
                };
                pb.set_message(format!("Downloading {}", name));
                pb
            })
            .clone()
    }

    fn print(&self, line: &str) {
        // bars are hidden when stderr is not a terminal, and so is println
        if self.multi_progress.is_hidden() || self.multi_progress.println(line).is_err() {
            eprintln!("{}", line);
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink for ConsoleSink {
    fn publish(&self, event: &StatusEvent) {
        let mut bars = lock(&self.bars);
        self.board.publish(event);
        match event {
            StatusEvent::Progress { name, progress } => {
                let pb = self.bar_for(&mut bars, name, *progress);
                match progress {
                    Progress::Percent(p) => pb.set_position(u64::from(*p)),
                    Progress::Indeterminate { bytes } => {
                        pb.set_message(format!("Downloading {} {}", name, HumanBytes(*bytes)));
                        pb.tick();
                    }
                }
            }
            _ => {
                if event.is_terminal() {
                    if let Some(pb) = event.stream_key().and_then(|name| bars.remove(name)) {
                        pb.finish_and_clear();
                        self.multi_progress.remove(&pb);
                    }
                }
                self.print(&event.to_string());
            }
        }
    }

    fn clear(&self) {
        self.board.clear();
        let _ = self.multi_progress.clear();
    }

    fn history(&self) -> Vec<String> {
        self.board.lines()
    }
}

/// Newline-delimited JSON, one object per event.
pub struct JsonSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: Write + Send> StatusSink for JsonSink<W> {
    fn publish(&self, event: &StatusEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize status event");
                return;
            }
        };
        let mut writer = lock(&self.writer);
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            tracing::warn!(error = %e, "failed to write status event");
        }
    }

    // A stream has nothing to take back.
    fn clear(&self) {}
}
