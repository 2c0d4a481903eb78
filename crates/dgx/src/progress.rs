//! 📊 progress.rs: "Are we there yet?" Every rebuild, every time, forever.
//!
//! 🚀 A rebuild replays the entire history before it writes a single bucket, so
//! for a while nothing visible happens. This module makes that "while" visible:
//! a progress bar over the reports, and a comfy-table message with the numbers.
//!
//! ⚠️ Watching this progress bar will not make it go faster. We've tried.
//!
//! Hidden entirely when `runtime.show_progress = false` (CI logs thank you).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

// ⏱️ rates are averaged over this much recent history so a GC pause doesn't look like the apocalypse
const RATE_WINDOW: Duration = Duration::from_secs(5);

/// 🔢 "1000000" → "1,000,000". You're welcome, eyes.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS for the long ones. If it shows hours, call your mom.
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// 📊 Progress of one rebuild: reports replayed, buckets formed, batches committed.
pub(crate) struct RebuildProgress {
    /// 🏷️ which collections are being replayed
    label: String,
    total_reports: u64,
    reports_replayed: u64,
    buckets: u64,
    batches_committed: u64,
    progress_bar: ProgressBar,
    /// 🔄 (when, reports replayed by then)
    rate_samples: VecDeque<(Instant, u64)>,
    start_time: Instant,
}

impl std::fmt::Debug for RebuildProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("RebuildProgress")
            .field("label", &self.label)
            .field("total_reports", &self.total_reports)
            .field("reports_replayed", &self.reports_replayed)
            .field("buckets", &self.buckets)
            .field("batches_committed", &self.batches_committed)
            .finish()
    }
}

impl RebuildProgress {
    pub(crate) fn new(label: String, total_reports: u64, visible: bool) -> Self {
        let progress_bar = if visible { ProgressBar::new(total_reports) } else { ProgressBar::hidden() };
        // 🎨 cyan because it's classy. A broken template just means the plain default bar.
        let style = ProgressStyle::with_template("{msg}\n| [{bar:40.cyan/blue}]")
            .map(|style| style.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        progress_bar.set_style(style);

        let start_time = Instant::now();
        Self {
            label,
            total_reports,
            reports_replayed: 0,
            buckets: 0,
            batches_committed: 0,
            progress_bar,
            rate_samples: VecDeque::from([(start_time, 0)]),
            start_time,
        }
    }

    /// 🔄 The replay has now seen `reports_replayed` reports and formed `buckets` buckets.
    pub(crate) fn replayed(&mut self, reports_replayed: u64, buckets: u64) {
        self.reports_replayed = reports_replayed;
        self.buckets = buckets;
        let rate = self.reports_per_sec();
        self.render(rate);
        self.progress_bar.set_position(reports_replayed);
    }

    /// 📦 The flush is done (or stopped) with this many batches committed.
    pub(crate) fn flushed(&mut self, batches_committed: u64) {
        self.batches_committed = batches_committed;
        let rate = self.reports_per_sec();
        self.render(rate);
    }

    pub(crate) fn finish(&self) {
        self.progress_bar.finish();
    }

    /// 📈 Reports per second over the sliding window.
    fn reports_per_sec(&mut self) -> f64 {
        let now = Instant::now();
        while let Some(&(timestamp, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > RATE_WINDOW {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples.push_back((now, self.reports_replayed));

        match self.rate_samples.front() {
            Some(&(oldest_time, oldest_reports)) => {
                let elapsed = now.duration_since(oldest_time).as_secs_f64();
                if elapsed > 0.0 {
                    self.reports_replayed.saturating_sub(oldest_reports) as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    /// 🎨 Two columns, right aligned, no borders:
    /// ```text
    ///   <reports/s>    <replayed / total>
    ///   <buckets>      <batches>
    ///   <elapsed>      <percent>
    /// ```
    fn render(&self, reports_per_sec: f64) {
        let percent = if self.total_reports > 0 {
            (self.reports_replayed as f64 / self.total_reports as f64) * 100.0
        } else {
            100.0
        };

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!("{} Reports/s", format_number(reports_per_sec as u64))).set_alignment(CellAlignment::Right),
            Cell::new(format!("{} / {} Reports", format_number(self.reports_replayed), format_number(self.total_reports)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} Buckets", format_number(self.buckets))).set_alignment(CellAlignment::Right),
            Cell::new(format!("{} Batches committed", format_number(self.batches_committed))).set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(self.start_time.elapsed()))).set_alignment(CellAlignment::Right),
            Cell::new(format!("{percent:.2}%")).set_alignment(CellAlignment::Right),
        ]);

        self.progress_bar.set_message(format!("rebuilding: {}\n{}", self.label, table));
    }
}
