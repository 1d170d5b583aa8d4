//! Terminal progress for one round: a fetch bar and an output bar.
//!
//! Bars only draw on a real terminal; in pipes and cron they are hidden but
//! keep counting, because the end-of-round summary reads their positions.
//! The counters track enqueue/dequeue only and can overstate completeness
//! when the destination rejected items.

use std::io::IsTerminal;
use std::time::Duration;

use comfy_table::presets::NOTHING;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

// No Debug impl: indicatif's bars do not implement it.
#[derive(Clone)]
pub(crate) struct MigrationProgress {
    multi: MultiProgress,
    fetch: ProgressBar,
    output: ProgressBar,
}

impl MigrationProgress {
    /// `fetch_prefix` labels the reader side ("Scroll" or "Read"),
    /// `output_prefix` the writer side ("Bulk", "Write" or "Output").
    pub(crate) fn new(fetch_prefix: &str, output_prefix: &str) -> Self {
        let multi = MultiProgress::new();
        if !std::io::stdout().is_terminal() {
            multi.set_draw_target(ProgressDrawTarget::hidden());
        }

        let style = ProgressStyle::with_template("{prefix:>7} [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");

        let fetch = multi.add(ProgressBar::new(1).with_style(style.clone()));
        fetch.set_prefix(fetch_prefix.to_string());
        let output = multi.add(ProgressBar::new(1).with_style(style));
        output.set_prefix(output_prefix.to_string());

        Self {
            multi,
            fetch,
            output,
        }
    }

    /// Total documents expected this round; 0 means unknown.
    pub(crate) fn set_total(&self, total: u64) {
        if total > 0 {
            self.fetch.set_length(total);
            self.output.set_length(total);
        }
    }

    pub(crate) fn add_fetched(&self, count: u64) {
        self.fetch.inc(count);
    }

    pub(crate) fn add_written(&self, count: u64) {
        self.output.inc(count);
    }

    pub(crate) fn fetched(&self) -> u64 {
        self.fetch.position()
    }

    pub(crate) fn written(&self) -> u64 {
        self.output.position()
    }

    pub(crate) fn finish(&self) {
        self.fetch.finish();
        self.output.finish();
        let _ = self.multi.clear();
    }
}

/// Round summary rendered as a borderless table.
pub(crate) fn render_summary(fetched: u64, written: u64, elapsed: Duration) -> String {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.add_row(vec![
        Cell::new("documents read").set_alignment(CellAlignment::Right),
        Cell::new(format_count(fetched)),
    ]);
    table.add_row(vec![
        Cell::new("documents written").set_alignment(CellAlignment::Right),
        Cell::new(format_count(written)),
    ]);
    table.add_row(vec![
        Cell::new("elapsed").set_alignment(CellAlignment::Right),
        Cell::new(format_duration(elapsed)),
    ]);
    table.to_string()
}

fn format_count(count: u64) -> String {
    let digits = count.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (position, ch) in digits.chars().enumerate() {
        if position > 0 && (digits.len() - position) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

fn format_duration(elapsed: Duration) -> String {
    let total_secs = elapsed.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_feed_the_summary() {
        let progress = MigrationProgress::new("Scroll", "Bulk");
        progress.set_total(10);
        progress.add_fetched(4);
        progress.add_written(3);
        assert_eq!(progress.fetched(), 4);
        assert_eq!(progress.written(), 3);
        progress.finish();
    }

    #[test]
    fn count_formatting_groups_thousands() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_000), "1,000");
        assert_eq!(format_count(1_234_567), "1,234,567");
    }

    #[test]
    fn duration_formatting_switches_to_hours() {
        assert_eq!(format_duration(Duration::from_secs(61)), "01:01");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "01:02:05");
    }

    #[test]
    fn the_one_where_the_summary_mentions_both_sides() {
        let summary = render_summary(1_000, 998, Duration::from_secs(75));
        assert!(summary.contains("documents read"));
        assert!(summary.contains("1,000"));
        assert!(summary.contains("documents written"));
        assert!(summary.contains("998"));
        assert!(summary.contains("01:15"));
    }
}
