//! Progress indicators for long-running scans and migrations.
//!
//! Shown only when stderr is an interactive terminal.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{IsTerminal, stderr};
use std::time::Duration;

const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg} ({pos} files)";

#[must_use]
pub fn should_show_progress() -> bool {
    stderr().is_terminal()
}

/// Progress bar that remembers whether it is drawn.
pub struct ProgressTracker {
    bar: ProgressBar,
    showing: bool,
}

impl ProgressTracker {
    /// Bar over `total` items, e.g. duplicate groups.
    #[must_use]
    pub fn new(total: u64, message: &str) -> Self {
        let showing = should_show_progress();
        let bar = ProgressBar::new(total);
        if showing {
            if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
                bar.set_style(style.progress_chars("=>-"));
            }
            bar.set_message(message.to_string());
        } else {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        Self { bar, showing }
    }

    /// Spinner for walks whose size is unknown up front.
    #[must_use]
    pub fn spinner(message: &str) -> Self {
        let showing = should_show_progress();
        let bar = ProgressBar::new_spinner();
        if showing {
            if let Ok(style) = ProgressStyle::default_spinner().template(SPINNER_TEMPLATE) {
                bar.set_style(style);
            }
            bar.set_message(message.to_string());
            bar.enable_steady_tick(Duration::from_millis(100));
        } else {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        Self { bar, showing }
    }

    /// Never draws; used by tests, `--quiet` and `--json`.
    #[must_use]
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            showing: false,
        }
    }

    pub fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    pub fn set_message(&self, message: &str) {
        if self.showing {
            self.bar.set_message(message.to_string());
        }
    }

    pub fn finish(&self, message: &str) {
        if self.showing {
            self.bar.finish_with_message(message.to_string());
        } else {
            self.bar.finish_and_clear();
        }
    }

    #[must_use]
    pub const fn is_showing(&self) -> bool {
        self.showing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_tracker_counts_without_drawing() {
        let tracker = ProgressTracker::hidden();
        assert!(!tracker.is_showing());
        tracker.inc(3);
        tracker.set_message("ignored");
        tracker.finish("done");
        assert_eq!(tracker.bar.position(), 3);
    }
}
