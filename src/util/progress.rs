//! Progress spinner for sync cycles.
//!
//! Interactive runs draw a spinner on stderr whose message follows the cycle
//! state. CI runs get a hidden draw target, so callers never branch on mode.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{IsTerminal, stderr};
use std::time::Duration;

const TICK: Duration = Duration::from_millis(120);

/// True when stderr is a terminal a human is watching.
#[must_use]
pub fn should_show_progress() -> bool {
    stderr().is_terminal()
}

/// Spinner that follows the cycle state.
pub struct ProgressTracker {
    bar: ProgressBar,
}

impl ProgressTracker {
    /// Spinner that is drawn only when `show` is true.
    ///
    /// # Panics
    ///
    /// Panics if the static spinner template is invalid.
    #[must_use]
    pub fn spinner(message: &str, show: bool) -> Self {
        let bar = ProgressBar::new_spinner();
        if show {
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.cyan} {msg} ({elapsed})")
                    .expect("spinner template is valid"),
            );
            bar.set_message(message.to_string());
            bar.enable_steady_tick(TICK);
        } else {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        Self { bar }
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.bar.set_message(message.into());
    }

    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_spinner_accepts_updates() {
        let tracker = ProgressTracker::spinner("Syncing", false);
        tracker.set_message("Merging");
        tracker.finish_and_clear();
        assert!(tracker.bar.is_hidden());
    }
}
