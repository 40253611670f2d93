//! Spinner shown while the remote tree is indexed and the local tree scanned.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

pub struct SyncProgress {
    spinner: ProgressBar,
}

impl SyncProgress {
    /// A hidden bar when `enabled` is false, so callers never branch.
    pub fn new(enabled: bool) -> Self {
        let spinner = if enabled {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner())
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
            );
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        } else {
            ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden())
        };
        Self { spinner }
    }

    pub fn set_message(&self, msg: &str) {
        self.spinner.set_message(msg.to_string());
    }

    pub fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl Drop for SyncProgress {
    fn drop(&mut self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_progress_accepts_updates() {
        let p = SyncProgress::new(false);
        p.set_message("Indexing /lib");
        p.finish();
        assert!(p.spinner.is_finished());
    }
}
