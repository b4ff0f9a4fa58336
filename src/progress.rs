//! Progress indicators.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Bar for a fixed number of instances.
pub fn bar(len: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {prefix} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb
}

/// Spinner for a single long-running call.
pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Hidden when output is quiet or machine-readable.
pub fn spinner_unless(hidden: bool, msg: &str) -> ProgressBar {
    if hidden {
        ProgressBar::hidden()
    } else {
        spinner(msg)
    }
}
