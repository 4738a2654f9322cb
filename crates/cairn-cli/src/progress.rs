//! Progress display for chunked transfers.

use cairn_core::{ProgressObserver, TransferProgress};
use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar fed by per-chunk completion events
#[derive(Clone)]
pub struct ChunkProgressBar {
    bar: ProgressBar,
}

impl ChunkProgressBar {
    /// Bar over `total_bytes`, labelled with `message`
    pub fn new(total_bytes: u64, message: impl Into<String>) -> Self {
        let bar = ProgressBar::new(total_bytes);
        let style = ProgressStyle::default_bar()
            .template(
                "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        bar.set_message(message.into());
        Self { bar }
    }

    /// Remove the bar from the terminal
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressObserver for ChunkProgressBar {
    fn on_chunk_complete(&self, progress: &TransferProgress) {
        self.bar.set_position(progress.bytes);
    }
}

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}
