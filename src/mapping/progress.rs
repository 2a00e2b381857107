use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

/// Counts processed voxels and optionally draws a progress bar.
pub struct ProgressTracker {
    bar: ProgressBar,
    start_time: Instant,
}

impl ProgressTracker {
    pub fn new(total: usize, visible: bool) -> Self {
        let bar = if visible {
            let bar = ProgressBar::new(total as u64);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} voxels (ETA {eta})",
            ) {
                bar.set_style(style);
            }
            bar
        } else {
            ProgressBar::hidden()
        };
        Self {
            bar,
            start_time: Instant::now(),
        }
    }

    pub fn inc(&self) {
        self.bar.inc(1);
    }

    pub fn position(&self) -> usize {
        self.bar.position() as usize
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
        tracing::info!(
            "Processed {} voxels in {}",
            self.position(),
            format_duration(self.start_time.elapsed())
        );
    }
}

fn format_duration(elapsed: Duration) -> String {
    let total_seconds = elapsed.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_tracker_still_counts() {
        let tracker = ProgressTracker::new(3, false);
        tracker.inc();
        tracker.inc();
        assert_eq!(tracker.position(), 2);
    }

    #[test]
    fn durations_switch_to_hours() {
        assert_eq!(format_duration(Duration::from_secs(75)), "01:15");
        assert_eq!(format_duration(Duration::from_secs(3725)), "01:02:05");
    }
}
