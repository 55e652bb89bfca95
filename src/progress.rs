//! Progress model
//!
//! Combines page-coverage progress with timing-operation progress. When a
//! timing module is loaded the regular phase contributes at most half; the
//! timing phase supplies the other half operation by operation.

use tracing::debug;

/// Inputs for one progress computation
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressInput {
    /// Pages fully audited
    pub audited: u64,
    /// Lifetime total of both work queues (`url_queue` + `page_queue`)
    pub queue_totals: u64,
    /// Spider redirects (0 when the spider never ran)
    pub redirects: u64,
    /// Any module registered a timing operation this scan
    pub timing_modules: bool,
    /// Operation count snapshotted when the timing phase started
    pub timing_total: u64,
    pub timing_remaining: u64,
}

/// Progress percentage, rounded to 2 decimals and clamped to 100.0.
///
/// Division failures (an empty effective set) report 0.0.
pub fn progress(input: &ProgressInput) -> f64 {
    let effective = input.queue_totals.saturating_sub(input.redirects);
    let multiplier = if input.timing_modules { 50.0 } else { 100.0 };

    let mut value = if effective == 0 {
        0.0
    } else {
        input.audited as f64 / effective as f64 * multiplier
    };

    if input.timing_total > 0 {
        let done = input.timing_total - input.timing_remaining;
        value += done as f64 / input.timing_total as f64 * 50.0;
    }

    let rounded = (value * 100.0).round() / 100.0;
    if rounded > 100.0 {
        debug!("progress overshoot: {rounded:.2}, clamping");
        return 100.0;
    }
    rounded
}

/// ETA as `HH:MM:SS` from progress and elapsed seconds
pub fn eta(progress: f64, elapsed_secs: f64) -> String {
    if progress <= 0.0 || elapsed_secs <= 0.0 {
        return "--:--:--".to_string();
    }
    let total_estimate = elapsed_secs * 100.0 / progress;
    let remaining = (total_estimate - elapsed_secs).max(0.0) as u64;
    format!(
        "{:02}:{:02}:{:02}",
        remaining / 3600,
        (remaining % 3600) / 60,
        remaining % 60
    )
}
