//! Scoped timing for pipeline stages.
//!
//! A [`TimingGuard`] measures the lifetime of a scope and, when telemetry is switched on and the
//! `packshot::telemetry` log target accepts the guard's level, logs the elapsed time on drop.

use std::{
    borrow::Cow,
    sync::atomic::{AtomicU8, Ordering},
    time::{Duration, Instant},
};

use log::{Level, LevelFilter, log, log_enabled};

use crate::config::TelemetrySettings;

/// Log target used for all timing output.
pub const TELEMETRY_TARGET: &str = "packshot::telemetry";

// 0 = off, otherwise the highest enabled `Level` as usize (Error = 1 .. Trace = 5).
static THRESHOLD: AtomicU8 = AtomicU8::new(0);

/// Measures a scope and logs its duration on drop when active.
#[must_use = "the guard measures until it is dropped"]
pub struct TimingGuard {
    label: Cow<'static, str>,
    level: Level,
    start: Instant,
    active: bool,
}

impl TimingGuard {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop measuring and return the duration without logging.
    pub fn finish(mut self) -> Duration {
        self.active = false;
        self.start.elapsed()
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        if self.active {
            log!(
                target: TELEMETRY_TARGET,
                self.level,
                "{} took {:.2?}",
                self.label,
                self.start.elapsed()
            );
        }
    }
}

/// Start timing `label`; the guard only logs if telemetry allows `level`.
pub fn timing_guard(label: impl Into<Cow<'static, str>>, level: Level) -> TimingGuard {
    let active = telemetry_allows(level) && log_enabled!(target: TELEMETRY_TARGET, level);
    TimingGuard {
        label: label.into(),
        level,
        start: Instant::now(),
        active,
    }
}

/// Set the process-wide telemetry threshold. `LevelFilter::Off` disables timing output.
pub fn configure(level: LevelFilter) {
    THRESHOLD.store(level as usize as u8, Ordering::Relaxed);
}

/// Apply persisted telemetry settings.
pub fn configure_from_settings(settings: &TelemetrySettings) {
    if settings.enabled {
        configure(settings.level_filter());
    } else {
        configure(LevelFilter::Off);
    }
}

pub fn telemetry_enabled() -> bool {
    THRESHOLD.load(Ordering::Relaxed) > 0
}

/// `true` when telemetry is on and `level` is within the configured threshold.
pub fn telemetry_allows(level: Level) -> bool {
    let threshold = THRESHOLD.load(Ordering::Relaxed);
    threshold > 0 && (level as usize as u8) <= threshold
}
