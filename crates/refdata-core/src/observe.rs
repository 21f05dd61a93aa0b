//! Optional metrics instrumentation.
//!
//! When the `observe` feature is enabled, key operations emit counters and
//! histograms via the [`metrics`] crate. A downstream application must
//! install a metrics recorder to collect the data.
//!
//! When the feature is **not** enabled every function in this module is a
//! zero-cost no-op.

use std::time::Duration;

/// Record a per-stream loader lock wait.
///
/// - `refdata.lock.wait_duration_seconds` – histogram
#[inline]
pub fn record_lock_wait(duration: Duration) {
    #[cfg(feature = "observe")]
    {
        metrics::histogram!("refdata.lock.wait_duration_seconds").record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = duration;
    }
}

/// Record a load attempt.
///
/// - `refdata.load.total` – counter with `outcome` label (`loaded` / `skipped` / `fail`)
/// - `refdata.load.duration_seconds` – histogram
#[inline]
pub fn record_load(duration: Duration, outcome: &'static str) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("refdata.load.total", "outcome" => outcome).increment(1);
        metrics::histogram!("refdata.load.duration_seconds").record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (duration, outcome);
    }
}

/// Record a purge run.
///
/// - `refdata.purge.streams_total` – counter
/// - `refdata.purge.entries_total` – counter
#[inline]
pub fn record_purge(streams: u64, entries: u64) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("refdata.purge.streams_total").increment(streams);
        metrics::counter!("refdata.purge.entries_total").increment(entries);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (streams, entries);
    }
}

/// Record a legacy store migration of one stream id.
///
/// - `refdata.migration.total` – counter with `outcome` label
#[inline]
pub fn record_migration(success: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("refdata.migration.total", "outcome" => outcome).increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = success;
    }
}

/// Record a lookup resolution.
///
/// - `refdata.lookup.total` – counter with `result` label (`hit` / `miss`)
#[inline]
pub fn record_lookup(hit: bool) {
    #[cfg(feature = "observe")]
    {
        let result = if hit { "hit" } else { "miss" };
        metrics::counter!("refdata.lookup.total", "result" => result).increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = hit;
    }
}

/// Record an effective stream cache lookup.
///
/// - `refdata.effective_stream_cache.lookups_total` – counter with `result` label
#[inline]
pub fn record_cache_lookup(hit: bool) {
    #[cfg(feature = "observe")]
    {
        let result = if hit { "hit" } else { "miss" };
        metrics::counter!("refdata.effective_stream_cache.lookups_total", "result" => result)
            .increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = hit;
    }
}
