//! Timing helpers layered on top of `tracing`.
//!
//! ```rust
//! use tilegraph_tracing::performance::{record_transfer, PerformanceSpan};
//!
//! let span = PerformanceSpan::new("compile", Some(100));
//! // ... do work ...
//! drop(span); // logged only if it took at least 100μs
//!
//! record_transfer("TO_IPU", "host_to_device", 800_000, 42);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

const NO_THRESHOLD: u64 = u64::MAX;

static DEFAULT_THRESHOLD_US: AtomicU64 = AtomicU64::new(NO_THRESHOLD);

/// Set the threshold applied to spans created without one.
pub fn set_default_threshold_us(threshold_us: Option<u64>) {
    DEFAULT_THRESHOLD_US.store(threshold_us.unwrap_or(NO_THRESHOLD), Ordering::Relaxed);
}

/// Threshold applied to spans created without one.
pub fn default_threshold_us() -> Option<u64> {
    match DEFAULT_THRESHOLD_US.load(Ordering::Relaxed) {
        NO_THRESHOLD => None,
        value => Some(value),
    }
}

/// RAII guard that measures its own lifetime and logs it on drop.
///
/// Nothing is logged when the elapsed time is below the threshold.
pub struct PerformanceSpan {
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    /// Create a span. `threshold_us = None` falls back to the process default
    /// set by [`set_default_threshold_us`].
    pub fn new(span_name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        let span_name = span_name.into();
        Self::within(tracing::debug_span!("perf", name = %span_name), threshold_us)
    }

    /// Time inside an existing span. Its fields are attached to the
    /// completion event.
    pub fn within(span: tracing::Span, threshold_us: Option<u64>) -> Self {
        Self {
            threshold_us: threshold_us.or_else(default_threshold_us),
            start_time: Instant::now(),
            span,
        }
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Microseconds since the span was created.
    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    /// Enter this span's context.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        let elapsed_us = self.elapsed_us();
        if self.threshold_us.is_none_or(|t| elapsed_us >= t) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Record a host/device stream transfer.
pub fn record_transfer(stream: &str, direction: &str, bytes: usize, duration_us: u64) {
    let bandwidth_mbps = if duration_us > 0 {
        (bytes as f64 / duration_us as f64) * 1_000_000.0 / (1024.0 * 1024.0)
    } else {
        0.0
    };

    tracing::debug!(
        event = "transfer",
        stream = stream,
        direction = direction,
        bytes = bytes,
        bandwidth_mbps = bandwidth_mbps,
        duration_us = duration_us,
        "stream_transfer"
    );
}

/// Record one synchronised compute-set step.
pub fn record_step(compute_set: &str, vertices: usize, estimated_cycles: u64, duration_us: u64) {
    tracing::debug!(
        event = "step",
        compute_set = compute_set,
        vertices = vertices,
        estimated_cycles = estimated_cycles,
        duration_us = duration_us,
        "compute_set_step"
    );
}
