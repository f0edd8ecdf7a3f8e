//! Convenience macros for performance instrumentation.

/// Create a [`crate::performance::PerformanceSpan`] guard. Extra fields are
/// recorded on the guard's span and appear on its completion event.
///
/// ```rust
/// use tilegraph_tracing::perf_span;
///
/// {
///     let _span = perf_span!("engine_run", program = 2);
///     // ... work ...
/// }
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::new($name, None)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        $crate::performance::PerformanceSpan::within(
            $crate::debug_span!("perf", name = $name, $($field = $value),+),
            None,
        )
    }};
}

/// Time a block, returning `(result, duration_us)`.
///
/// ```rust
/// use tilegraph_tracing::timed_block;
///
/// let (sum, _us) = timed_block!("sum", { (1..=4).sum::<i32>() });
/// assert_eq!(sum, 10);
/// ```
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_us = start.elapsed().as_micros() as u64;
        $crate::debug!(operation = $name, duration_us = duration_us, "timed_block_complete");
        (result, duration_us)
    }};
}
