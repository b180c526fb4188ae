// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use nm::{Event, Magnitude};

/// A per-request-kind latency metric recorded when a request completes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum LatencyMetric {
    /// Read request latency.
    Read,

    /// Write request latency.
    Write,

    /// Discard request latency.
    Discard,

    /// Flush request latency.
    Flush,

    /// Write-same request latency.
    WriteSame,

    /// Compare-and-write request latency.
    CompareAndWrite,
}

/// Receives per-request latency samples.
///
/// A session optionally carries one of these; the completion submits exactly one sample
/// per latency-tracked request, at completion time.
pub trait LatencySink: Send + Sync {
    /// Records one latency sample for the given metric.
    fn record(&self, metric: LatencyMetric, elapsed: Duration);
}

/// The production [`LatencySink`], backed by thread-local histogram events.
///
/// Samples are recorded in microseconds. Collect them via `nm::Report`.
#[derive(Debug, Default)]
pub struct HistogramLatencySink;

const LATENCY_BUCKETS_US: &[Magnitude] = &[100, 1_000, 10_000, 100_000, 1_000_000];

thread_local! {
    static READ_LATENCY: Event = Event::builder()
        .name("fanin_read_latency_us")
        .histogram(LATENCY_BUCKETS_US)
        .build();

    static WRITE_LATENCY: Event = Event::builder()
        .name("fanin_write_latency_us")
        .histogram(LATENCY_BUCKETS_US)
        .build();

    static DISCARD_LATENCY: Event = Event::builder()
        .name("fanin_discard_latency_us")
        .histogram(LATENCY_BUCKETS_US)
        .build();

    static FLUSH_LATENCY: Event = Event::builder()
        .name("fanin_flush_latency_us")
        .histogram(LATENCY_BUCKETS_US)
        .build();

    static WRITE_SAME_LATENCY: Event = Event::builder()
        .name("fanin_write_same_latency_us")
        .histogram(LATENCY_BUCKETS_US)
        .build();

    static COMPARE_AND_WRITE_LATENCY: Event = Event::builder()
        .name("fanin_compare_and_write_latency_us")
        .histogram(LATENCY_BUCKETS_US)
        .build();
}

impl LatencySink for HistogramLatencySink {
    fn record(&self, metric: LatencyMetric, elapsed: Duration) {
        let micros = usize::try_from(elapsed.as_micros()).unwrap_or(usize::MAX);

        match metric {
            LatencyMetric::Read => READ_LATENCY.with(|e| e.observe(micros)),
            LatencyMetric::Write => WRITE_LATENCY.with(|e| e.observe(micros)),
            LatencyMetric::Discard => DISCARD_LATENCY.with(|e| e.observe(micros)),
            LatencyMetric::Flush => FLUSH_LATENCY.with(|e| e.observe(micros)),
            LatencyMetric::WriteSame => WRITE_SAME_LATENCY.with(|e| e.observe(micros)),
            LatencyMetric::CompareAndWrite => {
                COMPARE_AND_WRITE_LATENCY.with(|e| e.observe(micros));
            }
        }
    }
}
