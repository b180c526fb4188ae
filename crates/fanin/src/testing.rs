// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test doubles for the session collaborators.
//!
//! These are real implementations with recording behavior, intended for tests of code
//! built on this crate (and used by this crate's own tests). They are not fakes of the
//! completion machinery itself - that always runs for real.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::{EventChannel, Executor, LatencyMetric, LatencySink, Task};

/// An [`Executor`] that queues dispatched tasks until explicitly pumped.
///
/// Lets tests assert that deferred completions really are deferred, then run them at a
/// point of the test's choosing.
#[derive(Default)]
pub struct ManualExecutor {
    queue: Mutex<VecDeque<Task>>,
}

impl ManualExecutor {
    /// Creates an executor with an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of tasks waiting to run.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Runs every queued task in dispatch order and returns how many ran.
    ///
    /// Tasks dispatched while pumping run in the same pass.
    pub fn run_queued(&self) -> usize {
        let mut ran = 0;
        loop {
            // Taken out of the lock before running; a task may dispatch more tasks.
            let task = self.queue.lock().pop_front();
            let Some(task) = task else { break };

            task();
            ran += 1;
        }

        ran
    }
}

impl Executor for ManualExecutor {
    fn dispatch(&self, task: Task, _priority: u32) {
        self.queue.lock().push_back(task);
    }
}

impl Debug for ManualExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualExecutor")
            .field("queued", &self.queued())
            .finish()
    }
}

/// A [`LatencySink`] that remembers which metrics were recorded.
#[derive(Debug, Default)]
pub struct RecordingLatencySink {
    samples: Mutex<Vec<(LatencyMetric, Duration)>>,
}

impl RecordingLatencySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The metrics recorded so far, in recording order.
    #[must_use]
    pub fn samples(&self) -> Vec<LatencyMetric> {
        self.samples.lock().iter().map(|(metric, _)| *metric).collect()
    }
}

impl LatencySink for RecordingLatencySink {
    fn record(&self, metric: LatencyMetric, elapsed: Duration) {
        self.samples.lock().push((metric, elapsed));
    }
}

/// An [`EventChannel`] that counts notifications instead of writing to a socket.
#[derive(Debug)]
pub struct RecordingChannel {
    valid: bool,
    fail_notify: bool,
    notify_count: AtomicUsize,
}

impl RecordingChannel {
    /// Creates a valid channel whose notifications succeed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            valid: true,
            fail_notify: false,
            notify_count: AtomicUsize::new(0),
        }
    }

    /// Creates a channel that reports itself as unusable.
    #[must_use]
    pub fn invalid() -> Self {
        Self {
            valid: false,
            ..Self::new()
        }
    }

    /// Creates a valid channel whose notifications fail with a broken-pipe error.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_notify: true,
            ..Self::new()
        }
    }

    /// How many times [`EventChannel::notify`] was called.
    #[must_use]
    pub fn notify_count(&self) -> usize {
        self.notify_count.load(Ordering::SeqCst)
    }
}

impl Default for RecordingChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl EventChannel for RecordingChannel {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn notify(&self) -> std::io::Result<()> {
        self.notify_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_notify {
            return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        }

        Ok(())
    }
}
