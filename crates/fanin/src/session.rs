// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::{Completion, Executor, LatencySink};

/// A socket-backed notification channel used by event-driven request consumers.
///
/// When a completion finishes with notification enabled, it enqueues itself onto the
/// session's completed-request list and signals this channel, strictly after the user
/// callback has run.
pub trait EventChannel: Send + Sync {
    /// Whether the channel is currently usable. Completions skip notification for
    /// invalid channels.
    fn is_valid(&self) -> bool;

    /// Signals the consumer that at least one completed request is ready to be drained.
    fn notify(&self) -> std::io::Result<()>;
}

/// The session object representing one open storage target.
///
/// The session owns the state the completion machinery needs from its surroundings:
/// the executor for deferred completion dispatch, the optional latency sink, the
/// optional event notification channel, the completed-request list consumed by
/// event-driven readers, and the in-flight-operation tracker that gates session
/// teardown elsewhere in the library.
///
/// # Ownership
///
/// Sessions are shared via [`Arc`]. A completion borrows its session for the common
/// request kinds; for close requests, and for open requests that fail, the completion
/// holds the last reference and destroys the session before invoking the user callback.
///
/// # Thread safety
///
/// This type is thread-safe. The completed-request list has its own lock, scoped
/// strictly to list mutation.
pub struct Session {
    executor: Arc<dyn Executor>,
    latency_sink: Option<Arc<dyn LatencySink>>,
    event_channel: Option<Arc<dyn EventChannel>>,
    completed: Mutex<VecDeque<Arc<Completion>>>,
    in_flight: InFlightOps,
}

impl Session {
    /// Starts building a session around the given executor.
    #[must_use]
    pub fn builder(executor: Arc<dyn Executor>) -> SessionBuilder {
        SessionBuilder {
            executor,
            latency_sink: None,
            event_channel: None,
        }
    }

    pub(crate) fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    pub(crate) fn latency_sink(&self) -> Option<&Arc<dyn LatencySink>> {
        self.latency_sink.as_ref()
    }

    pub(crate) fn event_channel(&self) -> Option<&Arc<dyn EventChannel>> {
        self.event_channel.as_ref()
    }

    pub(crate) fn push_completed(&self, completion: Arc<Completion>) {
        self.completed.lock().push_back(completion);
    }

    /// Removes and returns every completion currently on the completed-request list.
    ///
    /// Event-driven consumers call this after the event channel signals.
    #[must_use]
    pub fn drain_completed(&self) -> Vec<Arc<Completion>> {
        self.completed.lock().drain(..).collect()
    }

    /// The number of operations currently registered with the in-flight tracker.
    #[must_use]
    pub fn in_flight_ops(&self) -> usize {
        *self.in_flight.count.lock()
    }

    /// Blocks until no operation remains registered with the in-flight tracker.
    ///
    /// Session teardown elsewhere in the library waits on this before releasing the
    /// storage target's resources.
    pub fn wait_quiescent(&self) {
        let mut count = self.in_flight.count.lock();
        while *count > 0 {
            self.in_flight.became_quiescent.wait(&mut count);
        }
    }

    fn op_started(&self) {
        *self.in_flight.count.lock() += 1;
    }

    fn op_finished(&self) {
        let mut count = self.in_flight.count.lock();
        assert!(*count > 0, "in-flight operation finished but none was started");
        *count -= 1;
        if *count == 0 {
            self.in_flight.became_quiescent.notify_all();
        }
    }
}

impl Debug for Session {
    #[cfg_attr(test, mutants::skip)] // There is no API contract this needs to satisfy.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("completed", &self.completed.lock().len())
            .field("in_flight", &self.in_flight_ops())
            .field("has_latency_sink", &self.latency_sink.is_some())
            .field("has_event_channel", &self.event_channel.is_some())
            .finish_non_exhaustive()
    }
}

/// Builds a [`Session`].
pub struct SessionBuilder {
    executor: Arc<dyn Executor>,
    latency_sink: Option<Arc<dyn LatencySink>>,
    event_channel: Option<Arc<dyn EventChannel>>,
}

impl SessionBuilder {
    /// Attaches a latency sink that receives one sample per latency-tracked request.
    #[must_use]
    pub fn latency_sink(mut self, sink: Arc<dyn LatencySink>) -> Self {
        self.latency_sink = Some(sink);
        self
    }

    /// Attaches an event notification channel for socket-driven consumers.
    #[must_use]
    pub fn event_channel(mut self, channel: Arc<dyn EventChannel>) -> Self {
        self.event_channel = Some(channel);
        self
    }

    /// Builds the session.
    #[must_use]
    pub fn build(self) -> Arc<Session> {
        Arc::new(Session {
            executor: self.executor,
            latency_sink: self.latency_sink,
            event_channel: self.event_channel,
            completed: Mutex::new(VecDeque::new()),
            in_flight: InFlightOps {
                count: Mutex::new(0),
                became_quiescent: Condvar::new(),
            },
        })
    }
}

impl Debug for SessionBuilder {
    #[cfg_attr(test, mutants::skip)] // There is no API contract this needs to satisfy.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBuilder").finish_non_exhaustive()
    }
}

/// Tracks operations that are still using the session.
struct InFlightOps {
    count: Mutex<usize>,
    became_quiescent: Condvar,
}

/// Registration of one operation with the session's in-flight tracker.
///
/// Holds the session alive and keeps it from being considered quiescent. Dropping the
/// guard finishes the operation and wakes quiescence waiters, so the guard must be held
/// across every access to the session the operation makes.
#[derive(Debug)]
pub(crate) struct InFlightGuard {
    session: Arc<Session>,
}

impl InFlightGuard {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        session.op_started();
        Self { session }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.session.op_finished();
    }
}
