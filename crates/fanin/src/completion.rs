// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::{Level, event};

use crate::{InFlightGuard, ReadAssembler, RequestKind, Session};

/// Idempotent "already applied" sentinel result code.
///
/// A sub-operation that reports this code contributes neither to the accumulated byte
/// count nor to the error tie-break: the work had already been applied by an earlier
/// attempt, which is not a failure and not new progress.
pub const ALREADY_EXISTS: i64 = -(libc::EEXIST as i64);

const ERR_UNASSOCIATED: &str = "completion is not associated with a session";
const ERR_RELEASED: &str = "completion accessed after the last reference was released";

type Callback = Box<dyn FnOnce(&Completion) + Send>;

/// Lifecycle of a logical request. Transitions are monotonic forward only.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
enum State {
    Pending = 0,
    Callback = 1,
    Complete = 2,
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Callback,
            _ => Self::Complete,
        }
    }
}

/// Association of a completion with its session, fixed by the first
/// [`associate()`][Completion::associate] call.
struct Assoc {
    // Exclusive ownership link for close requests and failed open requests; nulled
    // exactly when the completion destroys the session.
    session: Option<Arc<Session>>,
    kind: RequestKind,
    started_at: Instant,
}

/// Tracks the outcome of one logical asynchronous I/O request that may fan out into
/// multiple concurrently executing sub-operations.
///
/// A completion aggregates the declared number of sub-operation results into exactly one
/// caller-visible outcome. Positive results accumulate (bytes transferred from parallel
/// sub-reads/writes); the first negative, non-[`ALREADY_EXISTS`] result wins the error
/// tie-break and overrides the accumulated total. The last sub-operation to report
/// finalizes the outcome and notifies every consumer: the user callback, the session's
/// event channel, and any thread blocked in [`wait_for_complete()`][Self::wait_for_complete].
///
/// # Usage
///
/// ```
/// use std::sync::Arc;
///
/// use fanin::testing::ManualExecutor;
/// use fanin::{Completion, RequestKind, Session};
///
/// let executor = Arc::new(ManualExecutor::new());
/// let session = Session::builder(executor).build();
///
/// let completion = Completion::new();
/// completion.associate(Arc::clone(&session), RequestKind::Write);
/// completion.start_op();
/// completion.declare_subops(2);
///
/// completion.report_subop(512);
/// completion.report_subop(512);
///
/// completion.wait_for_complete();
/// assert_eq!(completion.result(), 1024);
/// ```
///
/// # Ownership
///
/// Completions are shared via [`Arc`]: the original requester and every in-flight
/// sub-operation reporter each hold a clone, and the record is destroyed when the last
/// clone drops. Reporting more results than were declared is a contract violation and
/// panics.
///
/// # Thread safety
///
/// This type is thread-safe. Sub-operations may report from any thread; the atomic
/// pending-count decrement guarantees a unique last reporter, which is the only thread
/// that ever runs the completion pipeline.
pub struct Completion {
    state: AtomicU8,
    // Guards only the waiter handshake, never callback invocation or teardown.
    state_lock: Mutex<()>,
    state_changed: Condvar,

    pending_count: AtomicU32,
    rval: AtomicI64,
    // First-error-wins slot; set at most once via compare-exchange from zero.
    error_rval: AtomicI64,

    assoc: Mutex<Option<Assoc>>,
    async_op: Mutex<Option<InFlightGuard>>,
    callback: Mutex<Option<Callback>>,
    read_assembler: Mutex<Option<Box<dyn ReadAssembler>>>,
    event_notify: AtomicBool,

    // Lets the zero-sub-operation deferred task and the event channel enqueue reach
    // the record without the caller threading an Arc through.
    weak_self: Weak<Completion>,
}

impl Completion {
    /// Creates a completion with no user callback.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    /// Creates a completion whose callback is invoked exactly once, after any required
    /// session teardown and before event-channel notification.
    #[must_use]
    pub fn with_callback<F>(callback: F) -> Arc<Self>
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        Self::build(Some(Box::new(callback)))
    }

    fn build(callback: Option<Callback>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            state: AtomicU8::new(State::Pending as u8),
            state_lock: Mutex::new(()),
            state_changed: Condvar::new(),
            pending_count: AtomicU32::new(0),
            rval: AtomicI64::new(0),
            error_rval: AtomicI64::new(0),
            assoc: Mutex::new(None),
            async_op: Mutex::new(None),
            callback: Mutex::new(callback),
            read_assembler: Mutex::new(None),
            event_notify: AtomicBool::new(false),
            weak_self: weak.clone(),
        })
    }

    /// Associates the completion with a session and request kind and records the
    /// request start time.
    ///
    /// The first caller wins; subsequent calls are no-ops, which makes retried code
    /// paths safe against duplicate association.
    pub fn associate(&self, session: Arc<Session>, kind: RequestKind) {
        let mut assoc = self.assoc.lock();
        if assoc.is_none() {
            *assoc = Some(Assoc {
                session: Some(session),
                kind,
                started_at: Instant::now(),
            });
        }
    }

    /// Registers the request with the session's in-flight-operation tracker.
    ///
    /// Open and close requests are not registered; they are what create and destroy the
    /// session, so the tracker cannot gate them.
    ///
    /// # Panics
    ///
    /// Panics if the completion is not associated or the request was already started.
    pub fn start_op(&self) {
        let assoc = self.assoc.lock();
        let assoc = assoc.as_ref().expect(ERR_UNASSOCIATED);

        if !assoc.kind.is_tracked() {
            return;
        }

        let session = Arc::clone(assoc.session.as_ref().expect(ERR_UNASSOCIATED));
        let mut async_op = self.async_op.lock();
        assert!(async_op.is_none(), "request already registered with the in-flight tracker");
        *async_op = Some(InFlightGuard::new(session));
    }

    /// Declares how many sub-operations the request fans out into.
    ///
    /// Must be called exactly once per request. A request with zero sub-operations
    /// still completes exactly once; its completion is dispatched through the session's
    /// executor so it never fires inline in the caller's lock/call context.
    ///
    /// # Panics
    ///
    /// Panics if sub-operations are already pending or the completion is not associated.
    pub fn declare_subops(&self, count: u32) {
        let executor = {
            let assoc = self.assoc.lock();
            let assoc = assoc.as_ref().expect(ERR_UNASSOCIATED);
            Arc::clone(assoc.session.as_ref().expect(ERR_UNASSOCIATED).executor())
        };

        let previous = self.pending_count.swap(count.max(1), Ordering::AcqRel);
        assert_eq!(
            previous, 0,
            "sub-operation count declared while sub-operations are already pending"
        );

        event!(Level::TRACE, message = "sub-operations declared", pending = count);
        if count == 0 {
            let this = self.weak_self.upgrade().expect(ERR_RELEASED);
            executor.dispatch(Box::new(move || this.report_subop(0)), 0);
        }
    }

    /// Reports the result of one sub-operation. May be called from any thread.
    ///
    /// A positive `r` accumulates into the request result. A negative `r` other than
    /// [`ALREADY_EXISTS`] competes for the error slot; the first error reported wins and
    /// later errors are dropped. The reporter that retires the last pending
    /// sub-operation finalizes the outcome and runs the completion pipeline.
    ///
    /// # Panics
    ///
    /// Panics if the completion is not associated or more results are reported than
    /// were declared.
    pub fn report_subop(&self, r: i64) {
        assert!(self.assoc.lock().is_some(), "{ERR_UNASSOCIATED}");

        let previous = self.pending_count.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "sub-operation reported but none are pending");
        let remaining = previous - 1;

        if r > 0 {
            self.rval.fetch_add(r, Ordering::AcqRel);
        } else if r != ALREADY_EXISTS {
            // May race with another reporter storing an error code; the first one wins.
            _ = self
                .error_rval
                .compare_exchange(0, r, Ordering::AcqRel, Ordering::Acquire);
        }

        event!(Level::TRACE, message = "sub-operation reported", r, remaining);
        if remaining == 0 {
            self.finalize();
            self.complete();
        }
    }

    /// Fails the whole request without going through the fan-in aggregator.
    ///
    /// Used when no sub-operations were ever dispatched; sets the result to `r` and
    /// completes synchronously.
    ///
    /// # Panics
    ///
    /// Panics if sub-operations are in flight or the completion is not associated.
    pub fn fail(&self, r: i64) {
        event!(Level::ERROR, message = "request failed", r);

        let pending = self.pending_count.load(Ordering::Acquire);
        assert_eq!(pending, 0, "cannot fail a request with sub-operations in flight");

        self.rval.store(r, Ordering::Release);
        self.complete();
    }

    /// Blocks the calling thread until the request reaches its terminal state.
    pub fn wait_for_complete(&self) {
        event!(Level::TRACE, message = "wait enter");
        {
            let mut guard = self.state_lock.lock();
            while self.state() != State::Complete {
                self.state_changed.wait(&mut guard);
            }
        }
        event!(Level::TRACE, message = "wait exit");
    }

    /// Whether completion has begun. True as soon as the callback phase starts, even if
    /// the callback is still executing.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state() != State::Pending
    }

    /// The currently accumulated (or, once completion began, finalized) result.
    #[must_use]
    pub fn result(&self) -> i64 {
        self.rval.load(Ordering::Acquire)
    }

    /// Enables or disables event-channel notification for this request.
    pub fn set_event_notify(&self, enabled: bool) {
        self.event_notify.store(enabled, Ordering::Release);
    }

    /// Attaches the read-payload assembler invoked by finalize for successful read
    /// requests.
    pub fn set_read_assembler(&self, assembler: Box<dyn ReadAssembler>) {
        *self.read_assembler.lock() = Some(assembler);
    }

    /// Resolves the final result: a pending error overrides any partial byte count, and
    /// a successful read request assembles its payload into caller-visible form.
    fn finalize(&self) {
        // No reporter is atomically incrementing rval anymore; the unique zero-crosser
        // is the only thread here.
        let err_r = self.error_rval.load(Ordering::Acquire);
        if err_r < 0 {
            self.rval.store(err_r, Ordering::Release);
        }

        let r = self.rval.load(Ordering::Acquire);
        event!(Level::TRACE, message = "finalized", r);

        let kind = {
            let assoc = self.assoc.lock();
            assoc.as_ref().expect(ERR_UNASSOCIATED).kind
        };
        if r >= 0 && kind == RequestKind::Read {
            if let Some(assembler) = self.read_assembler.lock().as_mut() {
                assembler.assemble();
            }
        }
    }

    /// Runs the completion pipeline, exactly once per request:
    ///
    /// 1. record latency,
    /// 2. destroy the session if this request kind demands it,
    /// 3. invoke the user callback,
    /// 4. push onto the completed-request list and signal the event channel,
    /// 5. broadcast to blocked waiters,
    /// 6. release the in-flight token.
    fn complete(&self) {
        let r = self.rval.load(Ordering::Acquire);

        let (kind, elapsed) = {
            let assoc = self.assoc.lock();
            let assoc = assoc.as_ref().expect(ERR_UNASSOCIATED);
            (assoc.kind, assoc.started_at.elapsed())
        };
        event!(Level::TRACE, message = "complete enter", kind = ?kind, r);

        // For close requests, and for open requests that failed, the completion owns
        // the session; otherwise it borrows it for the notification steps below.
        let teardown =
            kind == RequestKind::Close || (kind == RequestKind::Open && r < 0);
        let mut session = {
            let mut guard = self.assoc.lock();
            let assoc = guard.as_mut().expect(ERR_UNASSOCIATED);
            if teardown {
                assoc.session.take()
            } else {
                assoc.session.clone()
            }
        };

        if let (Some(metric), Some(session)) = (kind.latency_metric(), session.as_ref()) {
            if let Some(sink) = session.latency_sink() {
                sink.record(metric, elapsed);
            }
        }

        if teardown {
            // A failed open leaves no usable session, and a closed session is gone
            // either way: its resources must not outlive the notification that the
            // request finished, so the session is destroyed before the callback runs.
            drop(session.take());
        }

        self.set_state(State::Callback);
        if let Some(callback) = self.callback.lock().take() {
            callback(self);
        }

        if let Some(session) = &session {
            if self.event_notify.load(Ordering::Acquire) {
                if let Some(channel) = session.event_channel() {
                    if channel.is_valid() {
                        // After the callback, so socket-driven consumers never race
                        // ahead of the explicit callback for the same completion.
                        session.push_completed(self.weak_self.upgrade().expect(ERR_RELEASED));
                        if let Err(error) = channel.notify() {
                            event!(
                                Level::ERROR,
                                message = "event channel notification failed",
                                error = %error
                            );
                        }
                    }
                }
            }
        }

        self.set_state(State::Complete);
        {
            let _guard = self.state_lock.lock();
            self.state_changed.notify_all();
        }

        // The session may be torn down concurrently the moment this token releases,
        // so it must stay held across every session access above.
        drop(self.async_op.lock().take());
        event!(Level::TRACE, message = "complete exit");
    }

    fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl Debug for Completion {
    #[cfg_attr(test, mutants::skip)] // There is no API contract this needs to satisfy.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("state", &self.state())
            .field("pending_count", &self.pending_count.load(Ordering::Relaxed))
            .field("rval", &self.rval.load(Ordering::Relaxed))
            .field("error_rval", &self.error_rval.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
