// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Aggregates the results of concurrently executing sub-operations of one logical
//! block-storage I/O request into a single caller-visible outcome.
//!
//! This crate provides [`Completion`], the fan-in point of a block-storage client
//! library. A logical request (a striped write, say) fans out into several backend
//! sub-operations that finish on arbitrary threads; the completion counts them back in,
//! merges their partial results, resolves concurrent errors deterministically, and
//! notifies every consumer exactly once.
//!
//! # What it guarantees
//!
//! * **Fan-in**: after the declared number of sub-operations report, finalization runs
//!   exactly once, on whichever thread retired the last one - never earlier, never twice.
//! * **First error wins**: concurrent error reports race for a single atomic slot; the
//!   winner becomes the request's result, overriding any accumulated byte count. The
//!   [`ALREADY_EXISTS`] sentinel is a no-op contribution, not an error.
//! * **Ordered notification**: session teardown (for close requests and failed opens)
//!   happens before the user callback; the callback happens before the event-channel
//!   signal; blocked [`wait_for_complete()`][Completion::wait_for_complete] callers wake
//!   strictly after the terminal state is reached; the in-flight-operation token is
//!   released last of all.
//!
//! # Collaborators
//!
//! The completion operates against a [`Session`] that carries its surroundings: an
//! [`Executor`] for deferred dispatch, an optional [`LatencySink`] for per-kind request
//! latency, an optional [`EventChannel`] for socket-driven consumers, and the
//! in-flight-operation tracker that gates session teardown. Request construction,
//! striping and retry policy live elsewhere; sub-operations simply call
//! [`report_subop()`][Completion::report_subop] when they finish.

mod completion;
mod executor;
mod latency;
mod read_result;
mod request_kind;
mod session;
pub mod testing;

pub use completion::*;
pub use executor::*;
pub use latency::*;
pub use read_result::*;
pub use request_kind::*;
pub use session::*;
