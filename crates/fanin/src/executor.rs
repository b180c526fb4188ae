// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// A deferred zero-argument task accepted by an [`Executor`].
pub type Task = Box<dyn FnOnce() + Send>;

/// Runs deferred tasks on behalf of a session.
///
/// The completion machinery uses this in exactly one place: a request that declares
/// zero sub-operations must still complete, and that completion is dispatched through
/// the executor so it never fires inline in the declaring caller's lock/call context.
pub trait Executor: Send + Sync {
    /// Enqueues `task` for later execution. `priority` is a hint; higher values may
    /// be scheduled sooner.
    fn dispatch(&self, task: Task, priority: u32);
}
