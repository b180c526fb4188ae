// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Multithreaded properties of the fan-in aggregator: one finalization regardless of
//! reporter interleaving, a single winner among concurrent errors, and waiters that
//! never wake early.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use fanin::testing::ManualExecutor;
use fanin::{Completion, RequestKind, Session};

const EIO: i64 = -(libc::EIO as i64);
const ENOSPC: i64 = -(libc::ENOSPC as i64);

fn session() -> Arc<Session> {
    Session::builder(Arc::new(ManualExecutor::new())).build()
}

#[test]
fn completes_exactly_once_across_threads() {
    const REPORTERS: usize = 8;
    const TRIALS: usize = 50;

    for _ in 0..TRIALS {
        let completions = Arc::new(AtomicUsize::new(0));
        let completion = {
            let completions = Arc::clone(&completions);
            Completion::with_callback(move |_| {
                completions.fetch_add(1, Ordering::SeqCst);
            })
        };
        completion.associate(session(), RequestKind::Write);
        completion.declare_subops(REPORTERS as u32);

        let barrier = Arc::new(Barrier::new(REPORTERS));
        let handles: Vec<_> = (0..REPORTERS)
            .map(|_| {
                let completion = Arc::clone(&completion);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    completion.report_subop(0);
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("reporter panicked");
        }

        assert!(completion.is_complete());
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn concurrent_errors_have_a_single_winner() {
    const TRIALS: usize = 200;

    for _ in 0..TRIALS {
        let completion = Completion::new();
        completion.associate(session(), RequestKind::Write);
        completion.declare_subops(2);

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [EIO, ENOSPC]
            .into_iter()
            .map(|code| {
                let completion = Arc::clone(&completion);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    completion.report_subop(code);
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("reporter panicked");
        }

        let result = completion.result();
        assert!(
            result == EIO || result == ENOSPC,
            "final error {result} is neither of the reported codes"
        );
    }
}

#[test]
fn waiter_wakes_only_after_last_report() {
    const REPORTS: u32 = 4;

    let completion = Completion::new();
    completion.associate(session(), RequestKind::Write);
    completion.declare_subops(REPORTS);

    let waiter = {
        let completion = Arc::clone(&completion);
        thread::spawn(move || {
            completion.wait_for_complete();
            // A wakeup is only legitimate once the terminal state is reached.
            assert!(completion.is_complete());
            completion.result()
        })
    };

    for _ in 0..REPORTS {
        thread::sleep(Duration::from_millis(5));
        completion.report_subop(100);
    }

    assert_eq!(waiter.join().expect("waiter panicked"), i64::from(REPORTS) * 100);
}

#[test]
fn wait_after_completion_returns_immediately() {
    let completion = Completion::new();
    completion.associate(session(), RequestKind::Write);
    completion.declare_subops(1);
    completion.report_subop(42);

    completion.wait_for_complete();
    completion.wait_for_complete();
    assert_eq!(completion.result(), 42);
}
