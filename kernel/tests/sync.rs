// Copyright 2023 The Lantern Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! End-to-end tests of semaphores and condition variables: waiter
//! ordering by priority, broadcast, and a monitor in actual use.

use kernel::process;
use kernel::sync::{Condvar, Lock, Semaphore};
use kernel::thread;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Semaphore wakeups go to the highest-priority waiter,
/// not the first-come one: A(20), B(35), C(15) block in
/// that order but run B, A, C.
///
#[test]
fn semaphore_wakes_by_priority() {
    kernel::run(&[], || {
        let sema = Arc::new(Semaphore::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));

        // From the bottom of the priority range, each
        // creation immediately runs the new thread up to
        // its down(), so the waiters queue in A, B, C
        // order.
        thread::set_priority(thread::PRI_MIN);

        let mut waiters = Vec::new();
        for (tag, priority) in [("a", 20), ("b", 35), ("c", 15)] {
            let gate = sema.clone();
            let recorder = order.clone();
            let id = thread::create(tag, priority, move || {
                gate.down();
                recorder.lock().unwrap().push(tag);
            })
            .expect("out of memory");
            waiters.push(id);
        }

        thread::set_priority(thread::PRI_DEFAULT);

        sema.up();
        sema.up();
        sema.up();

        for id in waiters {
            process::wait(id);
        }

        assert_eq!(*order.lock().unwrap(), ["b", "a", "c"]);
    });
}

/// Condition-variable signals also pick the
/// highest-priority waiter, re-evaluated at signal time.
///
#[test]
fn condvar_signals_by_priority() {
    kernel::run(&[], || {
        let lock = Arc::new(Lock::new());
        let cond = Arc::new(Condvar::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        thread::set_priority(thread::PRI_MIN);

        let mut waiters = Vec::new();
        for (tag, priority) in [("mid", 20), ("top", 35), ("low", 15)] {
            let (mutex, signal, recorder) = (lock.clone(), cond.clone(), order.clone());
            let id = thread::create(tag, priority, move || {
                mutex.acquire();
                signal.wait(&mutex);
                recorder.lock().unwrap().push(tag);
                mutex.release();
            })
            .expect("out of memory");
            waiters.push(id);
        }

        thread::set_priority(thread::PRI_DEFAULT);

        lock.acquire();
        cond.signal(&lock);
        cond.signal(&lock);
        cond.signal(&lock);
        lock.release();

        for id in waiters {
            process::wait(id);
        }

        assert_eq!(*order.lock().unwrap(), ["top", "mid", "low"]);
    });
}

/// Broadcast releases every waiter at once.
///
#[test]
fn condvar_broadcast_wakes_everyone() {
    kernel::run(&[], || {
        let lock = Arc::new(Lock::new());
        let cond = Arc::new(Condvar::new());
        let woken = Arc::new(Mutex::new(0));

        thread::set_priority(thread::PRI_MIN);

        let mut waiters = Vec::new();
        for _ in 0..5 {
            let (mutex, signal, counter) = (lock.clone(), cond.clone(), woken.clone());
            let id = thread::create("waiter", 20, move || {
                mutex.acquire();
                signal.wait(&mutex);
                *counter.lock().unwrap() += 1;
                mutex.release();
            })
            .expect("out of memory");
            waiters.push(id);
        }

        thread::set_priority(thread::PRI_DEFAULT);

        lock.acquire();
        cond.broadcast(&lock);
        lock.release();

        for id in waiters {
            process::wait(id);
        }

        assert_eq!(*woken.lock().unwrap(), 5);
    });
}

/// A bounded queue built from one lock and two condition
/// variables moves every item intact: the monitor pattern
/// the primitives exist for.
///
#[test]
fn bounded_queue_monitor() {
    const ITEMS: u64 = 50;
    const CAPACITY: usize = 4;

    struct Queue {
        lock: Lock,
        not_empty: Condvar,
        not_full: Condvar,
        items: Mutex<VecDeque<u64>>,
    }

    kernel::run(&[], || {
        let queue = Arc::new(Queue {
            lock: Lock::new(),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            items: Mutex::new(VecDeque::new()),
        });
        let received = Arc::new(Mutex::new(Vec::new()));

        let q = queue.clone();
        let producer = thread::create("producer", 40, move || {
            for item in 0..ITEMS {
                q.lock.acquire();
                while q.items.lock().unwrap().len() == CAPACITY {
                    q.not_full.wait(&q.lock);
                }
                q.items.lock().unwrap().push_back(item);
                q.not_empty.signal(&q.lock);
                q.lock.release();
            }
        })
        .expect("out of memory");

        let (q, sink) = (queue.clone(), received.clone());
        let consumer = thread::create("consumer", 40, move || {
            for _ in 0..ITEMS {
                q.lock.acquire();
                loop {
                    let item = q.items.lock().unwrap().pop_front();
                    match item {
                        Some(item) => break sink.lock().unwrap().push(item),
                        None => q.not_empty.wait(&q.lock),
                    }
                }
                q.not_full.signal(&q.lock);
                q.lock.release();
            }
        })
        .expect("out of memory");

        process::wait(producer);
        process::wait(consumer);

        let received = received.lock().unwrap();
        assert_eq!(received.len(), ITEMS as usize);
        assert!(received.windows(2).all(|w| w[0] < w[1]));
    });
}
