//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Mailcore.
//
// Mailcore is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailcore is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailcore. If not, see <http://www.gnu.org/licenses/>.

//! Utilities for working with threads.
//!
//! The only one currently is `WorkQueue`, a small fixed pool of threads fed
//! from bounded queues. It is geared towards keeping failures of individual
//! tasks contained, the backlog observable, and related tasks in order,
//! rather than raw throughput.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use log::{error, warn};

use crate::support::error::Error;

struct Task {
    label: String,
    work: Box<dyn FnOnce() -> Result<(), Error> + Send>,
}

#[derive(Default)]
struct Stats {
    pending: AtomicUsize,
    failures: AtomicU64,
    idle_lock: Mutex<()>,
    idle: Condvar,
}

/// A set of bounded lanes of fallible tasks, each processed by its own
/// worker thread.
///
/// Every task is submitted with a key, and all tasks with the same key go
/// to the same lane. Tasks with the same key therefore run one at a time in
/// submission order; tasks with different keys may run concurrently.
///
/// A task which fails, whether by returning an error or by panicking, is
/// logged and counted; it never affects any other task or the submitter.
///
/// If a lane is full, `submit` blocks until its worker catches up. A task
/// must consequently never wait for anything which is itself waiting to
/// submit to the same queue.
pub struct WorkQueue {
    name: String,
    lanes: RwLock<Option<Vec<Sender<Task>>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    stats: Arc<Stats>,
}

impl WorkQueue {
    /// Start `workers` lanes, each holding up to `capacity` queued tasks.
    pub fn new(name: &str, workers: usize, capacity: usize) -> Self {
        let stats = Arc::new(Stats::default());
        let mut lanes = Vec::new();

        let workers = (0..workers.max(1))
            .map(|ix| {
                let (sender, receiver) =
                    channel::bounded::<Task>(capacity.max(1));
                lanes.push(sender);
                let stats = Arc::clone(&stats);
                thread::Builder::new()
                    .name(format!("{}-{}", name, ix))
                    .spawn(move || run_worker(receiver, stats))
                    .expect("Failed to spawn work queue thread")
            })
            .collect();

        WorkQueue {
            name: name.to_owned(),
            lanes: RwLock::new(Some(lanes)),
            workers: Mutex::new(workers),
            stats,
        }
    }

    /// Schedule `work` to run after everything submitted before it with the
    /// same `key`.
    ///
    /// `label` identifies the task in log messages.
    pub fn submit(
        &self,
        key: u64,
        label: String,
        work: impl FnOnce() -> Result<(), Error> + Send + 'static,
    ) {
        let task = Task {
            label,
            work: Box::new(work),
        };

        self.stats.pending.fetch_add(1, Ordering::SeqCst);
        let lane = self.lanes.read().unwrap().as_ref().map(|lanes| {
            Sender::clone(&lanes[(key % lanes.len() as u64) as usize])
        });

        let task = match lane {
            // The lock is not held here, so a blocked send never holds up
            // shutdown or other lanes.
            Some(lane) => match lane.send(task) {
                Ok(()) => return,
                Err(e) => e.into_inner(),
            },
            None => task,
        };

        warn!(
            "{} queue is shut down, running {} synchronously",
            self.name, task.label
        );
        run_task(task, &self.stats);
    }

    /// The number of tasks submitted but not yet finished.
    pub fn pending(&self) -> usize {
        self.stats.pending.load(Ordering::SeqCst)
    }

    /// The number of tasks which have failed since creation.
    pub fn failures(&self) -> u64 {
        self.stats.failures.load(Ordering::SeqCst)
    }

    /// Block until every task submitted so far has finished.
    pub fn wait_idle(&self) {
        let mut guard = self.stats.idle_lock.lock().unwrap();
        while self.stats.pending.load(Ordering::SeqCst) > 0 {
            guard = self.stats.idle.wait(guard).unwrap();
        }
    }

    /// Finish all queued work and stop the worker threads.
    ///
    /// Anything submitted afterwards runs on the submitting thread.
    pub fn shutdown(&self) {
        // Dropping the senders lets the workers drain their lanes and exit.
        self.lanes.write().unwrap().take();
        let workers = std::mem::replace(
            &mut *self.workers.lock().unwrap(),
            Vec::new(),
        );
        for worker in workers {
            if worker.join().is_err() {
                error!("{} worker thread panicked", self.name);
            }
        }
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(receiver: Receiver<Task>, stats: Arc<Stats>) {
    for task in receiver.iter() {
        run_task(task, &stats);
    }
}

fn run_task(task: Task, stats: &Stats) {
    let Task { label, work } = task;
    let failed = match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(Ok(())) => false,
        Ok(Err(e)) => {
            error!("{} failed: {}", label, e);
            true
        },
        Err(_) => {
            error!("{} panicked", label);
            true
        },
    };

    if failed {
        stats.failures.fetch_add(1, Ordering::SeqCst);
    }

    if 1 == stats.pending.fetch_sub(1, Ordering::SeqCst) {
        let _guard = stats.idle_lock.lock().unwrap();
        stats.idle.notify_all();
    }
}

#[cfg(test)]
mod test {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn runs_all_tasks() {
        let queue = WorkQueue::new("test", 3, 4);
        let count = Arc::new(AtomicUsize::new(0));

        for ix in 0..100 {
            let count = Arc::clone(&count);
            queue.submit(ix, format!("task {}", ix), move || {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        queue.wait_idle();
        assert_eq!(100, count.load(Ordering::SeqCst));
        assert_eq!(0, queue.pending());
        assert_eq!(0, queue.failures());
    }

    #[test]
    fn failures_are_isolated() {
        crate::init_test_log();

        let queue = WorkQueue::new("test", 1, 16);
        let count = Arc::new(AtomicUsize::new(0));

        queue.submit(0, "fails".to_owned(), || {
            Err(Error::TransientStore("index offline".to_owned()))
        });
        queue.submit(0, "panics".to_owned(), || panic!("listener bug"));
        {
            let count = Arc::clone(&count);
            queue.submit(0, "succeeds".to_owned(), move || {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        queue.wait_idle();
        assert_eq!(1, count.load(Ordering::SeqCst));
        assert_eq!(2, queue.failures());
    }

    #[test]
    fn same_key_runs_in_order() {
        let queue = WorkQueue::new("test", 4, 2);
        let log = Arc::new(Mutex::new(Vec::new()));

        for ix in 0..40u64 {
            let log = Arc::clone(&log);
            queue.submit(ix % 3, format!("task {}", ix), move || {
                // Early tasks are the slowest, so any lane-crossing would
                // show up as reordering
                if ix < 3 {
                    thread::sleep(Duration::from_millis(50));
                }
                log.lock().unwrap().push(ix);
                Ok(())
            });
        }
        queue.wait_idle();

        let log = log.lock().unwrap();
        assert_eq!(40, log.len());
        for key in 0..3 {
            let for_key = log
                .iter()
                .copied()
                .filter(|ix| key == ix % 3)
                .collect::<Vec<_>>();
            let mut sorted = for_key.clone();
            sorted.sort();
            assert_eq!(sorted, for_key);
        }
    }

    #[test]
    fn full_lane_blocks_instead_of_reordering() {
        let queue = Arc::new(WorkQueue::new("test", 1, 1));
        let (block_tx, block_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let log = Arc::new(Mutex::new(Vec::new()));

        // Occupy the only worker
        queue.submit(0, "blocker".to_owned(), move || {
            started_tx.send(()).unwrap();
            block_rx.recv().unwrap();
            Ok(())
        });
        started_rx.recv_timeout(Duration::from_secs(10)).unwrap();

        let submitter = {
            let queue = Arc::clone(&queue);
            let log = Arc::clone(&log);
            thread::spawn(move || {
                for ix in 0..3 {
                    let log = Arc::clone(&log);
                    queue.submit(0, format!("task {}", ix), move || {
                        log.lock().unwrap().push((ix, thread::current().id()));
                        Ok(())
                    });
                }
                thread::current().id()
            })
        };

        // The lane holds one task, so the submitter is stuck on the second
        thread::sleep(Duration::from_millis(100));
        assert!(log.lock().unwrap().is_empty());

        block_tx.send(()).unwrap();
        let submitter = submitter.join().unwrap();
        queue.wait_idle();

        let log = log.lock().unwrap();
        assert_eq!(
            vec![0, 1, 2],
            log.iter().map(|&(ix, _)| ix).collect::<Vec<_>>()
        );
        assert!(log.iter().all(|&(_, thread)| thread != submitter));
    }

    #[test]
    fn shutdown_drains_queue() {
        let queue = WorkQueue::new("test", 2, 64);
        let count = Arc::new(AtomicUsize::new(0));
        for ix in 0..32 {
            let count = Arc::clone(&count);
            queue.submit(ix, format!("task {}", ix), move || {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        queue.shutdown();
        assert_eq!(32, count.load(Ordering::SeqCst));

        // Work submitted after shutdown still runs, just synchronously
        let count2 = Arc::clone(&count);
        queue.submit(0, "late".to_owned(), move || {
            count2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(33, count.load(Ordering::SeqCst));
    }
}
