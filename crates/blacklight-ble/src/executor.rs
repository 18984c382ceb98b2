//! C5: a hand-rolled, single-threaded cooperative job queue.
//!
//! Deliberately not built on an async runtime: the handshake's async
//! continuation chain is itself one of the things under test (strict FIFO,
//! an explicit "expect more work" gate), so the scheduler needs to be a
//! small, directly observable state machine rather than hidden inside a
//! runtime's task scheduler.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct State {
    queue: VecDeque<Job>,
    expect_work: bool,
}

pub struct Executor {
    state: Mutex<State>,
    condvar: Condvar,
}

impl Executor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                expect_work: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Appends `job` to the FIFO and wakes one waiter.
    pub fn queue_job<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock().unwrap();
        state.queue.push_back(Box::new(job));
        self.condvar.notify_one();
    }

    /// Raises the sticky "expect more work" flag, keeping `run`/`run_one`
    /// waiting even while the queue is momentarily empty.
    pub fn notify_expect_work(&self) {
        let mut state = self.state.lock().unwrap();
        state.expect_work = true;
    }

    /// Clears the "expect more work" flag and wakes every waiter so an
    /// idle `run` can observe the drained queue and return.
    pub fn notify_finished_work(&self) {
        let mut state = self.state.lock().unwrap();
        state.expect_work = false;
        self.condvar.notify_all();
    }

    /// Runs jobs until the queue is empty and `expect_work` is false.
    pub fn run(&self) {
        loop {
            match self.wait_for_next_job() {
                Some(job) => job(),
                None => return,
            }
        }
    }

    /// Runs exactly one job, waiting for it if necessary; returns
    /// immediately if the queue is empty and nothing more is expected.
    pub fn run_one(&self) {
        if let Some(job) = self.wait_for_next_job() {
            job();
        }
    }

    /// Clears `expect_work` and wakes every waiter, allowing `run` to
    /// return once the queue drains. In-flight jobs are not preempted.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.expect_work = false;
        self.condvar.notify_all();
    }

    pub fn is_idle(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.queue.is_empty() && !state.expect_work
    }

    fn wait_for_next_job(&self) -> Option<Job> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(job) = state.queue.pop_front() {
                return Some(job);
            }
            if !state.expect_work {
                return None;
            }
            state = self.condvar.wait(state).unwrap();
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}
