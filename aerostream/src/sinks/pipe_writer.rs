//! Bounded drop-oldest buffer in front of a child process's stdin pipe.
//!
//! `FrameSink::write_frame` is called synchronously from the async output
//! stage (`pipeline.rs`); writing straight to a subprocess's stdin would
//! block that task's worker thread whenever the encoder falls behind. This
//! instead hands frames to a dedicated OS thread through a small bounded
//! queue that evicts the oldest buffered frame on overflow, matching the
//! encoder back-pressure policy (drop-oldest, never block the stage).

use std::collections::VecDeque;
use std::io::Write;
use std::process::ChildStdin;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tracing::trace;

/// Frames buffered before the writer thread falls behind enough to start
/// dropping. Small on purpose: a stalled encoder should shed frames within
/// a fraction of a second, not build up seconds of backlog.
const QUEUE_CAPACITY: usize = 4;

struct State {
    queue: VecDeque<Vec<u8>>,
    stop: bool,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
}

pub struct PipeWriter {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl PipeWriter {
    pub fn new(mut stdin: ChildStdin, label: &'static str) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State { queue: VecDeque::new(), stop: false }),
            cond: Condvar::new(),
        });

        let worker = shared.clone();
        let thread = std::thread::spawn(move || loop {
            let data = {
                let mut guard = worker.state.lock().unwrap();
                loop {
                    if let Some(item) = guard.queue.pop_front() {
                        break Some(item);
                    }
                    if guard.stop {
                        break None;
                    }
                    guard = worker.cond.wait(guard).unwrap();
                }
            };
            match data {
                Some(bytes) => {
                    if let Err(e) = stdin.write_all(&bytes) {
                        trace!("{label}: pipe write failed, stopping writer: {e}");
                        break;
                    }
                }
                None => break,
            }
        });

        Self { shared, thread: Some(thread) }
    }

    /// Enqueue a frame, evicting the oldest queued frame first if full.
    /// Never blocks on the encoder.
    pub fn push(&self, data: Vec<u8>) {
        let mut guard = self.shared.state.lock().unwrap();
        if guard.queue.len() >= QUEUE_CAPACITY {
            guard.queue.pop_front();
        }
        guard.queue.push_back(data);
        drop(guard);
        self.shared.cond.notify_one();
    }

    /// Signal the writer thread to drain whatever is queued and exit, then
    /// join it so `stdin` is fully flushed before the caller closes it.
    pub fn close(mut self) {
        self.shared.state.lock().unwrap().stop = true;
        self.shared.cond.notify_one();
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}
