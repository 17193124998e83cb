//! Serialized task executor.
//!
//! All user-visible operations funnel through one worker thread, so at
//! most one runs at a time and submission order is execution order.
//! Until the datastore is loaded, tasks wait in a holding buffer; the
//! load itself bypasses the buffer, and draining it afterwards replays
//! the held tasks in their original order.

use parking_lot::Mutex;
use std::sync::mpsc::{channel, Sender};
use std::thread::JoinHandle;

/// A queued unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Task),
    Shutdown,
}

struct ExecutorState {
    ready: bool,
    buffer: Vec<Task>,
    sender: Sender<Message>,
}

/// FIFO queue with concurrency 1.
pub struct Executor {
    state: Mutex<ExecutorState>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Executor {
    /// Creates the executor and spawns its worker thread.
    ///
    /// In-memory datastores start ready; persistent ones buffer tasks
    /// until the load completes.
    pub fn new(ready: bool) -> Self {
        let (sender, receiver) = channel::<Message>();
        let worker = std::thread::Builder::new()
            .name("foliodb-executor".to_string())
            .spawn(move || {
                while let Ok(message) = receiver.recv() {
                    match message {
                        Message::Run(task) => {
                            // A panicking task must not take the queue down
                            let result = std::panic::catch_unwind(
                                std::panic::AssertUnwindSafe(task),
                            );
                            if result.is_err() {
                                tracing::warn!("executor task panicked");
                            }
                        }
                        Message::Shutdown => break,
                    }
                }
            })
            .ok();

        Self {
            state: Mutex::new(ExecutorState {
                ready,
                buffer: Vec::new(),
                sender,
            }),
            worker: Mutex::new(worker),
        }
    }

    /// Queues a task, or buffers it while the datastore is not ready.
    pub fn push(&self, task: Task) {
        let mut state = self.state.lock();
        if state.ready {
            let _ = state.sender.send(Message::Run(task));
        } else {
            state.buffer.push(task);
        }
    }

    /// Queues a task regardless of readiness. Used by the load itself.
    pub fn push_force(&self, task: Task) {
        let state = self.state.lock();
        let _ = state.sender.send(Message::Run(task));
    }

    /// Marks the executor ready and replays buffered tasks in order.
    pub fn process_buffer(&self) {
        let mut state = self.state.lock();
        for task in state.buffer.drain(..).collect::<Vec<_>>() {
            let _ = state.sender.send(Message::Run(task));
        }
        state.ready = true;
    }

    /// Whether tasks currently run straight through.
    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        {
            let state = self.state.lock();
            let _ = state.sender.send(Message::Shutdown);
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}
