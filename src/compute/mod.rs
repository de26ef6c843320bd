//! In-order asynchronous compute queue
//!
//! A dedicated worker thread owns a workspace `W` and runs submitted kernels
//! against it in submission order. [`ComputeQueue::submit`] never blocks the
//! control thread; [`ComputeQueue::fence`] queues a readback and returns a
//! [`Pending`] handle, and only [`Pending::wait`] blocks.
//!
//! A failing kernel poisons the queue: later kernels are skipped and the
//! error is delivered to the next fence, after which the queue is clean again.
//!
//! Dropping a queue closes it, lets the worker drain what was already
//! submitted, and joins the thread, so no queued kernel outlives the buffers
//! it references. Callers must not abandon a step between submission and its
//! fence's `wait`: the kernels would still run, but their results and any
//! fault would be reported to nobody. `Session` enforces this by waiting
//! inside every step.

use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::error::{Result, VargateError};

type Kernel<W> = Box<dyn FnOnce(&mut W) -> Result<()> + Send>;
type Readback<W> = Box<dyn FnOnce(&mut W, Option<VargateError>) + Send>;

enum Command<W> {
    Kernel(Kernel<W>),
    Fence(Readback<W>),
}

/// Completion handle for a fence
#[derive(Debug)]
#[must_use = "a fence's result is only observed through wait()"]
pub struct Pending<T> {
    rx: Receiver<Result<T>>,
}

impl<T> Pending<T> {
    /// Block until every kernel queued before the fence has run, then return
    /// the readback or the first fault since the previous fence
    ///
    /// # Errors
    ///
    /// The fault raised by a queued kernel, or
    /// [`VargateError::ComputeUnavailable`] if the worker is gone.
    pub fn wait(self) -> Result<T> {
        self.rx.recv().map_err(|_| VargateError::ComputeUnavailable {
            reason: "worker exited before signalling the fence".to_string(),
        })?
    }
}

/// Queue of kernels executed in order on a worker-owned workspace
pub struct ComputeQueue<W: Send + 'static> {
    tx: Option<Sender<Command<W>>>,
    worker: Option<JoinHandle<W>>,
}

impl<W: Send + 'static> std::fmt::Debug for ComputeQueue<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeQueue")
            .field("open", &self.tx.is_some())
            .finish()
    }
}

impl<W: Send + 'static> ComputeQueue<W> {
    /// Move `workspace` onto a new worker thread
    ///
    /// # Errors
    ///
    /// [`VargateError::Io`] if the thread cannot be spawned.
    pub fn new(workspace: W) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Command<W>>();
        let worker = thread::Builder::new()
            .name("vargate-compute".to_string())
            .spawn(move || run_worker(workspace, rx))?;
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Queue a kernel without waiting for it
    pub fn submit<F>(&self, kernel: F)
    where
        F: FnOnce(&mut W) -> Result<()> + Send + 'static,
    {
        self.send(Command::Kernel(Box::new(kernel)));
    }

    /// Queue a readback that runs after every previously submitted kernel
    pub fn fence<T, F>(&self, read: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut W) -> Result<T> + Send + 'static,
    {
        let (done, rx): (SyncSender<Result<T>>, _) = mpsc::sync_channel(1);
        self.send(Command::Fence(Box::new(move |workspace, fault| {
            let result = match fault {
                Some(err) => Err(err),
                None => read(workspace),
            };
            // Receiver dropped means nobody waits; the result is discarded
            let _ = done.send(result);
        })));
        Pending { rx }
    }

    /// Queue `op` behind every submitted kernel and run it even if one of
    /// them faulted
    ///
    /// A pending fault is discarded, leaving the queue clean. Meant for
    /// operations that reinitialize the workspace.
    pub fn recover<F>(&self, op: F) -> Pending<()>
    where
        F: FnOnce(&mut W) + Send + 'static,
    {
        let (done, rx): (SyncSender<Result<()>>, _) = mpsc::sync_channel(1);
        self.send(Command::Fence(Box::new(move |workspace, fault| {
            if let Some(err) = fault {
                debug!(%err, "discarding fault before recovery");
            }
            op(workspace);
            let _ = done.send(Ok(()));
        })));
        Pending { rx }
    }

    /// Submit nothing more, drain the queue and return the workspace
    ///
    /// # Errors
    ///
    /// [`VargateError::ComputeUnavailable`] if the worker panicked.
    pub fn shutdown(mut self) -> Result<W> {
        self.tx = None;
        let worker = self.worker.take().ok_or_else(|| VargateError::ComputeUnavailable {
            reason: "queue already shut down".to_string(),
        })?;
        worker.join().map_err(|_| VargateError::ComputeUnavailable {
            reason: "compute worker panicked".to_string(),
        })
    }

    fn send(&self, command: Command<W>) {
        // A dead worker surfaces at the next fence, whose sender is dropped here
        if let Some(tx) = &self.tx {
            if tx.send(command).is_err() {
                warn!("compute worker is gone; dropping submission");
            }
        }
    }
}

impl<W: Send + 'static> Drop for ComputeQueue<W> {
    fn drop(&mut self) {
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("compute worker panicked during teardown");
            }
        }
    }
}

fn run_worker<W>(mut workspace: W, rx: Receiver<Command<W>>) -> W {
    let mut fault: Option<VargateError> = None;
    let mut skipped = 0usize;
    for command in rx {
        match command {
            Command::Kernel(kernel) => {
                if fault.is_some() {
                    skipped += 1;
                    continue;
                }
                if let Err(err) = kernel(&mut workspace) {
                    fault = Some(err);
                }
            },
            Command::Fence(readback) => {
                if skipped > 0 {
                    debug!(skipped, "skipped kernels after fault");
                    skipped = 0;
                }
                readback(&mut workspace, fault.take());
            },
        }
    }
    workspace
}
