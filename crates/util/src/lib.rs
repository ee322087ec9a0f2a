//! # Utilities.
//!
//! [`SerialQueue`] runs jobs on one background thread, strictly one at a
//! time and in submission order.

type Job = Box<dyn FnOnce() + Send + 'static>;

/// The worker is gone: it was shut down or a job panicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("serial queue is closed")]
pub struct QueueClosed;

#[derive(Debug)]
pub struct SerialQueue {
    sender: Option<crossbeam_channel::Sender<Job>>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl SerialQueue {
    /// Spawns the worker thread under `name`.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` if the thread cannot be spawned.
    pub fn new(name: &str) -> std::io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for job in receiver.iter() {
                    job();
                }

                tracing::debug!("serial queue drained");
            })?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Queues `job` behind every job submitted before it.
    ///
    /// # Errors
    ///
    /// - [`QueueClosed`] if the worker no longer accepts jobs.
    pub fn submit<T, F>(&self, job: F) -> Result<Ticket<T>, QueueClosed>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(QueueClosed)?;
        let (reply, result) = crossbeam_channel::bounded(1);

        sender
            .send(Box::new(move || {
                // The submitter may have stopped waiting.
                let _ = reply.send(job());
            }))
            .map_err(|_| QueueClosed)?;

        Ok(Ticket { result })
    }
}

/// Claim on the result of a submitted job.
#[derive(Debug)]
pub struct Ticket<T> {
    result: crossbeam_channel::Receiver<T>,
}

impl<T> Ticket<T> {
    /// Blocks until the job has run.
    ///
    /// # Errors
    ///
    /// - [`QueueClosed`] if the job panicked or never ran.
    pub fn wait(self) -> Result<T, QueueClosed> {
        self.result.recv().map_err(|_| QueueClosed)
    }

    /// The job's result if it has already run.
    ///
    /// # Errors
    ///
    /// - [`QueueClosed`] if the job panicked or never ran.
    pub fn try_wait(&self) -> Result<Option<T>, QueueClosed> {
        match self.result.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(crossbeam_channel::TryRecvError::Empty) => Ok(None),
            Err(crossbeam_channel::TryRecvError::Disconnected) => Err(QueueClosed),
        }
    }
}

impl Drop for SerialQueue {
    /// Lets queued jobs finish, then joins the worker.
    fn drop(&mut self) {
        self.sender.take();

        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::warn!("serial queue worker panicked");
        }
    }
}
