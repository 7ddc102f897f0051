use std::thread;

use log::debug;
use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot};

use crate::error::{StoreError, StoreResult};

type Job = Box<dyn FnOnce(&mut Connection) + Send>;

/// Owns the write connection on a dedicated thread and runs jobs on it
/// strictly in submission order.
pub(crate) struct StoreWriter {
    jobs: Option<mpsc::UnboundedSender<Job>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl StoreWriter {
    pub(crate) fn spawn(conn: Connection) -> StoreResult<Self> {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        let thread = thread::Builder::new()
            .name("ringsync-store-writer".into())
            .spawn(move || {
                let mut conn = conn;
                while let Some(job) = rx.blocking_recv() {
                    job(&mut conn);
                }
                debug!("Store writer stopped");
            })?;

        Ok(Self {
            jobs: Some(jobs),
            thread: Some(thread),
        })
    }

    /// Queue `f` behind every previously submitted job and wait for it.
    pub(crate) async fn run<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, result) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            let _ = reply.send(f(conn));
        });
        self.jobs
            .as_ref()
            .ok_or(StoreError::WriterClosed)?
            .send(job)
            .map_err(|_| StoreError::WriterClosed)?;
        result.await.map_err(|_| StoreError::WriterClosed)?
    }
}

impl Drop for StoreWriter {
    fn drop(&mut self) {
        // Closing the queue lets the thread finish what is already queued.
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
