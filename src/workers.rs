//! One queue and worker task per channel.
//!
//! Jobs for the same channel run strictly in arrival order; jobs for
//! different channels run concurrently, so a slow publish in one channel
//! never holds up another.

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

type Runner<J> = Arc<dyn Fn(J) -> BoxFuture<'static, ()> + Send + Sync>;

pub struct ChannelWorkers<J> {
    run: Runner<J>,
    queues: HashMap<String, mpsc::UnboundedSender<J>>,
}

impl<J: Send + 'static> ChannelWorkers<J> {
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(J) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        ChannelWorkers {
            run: Arc::new(run),
            queues: HashMap::new(),
        }
    }

    /// Queue `job` behind earlier jobs for `key`, starting a worker for the
    /// key on first use.
    pub fn submit(&mut self, key: String, job: J) {
        let job = match self.queues.get(&key) {
            Some(queue) => match queue.send(job) {
                Ok(()) => return,
                // worker gone; start a fresh one below
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        debug!("Starting worker for channel {}", key);
        let (tx, mut rx) = mpsc::unbounded_channel::<J>();
        let run = Arc::clone(&self.run);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                run(job).await;
            }
        });
        // the receiver was just moved into a live task
        let _ = tx.send(job);
        self.queues.insert(key, tx);
    }
}
