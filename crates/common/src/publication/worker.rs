//! In-process article worker pool
//!
//! A bounded channel in front of `pool_size` workers. Each task runs in
//! its own spawned future so a panicking task takes down nothing but
//! itself.

use super::{ArticlePublishTask, ArticlePublisher, ArticleTaskDispatcher};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub struct LocalWorkerPool {
    sender: Mutex<Option<mpsc::Sender<ArticlePublishTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalWorkerPool {
    /// Spawn the workers; must be called inside a tokio runtime
    pub fn start(publisher: Arc<ArticlePublisher>, pool_size: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<ArticlePublishTask>(capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = (0..pool_size.max(1))
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let publisher = Arc::clone(&publisher);
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(task) = next else {
                            break;
                        };

                        let publisher = Arc::clone(&publisher);
                        let proc_id = task.article_proc_id;
                        let handle = tokio::spawn(async move { publisher.run(&task).await });
                        match handle.await {
                            Ok(outcome) => debug!(worker_id, %proc_id, ?outcome, "Article task finished"),
                            Err(err) => error!(worker_id, %proc_id, error = %err, "Article task aborted"),
                        }
                    }
                    debug!(worker_id, "Worker stopped");
                })
            })
            .collect();

        info!(pool_size = pool_size.max(1), capacity = capacity.max(1), "Article worker pool started");
        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    /// Stop accepting tasks and wait for the queued ones to finish
    pub async fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => Vec::new(),
        };
        for worker in workers {
            if let Err(err) = worker.await {
                error!(error = %err, "Worker terminated abnormally");
            }
        }
        info!("Article worker pool drained");
    }
}

#[async_trait]
impl ArticleTaskDispatcher for LocalWorkerPool {
    async fn dispatch(&self, task: ArticlePublishTask) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .ok()
            .and_then(|s| s.clone())
            .ok_or_else(|| AppError::QueueError {
                message: "worker pool is shut down".to_string(),
            })?;
        sender.send(task).await.map_err(|e| AppError::QueueError {
            message: format!("worker pool closed: {}", e),
        })
    }
}
