//! Per-session serialization of permission prompts
//!
//! Each session with pending prompts gets one local worker task that runs its
//! jobs strictly in submission order. Workers exit and drop their map entry as
//! soon as their queue is empty, so idle sessions cost nothing.

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;
use tokio::sync::{mpsc, oneshot};

type Job = (LocalBoxFuture<'static, anyhow::Result<()>>, oneshot::Sender<()>);

type Workers = Rc<RefCell<HashMap<String, mpsc::UnboundedSender<Job>>>>;

/// FIFO task queue keyed by session id
///
/// Must be used from within a [`tokio::task::LocalSet`].
#[derive(Clone, Default)]
pub struct PermissionQueue {
    workers: Workers,
}

impl PermissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `task` behind every earlier task for `session_id`
    ///
    /// The returned receiver resolves once the task has run, whether it
    /// succeeded or not. A failing task is logged and never stalls the queue.
    pub fn enqueue<F>(&self, session_id: &str, task: F) -> oneshot::Receiver<()>
    where
        F: Future<Output = anyhow::Result<()>> + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = (task.boxed_local(), done_tx);

        let mut workers = self.workers.borrow_mut();
        let job = match workers.get(session_id) {
            Some(sender) => match sender.send(job) {
                Ok(()) => return done_rx,
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        if sender.send(job).is_err() {
            tracing::error!("Permission worker for {} closed before start", session_id);
            return done_rx;
        }
        workers.insert(session_id.to_string(), sender);
        drop(workers);

        tracing::trace!("Starting permission worker for session {}", session_id);
        tokio::task::spawn_local(run_worker(
            session_id.to_string(),
            receiver,
            self.workers.clone(),
        ));
        done_rx
    }

    /// Number of sessions with a live worker
    pub fn active_sessions(&self) -> usize {
        self.workers.borrow().len()
    }
}

async fn run_worker(
    session_id: String,
    mut receiver: mpsc::UnboundedReceiver<Job>,
    workers: Workers,
) {
    let mut next = receiver.recv().await;
    while let Some((task, done)) = next {
        if let Err(e) = task.await {
            tracing::error!("Permission task for session {} failed: {:#}", session_id, e);
        }
        let _ = done.send(());

        // No await between the emptiness check and the removal, so no job can
        // slip in after the last check on a single-threaded LocalSet.
        next = receiver.try_recv().ok();
    }
    workers.borrow_mut().remove(&session_id);
    tracing::trace!("Permission worker for session {} drained", session_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::task::LocalSet;

    #[tokio::test]
    async fn test_tasks_run_in_submission_order_despite_failures() {
        LocalSet::new()
            .run_until(async {
                let queue = PermissionQueue::new();
                let log = Rc::new(RefCell::new(Vec::new()));

                let mut receivers = Vec::new();
                for i in 0..5 {
                    let log = log.clone();
                    receivers.push(queue.enqueue("ses_a", async move {
                        tokio::task::yield_now().await;
                        log.borrow_mut().push(i);
                        if i == 1 {
                            anyhow::bail!("client went away");
                        }
                        Ok(())
                    }));
                }

                for receiver in receivers {
                    receiver.await.unwrap();
                }
                assert_eq!(*log.borrow(), vec![0, 1, 2, 3, 4]);
            })
            .await;
    }

    #[tokio::test]
    async fn test_slow_session_does_not_block_other_sessions() {
        LocalSet::new()
            .run_until(async {
                let queue = PermissionQueue::new();
                let (release_tx, release_rx) = oneshot::channel::<()>();
                let slow_finished = Rc::new(RefCell::new(false));

                let flag = slow_finished.clone();
                let slow = queue.enqueue("ses_a", async move {
                    let _ = release_rx.await;
                    *flag.borrow_mut() = true;
                    Ok(())
                });
                let fast = queue.enqueue("ses_b", async { Ok(()) });

                tokio::time::timeout(Duration::from_secs(1), fast)
                    .await
                    .expect("session b should not wait for session a")
                    .unwrap();
                assert!(!*slow_finished.borrow());
                assert_eq!(queue.active_sessions(), 1);

                release_tx.send(()).unwrap();
                slow.await.unwrap();
                assert!(*slow_finished.borrow());
            })
            .await;
    }

    #[tokio::test]
    async fn test_worker_entry_removed_once_drained() {
        LocalSet::new()
            .run_until(async {
                let queue = PermissionQueue::new();
                queue.enqueue("ses_a", async { Ok(()) }).await.unwrap();
                tokio::task::yield_now().await;
                assert_eq!(queue.active_sessions(), 0);

                // A fresh worker is started on the next request
                queue.enqueue("ses_a", async { Ok(()) }).await.unwrap();
                tokio::task::yield_now().await;
                assert_eq!(queue.active_sessions(), 0);
            })
            .await;
    }
}
