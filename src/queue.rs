//! C6 RequestQueue: per-host FIFO serialization of blocking operations
//! (metrics probes) so a single remote is never flooded with concurrent
//! collection attempts. New code in the teacher's tokio idiom — the
//! teacher carries no equivalent; this is `tokio::sync::Mutex`-guarded
//! per-host `VecDeque<BoxFuture>` draining, the natural tokio-native
//! expression of the per-host single-flight queue.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send>>;

struct HostQueue {
    pending: VecDeque<BoxedTask>,
    draining: bool,
}

/// Per-host FIFO queue. `enqueue` runs its thunk only after every
/// previously enqueued thunk for that host has settled; a drained queue
/// releases its processing flag and a later enqueue restarts draining.
/// No fairness is required across hosts.
pub struct RequestQueue {
    hosts: Mutex<HashMap<String, HostQueue>>,
}

impl RequestQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { hosts: Mutex::new(HashMap::new()) })
    }

    /// Enqueue `task` for `host_id`. Returns a future that resolves with
    /// the task's result once it has run.
    pub async fn enqueue<F, T>(self: &Arc<Self>, host_id: &str, task: F) -> T
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let boxed: BoxedTask = Box::pin(async move {
            let result = task.await;
            let _ = tx.send(result);
        });

        let mut should_drain = false;
        {
            let mut hosts = self.hosts.lock().await;
            let queue = hosts.entry(host_id.to_string()).or_insert_with(|| HostQueue {
                pending: VecDeque::new(),
                draining: false,
            });
            queue.pending.push_back(boxed);
            if !queue.draining {
                queue.draining = true;
                should_drain = true;
            }
        }

        if should_drain {
            let this = self.clone();
            let host_id = host_id.to_string();
            tokio::spawn(async move { this.drain(host_id).await });
        }

        rx.await.expect("enqueued task always completes and sends its result")
    }

    async fn drain(self: Arc<Self>, host_id: String) {
        loop {
            let next = {
                let mut hosts = self.hosts.lock().await;
                match hosts.get_mut(&host_id) {
                    Some(queue) => match queue.pending.pop_front() {
                        Some(task) => Some(task),
                        None => {
                            queue.draining = false;
                            if queue.pending.is_empty() {
                                hosts.remove(&host_id);
                            }
                            None
                        }
                    },
                    None => None,
                }
            };

            match next {
                Some(task) => task.await,
                None => break,
            }
        }
    }

    #[cfg(test)]
    pub async fn in_flight(&self, host_id: &str) -> usize {
        self.hosts.lock().await.get(host_id).map(|q| q.pending.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_enqueue_serializes_per_host() {
        let queue = RequestQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let queue = queue.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue("host-1", async move {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        order.lock().await.push(i);
                    })
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let recorded = order.lock().await;
        assert_eq!(recorded.len(), 5);
    }

    #[tokio::test]
    async fn test_different_hosts_run_concurrently() {
        let queue = RequestQueue::new();
        let counter = Arc::new(AtomicU32::new(0));
        let max_concurrent = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for host in ["a", "b", "c"] {
            let queue = queue.clone();
            let counter = counter.clone();
            let max_concurrent = max_concurrent.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue(host, async move {
                        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        max_concurrent.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        counter.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert!(max_concurrent.load(Ordering::SeqCst) > 1);
    }
}
