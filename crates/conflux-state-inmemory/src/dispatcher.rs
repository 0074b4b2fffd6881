//! In-memory work dispatcher
//!
//! Work is queued per container and handed out round-robin across
//! containers, FIFO within one. It can be drained inline (tests, tools) or
//! by a background processor task.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use conflux_core::{CoreError, WorkDispatcher, WorkHandler, WorkItem};

#[derive(Debug, Default)]
struct Queues {
    /// Containers with pending work, in service order
    ready: VecDeque<String>,
    per_container: HashMap<String, VecDeque<WorkItem>>,
}

/// Outcome of draining the dispatcher inline
#[derive(Debug, Default)]
pub struct DrainSummary {
    /// Work items handled
    pub processed: usize,
    /// Work items whose handler returned an error
    pub failures: Vec<(WorkItem, CoreError)>,
}

/// Single-writer work queue keyed by container
pub struct InMemoryWorkDispatcher {
    queues: Mutex<Queues>,
    wakeup: Notify,
    processor_started: AtomicBool,
    shutdown: AtomicBool,
    enqueued: AtomicU64,
}

impl InMemoryWorkDispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(Queues::default()),
            wakeup: Notify::new(),
            processor_started: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            enqueued: AtomicU64::new(0),
        }
    }

    /// Take the next work item
    pub async fn pop(&self) -> Option<WorkItem> {
        let mut queues = self.queues.lock().await;
        let container = queues.ready.pop_front()?;
        let queue = queues.per_container.get_mut(&container)?;
        let work = queue.pop_front();
        if queue.is_empty() {
            queues.per_container.remove(&container);
        } else {
            queues.ready.push_back(container);
        }
        work
    }

    /// Work items waiting across all containers
    pub async fn pending(&self) -> usize {
        let queues = self.queues.lock().await;
        queues.per_container.values().map(VecDeque::len).sum()
    }

    /// Work items waiting for one container
    pub async fn pending_for(&self, container_id: &str) -> usize {
        let queues = self.queues.lock().await;
        queues
            .per_container
            .get(container_id)
            .map_or(0, VecDeque::len)
    }

    /// Work items accepted since creation
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::SeqCst)
    }

    /// Handle queued work inline until none is left, including work the
    /// handler enqueues along the way
    pub async fn run_until_idle(&self, handler: &dyn WorkHandler) -> DrainSummary {
        let mut summary = DrainSummary::default();
        while let Some(work) = self.pop().await {
            summary.processed += 1;
            if let Err(e) = handler.handle_work(work.clone()).await {
                debug!(work = ?work, error = %e, "Work item failed");
                summary.failures.push((work, e));
            }
        }
        summary
    }

    /// Start a background task feeding queued work to `handler`.
    ///
    /// Only one processor may run per dispatcher.
    pub fn start_processor(
        self: &Arc<Self>,
        handler: Arc<dyn WorkHandler>,
    ) -> Result<JoinHandle<()>, CoreError> {
        if self.processor_started.swap(true, Ordering::SeqCst) {
            return Err(CoreError::Dispatch("Work processor already started".to_string()));
        }

        let dispatcher = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!("Work processor started");
            loop {
                if dispatcher.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                match dispatcher.pop().await {
                    Some(work) => {
                        if let Err(e) = handler.handle_work(work.clone()).await {
                            error!(work = ?work, error = %e, "Error processing work item");
                        }
                    }
                    None => dispatcher.wakeup.notified().await,
                }
            }
            info!("Work processor stopped");
        });

        Ok(handle)
    }

    /// Ask the background processor to stop after its current item
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wakeup.notify_one();
    }
}

impl Default for InMemoryWorkDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkDispatcher for InMemoryWorkDispatcher {
    async fn enqueue(&self, container_id: &str, work: WorkItem) -> Result<(), CoreError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(CoreError::Dispatch("dispatcher is shut down".to_string()));
        }

        {
            let mut queues = self.queues.lock().await;
            let queue = queues
                .per_container
                .entry(container_id.to_string())
                .or_default();
            let was_idle = queue.is_empty();
            queue.push_back(work);
            if was_idle {
                queues.ready.push_back(container_id.to_string());
            }
        }

        self.enqueued.fetch_add(1, Ordering::SeqCst);
        self.wakeup.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core::{FlowNodeInstanceId, ProcessInstanceId};
    use std::sync::Mutex as StdMutex;

    fn work(flow_node: &str) -> WorkItem {
        WorkItem::ExecuteFlowNode {
            process_instance_id: ProcessInstanceId("p-1".into()),
            flow_node_id: FlowNodeInstanceId(flow_node.into()),
        }
    }

    #[derive(Default)]
    struct Recorder(StdMutex<Vec<String>>);

    #[async_trait]
    impl WorkHandler for Recorder {
        async fn handle_work(&self, work: WorkItem) -> Result<(), CoreError> {
            let id = work.flow_node_id().0.clone();
            self.0.lock().unwrap().push(id.clone());
            if id == "bad" {
                return Err(CoreError::Evaluation("boom".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_fifo_per_container_round_robin_across() {
        let dispatcher = InMemoryWorkDispatcher::new();
        dispatcher.enqueue("a", work("a1")).await.unwrap();
        dispatcher.enqueue("a", work("a2")).await.unwrap();
        dispatcher.enqueue("b", work("b1")).await.unwrap();
        assert_eq!(dispatcher.pending().await, 3);
        assert_eq!(dispatcher.pending_for("a").await, 2);

        let order: Vec<_> = [
            dispatcher.pop().await,
            dispatcher.pop().await,
            dispatcher.pop().await,
            dispatcher.pop().await,
        ]
        .into_iter()
        .map(|w| w.map(|w| w.flow_node_id().0.clone()))
        .collect();

        assert_eq!(
            order,
            vec![Some("a1".into()), Some("b1".into()), Some("a2".into()), None]
        );
    }

    #[tokio::test]
    async fn test_run_until_idle_collects_failures() {
        let dispatcher = InMemoryWorkDispatcher::new();
        dispatcher.enqueue("a", work("ok")).await.unwrap();
        dispatcher.enqueue("a", work("bad")).await.unwrap();

        let recorder = Recorder::default();
        let summary = dispatcher.run_until_idle(&recorder).await;

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(dispatcher.enqueued(), 2);
        assert_eq!(dispatcher.pending().await, 0);
    }

    #[tokio::test]
    async fn test_background_processor() {
        let dispatcher = Arc::new(InMemoryWorkDispatcher::new());
        let recorder = Arc::new(Recorder::default());
        let handle = dispatcher.start_processor(recorder.clone()).unwrap();
        assert!(dispatcher.start_processor(recorder.clone()).is_err());

        dispatcher.enqueue("a", work("one")).await.unwrap();
        dispatcher.enqueue("b", work("two")).await.unwrap();

        for _ in 0..100 {
            if recorder.0.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(recorder.0.lock().unwrap().len(), 2);

        dispatcher.shutdown();
        handle.await.unwrap();
        assert!(dispatcher.enqueue("a", work("late")).await.is_err());
    }
}
