use std::collections::HashMap;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct SupervisedTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Task Supervisor - owns named background tasks and stops them cooperatively
///
/// Every task receives its own child of the supervisor's root
/// [`CancellationToken`]. Stopping a task cancels its token and then awaits
/// the handle, so once `stop` returns the task's future has been dropped.
///
/// ```rust,ignore
/// let mut supervisor = TaskSupervisor::new();
/// supervisor.spawn("BTC-USDT:1h", |token| async move {
///     loop {
///         tokio::select! {
///             _ = token.cancelled() => break,
///             _ = tick() => {}
///         }
///     }
/// });
/// supervisor.stop("BTC-USDT:1h").await;
/// ```
pub struct TaskSupervisor {
    root: CancellationToken,
    tasks: HashMap<String, SupervisedTask>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        TaskSupervisor {
            root: CancellationToken::new(),
            tasks: HashMap::new(),
        }
    }

    /// Spawn a task under `name`. Returns false without spawning if a live
    /// task already holds that name.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, make: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        if let Some(existing) = self.tasks.get(&name) {
            if !existing.handle.is_finished() {
                return false;
            }
        }

        let token = self.root.child_token();
        let handle = tokio::spawn(make(token.clone()));

        info!("Spawned background task: {}", name);
        self.tasks.insert(name, SupervisedTask { token, handle });
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }

    /// Get count of tracked tasks
    pub fn active_task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Drop bookkeeping for tasks that ended on their own, returning their names.
    pub fn reap_finished(&mut self) -> Vec<String> {
        let finished: Vec<String> = self
            .tasks
            .iter()
            .filter(|(_, task)| task.handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();

        for name in &finished {
            self.tasks.remove(name);
            warn!("Background task {} terminated", name);
        }
        finished
    }

    /// Cancel one task and wait for it to finish.
    pub async fn stop(&mut self, name: &str) -> bool {
        match self.tasks.remove(name) {
            Some(task) => {
                task.token.cancel();
                if let Err(e) = task.handle.await {
                    if e.is_panic() {
                        warn!("Task {} panicked: {:?}", name, e);
                    }
                }
                info!("Stopped task: {}", name);
                true
            }
            None => false,
        }
    }

    /// Cancel every task and wait for all of them.
    pub async fn shutdown_all(&mut self) {
        info!("Shutting down {} background tasks", self.tasks.len());
        self.root.cancel();

        for (name, task) in self.tasks.drain() {
            if let Err(e) = task.handle.await {
                if e.is_panic() {
                    warn!("Task {} panicked during shutdown: {:?}", name, e);
                }
            }
        }
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_stop_waits_for_cancellation() {
        let mut supervisor = TaskSupervisor::new();
        let exited = Arc::new(AtomicBool::new(false));
        let flag = exited.clone();

        assert!(supervisor.spawn("loop", move |token| async move {
            token.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        }));
        assert!(!supervisor.spawn("loop", |_| async {}));

        assert!(supervisor.stop("loop").await);
        assert!(exited.load(Ordering::SeqCst));
        assert!(!supervisor.stop("loop").await);
        assert_eq!(supervisor.active_task_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_all_cancels_every_task() {
        let mut supervisor = TaskSupervisor::new();
        for name in ["a", "b", "c"] {
            supervisor.spawn(name, |token| async move { token.cancelled().await });
        }
        assert_eq!(supervisor.active_task_count(), 3);

        supervisor.shutdown_all().await;
        assert_eq!(supervisor.active_task_count(), 0);
    }
}
