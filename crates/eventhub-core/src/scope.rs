// Ties spawned requests to the lifetime of whatever started them.

use std::future::Future;

use tokio::task::JoinHandle;

/// Owns a set of background tasks and aborts them when dropped.
///
/// A screen or command spawns its in-flight requests here; leaving it drops
/// the scope and nothing keeps running against state that no longer exists.
#[derive(Default)]
pub struct TaskScope {
    tasks: Vec<JoinHandle<()>>,
}

impl TaskScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&mut self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(tokio::spawn(fut));
    }

    /// Abort every task still running.
    pub fn cancel_all(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// Wait for every task to finish on its own. Pair with a timeout when
    /// a task may never end.
    pub async fn join_all(&mut self) {
        for task in self.tasks.iter_mut() {
            let _ = task.await;
        }
        self.tasks.clear();
    }

    /// Number of tasks that have not finished yet.
    pub fn len(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_finished()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
