//! Detached background tasks.
//!
//! Work that must not hold up a response (cache revalidation) is spawned
//! here instead of being awaited. Each task reports its failure to the
//! queue's logging sink; nothing is ever surfaced to the original caller.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Default)]
struct Counters {
  spawned: AtomicUsize,
  failed: AtomicUsize,
}

/// Queue of detached tasks running on the tokio runtime.
#[derive(Clone, Default)]
pub struct TaskQueue {
  handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
  counters: Arc<Counters>,
}

impl TaskQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Spawn `task` without waiting for it.
  pub fn spawn<F, E>(&self, label: impl Into<String>, task: F)
  where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
  {
    let label = label.into();
    let counters = Arc::clone(&self.counters);
    counters.spawned.fetch_add(1, Ordering::SeqCst);

    let handle = tokio::spawn(async move {
      match task.await {
        Ok(()) => debug!(task = %label, "Background task finished"),
        Err(e) => {
          counters.failed.fetch_add(1, Ordering::SeqCst);
          warn!(task = %label, error = %e, "Background task failed");
        }
      }
    });

    if let Ok(mut handles) = self.handles.lock() {
      handles.retain(|h| !h.is_finished());
      handles.push(handle);
    }
  }

  /// Wait until every task spawned so far (and any they spawned) is done.
  pub async fn idle(&self) {
    loop {
      let pending: Vec<JoinHandle<()>> = match self.handles.lock() {
        Ok(mut handles) => handles.drain(..).collect(),
        Err(_) => return,
      };
      if pending.is_empty() {
        return;
      }
      for handle in pending {
        if let Err(e) = handle.await {
          warn!(error = %e, "Background task panicked or was cancelled");
        }
      }
    }
  }

  /// Number of tasks spawned over the queue's lifetime.
  pub fn spawned(&self) -> usize {
    self.counters.spawned.load(Ordering::SeqCst)
  }

  /// Number of tasks that finished with an error.
  pub fn failed(&self) -> usize {
    self.counters.failed.load(Ordering::SeqCst)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_failures_are_counted_not_raised() {
    let queue = TaskQueue::new();
    queue.spawn("ok", async { Ok::<(), String>(()) });
    queue.spawn("broken", async { Err::<(), String>("boom".into()) });

    queue.idle().await;

    assert_eq!(queue.spawned(), 2);
    assert_eq!(queue.failed(), 1);
  }

  #[tokio::test]
  async fn test_idle_waits_for_slow_tasks() {
    let queue = TaskQueue::new();
    let done = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&done);

    queue.spawn("slow", async move {
      tokio::time::sleep(std::time::Duration::from_millis(20)).await;
      flag.store(1, Ordering::SeqCst);
      Ok::<(), String>(())
    });

    queue.idle().await;
    assert_eq!(done.load(Ordering::SeqCst), 1);
  }
}
