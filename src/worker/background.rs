use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

/// Fire-and-forget tasks spawned on behalf of already-answered requests.
///
/// Requests never await these. The handles are only kept so a short-lived
/// process can let them finish before exiting.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
  handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundTasks {
  pub fn spawn<Fut>(&self, task: Fut)
  where
    Fut: Future<Output = ()> + Send + 'static,
  {
    let handle = tokio::spawn(task);
    let mut handles = self.handles();
    handles.retain(|h| !h.is_finished());
    handles.push(handle);
  }

  /// Number of tasks that have not finished yet.
  pub fn pending(&self) -> usize {
    self.handles().iter().filter(|h| !h.is_finished()).count()
  }

  /// Wait for every spawned task, including ones spawned while waiting.
  pub async fn drain(&self) {
    loop {
      let pending = std::mem::take(&mut *self.handles());
      if pending.is_empty() {
        break;
      }
      for handle in pending {
        // Task panics are already reported by the runtime
        let _ = handle.await;
      }
    }
  }

  fn handles(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
    self.handles.lock().unwrap_or_else(|e| e.into_inner())
  }
}
