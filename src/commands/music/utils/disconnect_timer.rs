//! Single-slot idle timer: arming it always cancels whatever was armed before.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Owns at most one pending idle action.
///
/// Every `arm` or `cancel` bumps the generation, so an action that already fired and is
/// waiting to be handled can be recognised as stale by comparing generations.
#[derive(Default)]
pub struct DisconnectTimer {
    task: Option<JoinHandle<()>>,
    generation: u64,
}

impl DisconnectTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels any armed timer and schedules `action` to run once `window` has elapsed.
    /// Returns the generation of the new timer.
    pub fn arm<F, Fut>(&mut self, window: Duration, action: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let generation = self.generation;
        debug!("Arming idle timer #{} for {:?}", generation, window);

        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            action(generation).await;
        }));

        generation
    }

    /// Disarms the pending timer, if any.
    pub fn cancel(&mut self) {
        self.generation += 1;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// True while `generation` names the most recently armed, uncancelled timer.
    pub fn is_current(&self, generation: u64) -> bool {
        self.task.is_some() && self.generation == generation
    }

    /// Forgets the pending timer after it has been handled.
    pub fn clear(&mut self) {
        self.task = None;
    }
}

impl Drop for DisconnectTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
