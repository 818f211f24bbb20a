//! In-process hypervisor that boots nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{oneshot, Notify};
use vpod_core::error::{PodError, Result};
use vpod_core::{HypervisorConfig, PodConfig};

use super::Hypervisor;

/// Hypervisor that records calls and reports a VM as started right away.
///
/// The VM "runs" until [`Hypervisor::stop_pod`] is called.
#[derive(Debug, Default)]
pub struct MockHypervisor {
    calls: Mutex<Vec<String>>,
    fail_on: Option<&'static str>,
    hang_on_start: bool,
    stop: Notify,
    cancelled: AtomicBool,
}

/// Marks a start as cancelled if its future is dropped mid-way.
struct CancelGuard<'a>(&'a AtomicBool);

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl MockHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the call named `step` (`init`, `create_pod`, `start_pod`,
    /// `stop_pod`).
    pub fn failing(step: &'static str) -> Self {
        Self {
            fail_on: Some(step),
            ..Self::default()
        }
    }

    /// Never signal that the VM started.
    pub fn hanging() -> Self {
        Self {
            hang_on_start: true,
            ..Self::default()
        }
    }

    /// Names of the calls received so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Whether a start was abandoned before it completed.
    pub fn start_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn record(&self, step: &'static str) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(step.to_string());
        }
        if self.fail_on == Some(step) {
            return Err(PodError::HypervisorError(format!("mock {} failure", step)));
        }
        Ok(())
    }
}

#[async_trait]
impl Hypervisor for MockHypervisor {
    async fn init(&self, _config: &HypervisorConfig) -> Result<()> {
        self.record("init")
    }

    async fn create_pod(&self, _config: &PodConfig) -> Result<()> {
        self.record("create_pod")
    }

    async fn start_pod(
        &self,
        started: oneshot::Sender<()>,
        stopped: oneshot::Sender<()>,
    ) -> Result<()> {
        self.record("start_pod")?;

        if self.hang_on_start {
            let _guard = CancelGuard(&self.cancelled);
            std::future::pending::<()>().await;
        }

        let _ = started.send(());
        self.stop.notified().await;
        let _ = stopped.send(());
        Ok(())
    }

    async fn stop_pod(&self) -> Result<()> {
        self.record("stop_pod")?;
        self.stop.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_start_then_stop() {
        let hypervisor = Arc::new(MockHypervisor::new());
        let (started_tx, started_rx) = oneshot::channel();
        let (stopped_tx, stopped_rx) = oneshot::channel();

        let task = {
            let hypervisor = Arc::clone(&hypervisor);
            tokio::spawn(async move { hypervisor.start_pod(started_tx, stopped_tx).await })
        };

        started_rx.await.unwrap();
        hypervisor.stop_pod().await.unwrap();
        stopped_rx.await.unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(hypervisor.calls(), vec!["start_pod", "stop_pod"]);
    }

    #[tokio::test]
    async fn test_failing_step() {
        let hypervisor = MockHypervisor::failing("create_pod");
        hypervisor.init(&HypervisorConfig::default()).await.unwrap();
        let err = hypervisor
            .create_pod(&PodConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PodError::HypervisorError(_)));
    }

    #[tokio::test]
    async fn test_hanging_start_is_cancellable() {
        let hypervisor = Arc::new(MockHypervisor::hanging());
        let (started_tx, _started_rx) = oneshot::channel();
        let (stopped_tx, _stopped_rx) = oneshot::channel();

        let task = {
            let hypervisor = Arc::clone(&hypervisor);
            tokio::spawn(async move { hypervisor.start_pod(started_tx, stopped_tx).await })
        };
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(hypervisor.start_cancelled());
    }
}
