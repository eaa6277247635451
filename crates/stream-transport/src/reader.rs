//! Reader task ownership shared by the adapters.

use std::future::Future;
use tokio::task::JoinHandle;
use tracing::warn;

/// At most one background task pumping a connection into the session.
#[derive(Debug, Default)]
pub(crate) struct ReaderTask {
    handle: Option<JoinHandle<()>>,
}

impl ReaderTask {
    /// Spawn `future`, aborting any task it replaces.
    pub(crate) fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(previous) = self.handle.replace(tokio::spawn(future)) {
            previous.abort();
        }
    }

    /// Abort the task and wait for it to unwind.
    ///
    /// Returns `false` if nothing was running.
    pub(crate) async fn stop(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return false;
        };
        handle.abort();
        if let Err(e) = handle.await {
            if e.is_panic() {
                warn!("Reader task panicked: {}", e);
            }
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for ReaderTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
