use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::storage::Storage;

/// Shutdown progress of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Serving requests.
    Running,
    /// Listeners are finishing in-flight requests.
    Draining,
    /// Storage has been halted.
    Stopped,
}

#[derive(Clone, Copy, Debug)]
struct Status {
    state: NodeState,
    active: usize,
}

/// Owned shutdown state machine, shared by every listener.
///
/// `Running -> Draining -> Stopped`. Storage is halted only after every
/// registered listener has dropped its [`ListenerHandle`].
#[derive(Clone, Debug)]
pub struct Lifecycle {
    status: Arc<watch::Sender<Status>>,
}

/// Registration of one serve loop; dropping it reports the loop finished.
#[derive(Debug)]
pub struct ListenerHandle {
    name: String,
    status: Arc<watch::Sender<Status>>,
}

impl Lifecycle {
    /// Running node with no listeners.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Status {
            state: NodeState::Running,
            active: 0,
        });
        Self {
            status: Arc::new(tx),
        }
    }

    /// Current state.
    pub fn state(&self) -> NodeState {
        self.status.borrow().state
    }

    /// Serve loops that have not finished yet.
    pub fn active_listeners(&self) -> usize {
        self.status.borrow().active
    }

    /// Registers a serve loop; `None` once shutdown has begun.
    pub fn register_listener(&self, name: &str) -> Option<ListenerHandle> {
        let registered = self.status.send_if_modified(|status| {
            if status.state != NodeState::Running {
                return false;
            }
            status.active += 1;
            true
        });
        registered.then(|| {
            info!(listener = name, "listener registered");
            ListenerHandle {
                name: name.to_string(),
                status: Arc::clone(&self.status),
            }
        })
    }

    /// Starts draining. Returns `false` if shutdown was already under way.
    pub fn shutdown(&self) -> bool {
        let started = self.status.send_if_modified(|status| {
            if status.state != NodeState::Running {
                return false;
            }
            status.state = NodeState::Draining;
            true
        });
        if started {
            info!(listeners = self.active_listeners(), "shutdown requested, draining");
        }
        started
    }

    /// Waits for shutdown and for every listener to finish, then halts
    /// `storage` and moves to [`NodeState::Stopped`].
    pub async fn drain_and_halt(&self, storage: &dyn Storage) {
        let mut rx = self.status.subscribe();
        // The sender lives in `self`, so waiting cannot fail.
        let _ = rx
            .wait_for(|status| status.state != NodeState::Running && status.active == 0)
            .await;
        if self.state() == NodeState::Stopped {
            return;
        }
        storage.halt();
        self.status.send_modify(|status| status.state = NodeState::Stopped);
        info!("node stopped");
    }

    /// Resolves once the node is [`NodeState::Stopped`].
    pub async fn wait_stopped(&self) {
        let mut rx = self.status.subscribe();
        let _ = rx.wait_for(|status| status.state == NodeState::Stopped).await;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerHandle {
    /// Listener name, for logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolves when the node leaves [`NodeState::Running`]; hand it to the
    /// serve loop's graceful shutdown.
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.status.subscribe();
        async move {
            let _ = rx.wait_for(|status| status.state != NodeState::Running).await;
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.status
            .send_modify(|status| status.active = status.active.saturating_sub(1));
        info!(listener = %self.name, "listener finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStore;
    use std::time::Duration;

    #[test]
    fn shutdown_is_idempotent() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.shutdown());
        assert!(!lifecycle.shutdown());
        assert_eq!(lifecycle.state(), NodeState::Draining);
    }

    #[test]
    fn no_registration_after_shutdown() {
        let lifecycle = Lifecycle::new();
        let handle = lifecycle.register_listener("http");
        assert!(handle.is_some());
        lifecycle.shutdown();
        assert!(lifecycle.register_listener("late").is_none());
        assert_eq!(lifecycle.active_listeners(), 1);
        drop(handle);
        assert_eq!(lifecycle.active_listeners(), 0);
    }

    #[tokio::test]
    async fn listeners_see_the_shutdown_signal() {
        let lifecycle = Lifecycle::new();
        let handle = lifecycle.register_listener("http").unwrap();
        let signal = tokio::spawn(handle.shutdown_signal());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!signal.is_finished());
        lifecycle.shutdown();
        tokio::time::timeout(Duration::from_secs(1), signal)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn storage_halts_after_last_listener() {
        let lifecycle = Lifecycle::new();
        let store = Arc::new(MemStore::new());
        let first = lifecycle.register_listener("a").unwrap();
        let second = lifecycle.register_listener("b").unwrap();

        let drain = {
            let lifecycle = lifecycle.clone();
            let store = Arc::clone(&store);
            tokio::spawn(async move { lifecycle.drain_and_halt(&*store).await })
        };
        lifecycle.shutdown();
        drop(first);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!store.stats().halted);
        assert_eq!(lifecycle.state(), NodeState::Draining);

        drop(second);
        drain.await.unwrap();
        assert!(store.stats().halted);
        assert_eq!(lifecycle.state(), NodeState::Stopped);
        lifecycle.wait_stopped().await;
    }
}
