#![forbid(unsafe_code)]

//! Node serving: admission slots, shutdown lifecycle and the HTTP surface.

mod admission;
mod http;
mod lifecycle;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::engine::{Engine, EngineOptions};
use crate::query::{BlockParser, ScanEvaluator};
use crate::storage::MemStore;

pub use admission::{Admission, AdmissionPermit, SLOTS_PER_CPU};
pub use http::{
    build_router, RunRequest, RunResponse, ServerState, SHARE_HASH_PREDICATE, SHARE_PREDICATE,
};
pub use lifecycle::{Lifecycle, ListenerHandle, NodeState};

/// Everything needed to boot a node.
#[derive(Clone, Debug)]
pub struct NodeOptions {
    /// Interface to bind.
    pub host: IpAddr,
    /// HTTP port.
    pub port: u16,
    /// Further ports serving the same routes.
    pub extra_ports: Vec<u16>,
    /// Engine tuning.
    pub engine: EngineOptions,
    /// Admission slots.
    pub max_pending: usize,
    /// Allowed CORS origins.
    pub allow_origins: Vec<String>,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
            extra_ports: Vec::new(),
            engine: EngineOptions::default(),
            max_pending: Admission::default_capacity(),
            allow_origins: Vec::new(),
        }
    }
}

impl NodeOptions {
    /// Socket addresses of every listener.
    pub fn addrs(&self) -> Vec<SocketAddr> {
        std::iter::once(self.port)
            .chain(self.extra_ports.iter().copied())
            .map(|port| SocketAddr::new(self.host, port))
            .collect()
    }
}

/// Errors that stop a node.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding a listener failed.
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        /// Address requested.
        addr: SocketAddr,
        /// Underlying error.
        source: std::io::Error,
    },
    /// A serve loop failed.
    #[error("http server error: {0}")]
    Io(#[from] std::io::Error),
    /// Shutdown began before every listener was registered.
    #[error("node is shutting down")]
    ShuttingDown,
}

/// Runs one serve loop until the lifecycle starts draining, then lets
/// in-flight requests finish. Dropping `handle` reports the loop finished.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    handle: ListenerHandle,
) -> Result<(), ServerError> {
    let signal = handle.shutdown_signal();
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(signal)
    .await?;
    info!(listener = handle.name(), "serve loop drained");
    Ok(())
}

/// Boots a node over a fresh [`MemStore`] and runs until shutdown has
/// drained every listener and halted storage.
pub async fn run_node(options: NodeOptions) -> Result<(), ServerError> {
    let store = Arc::new(MemStore::new());
    let engine = Arc::new(Engine::new(
        store.clone(),
        Arc::new(BlockParser),
        Arc::new(ScanEvaluator::new(store.clone())),
        options.engine.clone(),
    ));
    let admission = Admission::new(options.max_pending);
    let lifecycle = Lifecycle::new();
    let state = Arc::new(ServerState::new(
        engine,
        admission.clone(),
        lifecycle.clone(),
        options.allow_origins.clone(),
    ));
    let router = build_router(state);

    let mut serving = JoinSet::new();
    let mut first_error = None;
    for addr in options.addrs() {
        let bound = match TcpListener::bind(addr).await {
            Ok(listener) => lifecycle
                .register_listener(&addr.to_string())
                .map(|handle| (listener, handle))
                .ok_or(ServerError::ShuttingDown),
            Err(source) => Err(ServerError::Bind { addr, source }),
        };
        match bound {
            Ok((listener, handle)) => {
                info!(
                    %addr,
                    mutations = ?options.engine.mutations,
                    slots = admission.capacity(),
                    allow_origins = ?options.allow_origins,
                    "node listening"
                );
                serving.spawn(serve(listener, router.clone(), handle));
            }
            Err(err) => {
                error!(error = %err, "listener setup failed");
                first_error = Some(err);
                lifecycle.shutdown();
                break;
            }
        }
    }

    {
        let lifecycle = lifecycle.clone();
        tokio::spawn(async move {
            if shutdown_signal().await {
                lifecycle.shutdown();
            }
        });
    }

    while let Some(joined) = serving.join_next().await {
        let failure = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => err,
            Err(join) => ServerError::Io(std::io::Error::other(join)),
        };
        error!(error = %failure, "serve loop failed");
        lifecycle.shutdown();
        first_error.get_or_insert(failure);
    }

    lifecycle.shutdown();
    admission.close();
    lifecycle.drain_and_halt(&*store).await;
    first_error.map_or(Ok(()), Err)
}

/// Waits for ctrl-c; `false` if the signal cannot be observed, in which
/// case only `/admin/shutdown` stops the node.
async fn shutdown_signal() -> bool {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("shutdown signal received");
            true
        }
        Err(err) => {
            error!(?err, "failed to listen for shutdown signal");
            false
        }
    }
}
