use std::{
    future,
    thread::{self, JoinHandle},
    time::Duration,
};

use tokio::{runtime, sync::oneshot, time::timeout};
use tracing::{debug, debug_span, warn, Instrument};
use typed_builder::TypedBuilder;

use super::{
    address::Address,
    error::Error,
    record::Payload,
    service::{NodeService, ServiceConfig},
    DEFAULT_HOST,
};

#[derive(Clone, Debug, TypedBuilder)]
pub struct LauncherConfig {
    /// Host new nodes bind to. Ports are always ephemeral.
    #[builder(default = DEFAULT_HOST.to_string(), setter(into))]
    pub host: String,
    /// How long to wait for a new node to report it is listening.
    #[builder(default = Duration::from_secs(5))]
    pub ready_timeout: Duration,
    #[builder(default)]
    pub service: ServiceConfig,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Starts nodes, each on a dedicated OS thread driving its own single-threaded
/// runtime.
///
/// A node outlives both the launcher and the task that launched it. A panic
/// on a node's thread takes down only that node.
#[derive(Clone, Debug, Default)]
pub struct Launcher {
    config: LauncherConfig,
}

impl Launcher {
    pub fn new(config: LauncherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Starts a node holding `payload` and returns once it is accepting
    /// connections.
    pub async fn launch<P: Payload>(
        &self,
        payload: P,
    ) -> Result<(Address, NodeHandle), Error> {
        let (ready_tx, ready_rx) = oneshot::channel::<Result<Address, Error>>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let host = self.config.host.clone();
        let service_config = self.config.service.clone();

        let thread = thread::Builder::new()
            .name("nodelist-node".into())
            .spawn(move || {
                let rt = match runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };
                rt.block_on(async move {
                    let service = match NodeService::bind(
                        (host.as_str(), 0),
                        payload,
                        service_config,
                    )
                    .await
                    {
                        Ok(service) => service,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    if ready_tx.send(Ok(service.address().clone())).is_err() {
                        // the launcher stopped waiting for us
                        return;
                    }
                    service
                        .serve_until(async {
                            // A dropped handle detaches the node instead of
                            // stopping it.
                            if shutdown_rx.await.is_err() {
                                future::pending::<()>().await
                            }
                        })
                        .await
                });
            })?;

        let address = match timeout(self.config.ready_timeout, ready_rx).await {
            Ok(Ok(Ok(address))) => address,
            Ok(Ok(Err(e))) => return Err(e),
            Ok(Err(_)) => {
                warn!("node thread died before it was ready");
                return Err(Error::NodeExited);
            }
            Err(_) => {
                warn!("node didn't become ready in {:?}", self.config.ready_timeout);
                return Err(Error::TimedOut);
            }
        };
        debug!(%address, "node ready");

        Ok((
            address.clone(),
            NodeHandle {
                address,
                shutdown: Some(shutdown_tx),
                thread,
            },
        ))
    }
}

/// Lifecycle handle for a launched node.
///
/// Dropping the handle leaves the node running until the process exits.
#[derive(Debug)]
pub struct NodeHandle {
    address: Address,
    shutdown: Option<oneshot::Sender<()>>,
    thread: JoinHandle<()>,
}

impl NodeHandle {
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Asks the node to stop accepting connections and exit. Doesn't wait.
    pub fn terminate(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            debug!(address = %self.address, "terminating node");
            let _ = shutdown.send(());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the node's thread to exit. A node that panicked reports
    /// [`Error::NodeExited`].
    pub async fn join(self) -> Result<(), Error> {
        let address = self.address;
        let thread = self.thread;
        async move {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => {
                    debug!("node exited");
                    Ok(())
                }
                _ => {
                    warn!("node exited abnormally");
                    Err(Error::NodeExited)
                }
            }
        }
        .instrument(debug_span!("join", %address))
        .await
    }

    /// [`terminate`](Self::terminate) then [`join`](Self::join).
    pub async fn shutdown(mut self) -> Result<(), Error> {
        self.terminate();
        self.join().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn launched_node_binds_configured_host() {
        let launcher = Launcher::new(LauncherConfig::builder().host("127.0.0.1").build());
        let (address, handle) = launcher.launch(1u8).await.unwrap();
        assert_eq!(address.host, "127.0.0.1");
        assert_ne!(address.port, 0);
        assert_eq!(handle.address(), &address);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn terminated_node_finishes() {
        let (_, mut handle) = Launcher::default().launch("x".to_string()).await.unwrap();
        assert!(!handle.is_finished());
        handle.terminate();
        // terminating twice is harmless
        handle.terminate();
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn unbindable_host_fails_launch() {
        let launcher = Launcher::new(
            LauncherConfig::builder().host("definitely-not-a-host.invalid").build(),
        );
        let err = launcher.launch(0u8).await.unwrap_err();
        assert!(err.is_connectivity(), "unexpected error: {}", err);
    }
}
