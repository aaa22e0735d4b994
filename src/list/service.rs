use std::{fmt, future::Future, sync::Arc, time::Duration};

use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream, ToSocketAddrs},
    select,
    sync::RwLock,
    time::timeout,
};
use tracing::{debug, debug_span, warn, Instrument};
use typed_builder::TypedBuilder;

use super::{
    address::Address,
    error::Error,
    record::{NodeRecord, Payload},
    wire::{read_frame, write_frame, Request, Response},
    DEFAULT_MAX_FRAME_LEN,
};

#[derive(Clone, Debug, TypedBuilder)]
pub struct ServiceConfig {
    /// Largest request or response frame, in bytes.
    #[builder(default = DEFAULT_MAX_FRAME_LEN)]
    pub max_frame_len: u32,
    /// How long a connection may sit idle before its request arrives.
    #[builder(default = Duration::from_secs(30))]
    pub read_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A listener that owns exactly one record.
///
/// Every connection carries one request and one response, then closes.
/// Connections are served concurrently, each on its own task, and each handler
/// runs as a critical section over the record: reads share the lock, relinks
/// take it exclusively. Across connections the last relink to get the lock
/// wins.
pub struct NodeService<P> {
    listener: TcpListener,
    address: Address,
    record: Arc<RwLock<NodeRecord<P>>>,
    config: ServiceConfig,
}

impl<P: Payload> NodeService<P> {
    /// Binds a fresh tail node holding `payload`. Pass port 0 for an
    /// ephemeral port; [`NodeService::address`] reports the one picked.
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        payload: P,
        config: ServiceConfig,
    ) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).await?;
        let address = Address::from(listener.local_addr()?);
        debug!(%address, "node bound");
        Ok(Self {
            listener,
            address,
            record: Arc::new(RwLock::new(NodeRecord::new(payload))),
            config,
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Serves until the process exits.
    pub async fn serve(self) {
        self.serve_until(std::future::pending()).await
    }

    /// Serves until `shutdown` resolves. Connections already accepted keep
    /// running on their own tasks for as long as the runtime does.
    pub async fn serve_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let span = debug_span!("node", address = %self.address);
        async move {
            tokio::pin!(shutdown);
            loop {
                select! {
                    _ = &mut shutdown => {
                        debug!("node shutting down");
                        return;
                    }
                    accepted = self.listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                let record = self.record.clone();
                                let config = self.config.clone();
                                tokio::spawn(
                                    Self::handle_connection(stream, record, config)
                                        .instrument(debug_span!("conn", %peer)),
                                );
                            }
                            Err(e) => warn!("failed to accept connection: {}", e),
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn handle_connection(
        mut stream: TcpStream,
        record: Arc<RwLock<NodeRecord<P>>>,
        config: ServiceConfig,
    ) {
        let max_frame_len = config.max_frame_len;
        let request = timeout(config.read_timeout, read_frame(&mut stream, max_frame_len))
            .await
            .map_err(Error::from)
            .and_then(|read| read)
            .and_then(|buf| Request::decode(&buf));
        let response = match request {
            Ok(request) => {
                debug!(kind = request.kind(), "serving request");
                Self::apply(&record, request).await
            }
            Err(Error::Io(e)) => {
                // nobody left to answer
                debug!("peer went away before sending a request: {}", e);
                return;
            }
            Err(Error::TimedOut) => {
                debug!("no request within {:?}, closing", config.read_timeout);
                return;
            }
            Err(e) => {
                warn!("rejecting request: {}", e);
                Response::Error(e.to_string())
            }
        };
        if let Err(e) = Self::reply(&mut stream, response, max_frame_len).await {
            warn!("failed to send response: {}", e);
        }
        let _ = stream.shutdown().await;
    }

    async fn apply(
        record: &RwLock<NodeRecord<P>>,
        request: Request,
    ) -> Response<P> {
        match request {
            Request::GetNodeInfo => Response::NodeInfo(record.read().await.clone()),
            Request::UpdateNextNode { next_node_address } => {
                let mut record = record.write().await;
                record.relink(next_node_address);
                debug!(
                    next = ?record.next_address(),
                    version = record.version(),
                    "relinked"
                );
                Response::Ok
            }
        }
    }

    /// Writes `response`, substituting an error reply if it can't be encoded
    /// within the frame limit.
    async fn reply(
        stream: &mut TcpStream,
        response: Response<P>,
        max_frame_len: u32,
    ) -> Result<(), Error> {
        let buf = match response.encode() {
            Ok(buf) if buf.len() as u64 <= u64::from(max_frame_len) => buf,
            Ok(buf) => {
                let len = u32::try_from(buf.len()).unwrap_or(u32::MAX);
                let e = Error::FrameTooLarge {
                    len,
                    max: max_frame_len,
                };
                warn!("response too large: {}", e);
                Response::<P>::Error(e.to_string()).encode()?
            }
            Err(e) => {
                warn!("failed to encode response: {}", e);
                Response::<P>::Error(e.to_string()).encode()?
            }
        };
        write_frame(stream, &buf, max_frame_len).await
    }
}

impl<P> fmt::Debug for NodeService<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeService")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
