use std::time::Duration;

use futures::Stream;
use serde_json::Value;
use tokio::{net::TcpStream, time::timeout};
use tracing::{debug, warn};
use typed_builder::TypedBuilder;

use super::{
    address::Address,
    error::Error,
    launcher::{Launcher, LauncherConfig, NodeHandle},
    record::{NodeRecord, Payload},
    traverse::{self, Step, Traversal},
    wire::{read_frame, write_frame, Request, Response},
    DEFAULT_MAX_FRAME_LEN,
};

#[derive(Clone, Debug, TypedBuilder)]
pub struct ClientConfig {
    /// Upper bound on one round trip: connect, send, and read the reply.
    #[builder(default = Duration::from_secs(5))]
    pub timeout: Duration,
    #[builder(default = DEFAULT_MAX_FRAME_LEN)]
    pub max_frame_len: u32,
    /// Nodes a traversal visits before giving up.
    #[builder(default = 1 << 16)]
    pub max_hops: usize,
    #[builder(default)]
    pub launcher: LauncherConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Speaks the node protocol from the caller's side, and builds chains out of
/// freshly launched nodes.
#[derive(Clone, Debug, Default)]
pub struct NodeClient {
    config: ClientConfig,
    launcher: Launcher,
}

impl NodeClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            launcher: Launcher::new(config.launcher.clone()),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn launcher(&self) -> &Launcher {
        &self.launcher
    }

    /// One connection, one request, one reply.
    async fn call<P: Payload>(
        &self,
        address: &Address,
        request: &Request,
    ) -> Result<Response<P>, Error> {
        let msg = request.encode()?;
        let max_frame_len = self.config.max_frame_len;
        let round_trip = async {
            let mut stream =
                TcpStream::connect((address.host.as_str(), address.port)).await?;
            write_frame(&mut stream, &msg, max_frame_len).await?;
            let reply = read_frame(&mut stream, max_frame_len).await?;
            Response::decode(&reply)
        };
        timeout(self.config.timeout, round_trip).await?
    }

    /// Reads the record at `address`, reporting why when it can't.
    pub async fn fetch_node_info<P: Payload>(
        &self,
        address: &Address,
    ) -> Result<NodeRecord<P>, Error> {
        match self.call(address, &Request::GetNodeInfo).await? {
            Response::NodeInfo(record) => Ok(record),
            Response::Error(msg) => Err(Error::Remote(msg)),
            Response::Ok => Err(Error::UnexpectedResponse(
                "status reply to get_node_info".into(),
            )),
        }
    }

    /// Best-effort read: failures are logged and come back as `None`.
    pub async fn get_node_info<P: Payload>(
        &self,
        address: &Address,
    ) -> Option<NodeRecord<P>> {
        match self.fetch_node_info(address).await {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(%address, "failed to read node: {}", e);
                None
            }
        }
    }

    /// Points the node at `from` to `to`, or makes it a tail when `to` is
    /// `None`. Succeeds only once the node acknowledges the change.
    pub async fn set_next(
        &self,
        from: &Address,
        to: Option<&Address>,
    ) -> Result<(), Error> {
        let request = Request::UpdateNextNode {
            next_node_address: to.cloned(),
        };
        // the payload type is irrelevant to a status reply
        match self.call::<Value>(from, &request).await? {
            Response::Ok => {
                debug!(%from, ?to, "linked");
                Ok(())
            }
            Response::Error(msg) => Err(Error::Remote(msg)),
            Response::NodeInfo(_) => Err(Error::UnexpectedResponse(
                "node_info reply to update_next_node".into(),
            )),
        }
    }

    /// Launches one node per value, in order, then links each to the next.
    ///
    /// If any launch or link fails, every node started so far is shut down
    /// and the error returned; a partial chain is never handed back.
    pub async fn build_chain<P, I>(&self, values: I) -> Result<Chain, Error>
    where
        P: Payload,
        I: IntoIterator<Item = P>,
    {
        let chain = self.launch_nodes(values).await?;
        self.link(chain).await
    }

    /// Launches one unlinked node per value, in order. Every node is a tail
    /// until [`NodeClient::link`] runs.
    pub async fn launch_nodes<P, I>(&self, values: I) -> Result<Chain, Error>
    where
        P: Payload,
        I: IntoIterator<Item = P>,
    {
        let mut nodes = Vec::new();
        for value in values {
            match self.launcher.launch(value).await {
                Ok((_, handle)) => nodes.push(handle),
                Err(e) => {
                    Chain { nodes }.abandon().await;
                    return Err(e);
                }
            }
        }
        if nodes.is_empty() {
            return Err(Error::EmptyChain);
        }
        Ok(Chain { nodes })
    }

    /// Points each node of `chain` at the one after it. On failure the whole
    /// chain is shut down before the error is returned.
    pub async fn link(&self, chain: Chain) -> Result<Chain, Error> {
        let addresses: Vec<Address> = chain.addresses().cloned().collect();
        for pair in addresses.windows(2) {
            if let Err(e) = self.set_next(&pair[0], Some(&pair[1])).await {
                warn!(
                    from = %pair[0],
                    to = %pair[1],
                    "failed to link chain: {}",
                    e
                );
                chain.abandon().await;
                return Err(e);
            }
        }
        debug!(len = chain.len(), head = %chain.head(), "chain built");
        Ok(chain)
    }

    /// Lazily follows successors from `head`. Yields a [`Step::Node`] per
    /// node read, then exactly one [`Step::End`].
    ///
    /// Each poll reads live state, so a chain relinked mid-walk is followed
    /// as it is at that moment.
    pub fn traverse<P: Payload>(
        &self,
        head: Address,
    ) -> impl Stream<Item = Step<P>> {
        traverse::steps(self.clone(), head)
    }

    /// Runs a whole traversal from `head`.
    pub async fn collect<P: Payload>(&self, head: Address) -> Traversal<P> {
        traverse::collect(self, head).await
    }
}

/// The nodes of a chain built by [`NodeClient::build_chain`] (or launched by
/// [`NodeClient::launch_nodes`]), in list order.
/// Never empty.
///
/// Dropping a chain detaches its nodes; call [`Chain::shutdown`] to reclaim
/// them.
#[derive(Debug)]
pub struct Chain {
    nodes: Vec<NodeHandle>,
}

impl Chain {
    pub fn head(&self) -> &Address {
        self.nodes[0].address()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> + '_ {
        self.nodes.iter().map(NodeHandle::address)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn into_handles(self) -> Vec<NodeHandle> {
        self.nodes
    }

    /// Stops every node and waits for all of them. Returns the first failure,
    /// after still trying the rest.
    pub async fn shutdown(self) -> Result<(), Error> {
        let mut nodes = self.nodes;
        for node in nodes.iter_mut() {
            node.terminate();
        }
        let mut result = Ok(());
        for node in nodes {
            if let Err(e) = node.join().await {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    async fn abandon(self) {
        if let Err(e) = self.shutdown().await {
            warn!("failed to clean up partial chain: {}", e);
        }
    }
}
