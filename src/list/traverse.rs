use futures::{stream, Stream};
use tracing::{debug, warn};

use super::{
    address::Address, client::NodeClient, error::Error, record::Payload,
};

/// One hop of a traversal: either a node's payload, or how the walk ended.
#[derive(Debug)]
pub enum Step<P> {
    Node { address: Address, payload: P },
    End(End),
}

/// Why a traversal stopped. A natural tail is never confused with a read that
/// failed halfway down the chain.
#[derive(Debug)]
pub enum End {
    /// The last node read had no successor.
    EndOfChain,
    /// The node at `address` couldn't be read.
    ReadFailed { address: Address, reason: Error },
    /// The hop limit ran out with `address` still to visit, which usually
    /// means the chain loops.
    HopLimitReached { address: Address },
}

impl End {
    pub fn is_end_of_chain(&self) -> bool {
        matches!(self, End::EndOfChain)
    }
}

/// A fully drained traversal.
#[derive(Debug)]
pub struct Traversal<P> {
    pub payloads: Vec<P>,
    pub end: End,
}

impl<P> Traversal<P> {
    /// True when the walk reached a tail rather than stopping early.
    pub fn is_complete(&self) -> bool {
        self.end.is_end_of_chain()
    }
}

pub(crate) enum Cursor {
    At { address: Address, hops: usize },
    Tail,
    Done,
}

impl Cursor {
    pub(crate) fn start(head: Address) -> Self {
        Cursor::At {
            address: head,
            hops: 0,
        }
    }

    /// Performs at most one round trip and returns the step it produced, or
    /// `None` once the terminal step has been handed out.
    pub(crate) async fn advance<P: Payload>(
        self,
        client: &NodeClient,
    ) -> Option<(Step<P>, Cursor)> {
        match self {
            Cursor::Done => None,
            Cursor::Tail => Some((Step::End(End::EndOfChain), Cursor::Done)),
            Cursor::At { address, hops } if hops >= client.config().max_hops => {
                warn!(%address, hops, "hop limit reached");
                Some((Step::End(End::HopLimitReached { address }), Cursor::Done))
            }
            Cursor::At { address, hops } => {
                match client.fetch_node_info::<P>(&address).await {
                    Ok(record) => {
                        let next = match record.next_address() {
                            Some(next) => Cursor::At {
                                address: next.clone(),
                                hops: hops + 1,
                            },
                            None => Cursor::Tail,
                        };
                        let payload = record.into_payload();
                        Some((Step::Node { address, payload }, next))
                    }
                    Err(reason) => {
                        warn!(%address, "traversal stopped: {}", reason);
                        Some((
                            Step::End(End::ReadFailed { address, reason }),
                            Cursor::Done,
                        ))
                    }
                }
            }
        }
    }
}

/// Lazily walks from `head`, one round trip per item polled.
pub(crate) fn steps<P: Payload>(
    client: NodeClient,
    head: Address,
) -> impl Stream<Item = Step<P>> {
    stream::unfold(Cursor::start(head), move |cursor| {
        let client = client.clone();
        async move { cursor.advance(&client).await }
    })
}

/// Walks from `head` to the end, collecting payloads.
pub(crate) async fn collect<P: Payload>(
    client: &NodeClient,
    head: Address,
) -> Traversal<P> {
    let mut payloads = Vec::new();
    let mut cursor = Cursor::start(head);
    while let Some((step, next)) = cursor.advance(client).await {
        match step {
            Step::Node { payload, .. } => payloads.push(payload),
            Step::End(end) => {
                debug!(len = payloads.len(), ?end, "traversal finished");
                return Traversal { payloads, end };
            }
        }
        cursor = next;
    }
    // `advance` always yields a terminal step before it runs dry.
    Traversal {
        payloads,
        end: End::EndOfChain,
    }
}
