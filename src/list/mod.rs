pub mod address;
pub mod client;
pub mod error;
pub mod launcher;
pub mod record;
pub mod service;
pub mod traverse;
pub mod wire;

// Every node is a tiny, single-purpose server: it holds one record and one
// successor address, and it never talks to other nodes on its own. All
// pointer chasing happens on the client side, which turns each dereference
// into a full connect/request/response/close exchange.
//
// Nodes run on their own thread with their own runtime so that a panic while
// serving one node can't take down its neighbours or the process that
// launched it. The launcher hands back a handle, but dropping it leaves the
// node running; reclaiming nodes is the caller's job.

/// Host new nodes bind to unless configured otherwise.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Ceiling for a single frame on the wire, in bytes.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 64 * 1024;
