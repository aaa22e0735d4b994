//! A linked list whose nodes are independent network services.
//!
//! Each node owns one [`NodeRecord`] and answers read and relink requests over
//! TCP. A node's successor is an [`Address`] rather than a pointer, so
//! following the list costs one round trip per hop.

pub mod list;

pub use list::{
    address::Address,
    client::{Chain, ClientConfig, NodeClient},
    error::Error,
    launcher::{Launcher, LauncherConfig, NodeHandle},
    record::{NodeRecord, Payload},
    service::{NodeService, ServiceConfig},
    traverse::{End, Step, Traversal},
};
