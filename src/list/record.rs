use std::fmt::Debug;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::{address::Address, error::Error};

/// Anything a node can carry. The list never looks inside it.
pub trait Payload:
    Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static
{
}

impl<T> Payload for T where
    T: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static
{
}

/// The state one node owns: its payload and where its successor lives.
///
/// The payload is fixed at creation. Only the successor can change, and every
/// change bumps `version`, so two reads with the same version saw the same
/// record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord<P> {
    #[serde(rename = "data")]
    payload: P,
    // Required on input: a tail spells out `null`.
    #[serde(
        rename = "next_node_address",
        deserialize_with = "Option::deserialize"
    )]
    next_address: Option<Address>,
    #[serde(default)]
    version: u64,
}

impl<P: Payload> NodeRecord<P> {
    /// A fresh tail record.
    pub fn new(payload: P) -> Self {
        Self {
            payload,
            next_address: None,
            version: 0,
        }
    }

    pub fn with_next(mut self, next: Address) -> Self {
        self.next_address = Some(next);
        self
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }

    pub fn next_address(&self) -> Option<&Address> {
        self.next_address.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_tail(&self) -> bool {
        self.next_address.is_none()
    }

    /// Points this record at a new successor, or makes it a tail.
    pub(crate) fn relink(&mut self, next: Option<Address>) {
        self.next_address = next;
        self.version += 1;
    }

    /// The `{"data": .., "next_node_address": ..}` form sent on the wire.
    pub fn to_json(&self) -> Result<Value, Error> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_json(value: Value) -> Result<Self, Error> {
        serde_json::from_value(value)
            .map_err(|e| Error::MalformedRecord(e.to_string()))
    }
}
