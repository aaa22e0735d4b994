use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{
    address::Address,
    error::Error,
    record::{NodeRecord, Payload},
};

/// Requests a node understands. Encoded as JSON objects discriminated by
/// their `type` field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Read the node's record.
    GetNodeInfo,
    /// Point the node at a new successor, or `None` to make it the tail.
    UpdateNextNode {
        // Required: a tail is requested with an explicit `null`.
        #[serde(deserialize_with = "Option::deserialize")]
        next_node_address: Option<Address>,
    },
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::GetNodeInfo => "get_node_info",
            Request::UpdateNextNode { .. } => "update_next_node",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a request, telling an unknown `type` apart from plain garbage
    /// so the reply can name it.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        let value: Value = serde_json::from_slice(buf)?;
        let kind = match value.get("type").and_then(Value::as_str) {
            Some(kind) => kind,
            None => {
                return Err(Error::BadRequest("request is missing a type".into()))
            }
        };
        if !matches!(kind, "get_node_info" | "update_next_node") {
            return Err(Error::UnknownRequest(kind.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Replies a node sends back. Exactly one per connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response<P> {
    /// `{"node_info": {...}}`
    NodeInfo(NodeRecord<P>),
    /// `{"status": "ok"}`
    Ok,
    /// `{"error": "..."}`
    Error(String),
}

impl<P: Payload> Response<P> {
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let value = match self {
            Response::NodeInfo(record) => {
                let info = record.to_json()?;
                json!({ "node_info": info })
            }
            Response::Ok => json!({ "status": "ok" }),
            Response::Error(msg) => json!({ "error": msg }),
        };
        Ok(serde_json::to_vec(&value)?)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        let value: Value = serde_json::from_slice(buf)?;
        let mut obj = match value {
            Value::Object(obj) => obj,
            other => return Err(Error::UnexpectedResponse(other.to_string())),
        };
        if let Some(info) = obj.remove("node_info") {
            return Ok(Response::NodeInfo(NodeRecord::from_json(info)?));
        }
        if let Some(error) = obj.remove("error") {
            let msg = match error {
                Value::String(msg) => msg,
                other => other.to_string(),
            };
            return Ok(Response::Error(msg));
        }
        match obj.remove("status") {
            Some(Value::String(status)) if status == "ok" => Ok(Response::Ok),
            Some(other) => Err(Error::UnexpectedResponse(format!(
                "status {}",
                other
            ))),
            None => Err(Error::UnexpectedResponse(Value::Object(obj).to_string())),
        }
    }
}

/// Writes `len | msg`, with `len` as a little-endian u32.
pub async fn write_frame<W>(
    stream: &mut W,
    msg: &[u8],
    max_len: u32,
) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(msg.len()).unwrap_or(u32::MAX);
    if len > max_len {
        return Err(Error::FrameTooLarge { len, max: max_len });
    }
    let mut buf = vec![0u8; 4];
    LittleEndian::write_u32(&mut buf, len);
    buf.extend_from_slice(msg);
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads one `len | msg` frame. The length is checked before anything is
/// allocated for the body.
pub async fn read_frame<R>(stream: &mut R, max_len: u32) -> Result<Vec<u8>, Error>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = LittleEndian::read_u32(&len_buf);
    if len > max_len {
        return Err(Error::FrameTooLarge { len, max: max_len });
    }
    let mut msg = vec![0u8; len as usize];
    stream.read_exact(&mut msg).await?;
    Ok(msg)
}
