//! Wire messages exchanged by overlay nodes.
//!
//! Every message starts with a one byte tag followed by big-endian fields;
//! strings are UTF-16 code units behind an `i32` unit count. A peer response
//! carries a whole peer array, where empty slots are encoded as an empty
//! address with no position.

use std::fmt::Display;

use bytes::Bytes;

use crate::ring::{Peer, Position};
use crate::util::byte_buffer::ByteBuffer;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("unknown message tag {0}")]
    UnknownTag(u8),
    #[error("truncated input: needed {needed} bytes at offset {offset}, only {filled} available")]
    Truncated {
        offset: usize,
        needed: usize,
        filled: usize,
    },
    #[error("negative length prefix {0}")]
    NegativeLength(i32),
    #[error("invalid utf-16 string")]
    InvalidUtf16,
    #[error("position {0} outside of the keyspace")]
    InvalidPosition(f32),
    #[error("{0} elements exceed the length prefix range")]
    TooLong(usize),
}

/// Overlay protocol messages.
#[derive(Clone, Debug, PartialEq)]
pub enum DhtMessage {
    /// GET for a key, routed towards its owner.
    Request { key: String },
    /// Answer to a [`DhtMessage::Request`]; the value is empty when the key is unknown.
    Response { key: String, value: String },
    /// PUT, routed towards the owner of the key.
    StoreRequest { key: String, value: String },
    /// Asks for the best peers of `requester` among the nodes owning `[range_min, range_max]`.
    PeerRequest {
        requester: Peer,
        range_min: f32,
        range_max: f32,
        request_id: i32,
    },
    /// Aggregated answer to a [`DhtMessage::PeerRequest`].
    PeerResponse {
        target: Position,
        request_id: i32,
        peers: Vec<Option<Peer>>,
    },
}

impl DhtMessage {
    pub const REQUEST: u8 = 1;
    pub const RESPONSE: u8 = 2;
    pub const STORE_REQUEST: u8 = 3;
    pub const PEER_REQUEST: u8 = 4;
    pub const PEER_RESPONSE: u8 = 5;

    pub fn tag(&self) -> u8 {
        match self {
            DhtMessage::Request { .. } => Self::REQUEST,
            DhtMessage::Response { .. } => Self::RESPONSE,
            DhtMessage::StoreRequest { .. } => Self::STORE_REQUEST,
            DhtMessage::PeerRequest { .. } => Self::PEER_REQUEST,
            DhtMessage::PeerResponse { .. } => Self::PEER_RESPONSE,
        }
    }

    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut buf = ByteBuffer::with_capacity(64);
        buf.write_i8(self.tag() as i8);
        match self {
            DhtMessage::Request { key } => buf.write_string(key)?,
            DhtMessage::Response { key, value } | DhtMessage::StoreRequest { key, value } => {
                buf.write_string(key)?;
                buf.write_string(value)?;
            }
            DhtMessage::PeerRequest {
                requester,
                range_min,
                range_max,
                request_id,
            } => {
                buf.write_string(requester.address.as_str())?;
                buf.write_f32(requester.position.as_f32());
                buf.write_f32(*range_min);
                buf.write_f32(*range_max);
                buf.write_i32(*request_id);
            }
            DhtMessage::PeerResponse {
                target,
                request_id,
                peers,
            } => {
                buf.write_f32(target.as_f32());
                buf.write_i32(*request_id);
                let count =
                    i16::try_from(peers.len()).map_err(|_| WireError::TooLong(peers.len()))?;
                buf.write_i16(count);
                for slot in peers {
                    match slot {
                        Some(peer) => {
                            buf.write_string(peer.address.as_str())?;
                            buf.write_f32(peer.position.as_f32());
                        }
                        None => buf.write_string("")?,
                    }
                }
            }
        }
        Ok(buf.into_bytes())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut buf = ByteBuffer::from_bytes(bytes);
        let tag = buf.read_i8()? as u8;
        let msg = match tag {
            Self::REQUEST => DhtMessage::Request {
                key: buf.read_string()?,
            },
            Self::RESPONSE => DhtMessage::Response {
                key: buf.read_string()?,
                value: buf.read_string()?,
            },
            Self::STORE_REQUEST => DhtMessage::StoreRequest {
                key: buf.read_string()?,
                value: buf.read_string()?,
            },
            Self::PEER_REQUEST => {
                let address = buf.read_string()?;
                let position = read_position(&mut buf)?;
                DhtMessage::PeerRequest {
                    requester: Peer::new(address, position),
                    range_min: buf.read_f32()?,
                    range_max: buf.read_f32()?,
                    request_id: buf.read_i32()?,
                }
            }
            Self::PEER_RESPONSE => {
                let target = read_position(&mut buf)?;
                let request_id = buf.read_i32()?;
                let count = buf.read_i16()?;
                let count =
                    usize::try_from(count).map_err(|_| WireError::NegativeLength(count.into()))?;
                let mut peers = Vec::with_capacity(count);
                for _ in 0..count {
                    let address = buf.read_string()?;
                    if address.is_empty() {
                        peers.push(None);
                    } else {
                        let position = read_position(&mut buf)?;
                        peers.push(Some(Peer::new(address, position)));
                    }
                }
                DhtMessage::PeerResponse {
                    target,
                    request_id,
                    peers,
                }
            }
            other => return Err(WireError::UnknownTag(other)),
        };
        Ok(msg)
    }
}

fn read_position(buf: &mut ByteBuffer) -> Result<Position, WireError> {
    let raw = buf.read_f32()?;
    Position::try_from(raw).map_err(|_| WireError::InvalidPosition(raw))
}

impl Display for DhtMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DhtMessage::Request { key } => write!(f, "Request({key})"),
            DhtMessage::Response { key, value } => write!(f, "Response({key} = {value})"),
            DhtMessage::StoreRequest { key, value } => write!(f, "StoreRequest({key} = {value})"),
            DhtMessage::PeerRequest {
                requester,
                range_min,
                range_max,
                request_id,
            } => write!(
                f,
                "PeerRequest({requester}, [{range_min}, {range_max}], id: {request_id})"
            ),
            DhtMessage::PeerResponse {
                target,
                request_id,
                peers,
            } => write!(
                f,
                "PeerResponse(target: {target}, id: {request_id}, {} slots)",
                peers.len()
            ),
        }
    }
}
