use std::{convert::Infallible, fmt::Display, str::FromStr};

use bytes::Bytes;

use super::{Address, Envelope, NodeContext};
use crate::message::{DhtMessage, WireError};
use crate::simulation::{SimError, Simulator};

/// A GET or PUT a client submits to the overlay.
///
/// Parses from `key` (GET) or `key>value` (PUT).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientCommand {
    Get { key: String },
    Put { key: String, value: String },
}

impl ClientCommand {
    pub fn key(&self) -> &str {
        match self {
            ClientCommand::Get { key } | ClientCommand::Put { key, .. } => key,
        }
    }

    pub fn to_message(&self) -> DhtMessage {
        match self {
            ClientCommand::Get { key } => DhtMessage::Request { key: key.clone() },
            ClientCommand::Put { key, value } => DhtMessage::StoreRequest {
                key: key.clone(),
                value: value.clone(),
            },
        }
    }
}

impl FromStr for ClientCommand {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.split_once('>') {
            Some((key, value)) => ClientCommand::Put {
                key: key.to_owned(),
                value: value.to_owned(),
            },
            None => ClientCommand::Get { key: s.to_owned() },
        })
    }
}

impl Display for ClientCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientCommand::Get { key } => write!(f, "{key}"),
            ClientCommand::Put { key, value } => write!(f, "{key}>{value}"),
        }
    }
}

/// An entity outside of the overlay that submits requests into it.
///
/// It runs no loop of its own: whoever drives it pulls arrivals with
/// [`ClientNode::receive`] or [`ClientNode::recv`].
pub struct ClientNode {
    ctx: NodeContext,
}

impl ClientNode {
    pub fn join(
        simulator: &Simulator,
        address: impl Into<Address>,
        x: f32,
        y: f32,
        rate: f64,
    ) -> Result<Self, SimError> {
        Ok(Self {
            ctx: simulator.register(address, x, y, rate)?,
        })
    }

    pub fn address(&self) -> &Address {
        self.ctx.address()
    }

    pub fn send(&self, to: &Address, payload: impl Into<Bytes>) {
        self.ctx.send(to, payload);
    }

    /// Sends `command` to the overlay node `server`.
    pub fn submit(&self, server: &Address, command: &ClientCommand) -> Result<(), WireError> {
        tracing::debug!(client = %self.address(), %server, %command, "Submitting request");
        self.ctx.send(server, command.to_message().encode()?);
        Ok(())
    }

    pub fn get(&self, server: &Address, key: &str) -> Result<(), WireError> {
        self.submit(server, &ClientCommand::Get { key: key.to_owned() })
    }

    pub fn put(&self, server: &Address, key: &str, value: &str) -> Result<(), WireError> {
        self.submit(
            server,
            &ClientCommand::Put {
                key: key.to_owned(),
                value: value.to_owned(),
            },
        )
    }

    /// Next arrival, if any, without waiting.
    pub fn receive(&mut self) -> Option<Envelope> {
        self.ctx.try_recv()
    }

    pub async fn recv(&mut self) -> Option<Envelope> {
        self.ctx.recv().await
    }

    /// Waits for the next `(key, value)` answer, skipping anything else that arrives.
    pub async fn next_response(&mut self) -> Option<(String, String)> {
        while let Some(envelope) = self.ctx.recv().await {
            match DhtMessage::decode(envelope.payload()) {
                Ok(DhtMessage::Response { key, value }) => return Some((key, value)),
                Ok(other) => {
                    tracing::debug!(
                        client = %self.address(),
                        from = %envelope.from(),
                        %other,
                        "Ignoring non-response message"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        client = %self.address(),
                        from = %envelope.from(),
                        %err,
                        "Undecodable payload"
                    );
                }
            }
        }
        None
    }

    pub fn stop(&self) {
        self.ctx.stop();
    }
}
