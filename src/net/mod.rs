pub mod client;
pub mod protocol;

use std::sync::Arc;

use crate::error::Result;
use crate::session::events::EventSender;

use self::protocol::{FunctionDeclaration, MediaBlob, Modality, ToolResponseMessage};

/// Everything the remote agent needs to start a dialogue.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenRequest {
    pub model: String,
    pub modality: Modality,
    pub voice: String,
    pub system_instruction: String,
    pub tools: Vec<FunctionDeclaration>,
}

/// The sending half of an open duplex connection.
///
/// Sends are fire-and-forget: `Ok` means the message was handed to the
/// transport, not that the peer received it.
pub trait TransportHandle {
    fn send_realtime_input(&self, media: MediaBlob) -> Result<()>;
    fn send_tool_response(&self, response: ToolResponseMessage) -> Result<()>;
    /// Close the connection. Safe to call more than once.
    fn close(&self);
}

/// Opens duplex connections to the remote agent.
pub trait Connector {
    /// Start opening a connection and return its handle immediately.
    ///
    /// The handshake result arrives later on `events` as
    /// `ConnectionOpened` or `ConnectionError`, followed by
    /// `MessageReceived` for each inbound message and a final
    /// `ConnectionClosed` or `ConnectionError`.
    fn open(&mut self, request: OpenRequest, events: EventSender)
    -> Result<Arc<dyn TransportHandle>>;
}
