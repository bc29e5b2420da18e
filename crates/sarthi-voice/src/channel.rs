//! The duplex channel contract.
//!
//! A channel is a continuous two-way stream: frames go out fire-and-forget and
//! server events come back with no correlation to what was sent.

use crate::codec::EncodedFrame;
use crate::error::ChannelError;
use tokio::sync::mpsc;
use tracing::debug;

/// What the inference service sends during a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Base64 PCM16 speech at the output rate.
    AudioChunk { data: String },
    /// The user barged in; stop talking.
    Interrupted,
    /// The model finished its turn. Reserved: logged only.
    TurnComplete,
}

/// Lifecycle callbacks of a channel, delivered as one event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Message(ServerEvent),
    Closed,
    Error(ChannelError),
}

pub type ChannelEventSender = mpsc::UnboundedSender<ChannelEvent>;

/// Cloneable, non-blocking handle for pushing captured frames to a channel.
///
/// Safe to call from the audio thread: sends never wait.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::UnboundedSender<EncodedFrame>,
}

impl FrameSender {
    pub fn new(tx: mpsc::UnboundedSender<EncodedFrame>) -> Self {
        Self { tx }
    }

    /// Fire-and-forget. Frames sent after the channel is gone are dropped.
    pub fn send(&self, frame: EncodedFrame) {
        if self.tx.send(frame).is_err() {
            debug!("frame dropped: channel closed");
        }
    }
}

/// A bidirectional stream to the conversational inference service.
pub trait DuplexChannel {
    /// Begin connecting. Returns immediately; `Open`, messages, `Closed` and
    /// `Error` arrive on `events` in order.
    fn connect(&mut self, events: ChannelEventSender);

    /// Handle for outbound frames of the current connection.
    fn frame_sender(&self) -> FrameSender;

    /// Ask the remote side to close. Best effort, never blocks.
    fn close(&mut self);
}
