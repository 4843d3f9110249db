use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::trace;

use crate::packet::Packet;
use crate::sequence::{SenderId, SequenceId};

/// Outbound effects of the core. Every operation returns the events it caused, in the order
///  they happened, rather than calling back into application code.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    /// a fully reassembled, causally released application message
    MessageDelivered {
        origin: SenderId,
        stream_id: u16,
        bytes: Bytes,
    },
    /// JOIN / ATTEMPT_JOIN, delivered on first receipt
    ControlDelivered {
        origin: SenderId,
        packet: Packet,
    },
    /// The transport should fetch the packet from the group, e.g. by multicasting a request.
    RepairRequest {
        origin: SenderId,
        missing_sequence_id: SequenceId,
    },
    /// A historical packet to be re-sent verbatim by the transport
    RepairMessage {
        origin: SenderId,
        packet_bytes: Bytes,
    },
    /// Non-fatal protocol inconsistency: the message was dropped, repair logic is unaffected
    MessageDiscarded {
        origin: SenderId,
        stream_id: u16,
        reason: ReassemblyError,
    },
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ReassemblyError {
    #[error("reassembled length {actual} differs from declared total size {declared}")]
    SizeMismatch { declared: u32, actual: usize },
    #[error("fragment without a preceding START fragment")]
    MissingStart,
    #[error("new START fragment while a message was still being assembled")]
    Interrupted,
    #[error("declared total size {declared} exceeds the configured maximum of {max}")]
    TooLarge { declared: u32, max: u32 },
}

/// Publishes events to any number of subscribers. Subscribers that fall behind lose events
///  (see [broadcast::error::RecvError::Lagged]).
pub struct EventNotifier {
    sender: broadcast::Sender<Event>,
}
impl EventNotifier {
    pub fn new(capacity: usize) -> EventNotifier {
        let (sender, _) = broadcast::channel(capacity);

        EventNotifier {
            sender
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn send_event(&self, event: Event) {
        trace!("event: {:?}", event);
        let _ = self.sender.send(event);
    }
}
