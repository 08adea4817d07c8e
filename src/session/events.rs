use tokio::sync::mpsc;

use crate::net::protocol::InboundMessage;

/// Everything the session controller reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// One fixed-size block of 16kHz mono microphone samples.
    FrameCaptured(Vec<f32>),
    /// The transport finished its handshake.
    ConnectionOpened,
    MessageReceived(InboundMessage),
    ConnectionClosed { reason: Option<String> },
    ConnectionError(String),
}

/// A [`SessionEvent`] tagged with the session generation that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub generation: u64,
    pub event: SessionEvent,
}

/// Cloneable producer side of the session event loop.
///
/// Producers (the capture thread, transport tasks) hold a sender stamped with
/// the generation of the session that spawned them, so the controller can
/// discard whatever a torn-down session still had in flight.
#[derive(Debug, Clone)]
pub struct EventSender {
    generation: u64,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EventSender {
    #[must_use]
    pub const fn new(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { generation: 0, tx }
    }

    /// A sender for the same loop stamped with another generation.
    #[must_use]
    pub fn for_generation(&self, generation: u64) -> Self {
        Self {
            generation,
            tx: self.tx.clone(),
        }
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Never blocks. Returns `false` once the event loop has gone away.
    pub fn send(&self, event: SessionEvent) -> bool {
        self.tx
            .send(Envelope {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_carry_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let base = EventSender::new(tx);
        let third = base.for_generation(3);

        assert!(base.send(SessionEvent::ConnectionOpened));
        assert!(third.send(SessionEvent::ConnectionError("boom".to_string())));

        let first = rx.try_recv().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(first.generation, 0);
        let second = rx.try_recv().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(second.generation, 3);
        assert_eq!(second.event, SessionEvent::ConnectionError("boom".to_string()));
    }

    #[test]
    fn send_fails_after_receiver_drops() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = EventSender::new(tx);
        drop(rx);
        assert!(sender.is_closed());
        assert!(!sender.send(SessionEvent::ConnectionOpened));
    }
}
