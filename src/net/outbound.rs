//! Outbound frame queue between the tick and the transport
//!
//! The simulation pushes encoded frames without ever blocking; when the
//! transport falls behind, frames are dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{error, warn};

use crate::game::input::ViewerId;
use crate::game::world::ClientNotifier;
use crate::net::protocol::{encode, Notification, ServerMessage, ViewerFrame};

/// Warn once per this many dropped frames
const DROP_WARN_INTERVAL: u64 = 100;

/// Encoded server message addressed to one viewer, or to all of them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// `None` broadcasts
    pub viewer: Option<ViewerId>,
    pub payload: Vec<u8>,
}

/// Bounded queue drained by the transport
pub struct OutboundQueue {
    sender: Sender<OutboundMessage>,
    receiver: Receiver<OutboundMessage>,
    dropped: Arc<AtomicU64>,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Producer handle for the simulation
    pub fn sender(&self) -> OutboundSender {
        OutboundSender {
            sender: self.sender.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }

    /// Consumer handle for a transport task
    pub fn receiver(&self) -> Receiver<OutboundMessage> {
        self.receiver.clone()
    }

    /// Take everything currently queued
    pub fn drain(&self) -> Vec<OutboundMessage> {
        self.receiver.try_iter().collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Clonable producer handle
#[derive(Clone)]
pub struct OutboundSender {
    sender: Sender<OutboundMessage>,
    dropped: Arc<AtomicU64>,
}

impl OutboundSender {
    /// Queue a message without blocking. Returns false if it was dropped.
    pub fn push(&self, message: OutboundMessage) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % DROP_WARN_INTERVAL == 0 {
                    warn!("Outbound queue full, {} frames dropped so far", dropped);
                }
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Encode and queue one viewer's frame
    pub fn send_frame(&self, viewer: ViewerId, frame: ViewerFrame) -> bool {
        match encode(&ServerMessage::Frame(frame)) {
            Ok(payload) => self.push(OutboundMessage {
                viewer: Some(viewer),
                payload,
            }),
            Err(e) => {
                error!("Failed to encode frame for viewer {}: {}", viewer, e);
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ClientNotifier for OutboundSender {
    fn notify(&self, notification: Notification) {
        match encode(&ServerMessage::Notify(notification)) {
            Ok(payload) => {
                self.push(OutboundMessage { viewer: None, payload });
            }
            Err(e) => error!("Failed to encode notification: {}", e),
        }
    }
}
