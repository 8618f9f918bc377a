//! Lock-free input buffer between connection handlers and the tick
//!
//! Uses crossbeam-channel for MPSC handoff. Network contexts only ever
//! enqueue here; the scheduler drains everything at the start of a tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use tracing::warn;

use crate::game::input::{InputMessage, Inputs, ViewerId};
use crate::net::protocol::{decode, ClientMessage, DecodeError};

/// Warn once per this many malformed frames
const MALFORMED_WARN_INTERVAL: u64 = 100;

/// Bounded input queue owned by the scheduler
pub struct InputBuffer {
    /// Sender side - cloned to each connection handler
    sender: Sender<InputMessage>,
    /// Receiver side - drained by the scheduler
    receiver: Receiver<InputMessage>,
    /// Departures are never dropped, so this side is unbounded
    leave_sender: Sender<ViewerId>,
    leave_receiver: Receiver<ViewerId>,
    /// Frames rejected by `submit_frame`, across all senders
    malformed: Arc<AtomicU64>,
    capacity: usize,
}

impl InputBuffer {
    /// Capacity should cover the burst of inputs arriving between two ticks
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        let (leave_sender, leave_receiver) = unbounded();
        Self {
            sender,
            receiver,
            leave_sender,
            leave_receiver,
            malformed: Arc::new(AtomicU64::new(0)),
            capacity,
        }
    }

    /// Create a sender handle for a connection
    pub fn sender(&self) -> InputSender {
        InputSender {
            sender: self.sender.clone(),
            leave_sender: self.leave_sender.clone(),
            malformed: Arc::clone(&self.malformed),
        }
    }

    /// Try to submit an input (non-blocking)
    #[inline]
    pub fn try_submit(&self, viewer: ViewerId, inputs: Inputs) -> bool {
        self.sender.try_send(InputMessage { viewer, inputs }).is_ok()
    }

    /// Drain all pending inputs in arrival order
    pub fn drain(&self) -> Vec<InputMessage> {
        self.receiver.try_iter().collect()
    }

    /// Drain viewers that asked to leave since the last tick
    pub fn drain_leaves(&self) -> Vec<ViewerId> {
        self.leave_receiver.try_iter().collect()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Malformed frames discarded so far
    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Clonable sender handle for connection handlers
#[derive(Clone)]
pub struct InputSender {
    sender: Sender<InputMessage>,
    leave_sender: Sender<ViewerId>,
    malformed: Arc<AtomicU64>,
}

impl InputSender {
    /// Submit an input (non-blocking)
    #[inline]
    pub fn try_send(&self, viewer: ViewerId, inputs: Inputs) -> Result<(), InputBufferError> {
        self.sender
            .try_send(InputMessage { viewer, inputs })
            .map_err(|e| match e {
                TrySendError::Full(_) => InputBufferError::Full,
                TrySendError::Disconnected(_) => InputBufferError::Disconnected,
            })
    }

    /// Queue a departure
    pub fn leave(&self, viewer: ViewerId) -> Result<(), InputBufferError> {
        self.leave_sender
            .send(viewer)
            .map_err(|_| InputBufferError::Disconnected)
    }

    /// Decode a raw client frame and queue what it carries
    ///
    /// Frames that fail to decode are logged, counted and rejected here;
    /// they never reach the tick.
    pub fn submit_frame(&self, viewer: ViewerId, frame: &[u8]) -> Result<(), InputBufferError> {
        let message = decode::<ClientMessage>(frame).map_err(|e| {
            let malformed = self.malformed.fetch_add(1, Ordering::Relaxed) + 1;
            if malformed == 1 || malformed % MALFORMED_WARN_INTERVAL == 0 {
                warn!(
                    "Discarding malformed frame from viewer {} ({} bytes): {} ({} so far)",
                    viewer,
                    frame.len(),
                    e,
                    malformed
                );
            }
            e
        })?;
        match message {
            ClientMessage::Input(inputs) => self.try_send(viewer, inputs),
            ClientMessage::Leave => self.leave(viewer),
        }
    }
}

/// Input buffer errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputBufferError {
    /// Buffer is full (backpressure)
    #[error("input buffer full")]
    Full,
    /// Scheduler dropped the buffer
    #[error("input buffer disconnected")]
    Disconnected,
    /// Frame did not decode as a client message
    #[error("malformed input frame: {0}")]
    Malformed(#[from] DecodeError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::input_flags;

    fn create_test_input(angle: f32) -> Inputs {
        Inputs {
            flags: input_flags::LEFT_CLICK,
            movement_angle: angle,
            movement_magnitude: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_input_buffer_submit_and_drain() {
        let buffer = InputBuffer::new(10);

        assert!(buffer.try_submit(1, create_test_input(1.0)));
        assert!(buffer.try_submit(1, create_test_input(2.0)));
        assert!(buffer.try_submit(1, create_test_input(3.0)));
        assert_eq!(buffer.pending_count(), 3);

        let inputs = buffer.drain();
        assert_eq!(inputs.len(), 3);
        assert_eq!(inputs[0].inputs.movement_angle, 1.0);
        assert_eq!(inputs[2].inputs.movement_angle, 3.0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_input_buffer_backpressure() {
        let buffer = InputBuffer::new(2);

        assert!(buffer.try_submit(7, create_test_input(1.0)));
        assert!(buffer.try_submit(7, create_test_input(2.0)));
        assert!(!buffer.try_submit(7, create_test_input(3.0)));

        buffer.drain();
        assert!(buffer.try_submit(7, create_test_input(3.0)));
    }

    #[test]
    fn test_input_sender_clone() {
        let buffer = InputBuffer::new(10);
        let sender1 = buffer.sender();
        let sender2 = buffer.sender();

        assert!(sender1.try_send(1, create_test_input(1.0)).is_ok());
        assert!(sender2.try_send(2, create_test_input(2.0)).is_ok());

        let inputs = buffer.drain();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].viewer, 1);
        assert_eq!(inputs[1].viewer, 2);
    }

    #[test]
    fn test_sender_reports_full() {
        let buffer = InputBuffer::new(1);
        let sender = buffer.sender();
        sender.try_send(1, create_test_input(0.0)).unwrap();
        assert_eq!(
            sender.try_send(1, create_test_input(0.0)),
            Err(InputBufferError::Full)
        );
    }

    #[test]
    fn test_sender_reports_disconnected() {
        let buffer = InputBuffer::new(4);
        let sender = buffer.sender();
        drop(buffer);
        assert_eq!(
            sender.try_send(1, create_test_input(0.0)),
            Err(InputBufferError::Disconnected)
        );
    }

    #[test]
    fn test_submit_frame_decodes_input_and_leave() {
        use crate::net::protocol::encode;

        let buffer = InputBuffer::new(4);
        let sender = buffer.sender();
        let input = encode(&ClientMessage::Input(create_test_input(0.5))).unwrap();
        let leave = encode(&ClientMessage::Leave).unwrap();

        sender.submit_frame(3, &input).unwrap();
        sender.submit_frame(3, &leave).unwrap();

        let inputs = buffer.drain();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].inputs.movement_angle, 0.5);
        assert_eq!(buffer.drain_leaves(), vec![3]);
    }

    #[test]
    fn test_submit_frame_rejects_garbage() {
        let buffer = InputBuffer::new(4);
        let result = buffer.sender().submit_frame(1, &[0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert!(matches!(result, Err(InputBufferError::Malformed(_))));
        assert!(buffer.is_empty());
        assert_eq!(buffer.malformed(), 1);
    }

    #[test]
    fn test_malformed_frames_are_counted_across_senders() {
        use crate::net::protocol::encode;

        let buffer = InputBuffer::new(4);
        let first = buffer.sender();
        let second = first.clone();
        for _ in 0..3 {
            assert!(first.submit_frame(1, &[]).is_err());
        }
        assert!(second.submit_frame(2, &[0xFF; 8]).is_err());
        let valid = encode(&ClientMessage::Leave).unwrap();
        second.submit_frame(2, &valid).unwrap();

        assert_eq!(buffer.malformed(), 4);
        assert_eq!(buffer.drain_leaves(), vec![2]);
    }

    #[test]
    fn test_input_buffer_default() {
        assert_eq!(InputBuffer::default().capacity(), 1000);
    }
}
