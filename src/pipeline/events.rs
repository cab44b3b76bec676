//! Event delivery from the pipeline to the frontend
//!
//! Frames and status travel on separate lanes. Frames go through a bounded
//! queue with `try_send`, so a slow frontend drops frames instead of stalling
//! the reactor. Status events (state changes, faults, resources, statistics,
//! shutdown) are few and must never be lost, so they use an unbounded queue
//! that a send can never block on.

use crate::pipeline::{PipelineEvent, RenderedFrame};
use crossbeam_channel::{
    bounded, select, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError,
};
use std::time::Duration;

/// Create the two event lanes; `frame_depth` bounds the frame queue
pub fn event_channel(frame_depth: usize) -> (EventSender, EventReceiver) {
    let (frame_tx, frame_rx) = bounded(frame_depth.max(1));
    let (state_tx, state_rx) = unbounded();
    (
        EventSender {
            frames: frame_tx,
            state: state_tx,
        },
        EventReceiver {
            frames: frame_rx,
            state: state_rx,
        },
    )
}

/// Pipeline side of the event lanes
#[derive(Debug, Clone)]
pub struct EventSender {
    frames: Sender<PipelineEvent>,
    state: Sender<PipelineEvent>,
}

impl EventSender {
    /// Queue a finished frame without blocking.
    ///
    /// Returns `false` when the frame queue is full and the frame was dropped.
    /// A disconnected frontend is not a drop.
    pub fn send_frame(&self, frame: RenderedFrame) -> bool {
        match self.frames.try_send(PipelineEvent::RenderedFrame(frame)) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => true,
            Err(TrySendError::Full(_)) => false,
        }
    }

    /// Queue a status event; never blocks
    pub fn send_state(&self, event: PipelineEvent) {
        if self.state.send(event).is_err() {
            tracing::trace!("Event receiver gone");
        }
    }

    /// Status events the frontend has not picked up yet
    pub fn state_backlog(&self) -> usize {
        self.state.len()
    }
}

/// Frontend side of the event lanes
#[derive(Debug)]
pub struct EventReceiver {
    frames: Receiver<PipelineEvent>,
    state: Receiver<PipelineEvent>,
}

impl EventReceiver {
    /// Next event without blocking; status events come before frames
    pub fn try_recv(&self) -> Result<PipelineEvent, TryRecvError> {
        match self.state.try_recv() {
            Ok(event) => Ok(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => self.frames.try_recv(),
        }
    }

    /// Wait up to `timeout` for the next event on either lane
    pub fn recv_timeout(&self, timeout: Duration) -> Result<PipelineEvent, RecvTimeoutError> {
        match self.try_recv() {
            Ok(event) => return Ok(event),
            Err(TryRecvError::Disconnected) => return Err(RecvTimeoutError::Disconnected),
            Err(TryRecvError::Empty) => {}
        }
        select! {
            recv(self.state) -> event => event.map_err(|_| RecvTimeoutError::Disconnected),
            recv(self.frames) -> event => event.map_err(|_| RecvTimeoutError::Disconnected),
            default(timeout) => Err(RecvTimeoutError::Timeout),
        }
    }

    /// Iterate over the events pending right now
    pub fn try_iter(&self) -> impl Iterator<Item = PipelineEvent> + '_ {
        std::iter::from_fn(move || self.try_recv().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sequence: u64) -> RenderedFrame {
        RenderedFrame {
            sequence,
            image_slot: 0,
            width: 2,
            height: 2,
            pixels: vec![0; 4],
        }
    }

    #[test]
    fn test_full_frame_queue_drops_frames() {
        let (tx, rx) = event_channel(1);
        assert!(tx.send_frame(frame(0)));
        assert!(!tx.send_frame(frame(1)));
        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(received.len(), 1);
        assert!(matches!(&received[0], PipelineEvent::RenderedFrame(f) if f.sequence == 0));
    }

    #[test]
    fn test_state_events_never_block_behind_frames() {
        let (tx, rx) = event_channel(1);
        assert!(tx.send_frame(frame(0)));
        for _ in 0..100 {
            tx.send_state(PipelineEvent::ActiveStateChanged(true));
        }
        tx.send_state(PipelineEvent::Fault("desync".into()));
        assert_eq!(tx.state_backlog(), 101);

        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(received.len(), 102);
        assert!(matches!(received[100], PipelineEvent::Fault(_)));
        assert!(matches!(received[101], PipelineEvent::RenderedFrame(_)));
        assert_eq!(tx.state_backlog(), 0);
    }

    #[test]
    fn test_recv_timeout_sees_either_lane() {
        let (tx, rx) = event_channel(4);
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(1)),
            Err(RecvTimeoutError::Timeout)
        ));

        let sender = tx.clone();
        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            sender.send_frame(frame(3));
        });
        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(event, PipelineEvent::RenderedFrame(f) if f.sequence == 3));
        thread.join().unwrap();

        tx.send_state(PipelineEvent::Shutdown);
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)),
            Ok(PipelineEvent::Shutdown)
        ));
    }

    #[test]
    fn test_disconnected_sender() {
        let (tx, rx) = event_channel(4);
        drop(tx);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(1)),
            Err(RecvTimeoutError::Disconnected)
        ));
    }
}
