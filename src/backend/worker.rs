//! Backend worker loop
//!
//! Each turn drains pending [`PipelineCommand`]s and then, while the pipeline
//! is active, runs one reactor turn. While inactive the loop blocks on the
//! command queue instead, so an idle backend costs nothing.
//!
//! Statistics are pushed every 500 ms while active, skipped while earlier
//! status events are still unread so a stalled frontend does not pile them up.

use crate::backend::{PipelineCommand, PipelineEvent};
use crate::pipeline::{EventSender, MandelbrotPipeline};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Interval between statistics pushes while active
const STATS_INTERVAL: Duration = Duration::from_millis(500);

/// Main backend worker
pub struct BackendWorker {
    pipeline: MandelbrotPipeline,
    /// Command receiver from the frontend
    command_rx: Receiver<PipelineCommand>,
    /// Event sender to the frontend
    event_tx: EventSender,
    /// Longest wait of one reactor turn
    poll_timeout: Duration,
    /// Running flag
    running: Arc<AtomicBool>,
    /// Last time stats were sent
    last_stats_time: Instant,
}

impl BackendWorker {
    pub fn new(
        pipeline: MandelbrotPipeline,
        command_rx: Receiver<PipelineCommand>,
        event_tx: EventSender,
        poll_timeout: Duration,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            pipeline,
            command_rx,
            event_tx,
            poll_timeout,
            running,
            last_stats_time: Instant::now(),
        }
    }

    pub fn pipeline(&self) -> &MandelbrotPipeline {
        &self.pipeline
    }

    /// Run the main worker loop
    pub fn run(&mut self) {
        tracing::info!("Backend worker started");

        while self.running.load(Ordering::SeqCst) {
            self.process_commands();
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            if self.pipeline.is_active() {
                self.turn();
            } else {
                self.wait_for_command();
            }
        }

        // Cleanup
        self.pipeline.deactivate();
        self.event_tx.send_state(PipelineEvent::Shutdown);
        tracing::info!("Backend worker stopped");
    }

    /// One reactor turn plus periodic statistics
    fn turn(&mut self) {
        if let Err(e) = self.pipeline.poll(self.poll_timeout) {
            // The pipeline already reported the fault and stopped
            tracing::debug!("Reactor turn ended with: {}", e);
        }
        if self.last_stats_time.elapsed() >= STATS_INTERVAL {
            if self.event_tx.state_backlog() == 0 {
                self.send_stats();
            }
            self.last_stats_time = Instant::now();
        }
    }

    fn wait_for_command(&mut self) {
        match self.command_rx.recv_timeout(self.poll_timeout) {
            Ok(cmd) => self.handle_command(cmd),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => self.running.store(false, Ordering::SeqCst),
        }
    }

    /// Process pending commands from the frontend
    fn process_commands(&mut self) {
        loop {
            match self.command_rx.try_recv() {
                Ok(cmd) => self.handle_command(cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.running.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }
    }

    /// Handle a single command
    fn handle_command(&mut self, cmd: PipelineCommand) {
        match cmd {
            PipelineCommand::Activate { max_workers } => match self.pipeline.activate(max_workers) {
                Ok(workers) => {
                    tracing::info!("Activated with {} worker(s)", workers);
                    self.send_resources();
                }
                Err(e) => {
                    tracing::warn!("Activation failed: {}", e);
                    self.event_tx.send_state(PipelineEvent::Fault(e.to_string()));
                }
            },
            PipelineCommand::Deactivate => {
                self.pipeline.deactivate();
                self.send_stats();
            }
            PipelineCommand::SetSize { width, height } => {
                if let Err(e) = self.pipeline.set_size(width, height) {
                    tracing::warn!("Cannot resize to {}x{}: {}", width, height, e);
                    self.event_tx.send_state(PipelineEvent::Fault(e.to_string()));
                }
            }
            PipelineCommand::SetViewportTarget { x, y } => {
                self.pipeline.set_viewport_target(x, y);
            }
            PipelineCommand::ResetZoom => {
                self.pipeline.reset_zoom();
            }
            PipelineCommand::RequestResources => {
                self.send_resources();
            }
            PipelineCommand::RequestStats => {
                self.send_stats();
            }
            PipelineCommand::Shutdown => {
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }

    fn send_resources(&self) {
        self.event_tx.send_state(PipelineEvent::Resources(self.pipeline.resources()));
    }

    fn send_stats(&self) {
        self.event_tx.send_state(PipelineEvent::Stats(self.pipeline.stats()));
    }
}
