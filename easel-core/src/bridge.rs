use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::{
    BridgeError, EngineError, GenerationEngine, GenerationRequest, GenerationResult, Loader,
};

/// How often an interactive thread is expected to call [`AsyncExecutionBridge::poll`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Emitted while a submission runs: any number of `Progress` lines, then
/// exactly one `Done`.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusMessage {
    Progress(String),
    Done(GenerationResult),
}

impl StatusMessage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}

/// Runs the engine's blocking `generate` on a worker thread and relays its
/// status through an unbounded FIFO channel.
///
/// The engine moves into the worker for the duration of a submission and comes
/// back when the terminal message is polled, so only one submission can be in
/// flight per bridge.
pub struct AsyncExecutionBridge<L: Loader + 'static> {
    engine: Option<GenerationEngine<L>>,
    worker: Option<JoinHandle<GenerationEngine<L>>>,
    status_tx: Sender<StatusMessage>,
    status_rx: Receiver<StatusMessage>,
}

impl<L: Loader + 'static> AsyncExecutionBridge<L> {
    pub fn new(engine: GenerationEngine<L>) -> Self {
        let (status_tx, status_rx) = channel::<StatusMessage>();
        Self {
            engine: Some(engine),
            worker: None,
            status_tx,
            status_rx,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.worker.is_some()
    }

    /// The engine, when no submission is in flight.
    pub fn engine(&self) -> Option<&GenerationEngine<L>> {
        self.engine.as_ref()
    }

    pub fn submit(&mut self, request: GenerationRequest) -> Result<(), BridgeError> {
        if self.is_busy() {
            return Err(BridgeError::Busy);
        }
        let mut engine = self.engine.take().ok_or(BridgeError::EngineLost)?;
        let status_tx = self.status_tx.clone();

        let worker = thread::spawn(move || {
            let progress_tx = status_tx.clone();
            let result = engine.generate(&request, &mut |text| {
                let _ = progress_tx.send(StatusMessage::Progress(text));
            });
            let _ = status_tx.send(StatusMessage::Done(result));
            engine
        });

        self.worker = Some(worker);
        Ok(())
    }

    /// Non-blocking; returns at most one pending message. Receiving the
    /// terminal message reclaims the engine from the finished worker.
    pub fn poll(&mut self) -> Option<StatusMessage> {
        match self.status_rx.try_recv() {
            Ok(message) => Some(self.observe(message)),
            Err(_) => self.check_worker_exit(),
        }
    }

    /// Blocks until the next message arrives or `timeout` elapses.
    pub fn poll_timeout(&mut self, timeout: Duration) -> Option<StatusMessage> {
        match self.status_rx.recv_timeout(timeout) {
            Ok(message) => Some(self.observe(message)),
            Err(_) => self.check_worker_exit(),
        }
    }

    fn observe(&mut self, message: StatusMessage) -> StatusMessage {
        if message.is_terminal() {
            self.reclaim_engine();
        }
        message
    }

    /// Stands in for the `Done` a worker failed to send before exiting.
    fn check_worker_exit(&mut self) -> Option<StatusMessage> {
        if !self.worker.as_ref().is_some_and(JoinHandle::is_finished) {
            return None;
        }
        // messages sent just before exit may have landed after the first check
        if let Ok(message) = self.status_rx.try_recv() {
            return Some(self.observe(message));
        }
        self.reclaim_engine();
        Some(StatusMessage::Done(Err(EngineError::Generation(
            "generation worker exited without a result".to_string(),
        ))))
    }

    fn reclaim_engine(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        // the worker sends `Done` as its last act, so this join is short
        match worker.join() {
            Ok(engine) => self.engine = Some(engine),
            Err(_) => tracing::error!("Generation worker panicked; engine is lost"),
        }
    }
}

impl<L: Loader + 'static> Drop for AsyncExecutionBridge<L> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            tracing::debug!("Waiting for in-flight generation before shutdown");
            let _ = worker.join();
        }
    }
}
