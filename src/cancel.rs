//! Operator-initiated shutdown.
//!
//! One token per session, threaded through the engine (pre-dispatch
//! checkpoint) and every adapter wait (process boundary). No process-wide
//! singleton: each scan owns its controller.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct CancellationController {
    token: CancellationToken,
    halt: CancellationToken,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle observing this controller
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Give up on an orderly shutdown. Implies [`CancellationController::cancel`].
    pub fn halt(&self) {
        self.token.cancel();
        self.halt.cancel();
    }

    pub fn is_halted(&self) -> bool {
        self.halt.is_cancelled()
    }

    /// Resolves once [`CancellationController::halt`] has been called
    pub async fn halted(&self) {
        self.halt.cancelled().await;
    }

    /// Cancel on the first Ctrl-C and halt on the second. The listener ends
    /// once halted, whoever triggered it.
    pub fn listen_for_interrupt(&self) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = controller.token.cancelled() => {}
                signal = tokio::signal::ctrl_c() => match signal {
                    Ok(()) => {
                        info!("interrupt received, stopping scan");
                        controller.cancel();
                    }
                    Err(err) => {
                        warn!(error = %err, "unable to listen for interrupt");
                        return;
                    }
                },
            }

            tokio::select! {
                _ = controller.halted() => {}
                signal = tokio::signal::ctrl_c() => {
                    if signal.is_ok() {
                        warn!("second interrupt received, abandoning shutdown");
                        controller.halt();
                    }
                }
            }
        })
    }
}
