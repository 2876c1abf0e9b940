// Transport contract consumed by the reconciliation core.
//
// Implementations own the wire protocol (publish/subscribe plus remote
// procedure calls). The core only sees push events, pull queries and
// commands whose completion arrives asynchronously.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::element::{
    CommandCompletion, GpioElement, GpioOutputRequest, GroupElement, PushEvent,
    RegistrationElement,
};
use crate::error::Error;

/// Completion text a controller reports for a successful command.
pub const COMMAND_SUCCESS_TEXT: &str = "OK";

// ── PendingCommand ───────────────────────────────────────────────────

/// Completion flag of a command issued through [`Transport`].
///
/// The transport fills it exactly once when the remote side answers;
/// callers poll it. Cloning shares the same flag.
#[derive(Debug, Clone, Default)]
pub struct PendingCommand {
    slot: Arc<OnceLock<CommandCompletion>>,
}

impl PendingCommand {
    pub fn new() -> Self {
        Self::default()
    }

    /// A command that completed before it was handed out.
    pub fn completed(success: bool, text: impl Into<String>) -> Self {
        let pending = Self::new();
        pending.complete(success, text);
        pending
    }

    /// Record the completion. Returns `false` if one was already recorded.
    pub fn complete(&self, success: bool, text: impl Into<String>) -> bool {
        self.slot
            .set(CommandCompletion {
                success,
                text: text.into(),
            })
            .is_ok()
    }

    pub fn completion(&self) -> Option<&CommandCompletion> {
        self.slot.get()
    }

    pub fn is_complete(&self) -> bool {
        self.slot.get().is_some()
    }
}

// ── GpioSubscription ─────────────────────────────────────────────────

/// Live GPIO updates for a single directory number.
///
/// Wraps the transport's push receiver and drops everything that is not
/// a GPIO change for `dirno`.
pub struct GpioSubscription {
    dirno: String,
    rx: broadcast::Receiver<Arc<PushEvent>>,
}

impl GpioSubscription {
    pub fn new(dirno: impl Into<String>, rx: broadcast::Receiver<Arc<PushEvent>>) -> Self {
        Self {
            dirno: dirno.into(),
            rx,
        }
    }

    pub fn dirno(&self) -> &str {
        &self.dirno
    }

    /// Receive the next GPIO change for this directory number.
    ///
    /// Returns `None` once the transport has been dropped.
    pub async fn recv(&mut self) -> Option<GpioElement> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if let PushEvent::Gpio { dirno, element } = event.as_ref() {
                        if *dirno == self.dirno {
                            return Some(element.clone());
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(dirno = %self.dirno, skipped, "GPIO subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ── Transport ────────────────────────────────────────────────────────

/// Abstract link to the remote controller.
///
/// Queries are `async`; commands return a [`PendingCommand`] immediately
/// and complete out of band. A command that cannot even be issued (no
/// session, encoding failure) returns `Err` synchronously.
#[async_trait]
pub trait Transport: Send + Sync {
    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start the session. Starting an already running session is a no-op.
    async fn start(&self) -> Result<(), Error>;

    /// Stop the session.
    async fn stop(&self) -> Result<(), Error>;

    fn is_connected(&self) -> bool;

    // ── Push ─────────────────────────────────────────────────────────

    /// Subscribe to every unsolicited event the transport produces.
    fn subscribe(&self) -> broadcast::Receiver<Arc<PushEvent>>;

    /// Publish a GPIO output change on the low-latency push path.
    ///
    /// Fire-and-forget: `Ok` means the message left, not that the output
    /// switched.
    fn publish_gpio_output(&self, dirno: &str, request: &GpioOutputRequest) -> Result<(), Error> {
        let _ = (dirno, request);
        Err(Error::Unsupported("push GPIO output"))
    }

    // ── Pull ─────────────────────────────────────────────────────────

    async fn list_registered_devices(&self) -> Result<Vec<RegistrationElement>, Error>;

    async fn list_groups(&self) -> Result<Vec<GroupElement>, Error> {
        Ok(Vec::new())
    }

    async fn list_gpio(&self, dirno: &str) -> Result<Vec<GpioElement>, Error>;

    // ── Commands ─────────────────────────────────────────────────────

    fn set_gpio_output(
        &self,
        dirno: &str,
        request: &GpioOutputRequest,
    ) -> Result<PendingCommand, Error>;

    fn open_door(&self, dirno: &str) -> Result<PendingCommand, Error>;

    fn post_call(&self, from_dirno: &str, to_dirno: &str) -> Result<PendingCommand, Error>;

    fn delete_call(&self, call_id: &str) -> Result<PendingCommand, Error>;

    fn simulate_key_press(&self, dirno: &str, key: &str) -> Result<PendingCommand, Error>;

    fn tone_test(&self, dirno: &str) -> Result<PendingCommand, Error>;
}
