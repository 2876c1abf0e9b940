// ── Connection supervisor ──
//
// Opens the controller session, watches the transport's connection
// notifications and restarts the session after a loss. Restarts are
// bounded by a retry budget that refills on every successful connect;
// once it is spent the supervisor reports it once and stays disconnected
// until someone calls `reconnect()`.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use strum::Display;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use doorlink_api::{PushEvent, Transport};

use crate::bus::EventBus;
use crate::config::ReconnectPolicy;
use crate::error::CoreError;

// ── ConnectionState ──────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

// ── ConnectionSupervisor ─────────────────────────────────────────────

/// Owns the lifecycle of the transport session.
///
/// Cheaply cloneable via `Arc<SupervisorInner>`.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    transport: Arc<dyn Transport>,
    bus: Arc<EventBus>,
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
    attempts_left: AtomicU32,
    /// Set once budget exhaustion was raised; cleared on connect.
    exhaustion_reported: AtomicBool,
    /// Held for the whole of a restart sequence.
    restart_gate: AsyncMutex<()>,
    /// Cancels the automatic restart loops spawned so far. Replaced by
    /// every manual reconnect.
    restart_cancel: Mutex<CancellationToken>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionSupervisor {
    pub fn new(transport: Arc<dyn Transport>, bus: Arc<EventBus>, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let attempts_left = AtomicU32::new(policy.max_attempts);
        let cancel = CancellationToken::new();
        Self {
            inner: Arc::new(SupervisorInner {
                transport,
                bus,
                policy,
                state,
                attempts_left,
                exhaustion_reported: AtomicBool::new(false),
                restart_gate: AsyncMutex::new(()),
                restart_cancel: Mutex::new(cancel.child_token()),
                cancel,
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Restart attempts left before manual intervention is needed.
    pub fn remaining_attempts(&self) -> u32 {
        self.inner.attempts_left.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the listener for transport connection notifications. Must be
    /// called from within a Tokio runtime, before `open_connection`.
    pub fn start(&self) {
        let rx = self.inner.transport.subscribe();
        let handle = tokio::spawn(notification_listener(
            self.clone(),
            rx,
            self.inner.cancel.clone(),
        ));
        self.inner
            .task_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Ask the transport to start its session.
    ///
    /// Permitted in any state; starting a live session is a no-op. The
    /// connected notification that follows does the rest.
    pub async fn open_connection(&self) -> Result<(), CoreError> {
        if self.state() != ConnectionState::Connected {
            self.set_state(ConnectionState::Connecting);
        }
        if let Err(e) = self.inner.transport.start().await {
            warn!(error = %e, "failed to open controller session");
            if !self.inner.transport.is_connected() {
                self.set_state(ConnectionState::Disconnected);
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Restart the session on request, regardless of the remaining
    /// budget.
    ///
    /// Abandons any automatic restart still backing off. The budget
    /// refills only once the connected notification arrives, so a failed
    /// reconnect leaves it as it was.
    pub async fn reconnect(&self) -> Result<(), CoreError> {
        let fresh = self.inner.cancel.child_token();
        std::mem::replace(&mut *self.restart_token(), fresh).cancel();
        let _gate = self.inner.restart_gate.lock().await;
        info!("manual reconnect requested");

        self.set_state(ConnectionState::Connecting);
        if let Err(e) = self.inner.transport.stop().await {
            debug!(error = %e, "stop before reconnect failed");
        }
        if let Err(e) = self.inner.transport.start().await {
            self.set_state(ConnectionState::Disconnected);
            return Err(e.into());
        }
        Ok(())
    }

    /// Stop the listener and close the session.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handles: Vec<_> = self
            .inner
            .task_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            handle.abort();
        }
        if let Err(e) = self.inner.transport.stop().await {
            warn!(error = %e, "transport stop failed (non-fatal)");
        }
        self.set_state(ConnectionState::Disconnected);
        debug!("connection supervisor stopped");
    }

    fn restart_token(&self) -> MutexGuard<'_, CancellationToken> {
        self.inner
            .restart_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ── Notification handling ────────────────────────────────────────

    fn on_connected(&self) {
        self.inner
            .attempts_left
            .store(self.inner.policy.max_attempts, Ordering::SeqCst);
        self.inner.exhaustion_reported.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);
        info!("controller connected");

        let bus = &self.inner.bus;
        bus.connection_changed().publish(&true);
        bus.retrieval_start().notify();
    }

    fn on_disconnected(&self) {
        self.set_state(ConnectionState::Disconnected);
        warn!(
            remaining = self.remaining_attempts(),
            "controller connection lost"
        );
        self.inner.bus.connection_changed().publish(&false);

        let supervisor = self.clone();
        let abandon = self.restart_token().clone();
        tokio::spawn(async move { supervisor.restart_loop(&abandon).await });
    }

    fn on_log(&self, line: &str) {
        debug!(target: "doorlink::transport", "{line}");
        self.inner.bus.diagnostic().publish(&line.to_owned());
    }

    /// Restart the session until it comes back or the budget runs out.
    ///
    /// One loop runs at a time; a loop that finds the session already
    /// restored by its predecessor exits without spending an attempt.
    /// `abandon` fires on shutdown and on a manual reconnect.
    async fn restart_loop(&self, abandon: &CancellationToken) {
        let _gate = self.inner.restart_gate.lock().await;
        let policy = &self.inner.policy;

        loop {
            if abandon.is_cancelled() || self.inner.transport.is_connected() {
                return;
            }

            let taken = self.inner.attempts_left.fetch_update(
                Ordering::SeqCst,
                Ordering::SeqCst,
                |left| left.checked_sub(1),
            );
            let Ok(left_before) = taken else {
                if !self.inner.exhaustion_reported.swap(true, Ordering::SeqCst) {
                    warn!(
                        max_attempts = policy.max_attempts,
                        "reconnect budget exhausted; waiting for manual reconnect"
                    );
                    self.inner.bus.raise(CoreError::ReconnectBudgetExhausted {
                        max_attempts: policy.max_attempts,
                    });
                }
                return;
            };

            let attempt = policy.max_attempts.saturating_sub(left_before);
            let delay = policy.backoff(attempt);
            self.set_state(ConnectionState::Connecting);
            info!(
                attempt = attempt + 1,
                remaining = left_before - 1,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "restarting controller session"
            );

            tokio::select! {
                biased;
                () = abandon.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            if let Err(e) = self.inner.transport.stop().await {
                debug!(error = %e, "stop before restart failed");
            }
            match self.inner.transport.start().await {
                Ok(()) => return,
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "session restart failed");
                    self.set_state(ConnectionState::Disconnected);
                    self.inner.bus.raise(e.into());
                }
            }
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────────

async fn notification_listener(
    supervisor: ConnectionSupervisor,
    mut rx: tokio::sync::broadcast::Receiver<Arc<PushEvent>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(event) => match event.as_ref() {
                    PushEvent::Connection(true) => supervisor.on_connected(),
                    PushEvent::Connection(false) => supervisor.on_disconnected(),
                    PushEvent::Log(line) => supervisor.on_log(line),
                    PushEvent::Registration(_) | PushEvent::Call(_) | PushEvent::Gpio { .. } => {}
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "supervisor listener lagged");
                    if !supervisor.inner.transport.is_connected()
                        && supervisor.state() == ConnectionState::Connected
                    {
                        supervisor.on_disconnected();
                    }
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("supervisor listener exited");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    use doorlink_api::LoopbackTransport;

    fn supervisor(max_attempts: u32) -> (LoopbackTransport, Arc<EventBus>, ConnectionSupervisor) {
        let transport = LoopbackTransport::new();
        let bus = Arc::new(EventBus::new());
        let policy = ReconnectPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };
        let supervisor = ConnectionSupervisor::new(Arc::new(transport.clone()), Arc::clone(&bus), policy);
        (transport, bus, supervisor)
    }

    #[test]
    fn starts_disconnected_with_full_budget() {
        let (_, _, supervisor) = supervisor(3);
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
        assert_eq!(supervisor.remaining_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn open_connection_reaches_connected() {
        let (_, _, supervisor) = supervisor(3);
        supervisor.start();
        let mut state = supervisor.subscribe_state();

        supervisor.open_connection().await.unwrap();
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_open_returns_to_disconnected() {
        let (transport, _, supervisor) = supervisor(3);
        transport.fail_next_starts(1);

        let err = supervisor.open_connection().await.unwrap_err();
        assert!(matches!(err, CoreError::Api { .. }));
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_reconnect_refills_budget_once_connected() {
        let (transport, _, supervisor) = supervisor(2);
        supervisor.start();
        let mut state = supervisor.subscribe_state();
        supervisor.inner.attempts_left.store(0, Ordering::SeqCst);

        supervisor.reconnect().await.unwrap();
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        assert!(transport.is_connected());
        assert_eq!(supervisor.remaining_attempts(), 2);
        assert_eq!(transport.stop_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_manual_reconnect_keeps_budget_spent() {
        let (transport, _, supervisor) = supervisor(2);
        supervisor.start();
        supervisor.inner.attempts_left.store(0, Ordering::SeqCst);
        transport.fail_next_starts(1);

        let err = supervisor.reconnect().await.unwrap_err();
        assert!(matches!(err, CoreError::Api { .. }));
        tokio::task::yield_now().await;
        assert_eq!(supervisor.remaining_attempts(), 0);
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn state_names() {
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
    }
}
