// ── Per-device GPIO synchronizer ──
//
// Merges a device's live GPIO push stream with pulled snapshots into two
// point sets (inputs and outputs). Every change, whatever its source,
// goes through `upsert`, which is serialized per device and emits a
// notification only when a line's logical state actually changes.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use doorlink_api::{GpioOutputRequest, GpioSubscription};

use super::transport::GpioTransport;
use crate::bus::{Channel, EventBus};
use crate::error::CoreError;
use crate::model::{GpioDirection, GpioEvent, GpioPoint};

/// Progress of the initial snapshot pull.
#[derive(Debug, Clone)]
pub enum Readiness {
    Pending,
    Ready,
    Failed(Arc<CoreError>),
}

#[derive(Default)]
struct PointSets {
    inputs: BTreeMap<String, GpioPoint>,
    outputs: BTreeMap<String, GpioPoint>,
}

impl PointSets {
    fn side(&self, direction: GpioDirection) -> &BTreeMap<String, GpioPoint> {
        match direction {
            GpioDirection::Input => &self.inputs,
            GpioDirection::Output => &self.outputs,
        }
    }

    fn side_mut(&mut self, direction: GpioDirection) -> &mut BTreeMap<String, GpioPoint> {
        match direction {
            GpioDirection::Input => &mut self.inputs,
            GpioDirection::Output => &mut self.outputs,
        }
    }
}

// ── GpioSynchronizer ─────────────────────────────────────────────────

/// GPIO state of one device. Cheaply cloneable.
#[derive(Clone)]
pub struct GpioSynchronizer {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    dirno: String,
    transport: Arc<dyn GpioTransport>,
    bus: Arc<EventBus>,
    /// Serializes upserts, including the notification that follows.
    write_gate: Mutex<()>,
    points: RwLock<PointSets>,
    on_changed: Channel<GpioEvent>,
    readiness: watch::Sender<Readiness>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for SyncInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl GpioSynchronizer {
    /// Create the synchronizer for `dirno` and start populating it.
    ///
    /// Subscribes to live updates first so nothing is missed while the
    /// initial snapshot is in flight. The initial pull never fails this
    /// call; await [`ready`](Self::ready) to learn how it went. Must be
    /// called from within a Tokio runtime.
    pub fn spawn(
        dirno: impl Into<String>,
        transport: Arc<dyn GpioTransport>,
        bus: Arc<EventBus>,
    ) -> Self {
        let dirno = dirno.into();
        let subscription = transport.subscribe(&dirno);
        let (readiness, _) = watch::channel(Readiness::Pending);

        let sync = Self {
            inner: Arc::new(SyncInner {
                on_changed: Channel::new("gpio_point_changed"),
                dirno,
                transport,
                bus,
                write_gate: Mutex::new(()),
                points: RwLock::new(PointSets::default()),
                readiness,
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        };

        let push = tokio::spawn(push_loop(
            Arc::downgrade(&sync.inner),
            subscription,
            sync.inner.cancel.clone(),
        ));
        let initial = tokio::spawn(initial_pull(sync.clone()));
        lock(&sync.inner.tasks).extend([push, initial]);

        sync
    }

    pub fn dirno(&self) -> &str {
        &self.inner.dirno
    }

    /// Per-device change notifications, alongside the bus-wide
    /// `gpio_event` channel.
    pub fn on_changed(&self) -> &Channel<GpioEvent> {
        &self.inner.on_changed
    }

    // ── Readiness ────────────────────────────────────────────────────

    pub fn readiness(&self) -> Readiness {
        self.inner.readiness.borrow().clone()
    }

    /// Resolve once the initial snapshot was applied, or with its error.
    pub async fn ready(&self) -> Result<(), Arc<CoreError>> {
        let mut rx = self.inner.readiness.subscribe();
        let settled = rx
            .wait_for(|r| !matches!(r, Readiness::Pending))
            .await
            .map(|r| r.clone());
        match settled {
            Ok(Readiness::Failed(err)) => Err(err),
            Ok(_) => Ok(()),
            Err(_) => Err(Arc::new(CoreError::Cancelled {
                operation: "gpio_initial_pull",
            })),
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    fn read_points(&self) -> std::sync::RwLockReadGuard<'_, PointSets> {
        self.inner
            .points
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Input lines ordered by id.
    pub fn inputs(&self) -> Vec<GpioPoint> {
        self.read_points().inputs.values().cloned().collect()
    }

    /// Output lines ordered by id.
    pub fn outputs(&self) -> Vec<GpioPoint> {
        self.read_points().outputs.values().cloned().collect()
    }

    pub fn point(&self, direction: GpioDirection, id: &str) -> Option<GpioPoint> {
        self.read_points().side(direction).get(id).cloned()
    }

    // ── Mutation ─────────────────────────────────────────────────────

    /// Store `point` unless a point with the same direction and id already
    /// has the same logical state.
    ///
    /// Returns `true` and notifies when something changed. Must not be
    /// called from inside a change handler of the same device.
    pub fn upsert(&self, point: GpioPoint) -> bool {
        let _gate = lock(&self.inner.write_gate);
        {
            let mut sets = self
                .inner
                .points
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let side = sets.side_mut(point.direction);
            if side
                .get(&point.id)
                .is_some_and(|existing| existing.state == point.state)
            {
                return false;
            }
            side.insert(point.id.clone(), point.clone());
        }

        debug!(
            dirno = %self.inner.dirno,
            gpio = %point.id,
            direction = %point.direction,
            state = %point.state,
            "GPIO point changed"
        );
        let event = GpioEvent {
            dirno: self.inner.dirno.clone(),
            point,
        };
        self.inner.on_changed.publish(&event);
        self.inner.bus.gpio_event().publish(&event);
        true
    }

    /// Pull a full snapshot and upsert every point. Returns how many
    /// points changed.
    ///
    /// If `cancel` fires before the snapshot arrives, nothing is applied.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<usize, CoreError> {
        let elements = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(CoreError::Cancelled { operation: "gpio_refresh" });
            }
            result = self.inner.transport.snapshot(&self.inner.dirno) => result?,
        };

        let mut changed = 0;
        for element in elements {
            match GpioPoint::try_from(element) {
                Ok(point) => {
                    if self.upsert(point) {
                        changed += 1;
                    }
                }
                Err(e) => warn!(dirno = %self.inner.dirno, error = %e, "skipping GPIO point"),
            }
        }
        Ok(changed)
    }

    // ── Output control ───────────────────────────────────────────────

    /// Drive output `id` active, optionally self-resetting after
    /// `duration`.
    pub async fn activate(
        &self,
        id: &str,
        duration: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        self.set_output(
            GpioOutputRequest {
                id: id.to_owned(),
                active: true,
                duration,
            },
            cancel,
        )
        .await
    }

    pub async fn deactivate(&self, id: &str, cancel: &CancellationToken) -> Result<(), CoreError> {
        self.set_output(
            GpioOutputRequest {
                id: id.to_owned(),
                active: false,
                duration: None,
            },
            cancel,
        )
        .await
    }

    // The point sets are not touched here: the device reports the new
    // level on the push stream like any other transition.
    async fn set_output(
        &self,
        request: GpioOutputRequest,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled {
                operation: "set_gpio_output",
            });
        }
        info!(
            dirno = %self.inner.dirno,
            gpio = %request.id,
            active = request.active,
            "setting GPIO output"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CoreError::Cancelled { operation: "set_gpio_output" }),
            result = self.inner.transport.set_output(&self.inner.dirno, &request) => result,
        }
    }

    /// Stop following the push stream.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        for task in lock(&self.inner.tasks).drain(..) {
            task.abort();
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// No cancellation: bounded by the transport's own query timeout.
async fn initial_pull(sync: GpioSynchronizer) {
    let never = CancellationToken::new();
    match sync.refresh(&never).await {
        Ok(changed) => {
            debug!(dirno = %sync.inner.dirno, changed, "initial GPIO snapshot applied");
            sync.inner.readiness.send_replace(Readiness::Ready);
        }
        Err(e) => {
            warn!(
                dirno = %sync.inner.dirno,
                error = %e,
                "initial GPIO snapshot failed; relying on live updates"
            );
            let err = Arc::new(e);
            sync.inner.bus.exception_raised().publish(&err);
            sync.inner.readiness.send_replace(Readiness::Failed(err));
        }
    }
}

async fn push_loop(
    sync: Weak<SyncInner>,
    mut subscription: GpioSubscription,
    cancel: CancellationToken,
) {
    loop {
        let element = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            element = subscription.recv() => element,
        };
        let Some(element) = element else {
            break;
        };
        let Some(inner) = sync.upgrade() else {
            break;
        };
        let sync = GpioSynchronizer { inner };
        match GpioPoint::try_from(element) {
            Ok(point) => {
                sync.upsert(point);
            }
            Err(e) => warn!(dirno = %sync.inner.dirno, error = %e, "ignoring GPIO push"),
        }
    }
    debug!(dirno = %subscription.dirno(), "GPIO push loop exited");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use doorlink_api::{GpioElement, LoopbackTransport, Transport};

    use crate::config::CommandPollConfig;
    use crate::gpio::HybridGpioTransport;
    use crate::model::GpioState;

    fn point(id: &str, state: GpioState) -> GpioPoint {
        GpioPoint {
            id: id.into(),
            direction: GpioDirection::Input,
            state,
            updated_at: Utc::now(),
            raw_state: state.to_string(),
        }
    }

    fn synchronizer(transport: &LoopbackTransport) -> (Arc<EventBus>, GpioSynchronizer) {
        let bus = Arc::new(EventBus::new());
        let gpio = Arc::new(HybridGpioTransport::over(
            Arc::new(transport.clone()),
            CommandPollConfig::default(),
        ));
        let sync = GpioSynchronizer::spawn("100", gpio, Arc::clone(&bus));
        (bus, sync)
    }

    #[tokio::test]
    async fn unchanged_state_is_silent() {
        let transport = LoopbackTransport::new();
        transport.start().await.unwrap();
        let (bus, sync) = synchronizer(&transport);
        sync.ready().await.unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.gpio_event().subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(sync.upsert(point("in1", GpioState::Active)));
        assert!(!sync.upsert(point("in1", GpioState::Active)));
        assert!(sync.upsert(point("in1", GpioState::Inactive)));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn same_id_different_direction_are_distinct() {
        let transport = LoopbackTransport::new();
        let (_bus, sync) = synchronizer(&transport);

        sync.upsert(point("1", GpioState::Active));
        sync.upsert(GpioPoint {
            direction: GpioDirection::Output,
            ..point("1", GpioState::Active)
        });
        assert_eq!(sync.inputs().len(), 1);
        assert_eq!(sync.outputs().len(), 1);
    }

    #[tokio::test]
    async fn failed_initial_pull_reports_through_ready() {
        let transport = LoopbackTransport::new();
        // No session: the pull fails.
        let (_bus, sync) = synchronizer(&transport);

        let err = sync.ready().await.unwrap_err();
        assert!(matches!(*err, CoreError::TransportUnavailable));
        assert!(matches!(sync.readiness(), Readiness::Failed(_)));
    }

    #[tokio::test]
    async fn cancelled_refresh_applies_nothing() {
        let transport = LoopbackTransport::new();
        transport.start().await.unwrap();
        let (_bus, sync) = synchronizer(&transport);
        sync.ready().await.unwrap();
        transport.set_gpio(
            "100",
            vec![GpioElement {
                id: "in1".into(),
                direction: "input".into(),
                state: "high".into(),
                timestamp: None,
            }],
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            sync.refresh(&cancel).await,
            Err(CoreError::Cancelled { .. })
        ));
        assert!(sync.inputs().is_empty());

        assert_eq!(sync.refresh(&CancellationToken::new()).await.unwrap(), 1);
        assert_eq!(sync.inputs().len(), 1);
    }
}
