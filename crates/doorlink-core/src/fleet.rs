// ── Fleet facade ──
//
// Wires the event bus, device registry, connection supervisor and the
// per-device GPIO synchronizers to one transport. This is what a caller
// builds; the components stay usable on their own.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tracing::{debug, info};

use doorlink_api::Transport;

use crate::bus::EventBus;
use crate::config::ControllerConfig;
use crate::error::CoreError;
use crate::gpio::{GpioSynchronizer, GpioTransport, HybridGpioTransport};
use crate::registry::DeviceRegistry;
use crate::store::Collections;
use crate::supervisor::{ConnectionState, ConnectionSupervisor};

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<FleetInner>`. Does not connect on
/// construction: call [`connect()`](Self::connect).
#[derive(Clone)]
pub struct Fleet {
    inner: Arc<FleetInner>,
}

struct FleetInner {
    config: ControllerConfig,
    bus: Arc<EventBus>,
    registry: DeviceRegistry,
    supervisor: ConnectionSupervisor,
    gpio_transport: Arc<dyn GpioTransport>,
    gpio: DashMap<String, GpioSynchronizer>,
    started: AtomicBool,
}

impl Fleet {
    /// Build a fleet publishing on the process-wide bus.
    pub fn new(config: ControllerConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_bus(config, transport, EventBus::global())
    }

    pub fn with_bus(
        config: ControllerConfig,
        transport: Arc<dyn Transport>,
        bus: Arc<EventBus>,
    ) -> Self {
        let gpio_transport: Arc<dyn GpioTransport> = Arc::new(HybridGpioTransport::over(
            Arc::clone(&transport),
            config.command_poll.clone(),
        ));
        Self::with_gpio_transport(config, transport, bus, gpio_transport)
    }

    /// Like [`with_bus`](Self::with_bus), with a caller-supplied GPIO
    /// transport.
    pub fn with_gpio_transport(
        config: ControllerConfig,
        transport: Arc<dyn Transport>,
        bus: Arc<EventBus>,
        gpio_transport: Arc<dyn GpioTransport>,
    ) -> Self {
        let registry = DeviceRegistry::new(Arc::clone(&transport), Arc::clone(&bus), &config);
        let supervisor =
            ConnectionSupervisor::new(transport, Arc::clone(&bus), config.reconnect.clone());

        Self {
            inner: Arc::new(FleetInner {
                config,
                bus,
                registry,
                supervisor,
                gpio_transport,
                gpio: DashMap::new(),
                started: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.inner.registry
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.inner.supervisor
    }

    pub fn collections(&self) -> &Arc<Collections> {
        self.inner.registry.collections()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.supervisor.state()
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Start the background listeners (once) and open the session.
    ///
    /// Returns when the session start was requested; the device list
    /// fills in once the connected notification triggers a refresh.
    pub async fn connect(&self) -> Result<(), CoreError> {
        if !self.inner.started.swap(true, Ordering::SeqCst) {
            self.inner.registry.start();
            self.inner.supervisor.start();
        }
        info!(
            server = %self.inner.config.server,
            port = self.inner.config.port,
            realm = %self.inner.config.realm,
            "connecting to controller"
        );
        self.inner.supervisor.open_connection().await
    }

    pub async fn reconnect(&self) -> Result<(), CoreError> {
        self.inner.supervisor.reconnect().await
    }

    /// Stop every background task and close the session.
    pub async fn shutdown(&self) {
        for entry in &self.inner.gpio {
            entry.value().shutdown();
        }
        self.inner.gpio.clear();
        self.inner.registry.shutdown();
        self.inner.supervisor.shutdown().await;
        debug!("fleet shut down");
    }

    // ── GPIO ─────────────────────────────────────────────────────────

    /// The GPIO synchronizer for `dirno`, created on first use.
    pub fn gpio(&self, dirno: &str) -> Result<GpioSynchronizer, CoreError> {
        if self.inner.registry.device(dirno).is_none() {
            return Err(CoreError::DeviceNotFound {
                identifier: dirno.to_owned(),
            });
        }
        let sync = self
            .inner
            .gpio
            .entry(dirno.to_owned())
            .or_insert_with(|| {
                GpioSynchronizer::spawn(
                    dirno,
                    Arc::clone(&self.inner.gpio_transport),
                    Arc::clone(&self.inner.bus),
                )
            })
            .clone();
        Ok(sync)
    }

    /// Drop the synchronizer for `dirno`, if one exists.
    pub fn release_gpio(&self, dirno: &str) {
        if let Some((_, sync)) = self.inner.gpio.remove(dirno) {
            sync.shutdown();
        }
    }
}
