// doorlink-core: Reconciliation engine between a doorlink transport and its consumers.

pub mod bus;
pub mod config;
pub mod convert;
pub mod error;
pub mod fleet;
pub mod gpio;
pub mod model;
pub mod registry;
pub mod store;
pub mod stream;
pub mod supervisor;

mod command;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bus::{Channel, EventBus, SubscriptionId};
pub use config::{CommandPollConfig, ControllerConfig, Credentials, ReconnectPolicy};
pub use error::CoreError;
pub use fleet::Fleet;
pub use gpio::{GpioSynchronizer, GpioTransport, HybridGpioTransport, Readiness};
pub use registry::{DeviceRegistry, RefreshOutcome};
pub use store::Collections;
pub use stream::{EntityStream, Snapshot};
pub use supervisor::{ConnectionState, ConnectionSupervisor};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    CallElement, CallState, Device, DeviceType, GpioDirection, GpioEvent, GpioPoint, GpioState,
    Group, Reachability,
};
