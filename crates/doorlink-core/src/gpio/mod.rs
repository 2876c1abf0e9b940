// ── GPIO synchronization ──
//
// One `GpioSynchronizer` per device, fed through a `GpioTransport`.

mod synchronizer;
mod transport;

pub use synchronizer::{GpioSynchronizer, Readiness};
pub use transport::{
    CommandPath, GpioPullPath, GpioPushPath, GpioTransport, HybridGpioTransport, PushPath,
};
