// ── Domain model ──
//
// Canonical types normalized from transport elements. Conversions live
// in `crate::convert`.

pub mod call;
pub mod device;
pub mod gpio;
pub mod group;

pub use call::{CallElement, CallState};
pub use device::{Device, DeviceType, Reachability};
pub use gpio::{GpioDirection, GpioEvent, GpioPoint, GpioState};
pub use group::Group;
