// doorlink-api: transport contract between the reconciliation core and a remote intercom controller

pub mod element;
pub mod error;
pub mod loopback;
pub mod transport;

pub use element::{
    CallElement, CommandCompletion, GpioElement, GpioOutputRequest, GroupElement, PushEvent,
    RegistrationElement,
};
pub use error::Error;
pub use loopback::{CommandReply, LoopbackTransport};
pub use transport::{COMMAND_SUCCESS_TEXT, GpioSubscription, PendingCommand, Transport};
