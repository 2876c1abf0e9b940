// ── Dual-path GPIO transport ──
//
// A device's GPIO lines can be reached two ways: a low-latency push path
// (publish a message, receive live updates) and a request/response path
// that can also answer bulk queries. `HybridGpioTransport` composes them:
//
// | Operation   | Path                                    |
// |-------------|-----------------------------------------|
// | snapshot    | pull                                    |
// | set_output  | push, falling back to pull on an error  |
// | subscribe   | push                                    |

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use doorlink_api::{GpioElement, GpioOutputRequest, GpioSubscription, Transport};

use crate::command::await_completion;
use crate::config::CommandPollConfig;
use crate::error::CoreError;

/// Request/response path: reliable, slower.
#[async_trait]
pub trait GpioPullPath: Send + Sync {
    async fn snapshot(&self, dirno: &str) -> Result<Vec<GpioElement>, CoreError>;

    async fn set_output(&self, dirno: &str, request: &GpioOutputRequest) -> Result<(), CoreError>;
}

/// Publish/subscribe path: fast, fire-and-forget.
pub trait GpioPushPath: Send + Sync {
    fn subscribe(&self, dirno: &str) -> GpioSubscription;

    /// Fails synchronously if the message could not be sent.
    fn set_output(&self, dirno: &str, request: &GpioOutputRequest) -> Result<(), CoreError>;
}

/// What a [`GpioSynchronizer`](super::GpioSynchronizer) needs from the
/// outside world.
#[async_trait]
pub trait GpioTransport: Send + Sync {
    fn subscribe(&self, dirno: &str) -> GpioSubscription;

    async fn snapshot(&self, dirno: &str) -> Result<Vec<GpioElement>, CoreError>;

    async fn set_output(&self, dirno: &str, request: &GpioOutputRequest) -> Result<(), CoreError>;
}

// ── HybridGpioTransport ──────────────────────────────────────────────

pub struct HybridGpioTransport {
    push: Arc<dyn GpioPushPath>,
    pull: Arc<dyn GpioPullPath>,
}

impl HybridGpioTransport {
    pub fn new(push: Arc<dyn GpioPushPath>, pull: Arc<dyn GpioPullPath>) -> Self {
        Self { push, pull }
    }

    /// Both paths backed by the same session transport.
    pub fn over(transport: Arc<dyn Transport>, poll: CommandPollConfig) -> Self {
        Self::new(
            Arc::new(PushPath::new(Arc::clone(&transport))),
            Arc::new(CommandPath::new(transport, poll)),
        )
    }
}

#[async_trait]
impl GpioTransport for HybridGpioTransport {
    fn subscribe(&self, dirno: &str) -> GpioSubscription {
        self.push.subscribe(dirno)
    }

    async fn snapshot(&self, dirno: &str) -> Result<Vec<GpioElement>, CoreError> {
        self.pull.snapshot(dirno).await
    }

    async fn set_output(&self, dirno: &str, request: &GpioOutputRequest) -> Result<(), CoreError> {
        match self.push.set_output(dirno, request) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(
                    dirno,
                    gpio = %request.id,
                    error = %e,
                    "push path rejected GPIO output; using command path"
                );
                self.pull.set_output(dirno, request).await
            }
        }
    }
}

// ── Transport-backed paths ───────────────────────────────────────────

/// Pull path over [`Transport`] queries and commands.
pub struct CommandPath {
    transport: Arc<dyn Transport>,
    poll: CommandPollConfig,
}

impl CommandPath {
    pub fn new(transport: Arc<dyn Transport>, poll: CommandPollConfig) -> Self {
        Self { transport, poll }
    }
}

#[async_trait]
impl GpioPullPath for CommandPath {
    async fn snapshot(&self, dirno: &str) -> Result<Vec<GpioElement>, CoreError> {
        Ok(self.transport.list_gpio(dirno).await?)
    }

    async fn set_output(&self, dirno: &str, request: &GpioOutputRequest) -> Result<(), CoreError> {
        let pending = self.transport.set_gpio_output(dirno, request)?;
        await_completion("set_gpio_output", &pending, &self.poll).await
    }
}

/// Push path over the [`Transport`] event stream.
pub struct PushPath {
    transport: Arc<dyn Transport>,
}

impl PushPath {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl GpioPushPath for PushPath {
    fn subscribe(&self, dirno: &str) -> GpioSubscription {
        GpioSubscription::new(dirno, self.transport.subscribe())
    }

    fn set_output(&self, dirno: &str, request: &GpioOutputRequest) -> Result<(), CoreError> {
        Ok(self.transport.publish_gpio_output(dirno, request)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use doorlink_api::LoopbackTransport;

    fn request(active: bool) -> GpioOutputRequest {
        GpioOutputRequest {
            id: "relay1".into(),
            active,
            duration: None,
        }
    }

    async fn hybrid() -> (LoopbackTransport, HybridGpioTransport) {
        let transport = LoopbackTransport::new();
        transport.start().await.unwrap();
        let hybrid = HybridGpioTransport::over(
            Arc::new(transport.clone()),
            CommandPollConfig::default(),
        );
        (transport, hybrid)
    }

    #[tokio::test]
    async fn set_output_prefers_push() {
        let (transport, hybrid) = hybrid().await;
        hybrid.set_output("100", &request(true)).await.unwrap();
        assert_eq!(
            transport.commands(),
            vec!["push set_gpio 100 relay1 true".to_string()]
        );
    }

    #[tokio::test]
    async fn set_output_falls_back_to_command_path() {
        let (transport, hybrid) = hybrid().await;
        transport.fail_push_publish(true);

        hybrid.set_output("100", &request(false)).await.unwrap();
        assert_eq!(
            transport.commands(),
            vec!["set_gpio 100 relay1 false".to_string()]
        );
    }

    #[tokio::test]
    async fn snapshot_uses_pull() {
        let (transport, hybrid) = hybrid().await;
        transport.set_gpio(
            "100",
            vec![GpioElement {
                id: "in1".into(),
                direction: "input".into(),
                state: "low".into(),
                timestamp: None,
            }],
        );

        assert_eq!(hybrid.snapshot("100").await.unwrap().len(), 1);
        assert_eq!(transport.gpio_list_count(), 1);
    }
}
