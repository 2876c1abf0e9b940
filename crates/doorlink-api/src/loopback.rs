//! In-process transport.
//!
//! [`LoopbackTransport`] plays the remote controller inside the current
//! process: it keeps a device list, group list and GPIO table that pull
//! queries read from, turns commands into completions according to a
//! configurable [`CommandReply`], and lets the caller inject push events
//! or drop the session. Used by the integration tests and by the
//! `doorlink simulate` command.
//!
//! ```rust,ignore
//! let transport = LoopbackTransport::new();
//! transport.set_devices(vec![door_station]);
//! transport.start().await?;
//! transport.drop_connection(); // pushes Connection(false)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use crate::element::{GpioElement, GpioOutputRequest, GroupElement, PushEvent, RegistrationElement};
use crate::error::Error;
use crate::transport::{COMMAND_SUCCESS_TEXT, PendingCommand, Transport};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How the loopback answers commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CommandReply {
    /// Complete immediately with the success text.
    #[default]
    Succeed,
    /// Complete immediately with `success = false` and this text.
    Fail(String),
    /// Never complete.
    Silent,
    /// Complete successfully after a delay.
    After(Duration),
}

#[derive(Default)]
struct LoopbackState {
    devices: Vec<RegistrationElement>,
    groups: Vec<GroupElement>,
    gpio: HashMap<String, Vec<GpioElement>>,
    reply: CommandReply,
    start_failures: u32,
    fail_device_list: bool,
    fail_group_list: bool,
    fail_gpio_list: bool,
    fail_push_publish: bool,
    list_delay: Duration,
    commands: Vec<String>,
    start_calls: usize,
    stop_calls: usize,
    device_list_calls: usize,
    gpio_list_calls: usize,
}

struct Inner {
    events: broadcast::Sender<Arc<PushEvent>>,
    connected: AtomicBool,
    state: Mutex<LoopbackState>,
}

/// In-memory stand-in for a remote controller. Cheap to clone.
#[derive(Clone)]
pub struct LoopbackTransport {
    inner: Arc<Inner>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                events,
                connected: AtomicBool::new(false),
                state: Mutex::new(LoopbackState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, LoopbackState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ── Scenario control ─────────────────────────────────────────────

    /// Inject an unsolicited event.
    pub fn push(&self, event: PushEvent) {
        // No receivers is fine: nothing is listening yet.
        let _ = self.inner.events.send(Arc::new(event));
    }

    /// Register (or re-register) a device and push the announcement.
    pub fn register(&self, element: RegistrationElement) {
        {
            let mut state = self.state();
            state.devices.retain(|d| d.ip != element.ip);
            state.devices.push(element.clone());
        }
        self.push(PushEvent::Registration(element));
    }

    /// Replace the device list served by pull queries without pushing.
    pub fn set_devices(&self, devices: Vec<RegistrationElement>) {
        self.state().devices = devices;
    }

    pub fn set_groups(&self, groups: Vec<GroupElement>) {
        self.state().groups = groups;
    }

    /// Replace the GPIO table of one device without pushing.
    pub fn set_gpio(&self, dirno: &str, points: Vec<GpioElement>) {
        self.state().gpio.insert(dirno.to_owned(), points);
    }

    /// Update one GPIO line and push the change.
    pub fn push_gpio(&self, dirno: &str, element: GpioElement) {
        store_gpio(&mut self.state(), dirno, element.clone());
        self.push(PushEvent::Gpio {
            dirno: dirno.to_owned(),
            element,
        });
    }

    /// Simulate loss of the session.
    pub fn drop_connection(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.push(PushEvent::Connection(false));
    }

    pub fn fail_next_starts(&self, count: u32) {
        self.state().start_failures = count;
    }

    pub fn fail_device_list(&self, fail: bool) {
        self.state().fail_device_list = fail;
    }

    pub fn fail_group_list(&self, fail: bool) {
        self.state().fail_group_list = fail;
    }

    pub fn fail_gpio_list(&self, fail: bool) {
        self.state().fail_gpio_list = fail;
    }

    pub fn fail_push_publish(&self, fail: bool) {
        self.state().fail_push_publish = fail;
    }

    /// Delay applied to every pull query.
    pub fn set_list_delay(&self, delay: Duration) {
        self.state().list_delay = delay;
    }

    pub fn reply_with(&self, reply: CommandReply) {
        self.state().reply = reply;
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Every command issued so far, e.g. `"tone_test 100"`.
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn start_count(&self) -> usize {
        self.state().start_calls
    }

    pub fn stop_count(&self) -> usize {
        self.state().stop_calls
    }

    pub fn device_list_count(&self) -> usize {
        self.state().device_list_calls
    }

    pub fn gpio_list_count(&self) -> usize {
        self.state().gpio_list_calls
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn require_connected(&self) -> Result<(), Error> {
        if self.inner.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn issue(&self, command: String) -> Result<PendingCommand, Error> {
        self.require_connected()?;
        let reply = {
            let mut state = self.state();
            state.commands.push(command);
            state.reply.clone()
        };
        Ok(match reply {
            CommandReply::Succeed => PendingCommand::completed(true, COMMAND_SUCCESS_TEXT),
            CommandReply::Fail(text) => PendingCommand::completed(false, text),
            CommandReply::Silent => PendingCommand::new(),
            CommandReply::After(delay) => {
                let pending = PendingCommand::new();
                let completer = pending.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    completer.complete(true, COMMAND_SUCCESS_TEXT);
                });
                pending
            }
        })
    }

    fn apply_output(&self, dirno: &str, request: &GpioOutputRequest) {
        let element = GpioElement {
            id: request.id.clone(),
            direction: "output".into(),
            state: if request.active { "active" } else { "inactive" }.into(),
            timestamp: Some(Utc::now()),
        };
        self.push_gpio(dirno, element);
    }

    async fn pull_delay(&self) {
        let delay = self.state().list_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

fn store_gpio(state: &mut LoopbackState, dirno: &str, element: GpioElement) {
    let points = state.gpio.entry(dirno.to_owned()).or_default();
    points.retain(|p| !(p.id == element.id && p.direction == element.direction));
    points.push(element);
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn start(&self) -> Result<(), Error> {
        {
            let mut state = self.state();
            state.start_calls += 1;
            if state.start_failures > 0 {
                state.start_failures -= 1;
                return Err(Error::SessionStart {
                    reason: "loopback refused the session".into(),
                });
            }
        }
        if !self.inner.connected.swap(true, Ordering::SeqCst) {
            tracing::debug!("loopback session started");
            self.push(PushEvent::Connection(true));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), Error> {
        self.state().stop_calls += 1;
        self.inner.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<Arc<PushEvent>> {
        self.inner.events.subscribe()
    }

    fn publish_gpio_output(&self, dirno: &str, request: &GpioOutputRequest) -> Result<(), Error> {
        self.require_connected()?;
        {
            let mut state = self.state();
            if state.fail_push_publish {
                return Err(Error::Rpc {
                    operation: "publish_gpio_output",
                    message: "push path unavailable".into(),
                });
            }
            state.commands.push(format!(
                "push set_gpio {dirno} {} {}",
                request.id, request.active
            ));
        }
        self.apply_output(dirno, request);
        Ok(())
    }

    async fn list_registered_devices(&self) -> Result<Vec<RegistrationElement>, Error> {
        self.state().device_list_calls += 1;
        self.pull_delay().await;
        self.require_connected()?;
        let state = self.state();
        if state.fail_device_list {
            return Err(Error::Rpc {
                operation: "list_registered_devices",
                message: "device list unavailable".into(),
            });
        }
        Ok(state.devices.clone())
    }

    async fn list_groups(&self) -> Result<Vec<GroupElement>, Error> {
        self.require_connected()?;
        let state = self.state();
        if state.fail_group_list {
            return Err(Error::Rpc {
                operation: "list_groups",
                message: "group list unavailable".into(),
            });
        }
        Ok(state.groups.clone())
    }

    async fn list_gpio(&self, dirno: &str) -> Result<Vec<GpioElement>, Error> {
        self.state().gpio_list_calls += 1;
        self.pull_delay().await;
        self.require_connected()?;
        let state = self.state();
        if state.fail_gpio_list {
            return Err(Error::Rpc {
                operation: "list_gpio",
                message: format!("{dirno} unreachable"),
            });
        }
        Ok(state.gpio.get(dirno).cloned().unwrap_or_default())
    }

    fn set_gpio_output(
        &self,
        dirno: &str,
        request: &GpioOutputRequest,
    ) -> Result<PendingCommand, Error> {
        let pending = self.issue(format!("set_gpio {dirno} {} {}", request.id, request.active))?;
        if pending
            .completion()
            .is_some_and(|c| c.success)
        {
            self.apply_output(dirno, request);
        }
        Ok(pending)
    }

    fn open_door(&self, dirno: &str) -> Result<PendingCommand, Error> {
        self.issue(format!("open_door {dirno}"))
    }

    fn post_call(&self, from_dirno: &str, to_dirno: &str) -> Result<PendingCommand, Error> {
        self.issue(format!("post_call {from_dirno} {to_dirno}"))
    }

    fn delete_call(&self, call_id: &str) -> Result<PendingCommand, Error> {
        self.issue(format!("delete_call {call_id}"))
    }

    fn simulate_key_press(&self, dirno: &str, key: &str) -> Result<PendingCommand, Error> {
        self.issue(format!("key_press {dirno} {key}"))
    }

    fn tone_test(&self, dirno: &str) -> Result<PendingCommand, Error> {
        self.issue(format!("tone_test {dirno}"))
    }
}
