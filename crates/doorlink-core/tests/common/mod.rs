// Shared fixtures for the doorlink-core integration tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use doorlink_api::{CallElement, GpioElement, RegistrationElement};
use doorlink_core::{Channel, ControllerConfig, ReconnectPolicy};

// ── Elements ────────────────────────────────────────────────────────

pub fn station(ip: &str, dirno: &str) -> RegistrationElement {
    RegistrationElement {
        ip: ip.into(),
        dirno: dirno.into(),
        name: Some(format!("Station {dirno}")),
        location: None,
        device_type: Some("door_station".into()),
        state: Some("registered".into()),
    }
}

pub fn call(id: &str, from: &str, to: &str, current: Option<&str>, state: &str) -> CallElement {
    CallElement {
        call_id: id.into(),
        from_dirno: from.into(),
        to_dirno: to.into(),
        to_dirno_current: current.map(Into::into),
        call_type: None,
        reason: None,
        priority: None,
        queue_position: None,
        start_time: None,
        state: state.into(),
    }
}

pub fn gpio(id: &str, direction: &str, state: &str) -> GpioElement {
    GpioElement {
        id: id.into(),
        direction: direction.into(),
        state: state.into(),
        timestamp: None,
    }
}

// ── Configuration ───────────────────────────────────────────────────

pub fn fast_config(max_attempts: u32) -> ControllerConfig {
    ControllerConfig {
        operator_dirno: "900".into(),
        reconnect: ReconnectPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        },
        ..ControllerConfig::default()
    }
}

// ── Bus observers ───────────────────────────────────────────────────

pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn count<T>(channel: &Channel<T>) -> Counter {
    let hits = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&hits);
    channel.subscribe(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    Counter(hits)
}

pub fn record<T: Clone + Send + 'static>(channel: &Channel<T>) -> Arc<Mutex<Vec<T>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    channel.subscribe(move |v: &T| s.lock().unwrap().push(v.clone()));
    seen
}

/// Let every spawned task run until the runtime is idle.
///
/// Tests run with a paused clock, so this returns as soon as nothing
/// else is runnable.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
