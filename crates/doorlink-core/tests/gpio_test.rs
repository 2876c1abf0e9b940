#![allow(clippy::unwrap_used)]
// Integration tests for `GpioSynchronizer` and the hybrid GPIO transport.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use doorlink_api::{GpioElement, GpioOutputRequest, GpioSubscription, LoopbackTransport, Transport};
use doorlink_core::gpio::{GpioPullPath, GpioPushPath, PushPath};
use doorlink_core::{
    CommandPollConfig, CoreError, EventBus, GpioDirection, GpioState, GpioSynchronizer,
    HybridGpioTransport,
};

use common::{count, gpio, record, settle};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (LoopbackTransport, Arc<EventBus>, GpioSynchronizer) {
    let transport = LoopbackTransport::new();
    transport.start().await.unwrap();
    transport.set_gpio(
        "100",
        vec![gpio("in1", "input", "low"), gpio("relay1", "output", "inactive")],
    );
    let bus = Arc::new(EventBus::new());
    let hybrid = HybridGpioTransport::over(
        Arc::new(transport.clone()),
        CommandPollConfig::default(),
    );
    let sync = GpioSynchronizer::spawn("100", Arc::new(hybrid), Arc::clone(&bus));
    (transport, bus, sync)
}

/// Pull path that counts calls and never answers snapshots with data.
#[derive(Default)]
struct CountingPull {
    sets: AtomicUsize,
}

#[async_trait]
impl GpioPullPath for CountingPull {
    async fn snapshot(&self, _dirno: &str) -> Result<Vec<GpioElement>, CoreError> {
        Ok(Vec::new())
    }

    async fn set_output(&self, _dirno: &str, _request: &GpioOutputRequest) -> Result<(), CoreError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Push path whose publish always fails synchronously.
struct BrokenPush {
    inner: PushPath,
}

impl GpioPushPath for BrokenPush {
    fn subscribe(&self, dirno: &str) -> GpioSubscription {
        self.inner.subscribe(dirno)
    }

    fn set_output(&self, _dirno: &str, _request: &GpioOutputRequest) -> Result<(), CoreError> {
        Err(CoreError::TransportUnavailable)
    }
}

// ── Population ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_initial_snapshot_fills_both_sides() {
    let (_transport, _bus, sync) = setup().await;
    sync.ready().await.unwrap();

    assert_eq!(sync.inputs().len(), 1);
    assert_eq!(sync.outputs().len(), 1);
    let relay = sync.point(GpioDirection::Output, "relay1").unwrap();
    assert_eq!(relay.state, GpioState::Inactive);
    assert_eq!(relay.raw_state, "inactive");
}

#[tokio::test(start_paused = true)]
async fn test_push_during_failed_pull_still_populates() {
    let transport = LoopbackTransport::new();
    transport.start().await.unwrap();
    transport.fail_gpio_list(true);
    transport.set_list_delay(Duration::from_millis(50));

    let bus = Arc::new(EventBus::new());
    let errors = count(bus.exception_raised());
    let hybrid = HybridGpioTransport::over(Arc::new(transport.clone()), CommandPollConfig::default());
    let sync = GpioSynchronizer::spawn("100", Arc::new(hybrid), Arc::clone(&bus));

    transport.push_gpio("100", gpio("in1", "input", "high"));
    assert!(sync.ready().await.is_err());
    settle().await;

    assert_eq!(errors.get(), 1);
    assert_eq!(
        sync.point(GpioDirection::Input, "in1").unwrap().state,
        GpioState::Active
    );
}

// ── Deduplication ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_only_transitions_are_announced() {
    let (transport, bus, sync) = setup().await;
    sync.ready().await.unwrap();
    let events = record(bus.gpio_event());

    transport.push_gpio("100", gpio("in1", "input", "0"));
    transport.push_gpio("100", gpio("in1", "input", "1"));
    transport.push_gpio("100", gpio("in1", "input", "high"));
    settle().await;

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].dirno, "100");
    assert_eq!(events[0].point.state, GpioState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_refresh_is_silent() {
    let (_transport, _bus, sync) = setup().await;
    sync.ready().await.unwrap();
    let changes = count(sync.on_changed());

    let changed = sync.refresh(&CancellationToken::new()).await.unwrap();
    assert_eq!(changed, 0);
    assert_eq!(changes.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_other_devices_are_ignored() {
    let (transport, _bus, sync) = setup().await;
    sync.ready().await.unwrap();

    transport.push_gpio("200", gpio("in9", "input", "high"));
    settle().await;
    assert!(sync.point(GpioDirection::Input, "in9").is_none());
}

// ── Concurrency ─────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_push_and_refresh_announce_each_transition_once() {
    let (transport, _bus, sync) = setup().await;
    sync.ready().await.unwrap();
    let events = record(sync.on_changed());

    let pusher = {
        let transport = transport.clone();
        tokio::spawn(async move {
            for i in 0..=200 {
                let level = if i % 2 == 0 { "high" } else { "low" };
                transport.push_gpio("100", gpio("in1", "input", level));
                tokio::task::yield_now().await;
            }
        })
    };
    let refreshers: Vec<_> = (0..3)
        .map(|_| {
            let sync = sync.clone();
            tokio::spawn(async move {
                let never = CancellationToken::new();
                for _ in 0..50 {
                    sync.refresh(&never).await.unwrap();
                }
            })
        })
        .collect();
    pusher.await.unwrap();
    for refresher in refreshers {
        refresher.await.unwrap();
    }

    // The push stream is ordered: once the marker lands, every in1 push
    // before it has been applied.
    transport.push_gpio("100", gpio("in2", "input", "high"));
    tokio::time::timeout(Duration::from_secs(5), async {
        while sync.point(GpioDirection::Input, "in2").is_none() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
    sync.refresh(&CancellationToken::new()).await.unwrap();

    let states: Vec<GpioState> = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.point.id == "in1")
        .map(|e| e.point.state)
        .collect();
    assert_eq!(states.first(), Some(&GpioState::Active));
    for pair in states.windows(2) {
        assert_ne!(pair[0], pair[1], "notified without a transition: {states:?}");
    }
    assert_eq!(states.last(), Some(&GpioState::Active));
    assert_eq!(
        sync.point(GpioDirection::Input, "in1").unwrap().state,
        GpioState::Active
    );
}

// ── Output control ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_activate_goes_out_on_push_path() {
    let (transport, _bus, sync) = setup().await;
    sync.ready().await.unwrap();

    sync.activate("relay1", Some(Duration::from_secs(3)), &CancellationToken::new())
        .await
        .unwrap();
    settle().await;

    assert_eq!(
        transport.commands(),
        vec!["push set_gpio 100 relay1 true".to_string()]
    );
    assert_eq!(
        sync.point(GpioDirection::Output, "relay1").unwrap().state,
        GpioState::Active
    );
}

#[tokio::test(start_paused = true)]
async fn test_deactivate_falls_back_when_push_fails() {
    let (transport, _bus, sync) = setup().await;
    sync.ready().await.unwrap();
    transport.fail_push_publish(true);

    sync.deactivate("relay1", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        transport.commands(),
        vec!["set_gpio 100 relay1 false".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_hybrid_fallback_with_custom_paths() {
    let transport = LoopbackTransport::new();
    let pull = Arc::new(CountingPull::default());
    let push = Arc::new(BrokenPush {
        inner: PushPath::new(Arc::new(transport.clone())),
    });
    let hybrid = HybridGpioTransport::new(push, Arc::clone(&pull) as Arc<dyn GpioPullPath>);
    let sync = GpioSynchronizer::spawn("100", Arc::new(hybrid), Arc::new(EventBus::new()));
    sync.ready().await.unwrap();

    sync.activate("relay1", None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(pull.sets.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_activate_sends_nothing() {
    let (transport, _bus, sync) = setup().await;
    sync.ready().await.unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = sync.activate("relay1", None, &cancel).await.unwrap_err();
    assert!(matches!(err, CoreError::Cancelled { .. }));
    assert!(transport.commands().is_empty());
    assert_eq!(
        sync.point(GpioDirection::Output, "relay1").unwrap().state,
        GpioState::Inactive
    );
}

#[tokio::test(start_paused = true)]
async fn test_command_path_failure_surfaces() {
    let (transport, _bus, sync) = setup().await;
    sync.ready().await.unwrap();
    transport.fail_push_publish(true);
    transport.reply_with(doorlink_api::CommandReply::Fail("relay locked".into()));

    let err = sync
        .activate("relay1", None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "set_gpio_output failed: relay locked");
}
