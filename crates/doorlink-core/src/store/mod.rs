// ── Collections aggregate ──
//
// The single source of truth for devices, active calls, the call queue
// and groups. Only the device registry mutates it; everyone else reads
// copy-on-read snapshots or subscribes to changes.

mod collection;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use self::collection::EntityCollection;
use crate::model::{CallElement, CallState, Device, Group};
use crate::stream::EntityStream;

/// Canonical local view of the controller's state.
///
/// Every list starts out empty and is never absent, so readers never
/// need to distinguish "not loaded" from "empty".
pub struct Collections {
    devices: EntityCollection<Device>,
    active_calls: EntityCollection<CallElement>,
    groups: EntityCollection<Group>,
    call_queue: watch::Sender<Arc<Vec<Arc<CallElement>>>>,
    last_full_refresh: watch::Sender<Option<DateTime<Utc>>>,
}

impl Default for Collections {
    fn default() -> Self {
        Self::new()
    }
}

impl Collections {
    pub fn new() -> Self {
        let (call_queue, _) = watch::channel(Arc::new(Vec::new()));
        let (last_full_refresh, _) = watch::channel(None);

        Self {
            devices: EntityCollection::new(),
            active_calls: EntityCollection::new(),
            groups: EntityCollection::new(),
            call_queue,
            last_full_refresh,
        }
    }

    // ── Snapshot accessors ───────────────────────────────────────────

    pub fn devices_snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.devices.snapshot()
    }

    pub fn active_calls_snapshot(&self) -> Arc<Vec<Arc<CallElement>>> {
        self.active_calls.snapshot()
    }

    /// Queued calls ordered by queue position.
    pub fn call_queue_snapshot(&self) -> Arc<Vec<Arc<CallElement>>> {
        self.call_queue.borrow().clone()
    }

    pub fn groups_snapshot(&self) -> Arc<Vec<Arc<Group>>> {
        self.groups.snapshot()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn last_full_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_full_refresh.borrow()
    }

    // ── Single-entity lookups ────────────────────────────────────────

    pub fn device_by_address(&self, address: &str) -> Option<Arc<Device>> {
        self.devices.get_by_key(address)
    }

    pub fn device_by_dirno(&self, dirno: &str) -> Option<Arc<Device>> {
        self.devices.get_by_index(dirno)
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn devices(&self) -> EntityStream<Device> {
        EntityStream::new(self.devices.subscribe())
    }

    pub fn active_calls(&self) -> EntityStream<CallElement> {
        EntityStream::new(self.active_calls.subscribe())
    }

    pub fn call_queue(&self) -> EntityStream<CallElement> {
        EntityStream::new(self.call_queue.subscribe())
    }

    pub fn groups(&self) -> EntityStream<Group> {
        EntityStream::new(self.groups.subscribe())
    }

    // ── Mutations (registry only) ────────────────────────────────────

    /// Insert a device, replacing any record with the same address.
    /// Returns `true` if the address was not known before.
    pub(crate) fn upsert_device(&self, device: Device) -> bool {
        let key = device.address.clone();
        let index = device.dirno.clone();
        self.devices.upsert(key, Some(index), device)
    }

    /// Replace the whole device list with a pulled snapshot.
    pub(crate) fn replace_devices(&self, devices: Vec<Device>) {
        let items = devices
            .into_iter()
            .map(|d| (d.address.clone(), Some(d.dirno.clone()), d))
            .collect();
        self.devices.replace_all(items);
        let _ = self.last_full_refresh.send(Some(Utc::now()));
    }

    /// Set the call state of every device whose directory number takes
    /// part in `call`. Returns how many devices changed.
    pub(crate) fn project_call(&self, call: &CallElement) -> usize {
        let participants = call.participants();
        let state = call.state.projected();
        let now = Utc::now();
        self.devices.update_where(
            |d| participants.contains(&d.dirno.as_str()),
            |d| {
                d.call_state = state;
                d.updated_at = now;
            },
        )
    }

    /// Track a call in the active-call list and rebuild the queue.
    pub(crate) fn track_call(&self, call: &CallElement) {
        if call.state == CallState::Ended {
            self.active_calls.remove(&call.call_id);
        } else {
            self.active_calls
                .upsert(call.call_id.clone(), None, call.clone());
        }
        self.rebuild_queue();
    }

    pub(crate) fn replace_groups(&self, groups: Vec<Group>) {
        let items = groups
            .into_iter()
            .map(|g| (g.id.clone(), None, g))
            .collect();
        self.groups.replace_all(items);
    }

    fn rebuild_queue(&self) {
        let mut queued: Vec<Arc<CallElement>> = self
            .active_calls
            .snapshot()
            .iter()
            .filter(|c| c.state == CallState::Queued)
            .cloned()
            .collect();
        queued.sort_by_key(|c| (c.queue_position.unwrap_or(u32::MAX), c.call_id.clone()));
        self.call_queue.send_modify(|q| *q = Arc::new(queued));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{DeviceType, Reachability};
    use pretty_assertions::assert_eq;

    fn device(address: &str, dirno: &str) -> Device {
        Device {
            address: address.into(),
            dirno: dirno.into(),
            name: None,
            location: None,
            device_type: DeviceType::DoorStation,
            reachability: Reachability::Reachable,
            call_state: CallState::Reachable,
            updated_at: Utc::now(),
        }
    }

    fn call(id: &str, state: CallState, queue_position: Option<u32>) -> CallElement {
        CallElement {
            call_id: id.into(),
            from_dirno: "100".into(),
            to_dirno: "200".into(),
            to_dirno_current: None,
            call_type: None,
            reason: None,
            priority: None,
            queue_position,
            started_at: None,
            state,
        }
    }

    #[test]
    fn lists_start_empty() {
        let store = Collections::new();
        assert!(store.devices_snapshot().is_empty());
        assert!(store.call_queue_snapshot().is_empty());
        assert!(store.groups_snapshot().is_empty());
        assert!(store.last_full_refresh().is_none());
    }

    #[test]
    fn same_address_replaces_record() {
        let store = Collections::new();
        assert!(store.upsert_device(device("10.0.0.5", "100")));
        assert!(!store.upsert_device(device("10.0.0.5", "101")));

        assert_eq!(store.device_count(), 1);
        assert!(store.device_by_dirno("100").is_none());
        assert_eq!(store.device_by_dirno("101").unwrap().address, "10.0.0.5");
    }

    #[test]
    fn projection_rewrites_ended_to_reachable() {
        let store = Collections::new();
        store.upsert_device(device("10.0.0.5", "100"));

        store.project_call(&call("c-1", CallState::InCall, None));
        assert_eq!(store.device_by_dirno("100").unwrap().call_state, CallState::InCall);

        store.project_call(&call("c-1", CallState::Ended, None));
        assert_eq!(store.device_by_dirno("100").unwrap().call_state, CallState::Reachable);
    }

    #[test]
    fn queue_orders_by_position_and_drops_ended() {
        let store = Collections::new();
        store.track_call(&call("c-2", CallState::Queued, Some(2)));
        store.track_call(&call("c-1", CallState::Queued, Some(1)));
        store.track_call(&call("c-3", CallState::Ringing, None));

        let queue = store.call_queue_snapshot();
        let ids: Vec<&str> = queue.iter().map(|c| c.call_id.as_str()).collect();
        assert_eq!(ids, ["c-1", "c-2"]);
        assert_eq!(store.active_calls_snapshot().len(), 3);

        store.track_call(&call("c-1", CallState::Ended, None));
        assert_eq!(store.call_queue_snapshot().len(), 1);
        assert_eq!(store.active_calls_snapshot().len(), 2);
    }

    #[test]
    fn replace_devices_stamps_refresh_time() {
        let store = Collections::new();
        store.upsert_device(device("10.0.0.9", "900"));
        store.replace_devices(vec![device("10.0.0.5", "100")]);

        assert_eq!(store.device_count(), 1);
        assert!(store.device_by_address("10.0.0.9").is_none());
        assert!(store.last_full_refresh().is_some());
    }

    #[test]
    fn lookups_never_see_a_half_replaced_list() {
        let fleet: Vec<Device> = (0..500)
            .map(|i| device(&format!("10.0.{}.{}", i / 256, i % 256), &(1000 + i).to_string()))
            .collect();
        let store = Collections::new();
        store.replace_devices(fleet.clone());

        let done = std::sync::atomic::AtomicBool::new(false);
        let misses = std::thread::scope(|scope| {
            let reader = scope.spawn(|| {
                let mut misses = 0usize;
                while !done.load(std::sync::atomic::Ordering::Acquire) {
                    if store.device_by_dirno("1499").is_none() {
                        misses += 1;
                    }
                    if store.device_by_address("10.0.0.0").is_none() {
                        misses += 1;
                    }
                }
                misses
            });
            for _ in 0..50 {
                store.replace_devices(fleet.clone());
            }
            done.store(true, std::sync::atomic::Ordering::Release);
            reader.join().unwrap()
        });

        assert_eq!(misses, 0);
        assert_eq!(store.device_count(), 500);
    }
}
