// ── Snapshot subscriptions ──
//
// Read-only handles onto one list of the `Collections`. Every mutation of
// the list replaces the shared snapshot; a handle sees each replacement
// at most once and may skip intermediate ones.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Immutable, shared view of a list at one point in time.
pub type Snapshot<T> = Arc<Vec<Arc<T>>>;

/// A subscription to one list of the [`Collections`](crate::Collections).
pub struct EntityStream<T: Clone + Send + Sync + 'static> {
    receiver: watch::Receiver<Snapshot<T>>,
}

impl<T: Clone + Send + Sync + 'static> EntityStream<T> {
    pub(crate) fn new(receiver: watch::Receiver<Snapshot<T>>) -> Self {
        Self { receiver }
    }

    /// The newest snapshot, marking it as seen.
    pub fn snapshot(&mut self) -> Snapshot<T> {
        Arc::clone(&self.receiver.borrow_and_update())
    }

    /// Wait until the list is replaced after the last snapshot this
    /// handle saw. `None` once the store has been dropped.
    pub async fn changed(&mut self) -> Option<Snapshot<T>> {
        self.receiver.changed().await.ok()?;
        Some(self.snapshot())
    }

    /// Wait until a snapshot satisfies `ready`, checking the current one
    /// first. `None` if the store is dropped before that happens.
    pub async fn wait_for(
        &mut self,
        mut ready: impl FnMut(&[Arc<T>]) -> bool,
    ) -> Option<Snapshot<T>> {
        let snap = self.receiver.wait_for(|snap| ready(snap)).await.ok()?;
        Some(Arc::clone(&snap))
    }

    /// One item per observed snapshot, starting with the current one.
    pub fn into_stream(self) -> WatchStream<Snapshot<T>> {
        WatchStream::new(self.receiver)
    }
}
