//! The consumer-owned set of groups that should be live on the channel.

use std::collections::BTreeSet;
use std::sync::Arc;

use archive_shared::GroupId;
use tokio::sync::watch;

/// Groups the dashboard currently wants events for, typically the groups
/// flagged "monitored" in the groups screen.
///
/// Cloning shares the same set. The channel only ever reads the latest value,
/// so rapid toggling collapses into a single reconcile.
#[derive(Debug, Clone)]
pub struct DesiredTopics {
    tx: Arc<watch::Sender<BTreeSet<GroupId>>>,
}

impl Default for DesiredTopics {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: Into<GroupId>> FromIterator<G> for DesiredTopics {
    fn from_iter<I: IntoIterator<Item = G>>(iter: I) -> Self {
        let topics = Self::new();
        topics.set(iter);
        topics
    }
}

impl DesiredTopics {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(BTreeSet::new());
        Self { tx: Arc::new(tx) }
    }

    /// Replace the whole set. Returns false if nothing changed.
    pub fn set<G: Into<GroupId>>(&self, groups: impl IntoIterator<Item = G>) -> bool {
        let next: BTreeSet<GroupId> = groups.into_iter().map(Into::into).collect();
        self.tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        })
    }

    pub fn insert(&self, group: impl Into<GroupId>) -> bool {
        let group = group.into();
        self.tx.send_if_modified(|current| current.insert(group))
    }

    pub fn remove(&self, group: &str) -> bool {
        self.tx.send_if_modified(|current| current.remove(group))
    }

    /// Apply a "monitored" flag change from the UI.
    pub fn toggle(&self, group: impl Into<GroupId>, monitored: bool) -> bool {
        let group = group.into();
        if monitored {
            self.insert(group)
        } else {
            self.remove(group.as_str())
        }
    }

    pub fn contains(&self, group: &str) -> bool {
        self.tx.borrow().contains(group)
    }

    pub fn snapshot(&self) -> BTreeSet<GroupId> {
        self.tx.borrow().clone()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<BTreeSet<GroupId>> {
        self.tx.subscribe()
    }
}
