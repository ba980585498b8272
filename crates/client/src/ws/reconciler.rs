//! Diffing of the desired group set against what the server has been told.

use std::collections::BTreeSet;

use archive_shared::{ClientFrame, GroupId};

/// Commands needed to move the server from the tracked set to the desired set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub to_subscribe: Vec<GroupId>,
    pub to_unsubscribe: Vec<GroupId>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.to_subscribe.is_empty() && self.to_unsubscribe.is_empty()
    }

    /// Wire frames for this plan: at most one `subscribe` and one `unsubscribe`,
    /// each only when it has something to carry.
    pub fn frames(&self) -> Vec<ClientFrame> {
        let mut frames = Vec::with_capacity(2);
        if !self.to_subscribe.is_empty() {
            frames.push(ClientFrame::Subscribe {
                group_ids: self.to_subscribe.clone(),
            });
        }
        if !self.to_unsubscribe.is_empty() {
            frames.push(ClientFrame::Unsubscribe {
                group_ids: self.to_unsubscribe.clone(),
            });
        }
        frames
    }
}

/// Tracks which groups are believed to be subscribed server-side.
///
/// Tracking is optimistic: there is no per-group acknowledgment, so the tracked
/// set becomes the desired set as soon as the commands are issued.
#[derive(Debug, Default)]
pub struct SubscriptionReconciler {
    tracked: BTreeSet<GroupId>,
}

impl SubscriptionReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracked(&self) -> &BTreeSet<GroupId> {
        &self.tracked
    }

    pub fn reconcile(&mut self, desired: &BTreeSet<GroupId>) -> ReconcilePlan {
        let plan = ReconcilePlan {
            to_subscribe: desired.difference(&self.tracked).cloned().collect(),
            to_unsubscribe: self.tracked.difference(desired).cloned().collect(),
        };
        if !plan.is_empty() {
            self.tracked = desired.clone();
        }
        plan
    }

    /// Forget everything. Server-side subscriptions do not survive a reconnect.
    pub fn clear(&mut self) {
        self.tracked.clear();
    }
}
