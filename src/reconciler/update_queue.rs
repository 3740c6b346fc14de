//! Update queue of a root.
//!
//! Each update replaces the element rendered into the root. Updates are
//! appended to a shared pending list and moved into the base queue of both
//! fiber halves when a render starts, so an interrupted render never loses
//! them. Processing under a set of render lanes:
//!
//! - an update whose lane is not part of the render is skipped and kept;
//! - once one update was skipped, every later update is kept as well (with
//!   its lane cleared when it was applied), so the next pass replays them in
//!   order on top of the state before the first skipped one.
//!
//! Updates that share a lane are therefore always applied together.

use crate::lane::{Lane, Lanes};
use crate::scheduler::Timestamp;

use super::element::Node;

/// One root update.
#[derive(Clone, Debug)]
pub struct Update {
    /// Lane the update was scheduled on.
    pub lane: Lane,
    /// Time the update was requested.
    pub event_time: Timestamp,
    /// The new element for the root.
    pub element: Node,
}

/// Per-fiber base queue of the root.
#[derive(Clone, Debug, Default)]
pub(crate) struct UpdateQueue {
    /// State before the first update in `base_updates`.
    pub(crate) base_state: Node,
    /// Updates that still have to be applied on top of `base_state`.
    pub(crate) base_updates: Vec<Update>,
}

/// Outcome of [`UpdateQueue::process`].
pub(crate) struct Processed {
    /// State after every applied update.
    pub(crate) state: Node,
    /// Lanes of the updates that were skipped.
    pub(crate) remaining_lanes: Lanes,
}

impl UpdateQueue {
    pub(crate) fn new(base_state: Node) -> Self {
        Self {
            base_state,
            base_updates: Vec::new(),
        }
    }

    /// Append updates taken from the shared pending list.
    pub(crate) fn enqueue(&mut self, pending: &[Update]) {
        self.base_updates.extend_from_slice(pending);
    }

    /// Apply every update included in `render_lanes`.
    pub(crate) fn process(&mut self, render_lanes: Lanes) -> Processed {
        let mut state = self.base_state.clone();
        let mut new_base_state = None;
        let mut new_base_updates = Vec::new();
        let mut remaining_lanes = Lanes::NONE;

        for update in self.base_updates.drain(..) {
            if !render_lanes.contains(update.lane) {
                if new_base_updates.is_empty() {
                    new_base_state = Some(state.clone());
                }
                remaining_lanes |= update.lane;
                new_base_updates.push(update);
                continue;
            }
            state = update.element.clone();
            if !new_base_updates.is_empty() {
                cov_mark::hit!(update_rebased_behind_skipped);
                new_base_updates.push(Update {
                    lane: Lanes::NONE,
                    ..update
                });
            }
        }

        self.base_state = new_base_state.unwrap_or_else(|| state.clone());
        self.base_updates = new_base_updates;
        Processed {
            state,
            remaining_lanes,
        }
    }

    /// Drop every update scheduled on one of `lanes`.
    pub(crate) fn discard_lanes(&mut self, lanes: Lanes) {
        self.base_updates
            .retain(|update| update.lane.is_empty() || !lanes.contains(update.lane));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(lane: Lane, text: &str) -> Update {
        Update {
            lane,
            event_time: 0,
            element: Node::text(text),
        }
    }

    fn text(node: &Node) -> &str {
        match node {
            Node::Text(text) => &**text,
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn applies_updates_in_render_lanes() {
        let mut queue = UpdateQueue::new(Node::text("initial"));
        queue.enqueue(&[update(Lanes::DEFAULT, "a"), update(Lanes::DEFAULT, "b")]);
        let processed = queue.process(Lanes::DEFAULT);
        assert_eq!(text(&processed.state), "b");
        assert!(processed.remaining_lanes.is_empty());
        assert!(queue.base_updates.is_empty());
        assert_eq!(text(&queue.base_state), "b");
    }

    #[test]
    fn skipped_update_rebases_later_ones() {
        cov_mark::check!(update_rebased_behind_skipped);
        let mut queue = UpdateQueue::new(Node::text("initial"));
        queue.enqueue(&[
            update(Lanes::SYNC, "sync 1"),
            update(Lanes::DEFAULT, "default"),
            update(Lanes::SYNC, "sync 2"),
        ]);

        let first = queue.process(Lanes::SYNC);
        assert_eq!(text(&first.state), "sync 2");
        assert_eq!(first.remaining_lanes, Lanes::DEFAULT);
        // Base state is the state before the skipped update.
        assert_eq!(text(&queue.base_state), "sync 1");
        assert_eq!(queue.base_updates.len(), 2);
        assert!(queue.base_updates[1].lane.is_empty());

        let second = queue.process(Lanes::DEFAULT);
        assert_eq!(text(&second.state), "sync 2");
        assert!(second.remaining_lanes.is_empty());
    }

    #[test]
    fn discarding_lanes_keeps_other_updates() {
        let mut queue = UpdateQueue::new(Node::Empty);
        queue.enqueue(&[update(Lanes::DEFAULT, "bad"), update(Lanes::IDLE, "later")]);
        queue.discard_lanes(Lanes::DEFAULT);
        assert_eq!(queue.base_updates.len(), 1);
        assert_eq!(queue.base_updates[0].lane, Lanes::IDLE);
    }
}
