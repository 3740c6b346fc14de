//! Per-root lane bookkeeping.
//!
//! A [`RootLanes`] record exists once per mounted tree. It tracks which lanes
//! have pending work, which are blocked (suspended) or unblocked again
//! (pinged), which have starved long enough to be forced (expired), and which
//! must always render together (entangled).
//!
//! Mutations happen only between scheduler-visible operations (schedule,
//! suspend, ping, finish). The record itself is not synchronized; owners that
//! share it across threads serialize access behind one lock.

use crate::lane::{LaneClass, Lanes, TOTAL_LANES, highest_priority_lanes};
use crate::scheduler::Timestamp;

/// Lane state of one root.
#[derive(Clone, Debug)]
pub struct RootLanes {
    /// Lanes with unfinished work.
    pub pending: Lanes,
    /// Pending lanes whose last render suspended.
    pub suspended: Lanes,
    /// Suspended lanes whose blocking data has since resolved.
    pub pinged: Lanes,
    /// Lanes that starved past their deadline and must render synchronously.
    pub expired: Lanes,
    /// Union of every lane that has an entanglement record.
    pub entangled: Lanes,
    /// Event time of the most recent update on each lane, 0 if none.
    pub event_times: [Timestamp; TOTAL_LANES],
    /// Deadline after which each lane counts as starved.
    pub expiration_times: [Option<Timestamp>; TOTAL_LANES],
    /// For each lane, the lanes it must render together with.
    pub entanglements: [Lanes; TOTAL_LANES],
    /// When false (legacy sync-by-default roots) continuous input is batched
    /// together with pending default work.
    pub concurrent_updates_by_default: bool,
}

impl Default for RootLanes {
    fn default() -> Self {
        Self::new(false)
    }
}

impl RootLanes {
    /// Fresh record with nothing pending.
    pub fn new(concurrent_updates_by_default: bool) -> Self {
        Self {
            pending: Lanes::NONE,
            suspended: Lanes::NONE,
            pinged: Lanes::NONE,
            expired: Lanes::NONE,
            entangled: Lanes::NONE,
            event_times: [0; TOTAL_LANES],
            expiration_times: [None; TOTAL_LANES],
            entanglements: [Lanes::NONE; TOTAL_LANES],
            concurrent_updates_by_default,
        }
    }

    /// True if any lane still has work.
    pub fn has_pending_work(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Select the next batch of lanes to render.
    ///
    /// `wip_lanes` are the lanes of a render already in progress (empty if
    /// none). An in-progress render is only interrupted by strictly more
    /// urgent work, and default work never interrupts a transition render.
    pub fn next_lanes(&self, wip_lanes: Lanes) -> Lanes {
        let pending = self.pending;
        if pending.is_empty() {
            return Lanes::NONE;
        }

        let mut next = Lanes::NONE;
        let non_idle_pending = pending & Lanes::NON_IDLE;
        if !non_idle_pending.is_empty() {
            let unblocked = non_idle_pending.remove(self.suspended);
            if !unblocked.is_empty() {
                next = highest_priority_lanes(unblocked);
            } else {
                let pinged = non_idle_pending & self.pinged;
                if !pinged.is_empty() {
                    next = highest_priority_lanes(pinged);
                }
            }
        } else {
            // Only idle work is left.
            let unblocked = pending.remove(self.suspended);
            if !unblocked.is_empty() {
                next = highest_priority_lanes(unblocked);
            } else if !self.pinged.is_empty() {
                next = highest_priority_lanes(self.pinged);
            }
        }

        if next.is_empty() {
            return Lanes::NONE;
        }

        if !wip_lanes.is_empty()
            && wip_lanes != next
            && !wip_lanes.includes_some(self.suspended)
        {
            let next_lane = next.highest_priority_lane();
            let wip_lane = wip_lanes.highest_priority_lane();
            if next_lane >= wip_lane
                || (next_lane == Lanes::DEFAULT && wip_lane.includes_some(Lanes::TRANSITIONS))
            {
                cov_mark::hit!(next_lanes_keeps_in_progress_render);
                return wip_lanes;
            }
        }

        if !self.concurrent_updates_by_default && next.includes_some(Lanes::INPUT_CONTINUOUS) {
            next |= pending & Lanes::DEFAULT;
        }

        self.entangled_lanes(next)
    }

    /// `lanes` plus every lane entangled with one of them.
    pub fn entangled_lanes(&self, lanes: Lanes) -> Lanes {
        let mut result = lanes;
        for (index, _) in (lanes & self.entangled).iter() {
            result |= self.entanglements[index];
        }
        result
    }

    /// Most recent event time among `lanes`.
    pub fn most_recent_event_time(&self, lanes: Lanes) -> Timestamp {
        lanes
            .iter()
            .map(|(index, _)| self.event_times[index])
            .max()
            .unwrap_or(0)
    }

    /// Record a new update on `lane`.
    ///
    /// A non-idle update may unblock suspended work, so suspended and pinged
    /// lanes are cleared and every lane gets another attempt.
    pub fn mark_updated(&mut self, lane: Lanes, event_time: Timestamp) {
        self.pending |= lane;
        if lane != Lanes::IDLE {
            self.suspended = Lanes::NONE;
            self.pinged = Lanes::NONE;
        }
        if !lane.is_empty() {
            self.event_times[lane.index()] = event_time;
        }
    }

    /// Mark `lanes` as suspended.
    ///
    /// Suspended lanes are not pinged any more and lose their expiration
    /// timers: they cannot starve while they wait for data.
    pub fn mark_suspended(&mut self, lanes: Lanes) {
        self.suspended |= lanes;
        self.pinged = self.pinged.remove(lanes);
        for (index, _) in lanes.iter() {
            self.expiration_times[index] = None;
        }
    }

    /// Mark the suspended subset of `lanes` as pinged.
    pub fn mark_pinged(&mut self, lanes: Lanes) {
        self.pinged |= self.suspended & lanes;
    }

    /// Retire every pending lane not in `remaining`.
    ///
    /// The slots of the finished lanes are zeroed. Suspended and pinged
    /// state is reset so the remaining lanes are retried from scratch.
    pub fn mark_finished(&mut self, remaining: Lanes) {
        let finished = self.pending.remove(remaining);

        self.pending = remaining;
        self.suspended = Lanes::NONE;
        self.pinged = Lanes::NONE;
        self.expired &= remaining;
        self.entangled &= remaining;

        for (index, _) in finished.iter() {
            self.entanglements[index] = Lanes::NONE;
            self.event_times[index] = 0;
            self.expiration_times[index] = None;
        }
    }

    /// Entangle `lanes` with each other.
    ///
    /// Entanglement is transitive: every lane already entangled with one of
    /// `lanes` joins the group, and every member's record ends up holding the
    /// whole group, so rendering any member pulls in all the others.
    pub fn mark_entangled(&mut self, lanes: Lanes) {
        self.entangled |= lanes;
        let mut group = lanes;
        for (index, lane) in self.entangled.iter() {
            if lane.includes_some(lanes) || self.entanglements[index].includes_some(lanes) {
                group |= self.entanglements[index];
            }
        }
        for (index, _) in group.iter() {
            self.entanglements[index] |= group;
        }
    }

    /// Stamp deadlines on fresh pending lanes and expire the overdue ones.
    ///
    /// Lanes without a deadline get one if they are not blocked (unsuspended
    /// or pinged). Lanes whose deadline is at or before `now` are added to
    /// `expired`, which forces them to render without yielding.
    pub fn mark_starved_lanes_as_expired(&mut self, now: Timestamp) {
        for (index, lane) in self.pending.iter() {
            match self.expiration_times[index] {
                None => {
                    if !lane.includes_some(self.suspended) || lane.includes_some(self.pinged) {
                        self.expiration_times[index] = compute_expiration_time(lane, now);
                    }
                }
                Some(deadline) if deadline <= now => {
                    cov_mark::hit!(starved_lane_expired);
                    self.expired |= lane;
                }
                Some(_) => {}
            }
        }
    }

    /// True if any of `lanes` has expired.
    pub fn includes_expired_lane(&self, lanes: Lanes) -> bool {
        lanes.includes_some(self.expired)
    }

    /// Force pending continuous input to render synchronously.
    pub fn mark_discrete_updates_expired(&mut self) {
        self.expired |= Lanes::INPUT_CONTINUOUS & self.pending;
    }

    /// Lanes to retry synchronously after a render error: everything except
    /// offscreen work, or offscreen work alone if nothing else is pending.
    pub fn lanes_to_retry_synchronously_on_error(&self) -> Lanes {
        let everything_but_offscreen = self.pending.remove(Lanes::OFFSCREEN);
        if !everything_but_offscreen.is_empty() {
            return everything_but_offscreen;
        }
        if self.pending.includes_some(Lanes::OFFSCREEN) {
            return Lanes::OFFSCREEN;
        }
        Lanes::NONE
    }
}

fn compute_expiration_time(lane: Lanes, now: Timestamp) -> Option<Timestamp> {
    lane.class()
        .and_then(LaneClass::expiration_timeout)
        .map(|timeout| now + timeout)
}
