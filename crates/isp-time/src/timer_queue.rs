/// Default number of timer handles a queue hands out before `create` fails.
pub const DEFAULT_MAX_TIMERS: usize = 32;

/// Handle onto a deferred callback owned by a [`TimerQueue`].
///
/// Handles are created once and re-armed with [`TimerQueue::schedule`] across
/// cycles; they are never destroyed before the queue itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u32);

#[derive(Debug)]
struct TimerSlot<E> {
    event: E,
    /// `Some` while armed; re-arming replaces the deadline, disarming
    /// drops it.
    deadline_ns: Option<u64>,
}

/// Deadline-ordered deferred-callback scheduler.
///
/// The host drives the queue from its event loop: after advancing the virtual
/// clock it repeatedly calls [`TimerQueue::pop_due`] and dispatches the
/// returned events to the owning devices. Firing order is
/// earliest-deadline-first, with creation order breaking ties, so a
/// single-threaded host delivers callbacks deterministically.
#[derive(Debug)]
pub struct TimerQueue<E> {
    slots: Vec<TimerSlot<E>>,
    max_timers: usize,
}

impl<E: Copy> TimerQueue<E> {
    pub fn new() -> Self {
        Self::with_max_timers(DEFAULT_MAX_TIMERS)
    }

    pub fn with_max_timers(max_timers: usize) -> Self {
        Self {
            slots: Vec::new(),
            max_timers,
        }
    }

    /// Allocates a reusable timer handle delivering `event` when due.
    ///
    /// Returns `None` once the queue's fixed handle capacity is exhausted.
    pub fn create(&mut self, event: E) -> Option<TimerId> {
        if self.slots.len() >= self.max_timers {
            return None;
        }
        let id = TimerId(self.slots.len() as u32);
        self.slots.push(TimerSlot {
            event,
            deadline_ns: None,
        });
        Some(id)
    }

    /// (Re)arms `id` to fire at `deadline_ns`. Re-arming an already armed
    /// timer replaces its previous deadline.
    pub fn schedule(&mut self, id: TimerId, deadline_ns: u64) {
        self.slot_mut(id).deadline_ns = Some(deadline_ns);
    }

    /// Drops `id`'s pending deadline, if any. The handle stays valid and can
    /// be re-armed with [`TimerQueue::schedule`].
    pub fn disarm(&mut self, id: TimerId) {
        self.slot_mut(id).deadline_ns = None;
    }

    pub fn is_armed(&self, id: TimerId) -> bool {
        self.slot(id).deadline_ns.is_some()
    }

    /// Earliest armed deadline, if any.
    pub fn next_deadline(&self) -> Option<u64> {
        self.slots.iter().filter_map(|slot| slot.deadline_ns).min()
    }

    /// Disarms and returns the earliest timer with `deadline <= now_ns`.
    pub fn pop_due(&mut self, now_ns: u64) -> Option<(TimerId, E)> {
        let (idx, _) = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.deadline_ns.map(|d| (idx, d)))
            .filter(|&(_, deadline)| deadline <= now_ns)
            .min_by_key(|&(idx, deadline)| (deadline, idx))?;

        let slot = &mut self.slots[idx];
        slot.deadline_ns = None;
        Some((TimerId(idx as u32), slot.event))
    }

    fn slot(&self, id: TimerId) -> &TimerSlot<E> {
        &self.slots[id.0 as usize]
    }

    fn slot_mut(&mut self, id: TimerId) -> &mut TimerSlot<E> {
        &mut self.slots[id.0 as usize]
    }
}

impl<E: Copy> Default for TimerQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}
