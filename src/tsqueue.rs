//! Fixed-capacity FIFO with two-phase producer and consumer access
//!
//! The queue is a ring of `N` pre-allocated slots. A producer reserves a slot
//! with [`TsQueue::allocate`], fills it through the returned [`Ticket`] and
//! publishes it with [`TsQueue::finalize`]. A consumer claims the oldest
//! published slot with [`TsQueue::process`] and releases it with
//! [`TsQueue::process_done`]. The one-shot [`TsQueue::enqueue`] and
//! [`TsQueue::dequeue`] wrap both phases.
//!
//! The queue itself holds no lock. Shared instances live in an
//! [`IrqCell`](crate::sync::IrqCell), so each phase is one short critical
//! section.

/// Lifecycle of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Empty,
    Allocated,
    Ready,
    Processing,
    Aborted,
}

struct Slot<T> {
    state: SlotState,
    id: u32,
    value: T,
}

/// Handle to a reserved or claimed slot.
///
/// Returned by the first phase and consumed by the second. A ticket that
/// outlives a [`TsQueue::reset`] is stale: using it does nothing.
#[derive(Debug, PartialEq, Eq)]
pub struct Ticket {
    index: usize,
    id: u32,
}

impl Ticket {
    /// Id of the entry this ticket refers to.
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// Bounded queue of `N` entries of type `T`.
pub struct TsQueue<T, const N: usize> {
    slots: [Slot<T>; N],
    rptr: usize,
    wptr: usize,
    next_id: u32,
}

impl<T: Default, const N: usize> TsQueue<T, N> {
    /// Create an empty queue with all slots pre-allocated.
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Slot {
                state: SlotState::Empty,
                id: 0,
                value: T::default(),
            }),
            rptr: 0,
            wptr: 0,
            next_id: 1,
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        N
    }

    /// Reserve the next slot for writing.
    ///
    /// The entry id is assigned here; it becomes visible to the consumer
    /// only after [`TsQueue::finalize`].
    pub fn allocate(&mut self) -> Option<Ticket> {
        if N == 0 {
            return None;
        }
        self.reclaim();

        let index = self.wptr;
        if self.slots[index].state != SlotState::Empty {
            return None;
        }

        let id = self.take_id();
        let slot = &mut self.slots[index];
        slot.state = SlotState::Allocated;
        slot.id = id;
        slot.value = T::default();
        self.wptr = (index + 1) % N;

        Some(Ticket { index, id })
    }

    /// Mutable access to a reserved slot.
    pub fn slot_mut(&mut self, ticket: &Ticket) -> Option<&mut T> {
        let slot = self.slots.get_mut(ticket.index)?;
        if slot.state == SlotState::Allocated && slot.id == ticket.id {
            Some(&mut slot.value)
        } else {
            None
        }
    }

    /// Publish a reserved slot. Returns the entry id, or `None` if the
    /// ticket is stale.
    pub fn finalize(&mut self, ticket: Ticket) -> Option<u32> {
        let slot = self.slots.get_mut(ticket.index)?;
        if slot.state != SlotState::Allocated || slot.id != ticket.id {
            return None;
        }
        slot.state = SlotState::Ready;
        Some(ticket.id)
    }

    /// Claim the oldest published entry.
    ///
    /// Only one entry can be claimed at a time; while it is claimed this
    /// returns `None`.
    pub fn process(&mut self) -> Option<Ticket> {
        if N == 0 {
            return None;
        }
        self.reclaim();

        let index = self.rptr;
        let slot = &mut self.slots[index];
        if slot.state != SlotState::Ready {
            return None;
        }
        slot.state = SlotState::Processing;

        Some(Ticket { index, id: slot.id })
    }

    /// Read access to a claimed entry.
    pub fn slot(&self, ticket: &Ticket) -> Option<&T> {
        let slot = self.slots.get(ticket.index)?;
        if slot.state == SlotState::Processing && slot.id == ticket.id {
            Some(&slot.value)
        } else {
            None
        }
    }

    /// Release a claimed entry.
    pub fn process_done(&mut self, ticket: Ticket) {
        let Some(slot) = self.slots.get_mut(ticket.index) else {
            return;
        };
        if slot.state != SlotState::Processing || slot.id != ticket.id {
            return;
        }
        slot.state = SlotState::Empty;
        slot.value = T::default();
        if self.rptr == ticket.index {
            self.rptr = (ticket.index + 1) % N;
        }
        self.reclaim();
    }

    /// Allocate, fill and publish in one step.
    pub fn enqueue(&mut self, value: T) -> Option<u32> {
        let ticket = self.allocate()?;
        if let Some(slot) = self.slot_mut(&ticket) {
            *slot = value;
        }
        self.finalize(ticket)
    }

    /// Claim, take and release the oldest entry in one step.
    pub fn dequeue(&mut self) -> Option<(u32, T)> {
        let ticket = self.process()?;
        let id = ticket.id;
        let value = core::mem::take(&mut self.slots[ticket.index].value);
        self.process_done(ticket);
        Some((id, value))
    }

    /// Drop a published entry before the consumer claims it.
    ///
    /// Returns `false` if the id is unknown, still being written, or
    /// already claimed.
    pub fn abort(&mut self, id: u32) -> bool {
        if id == 0 {
            return false;
        }
        let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| s.id == id && s.state == SlotState::Ready)
        else {
            return false;
        };
        slot.state = SlotState::Aborted;
        slot.value = T::default();
        self.reclaim();
        true
    }

    /// True if [`TsQueue::allocate`] would fail.
    pub fn is_full(&self) -> bool {
        if N == 0 {
            return true;
        }
        // A non-empty slot at the write pointer means the ring has wrapped
        // onto the read pointer; an aborted head would be reclaimed.
        !matches!(
            self.slots[self.wptr].state,
            SlotState::Empty | SlotState::Aborted
        )
    }

    /// True if no published entry is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of published, unclaimed entries.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Ready)
            .count()
    }

    /// Drop every entry. Outstanding tickets become stale.
    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.state = SlotState::Empty;
            slot.id = 0;
            slot.value = T::default();
        }
        self.rptr = 0;
        self.wptr = 0;
    }

    fn take_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == 0 {
            self.next_id = 1;
        }
        id
    }

    /// Release aborted entries sitting at the head of the ring.
    fn reclaim(&mut self) {
        for _ in 0..N {
            let slot = &mut self.slots[self.rptr];
            if slot.state != SlotState::Aborted {
                break;
            }
            slot.state = SlotState::Empty;
            self.rptr = (self.rptr + 1) % N;
        }
    }
}

impl<T: Default, const N: usize> Default for TsQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
