//! Fixed pool of message slots with push-down age ranking.
//!
//! # How ranking works (for beginners)
//!
//! Every valid slot carries a *rank*: 1 is the message validated most
//! recently, 2 the one before it, and so on.  Free slots have rank 0.  When a
//! slot is validated it jumps to rank 1 and the slots that used to be newer
//! than it each move down one place, like pushing a plate onto a stack.
//! Deleting a slot lifts every older slot up one place to close the gap.
//!
//! Ordering by rank instead of by timestamp means the store never compares two
//! clock readings, so retransmission order stays correct across the 32-bit
//! millisecond counter wrapping around and when two messages share a tick.
//!
//! Because validation only bumps slots that were newer than the one being
//! validated, and deletion only lifts slots that were older than the one being
//! deleted, the ranks of the valid slots are always exactly `1..=valid_count`
//! regardless of the order in which slots are deleted.

use std::fmt;

use thiserror::Error;
use tracing::trace;

use crate::timer::{Millis, SoftwareTimer};

// ── Handle ────────────────────────────────────────────────────────────────────

/// Handle to one slot of a [`MessageSlotStore`].
///
/// Only the store hands these out, so an id always names a slot that exists in
/// a store of at least that size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(usize);

impl SlotId {
    /// Position of the slot in its pool.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum SlotError {
    /// The handle was minted by a larger store.
    #[error("slot index {0} is outside the pool")]
    UnknownSlot(usize),

    #[error("slot buffer is full ({capacity} bytes)")]
    SlotFull { capacity: usize },
}

// ── Slot ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct MessageSlot {
    buf: Box<[u8]>,
    len: usize,
    rank: usize,
    valid: bool,
    transmissions: u8,
    deadline: SoftwareTimer,
}

impl MessageSlot {
    fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
            rank: 0,
            valid: false,
            transmissions: 0,
            deadline: SoftwareTimer::new(),
        }
    }

    fn release(&mut self) {
        self.len = 0;
        self.rank = 0;
        self.valid = false;
        self.transmissions = 0;
        self.deadline.stop();
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// A fixed number of equally sized message buffers with age bookkeeping.
///
/// The engine keeps one store for frames received from the peer and one for
/// frames sent and still awaiting acknowledgement.
#[derive(Debug, Clone)]
pub struct MessageSlotStore {
    slots: Vec<MessageSlot>,
    slot_capacity: usize,
}

impl MessageSlotStore {
    /// Allocates `pool_slots` slots of `slot_capacity` bytes each, all free.
    pub fn new(pool_slots: usize, slot_capacity: usize) -> Self {
        Self {
            slots: (0..pool_slots).map(|_| MessageSlot::new(slot_capacity)).collect(),
            slot_capacity,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_capacity(&self) -> usize {
        self.slot_capacity
    }

    fn slot(&self, id: SlotId) -> Result<&MessageSlot, SlotError> {
        self.slots.get(id.0).ok_or(SlotError::UnknownSlot(id.0))
    }

    fn slot_mut(&mut self, id: SlotId) -> Result<&mut MessageSlot, SlotError> {
        self.slots.get_mut(id.0).ok_or(SlotError::UnknownSlot(id.0))
    }

    /// The first slot not currently holding a valid message.
    ///
    /// The slot may still contain bytes from an abandoned fill; call
    /// [`clear_slot`](Self::clear_slot) or [`write`](Self::write) before use.
    pub fn free_slot(&self) -> Option<SlotId> {
        self.slots.iter().position(|s| !s.valid).map(SlotId)
    }

    /// Appends one byte to the slot's buffer.
    ///
    /// # Errors
    ///
    /// [`SlotError::SlotFull`] once the buffer holds `slot_capacity` bytes.
    pub fn append_byte(&mut self, id: SlotId, byte: u8) -> Result<(), SlotError> {
        let slot = self.slot_mut(id)?;
        if slot.len == slot.buf.len() {
            return Err(SlotError::SlotFull {
                capacity: slot.buf.len(),
            });
        }
        slot.buf[slot.len] = byte;
        slot.len += 1;
        Ok(())
    }

    /// Replaces the slot's contents with `bytes`.
    ///
    /// On [`SlotError::SlotFull`] the slot is left empty.
    pub fn write(&mut self, id: SlotId, bytes: &[u8]) -> Result<(), SlotError> {
        let slot = self.slot_mut(id)?;
        slot.len = 0;
        if bytes.len() > slot.buf.len() {
            return Err(SlotError::SlotFull {
                capacity: slot.buf.len(),
            });
        }
        slot.buf[..bytes.len()].copy_from_slice(bytes);
        slot.len = bytes.len();
        Ok(())
    }

    /// Empties the slot's buffer without touching its validity or rank.
    pub fn clear_slot(&mut self, id: SlotId) -> Result<(), SlotError> {
        self.slot_mut(id)?.len = 0;
        Ok(())
    }

    /// The bytes currently held by the slot.
    pub fn bytes(&self, id: SlotId) -> Result<&[u8], SlotError> {
        let slot = self.slot(id)?;
        Ok(&slot.buf[..slot.len])
    }

    /// Moves `id` to rank 1.  Slots that were newer than it move down one place.
    fn promote(&mut self, id: SlotId) {
        let target = &self.slots[id.0];
        let old_rank = target.valid.then_some(target.rank);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if index == id.0 || !slot.valid {
                continue;
            }
            if old_rank.map_or(true, |r| slot.rank < r) {
                slot.rank += 1;
            }
        }
        let slot = &mut self.slots[id.0];
        slot.valid = true;
        slot.rank = 1;
        debug_assert!(self.ranks_are_dense());
    }

    /// Marks the slot as holding a fresh message: rank 1, deadline armed for
    /// `timeout` ms, transmission count reset to 0.
    pub fn validate(&mut self, id: SlotId, now: Millis, timeout: Millis) -> Result<(), SlotError> {
        self.slot(id)?;
        self.promote(id);
        let slot = &mut self.slots[id.0];
        slot.deadline.start(now, timeout);
        slot.transmissions = 0;
        trace!(%id, len = slot.len, "slot validated");
        Ok(())
    }

    /// Like [`validate`](Self::validate) but keeps the transmission count, for
    /// a message that was sent again rather than newly queued.
    pub fn mark_retransmitted(
        &mut self,
        id: SlotId,
        now: Millis,
        timeout: Millis,
    ) -> Result<(), SlotError> {
        self.slot(id)?;
        self.promote(id);
        self.slots[id.0].deadline.start(now, timeout);
        Ok(())
    }

    /// Frees the slot and lifts every older slot up one rank.
    pub fn delete_slot(&mut self, id: SlotId) -> Result<(), SlotError> {
        let slot = self.slot(id)?;
        if slot.valid {
            let rank = slot.rank;
            for other in self.slots.iter_mut().filter(|s| s.valid && s.rank > rank) {
                other.rank -= 1;
            }
        }
        self.slots[id.0].release();
        debug_assert!(self.ranks_are_dense());
        trace!(%id, "slot deleted");
        Ok(())
    }

    /// The valid slot with the highest rank.
    pub fn oldest(&self) -> Option<SlotId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.valid)
            .max_by_key(|(_, s)| s.rank)
            .map(|(i, _)| SlotId(i))
    }

    /// The valid slot at rank 1.
    pub fn newest(&self) -> Option<SlotId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.valid)
            .min_by_key(|(_, s)| s.rank)
            .map(|(i, _)| SlotId(i))
    }

    pub fn count_timed_out(&self, now: Millis) -> usize {
        self.slots
            .iter()
            .filter(|s| s.valid && s.deadline.is_timed_out(now))
            .count()
    }

    /// Valid slots whose deadline has passed, oldest first.
    pub fn timed_out(&self, now: Millis) -> Vec<SlotId> {
        let mut expired: Vec<(usize, usize)> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.valid && s.deadline.is_timed_out(now))
            .map(|(i, s)| (s.rank, i))
            .collect();
        expired.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        expired.into_iter().map(|(_, i)| SlotId(i)).collect()
    }

    pub fn is_oldest_timed_out(&self, now: Millis) -> bool {
        self.oldest()
            .is_some_and(|id| self.slots[id.0].deadline.is_timed_out(now))
    }

    /// Bumps the slot's transmission count and returns the new value.
    pub fn increment_transmission_count(&mut self, id: SlotId) -> Result<u8, SlotError> {
        let slot = self.slot_mut(id)?;
        slot.transmissions = slot.transmissions.saturating_add(1);
        Ok(slot.transmissions)
    }

    /// Re-arms the slot's deadline from `now` with its previous duration.
    pub fn reset_deadline(&mut self, id: SlotId, now: Millis) -> Result<(), SlotError> {
        self.slot_mut(id)?.deadline.restart(now);
        Ok(())
    }

    pub fn is_valid(&self, id: SlotId) -> bool {
        self.slot(id).is_ok_and(|s| s.valid)
    }

    /// 0 for a free slot.
    pub fn rank(&self, id: SlotId) -> Result<usize, SlotError> {
        Ok(self.slot(id)?.rank)
    }

    pub fn transmission_count(&self, id: SlotId) -> Result<u8, SlotError> {
        Ok(self.slot(id)?.transmissions)
    }

    pub fn valid_count(&self) -> usize {
        self.slots.iter().filter(|s| s.valid).count()
    }

    /// Frees every slot.
    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(MessageSlot::release);
    }

    /// `true` when the valid slots hold exactly the ranks `1..=valid_count`
    /// and every free slot has rank 0.
    pub fn ranks_are_dense(&self) -> bool {
        let mut seen = vec![false; self.slots.len() + 1];
        for slot in &self.slots {
            if !slot.valid {
                if slot.rank != 0 {
                    return false;
                }
                continue;
            }
            match seen.get_mut(slot.rank) {
                Some(flag) if slot.rank > 0 && !*flag => *flag = true,
                _ => return false,
            }
        }
        let valid = self.valid_count();
        seen[1..=valid].iter().all(|f| *f)
    }
}
