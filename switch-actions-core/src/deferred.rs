//! Per-CPU deferred action FIFO.
//!
//! Fixed capacity, head/tail indices, never shared across CPUs. Only the
//! outermost [`crate::engine::execute_actions`] entry on a given CPU
//! drains it; nested entries just push onto it and return.

use crate::buffer::PacketBuffer;
use crate::flow_key::FlowKey;

/// One postponed unit of work. `actions` absent means "recirculate":
/// hand the packet back to classification under the carried key.
/// `actions` present means "run this nested TLV list later" (sampling).
pub struct DeferredEntry {
    pub packet: PacketBuffer,
    pub actions: Option<Vec<u8>>,
    pub key: FlowKey,
}

/// A fixed-capacity ring buffer of [`DeferredEntry`] values.
pub struct DeferredFifo {
    slots: Vec<Option<DeferredEntry>>,
    head: usize,
    tail: usize,
    len: usize,
    dropped: u64,
    high_water_mark: usize,
}

impl DeferredFifo {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, head: 0, tail: 0, len: 0, dropped: 0, high_water_mark: 0 }
    }

    /// Total entries rejected because the FIFO was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Highest occupancy this FIFO has reached over its lifetime.
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Enqueue an entry. Returns the entry back (as `Err`) if the FIFO is
    /// full, so the caller can rate-limited-warn and drop it without
    /// having to reconstruct the value.
    pub fn push(&mut self, entry: DeferredEntry) -> Result<(), DeferredEntry> {
        if self.is_full() {
            self.dropped += 1;
            return Err(entry);
        }
        self.slots[self.tail] = Some(entry);
        self.tail = (self.tail + 1) % self.capacity();
        self.len += 1;
        self.high_water_mark = self.high_water_mark.max(self.len);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<DeferredEntry> {
        if self.is_empty() {
            return None;
        }
        let entry = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        entry
    }

    /// Reset head/tail to zero. Only valid to call once empty.
    pub fn reset(&mut self) {
        debug_assert!(self.is_empty());
        self.head = 0;
        self.tail = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_packet() -> PacketBuffer {
        PacketBuffer::new(vec![0u8; 14], 0x0800)
    }

    fn dummy_key() -> FlowKey {
        let mut key = FlowKey::default();
        key.eth.eth_type = 0x0800;
        key
    }

    #[test]
    fn fifo_order_is_preserved() {
        let mut fifo = DeferredFifo::with_capacity(3);
        for id in 0u32..3 {
            let mut key = dummy_key();
            key.recirc_id = id;
            fifo.push(DeferredEntry { packet: dummy_packet(), actions: None, key }).unwrap();
        }
        assert!(fifo.is_full());
        for id in 0u32..3 {
            assert_eq!(fifo.pop().unwrap().key.recirc_id, id);
        }
        assert!(fifo.is_empty());
    }

    #[test]
    fn push_past_capacity_returns_entry() {
        let mut fifo = DeferredFifo::with_capacity(1);
        fifo.push(DeferredEntry { packet: dummy_packet(), actions: None, key: dummy_key() }).unwrap();
        let overflow = fifo.push(DeferredEntry { packet: dummy_packet(), actions: None, key: dummy_key() });
        assert!(overflow.is_err());
    }

    #[test]
    fn full_push_increments_dropped_counter() {
        let mut fifo = DeferredFifo::with_capacity(1);
        fifo.push(DeferredEntry { packet: dummy_packet(), actions: None, key: dummy_key() }).unwrap();
        assert!(fifo.push(DeferredEntry { packet: dummy_packet(), actions: None, key: dummy_key() }).is_err());
        assert_eq!(fifo.dropped(), 1);
        assert_eq!(fifo.high_water_mark(), 1);
    }

    #[test]
    fn reset_after_drain_allows_reuse() {
        let mut fifo = DeferredFifo::with_capacity(2);
        fifo.push(DeferredEntry { packet: dummy_packet(), actions: None, key: dummy_key() }).unwrap();
        fifo.pop();
        fifo.reset();
        assert_eq!(fifo.len(), 0);
        for _ in 0..2 {
            fifo.push(DeferredEntry { packet: dummy_packet(), actions: None, key: dummy_key() }).unwrap();
        }
        assert!(fifo.is_full());
    }
}
