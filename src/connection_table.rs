/*
 * @copyright (C) 2024 Ruslan Iusupov <https://github.com/rus0000>
 *
 * SPDX-License-Identifier: MIT
 */
use std::cell::Cell;
use std::marker::PhantomData;
use std::time::Instant;

use indexmap::IndexMap;

use crate::{
    config::AssemblerConfig,
    connection_record::{ConnectionRecord, RetireReason},
    tcp_connection::TcpConnection,
};

/// Slot index in [ConnectionTable].
pub type Slot = usize;

/// Live connections, at most one per 4-tuple.
///
/// * Slots are reused in place after a record is removed. Table is never compacted.
/// * When every slot is taken, capacity is doubled. Growth is not bounded, sweeping is what keeps it small.
/// * Owned and mutated by the capture thread only. The table is `Send` but deliberately not `Sync`.
#[derive(Debug)]
pub struct ConnectionTable {
    slots: Vec<Option<ConnectionRecord>>,
    /// Tombstoned slots, reused LIFO.
    free_slots: Vec<Slot>,
    /// 4-tuple to slot. IndexMap keeps insertion order for stable iteration.
    index: IndexMap<TcpConnection, Slot>,
    _single_thread: PhantomData<Cell<()>>,
}

impl ConnectionTable {
    pub fn new(initial_slots: usize) -> Self {
        let initial_slots = initial_slots.max(1);
        Self {
            slots: (0..initial_slots).map(|_| None).collect(),
            free_slots: (0..initial_slots).rev().collect(),
            index: IndexMap::new(),
            _single_thread: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Amount of live records.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Place record into a free slot, doubling capacity when none is left.
    /// A live record with the same 4-tuple must not exist, see [ConnectionTable::find()].
    pub fn allocate(&mut self, record: ConnectionRecord) -> Slot {
        debug_assert!(!self.index.contains_key(&record.tcp_connection));
        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None => self.grow(),
        };
        self.index.insert(record.tcp_connection, slot);
        self.slots[slot] = Some(record);

        slot
    }

    /// Double capacity, return first new slot. Existing slots keep their indices.
    fn grow(&mut self) -> Slot {
        let old_capacity = self.slots.len();
        let new_capacity = old_capacity * 2;
        self.slots.resize_with(new_capacity, || None);
        // Keep the rest of new slots, lowest index on top.
        self.free_slots.extend((old_capacity + 1..new_capacity).rev());

        old_capacity
    }

    /// Exact 4-tuple match.
    pub fn find(&self, tcp_connection: &TcpConnection) -> Option<Slot> {
        self.index.get(tcp_connection).copied()
    }

    pub fn get(&self, slot: Slot) -> Option<&ConnectionRecord> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, slot: Slot) -> Option<&mut ConnectionRecord> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    /// Tombstone the slot and hand the record back.
    pub fn remove(&mut self, slot: Slot) -> Option<ConnectionRecord> {
        let record = self.slots.get_mut(slot).and_then(Option::take)?;
        self.index.shift_remove(&record.tcp_connection);
        self.free_slots.push(slot);

        Some(record)
    }

    pub fn remove_connection(&mut self, tcp_connection: &TcpConnection) -> Option<ConnectionRecord> {
        let slot = self.find(tcp_connection)?;
        self.remove(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionRecord> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Retire every record matching the retirement policy. Each retired record is given to `on_retire`
    /// for a final extraction, then dropped together with its blocks.
    /// Return amount of retired records.
    pub fn sweep(
        &mut self,
        now: Instant,
        config: &AssemblerConfig,
        on_retire: &mut dyn FnMut(ConnectionRecord, RetireReason),
    ) -> usize {
        // Nothing to do in the common case of an empty or all-active table.
        let retiring: Vec<(Slot, RetireReason)> = self
            .index
            .values()
            .filter_map(|&slot| {
                let record = self.slots[slot].as_ref()?;
                record.retire_reason(now, config).map(|reason| (slot, reason))
            })
            .collect();

        let retired = retiring.len();
        for (slot, reason) in retiring {
            if let Some(record) = self.remove(slot) {
                on_retire(record, reason);
            }
        }

        retired
    }

    /// Remove every record regardless of policy, in order of first appearance.
    pub fn drain(&mut self, on_retire: &mut dyn FnMut(ConnectionRecord, RetireReason)) -> usize {
        let slots: Vec<Slot> = self.index.values().copied().collect();
        let drained = slots.len();
        for slot in slots {
            if let Some(record) = self.remove(slot) {
                on_retire(record, RetireReason::Drained);
            }
        }

        drained
    }
}
