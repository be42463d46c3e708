use std::io::Cursor;
use std::sync::Mutex;

use crate::common::{PageId, PAGE_SIZE};
use crate::concurrency::TransactionId;
use crate::error::{DbError, Result};
use crate::tuple::desc::TupleDesc;
use crate::tuple::Tuple;

/// Number of tuple slots that fit on a page: each slot needs its payload
/// bytes plus one header bit.
pub fn slots_per_page(desc: &TupleDesc) -> usize {
    (PAGE_SIZE * 8) / (desc.byte_size() * 8 + 1)
}

fn header_size(num_slots: usize) -> usize {
    (num_slots + 7) / 8
}

/// One page of a heap file: a slot-occupancy bitmap followed by fixed-width
/// tuple slots, zero-padded to `PAGE_SIZE`.
///
/// The before-image is a byte snapshot taken when the page was read from disk
/// and refreshed on commit; it feeds the log ahead of every flush. A small
/// dedicated mutex guards just that buffer so readers never race a refresh.
pub struct HeapPage {
    pid: PageId,
    desc: TupleDesc,
    num_slots: usize,
    header: Vec<u8>,
    tuples: Vec<Option<Tuple>>,
    dirty: Option<TransactionId>,
    before_image: Mutex<Vec<u8>>,
}

impl HeapPage {
    pub fn new(pid: PageId, data: &[u8], desc: TupleDesc) -> Result<Self> {
        if data.len() != PAGE_SIZE {
            return Err(DbError::Db(format!(
                "page {pid:?} has {} bytes, expected {PAGE_SIZE}",
                data.len()
            )));
        }

        let num_slots = slots_per_page(&desc);
        let header = data[..header_size(num_slots)].to_vec();
        let tuple_size = desc.byte_size();

        let mut tuples = Vec::with_capacity(num_slots);
        let mut cursor = Cursor::new(&data[header.len()..]);
        for slot in 0..num_slots {
            if header[slot / 8] & (1 << (slot % 8)) != 0 {
                let mut tuple = Tuple::parse(&desc, &mut cursor)?;
                tuple.set_record_id(Some((pid, slot)));
                tuples.push(Some(tuple));
            } else {
                cursor.set_position(cursor.position() + tuple_size as u64);
                tuples.push(None);
            }
        }

        Ok(Self {
            pid,
            desc,
            num_slots,
            header,
            tuples,
            dirty: None,
            before_image: Mutex::new(data.to_vec()),
        })
    }

    /// The byte image of an empty page.
    pub fn empty_page_data() -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    pub fn id(&self) -> PageId {
        self.pid
    }

    pub fn desc(&self) -> &TupleDesc {
        &self.desc
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        self.header[slot / 8] & (1 << (slot % 8)) != 0
    }

    fn mark_slot_used(&mut self, slot: usize, used: bool) {
        if used {
            self.header[slot / 8] |= 1 << (slot % 8);
        } else {
            self.header[slot / 8] &= !(1 << (slot % 8));
        }
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.num_slots)
            .filter(|slot| !self.is_slot_used(*slot))
            .count()
    }

    /// Serializes the page back into its on-disk byte form. Feeding the
    /// result to `HeapPage::new` reconstructs an equal page.
    pub fn page_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(PAGE_SIZE);
        data.extend_from_slice(&self.header);
        let tuple_size = self.desc.byte_size();
        for tuple in &self.tuples {
            match tuple {
                // serializing fixed-width fields into a Vec cannot fail
                Some(tuple) => tuple.serialize(&mut data).unwrap(),
                None => data.extend(std::iter::repeat(0u8).take(tuple_size)),
            }
        }
        data.resize(PAGE_SIZE, 0);
        data
    }

    /// Places the tuple in the lowest-indexed free slot and assigns its
    /// record id.
    pub fn insert_tuple(&mut self, tuple: &mut Tuple) -> Result<()> {
        if tuple.desc() != &self.desc {
            return Err(DbError::Db(format!(
                "tuple schema {} does not match page schema {}",
                tuple.desc(),
                self.desc
            )));
        }
        let slot = (0..self.num_slots)
            .find(|slot| !self.is_slot_used(*slot))
            .ok_or_else(|| DbError::Db(format!("no empty slots on page {:?}", self.pid)))?;

        tuple.set_record_id(Some((self.pid, slot)));
        self.mark_slot_used(slot, true);
        self.tuples[slot] = Some(tuple.clone());
        Ok(())
    }

    /// Clears the tuple's slot and its record id. The stored tuple must match
    /// the argument field for field.
    pub fn delete_tuple(&mut self, tuple: &mut Tuple) -> Result<()> {
        let (pid, slot) = tuple
            .record_id()
            .ok_or_else(|| DbError::Db("tuple is not stored on any page".to_owned()))?;
        if pid != self.pid || slot >= self.num_slots {
            return Err(DbError::Db(format!("tuple is not on page {:?}", self.pid)));
        }
        match &self.tuples[slot] {
            Some(stored) if stored == tuple => {
                self.mark_slot_used(slot, false);
                self.tuples[slot] = None;
                tuple.set_record_id(None);
                Ok(())
            }
            _ => Err(DbError::Db(format!("tuple is not on page {:?}", self.pid))),
        }
    }

    /// Iterates the occupied slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter().flatten()
    }

    pub fn mark_dirty(&mut self, dirty: bool, tid: TransactionId) {
        self.dirty = dirty.then_some(tid);
    }

    pub fn is_dirty(&self) -> Option<TransactionId> {
        self.dirty
    }

    pub fn before_image(&self) -> Vec<u8> {
        self.before_image.lock().unwrap().clone()
    }

    pub fn set_before_image(&self) {
        let data = self.page_data();
        *self.before_image.lock().unwrap() = data;
    }
}

impl PartialEq for HeapPage {
    fn eq(&self, other: &Self) -> bool {
        self.pid == other.pid && self.header == other.header && self.tuples == other.tuples
    }
}

impl std::fmt::Debug for HeapPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapPage")
            .field("pid", &self.pid)
            .field("occupied", &(self.num_slots - self.num_empty_slots()))
            .field("dirty", &self.dirty)
            .finish()
    }
}
