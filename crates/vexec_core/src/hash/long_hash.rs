
use hashbrown::HashTable;
use vexec_error::{DbError, Result};

use super::{HASH_RANDOM_STATE, reserve_table_slot};
use crate::buffer::buffer_manager::{BufferManagerRef, Reservation, reserve_vec};

/// Hash of fixed-width 64 bit keys to dense ids assigned in insertion order.
#[derive(Debug)]
pub struct LongHash {
    /// Keys indexed by id.
    keys: Vec<u64>,
    /// Ids, hashed by their key.
    table: HashTable<u32>,
    keys_reservation: Reservation,
    table_reservation: Reservation,
}

impl LongHash {
    pub fn new(manager: &BufferManagerRef) -> Self {
        LongHash {
            keys: Vec::new(),
            table: HashTable::new(),
            keys_reservation: Reservation::new(manager),
            table_reservation: Reservation::new(manager),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Add a key.
    ///
    /// Returns the existing id if the key was already present, otherwise
    /// `-1 - id` for the newly assigned id.
    pub fn add(&mut self, key: u64) -> Result<i64> {
        let hash = HASH_RANDOM_STATE.hash_one(key);
        let keys = &self.keys;
        if let Some(&id) = self.table.find(hash, |&id| keys[id as usize] == key) {
            return Ok(id as i64);
        }

        let id = self.keys.len();
        let id_u32 = u32::try_from(id)
            .map_err(|_| DbError::new("Too many distinct keys").with_field("count", id))?;

        reserve_vec(&mut self.keys, 1, &mut self.keys_reservation)?;
        let keys = &self.keys;
        reserve_table_slot(&mut self.table, &mut self.table_reservation, |&id| {
            HASH_RANDOM_STATE.hash_one(keys[id as usize])
        })?;

        self.keys.push(key);
        let keys = &self.keys;
        self.table.insert_unique(hash, id_u32, |&id| {
            HASH_RANDOM_STATE.hash_one(keys[id as usize])
        });

        Ok(-1 - id as i64)
    }

    /// Find the id for a key without inserting it.
    pub fn find(&self, key: u64) -> Option<i64> {
        let hash = HASH_RANDOM_STATE.hash_one(key);
        self.table
            .find(hash, |&id| self.keys[id as usize] == key)
            .map(|&id| id as i64)
    }

    /// Get the key for an id.
    ///
    /// Panics if the id is out of bounds.
    pub fn get(&self, id: usize) -> u64 {
        self.keys[id]
    }

    pub fn keys(&self) -> &[u64] {
        &self.keys
    }

    pub fn memory_usage(&self) -> usize {
        self.keys_reservation.size() + self.table_reservation.size()
    }

    /// Release all storage. Idempotent.
    pub fn close(&mut self) {
        self.keys = Vec::new();
        self.table = HashTable::new();
        self.keys_reservation.release_all();
        self.table_reservation.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::buffer_manager::TrackingBufferManager;
    use crate::hash::ord_to_group;

    #[test]
    fn ids_in_insertion_order() {
        let manager: BufferManagerRef = TrackingBufferManager::new_ref(None);
        let mut hash = LongHash::new(&manager);

        assert_eq!(-1, hash.add(42).unwrap());
        assert_eq!(-2, hash.add(7).unwrap());
        assert_eq!(0, hash.add(42).unwrap());
        assert_eq!(1, ord_to_group(hash.add(7).unwrap()));

        for v in 0..1000 {
            hash.add(v + 100).unwrap();
        }
        assert_eq!(1002, hash.len());
        assert_eq!(Some(2), hash.find(100));
        assert_eq!(None, hash.find(99));
        assert_eq!(7, hash.get(1));

        assert!(manager.reserved_bytes() > 0);
        assert_eq!(hash.memory_usage(), manager.reserved_bytes());

        hash.close();
        hash.close();
        assert_eq!(0, manager.reserved_bytes());
    }
}
