
use hashbrown::HashTable;
use vexec_error::{DbError, Result};

use super::{HASH_RANDOM_STATE, reserve_table_slot};
use crate::arrays::value_buffer::{BytesBuffer, ValueBuffer};
use crate::buffer::buffer_manager::{BufferManagerRef, Reservation, reserve_vec};

/// Hash of byte strings to dense ids assigned in insertion order.
///
/// Hashes are kept alongside the keys so growing the table never rehashes
/// the key bytes.
#[derive(Debug)]
pub struct BytesRefHash {
    keys: BytesBuffer,
    hashes: Vec<u64>,
    table: HashTable<u32>,
    keys_reservation: Reservation,
    table_reservation: Reservation,
}

impl BytesRefHash {
    pub fn new(manager: &BufferManagerRef) -> Self {
        BytesRefHash {
            keys: BytesBuffer::default(),
            hashes: Vec::new(),
            table: HashTable::new(),
            keys_reservation: Reservation::new(manager),
            table_reservation: Reservation::new(manager),
        }
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Add a key, returning `-1 - id` if it wasn't already present.
    pub fn add(&mut self, key: &[u8]) -> Result<i64> {
        let hash = HASH_RANDOM_STATE.hash_one(key);
        let (keys, hashes) = (&self.keys, &self.hashes);
        if let Some(&id) = self.table.find(hash, |&id| {
            hashes[id as usize] == hash && keys.get(id as usize) == key
        }) {
            return Ok(id as i64);
        }

        let id = self.hashes.len();
        let id_u32 = u32::try_from(id)
            .map_err(|_| DbError::new("Too many distinct keys").with_field("count", id))?;

        self.keys.reserve_for(key, &mut self.keys_reservation)?;
        reserve_vec(&mut self.hashes, 1, &mut self.keys_reservation)?;
        let hashes = &self.hashes;
        reserve_table_slot(&mut self.table, &mut self.table_reservation, |&id| {
            hashes[id as usize]
        })?;

        self.keys.push(key);
        self.hashes.push(hash);
        let hashes = &self.hashes;
        self.table
            .insert_unique(hash, id_u32, |&id| hashes[id as usize]);

        Ok(-1 - id as i64)
    }

    pub fn find(&self, key: &[u8]) -> Option<i64> {
        let hash = HASH_RANDOM_STATE.hash_one(key);
        self.table
            .find(hash, |&id| {
                self.hashes[id as usize] == hash && self.keys.get(id as usize) == key
            })
            .map(|&id| id as i64)
    }

    /// Get the key for an id.
    ///
    /// Panics if the id is out of bounds.
    pub fn get(&self, id: usize) -> &[u8] {
        self.keys.get(id)
    }

    pub fn memory_usage(&self) -> usize {
        self.keys_reservation.size() + self.table_reservation.size()
    }

    /// Release all storage. Idempotent.
    pub fn close(&mut self) {
        self.keys = BytesBuffer::default();
        self.hashes = Vec::new();
        self.table = HashTable::new();
        self.keys_reservation.release_all();
        self.table_reservation.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::buffer_manager::TrackingBufferManager;

    #[test]
    fn ids_in_insertion_order() {
        let manager: BufferManagerRef = TrackingBufferManager::new_ref(None);
        let mut hash = BytesRefHash::new(&manager);

        assert_eq!(-1, hash.add(b"cat").unwrap());
        assert_eq!(-2, hash.add(b"").unwrap());
        assert_eq!(-3, hash.add(b"dog").unwrap());
        assert_eq!(0, hash.add(b"cat").unwrap());
        assert_eq!(1, hash.add(b"").unwrap());

        assert_eq!(Some(2), hash.find(b"dog"));
        assert_eq!(None, hash.find(b"cow"));
        assert_eq!(b"dog", hash.get(2));

        for i in 0..500 {
            hash.add(format!("key-{i}").as_bytes()).unwrap();
        }
        assert_eq!(503, hash.len());
        assert_eq!(Some(3), hash.find(b"key-0"));
        assert_eq!(hash.memory_usage(), manager.reserved_bytes());

        hash.close();
        assert_eq!(0, manager.reserved_bytes());
    }
}
