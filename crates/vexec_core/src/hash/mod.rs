//! Hash tables mapping values to dense group ordinals.

pub mod block_hash;
pub mod bytes_hash;
pub mod long_hash;

use ahash::RandomState;
use hashbrown::HashTable;
use vexec_error::Result;

use crate::buffer::buffer_manager::{Reservation, next_capacity};

/// State used for all hashing operations during execution.
pub const HASH_RANDOM_STATE: RandomState = RandomState::with_seeds(0, 0, 0, 0);

/// Decode the result of an `add` on a hash into a group id.
///
/// Adding a key that wasn't previously in the hash returns `-1 - id`.
pub const fn ord_to_group(ord: i64) -> i64 {
    if ord < 0 { -1 - ord } else { ord }
}

/// Approximate bytes per table slot, the entry plus a control byte.
const fn table_slot_bytes<T>() -> usize {
    std::mem::size_of::<T>() + 1
}

/// Ensure the table can fit one more entry, reserving the growth first.
///
/// The table may round its capacity up, the reservation is resized to the
/// capacity it actually ends up with.
pub(crate) fn reserve_table_slot<T>(
    table: &mut HashTable<T>,
    reservation: &mut Reservation,
    hasher: impl Fn(&T) -> u64,
) -> Result<()> {
    if table.len() < table.capacity() {
        return Ok(());
    }
    let target = next_capacity(table.capacity(), table.len() + 1);
    reservation.resize(target * table_slot_bytes::<T>())?;
    table.reserve(target - table.len(), hasher);
    reservation.resize(table.capacity() * table_slot_bytes::<T>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::buffer_manager::{BufferManagerRef, TrackingBufferManager};

    #[test]
    fn table_reservation_tracks_capacity() {
        let manager: BufferManagerRef = TrackingBufferManager::new_ref(None);
        let mut reservation = Reservation::new(&manager);
        let mut table: HashTable<u64> = HashTable::new();

        for v in 0..500_u64 {
            reserve_table_slot(&mut table, &mut reservation, |v| HASH_RANDOM_STATE.hash_one(v))
                .unwrap();
            table.insert_unique(HASH_RANDOM_STATE.hash_one(v), v, |v| {
                HASH_RANDOM_STATE.hash_one(v)
            });
            assert_eq!(table.capacity() * table_slot_bytes::<u64>(), reservation.size());
        }
        assert_eq!(reservation.size(), manager.reserved_bytes());
    }

    #[test]
    fn ord_decoding() {
        assert_eq!(0, ord_to_group(-1));
        assert_eq!(4, ord_to_group(-5));
        assert_eq!(4, ord_to_group(4));
    }
}
