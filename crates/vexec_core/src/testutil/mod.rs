//! Helpers for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Wake, Waker};

use crate::arrays::element_type::ElementType;
use crate::arrays::page::Page;
use crate::arrays::value::{Value, page_from_rows, page_rows};
use crate::buffer::buffer_manager::NopBufferManager;

/// Build a page from rows using an unaccounted buffer manager.
pub fn page(types: &[ElementType], rows: Vec<Vec<Value>>) -> Page {
    page_from_rows(types, &rows, &NopBufferManager::new_ref()).unwrap()
}

/// Build a page of (long key, long value) rows.
pub fn long_pairs(rows: &[(i64, i64)]) -> Page {
    let rows = rows
        .iter()
        .map(|&(k, v)| vec![Value::Long(k), Value::Long(v)])
        .collect();
    page(&[ElementType::Long, ElementType::Long], rows)
}

/// Concatenate the rows of every page.
pub fn all_rows(pages: &[Page]) -> Vec<Vec<Value>> {
    pages.iter().flat_map(page_rows).collect()
}

/// Rows of every page, sorted by the long or int value in the first column.
///
/// Rows with a null key sort first.
pub fn rows_sorted_by_key(pages: &[Page]) -> Vec<Vec<Value>> {
    let mut rows = all_rows(pages);
    rows.sort_by_key(|row| row.first().and_then(|v| v.try_as_i64().ok()));
    rows
}

/// Assert two sequences of pages hold the same rows, ignoring how rows are
/// split across pages and how blocks are encoded.
#[track_caller]
pub fn assert_pages_eq(expected: &[Page], got: &[Page]) {
    let expected_rows = all_rows(expected);
    let got_rows = all_rows(got);
    assert_eq!(
        expected_rows.len(),
        got_rows.len(),
        "row counts differ\nexpected: {expected_rows:?}\ngot: {got_rows:?}"
    );
    for (idx, (e, g)) in expected_rows.iter().zip(&got_rows).enumerate() {
        assert_eq!(e, g, "row {idx} differs");
    }
}

/// Waker that counts how many times it was woken.
#[derive(Debug, Default)]
pub struct TestWaker {
    wake_count: AtomicUsize,
}

impl TestWaker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn wake_count(&self) -> usize {
        self.wake_count.load(Ordering::SeqCst)
    }

    pub fn waker(self: &Arc<Self>) -> Waker {
        Waker::from(self.clone())
    }
}

impl Wake for TestWaker {
    fn wake(self: Arc<Self>) {
        self.wake_count.fetch_add(1, Ordering::SeqCst);
    }
}
