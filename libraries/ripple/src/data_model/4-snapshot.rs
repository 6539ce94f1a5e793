//! # Snapshot
//! A snapshot is the decoded result of one full fetch. Caches never hold anything else: no partial merges, no optimistic rows.
//!
//! We ask the store to order by creation time already, but the store gives no guarantee about ties,
//! so every snapshot is re-sorted here: newest first, equal timestamps by ascending id.

use std::cmp::Ordering;

use super::{Record, Row};

pub fn newest_first<T: Record>(a: &T, b: &T) -> Ordering {
    b.created_at()
        .cmp(&a.created_at())
        .then_with(|| a.id().cmp(b.id()))
}

pub fn sort_newest_first<T: Record>(items: &mut [T]) {
    items.sort_by(newest_first);
}

/// Decodes a full fetch. A single bad row fails the whole snapshot, since a cache with holes in it
/// is no longer a mirror of the store.
pub fn decode_snapshot<T: Record>(rows: &[Row]) -> Result<im::Vector<T>, serde_json::Error> {
    let mut items = rows.iter().map(T::from_row).collect::<Result<Vec<_>, _>>()?;
    sort_newest_first(&mut items);
    Ok(items.into_iter().collect())
}
