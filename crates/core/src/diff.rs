//! Merge-join differencing of two ordered snapshots
//!
//! Both inputs must be sorted ascending under the same [`IdOrdering`] with no
//! duplicate ids. The differencer pulls one record at a time from each side,
//! so neither snapshot is ever materialized in memory.

use crate::error::{CoreError, Result};
use crate::record::{IdOrdering, SnapshotRecord};
use std::cmp::Ordering;
use std::iter::Peekable;

/// One difference between the previous and current snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffEvent {
    /// Item is new or its fingerprint changed
    Upsert(SnapshotRecord),
    /// Item disappeared; carries its id
    Delete(String),
}

impl DiffEvent {
    /// Identity of the affected item
    pub fn id(&self) -> &str {
        match self {
            Self::Upsert(record) => &record.id,
            Self::Delete(id) => id,
        }
    }
}

/// Guards one input against ordering violations
struct Ordered<I> {
    inner: I,
    ordering: IdOrdering,
    last_id: Option<String>,
}

impl<I> Iterator for Ordered<I>
where
    I: Iterator<Item = Result<SnapshotRecord>>,
{
    type Item = Result<SnapshotRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.inner.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e)),
        };

        if let Some(last) = &self.last_id {
            if self.ordering.compare(last, &record.id) != Ordering::Less {
                return Some(Err(CoreError::OutOfOrder {
                    previous: last.clone(),
                    next: record.id,
                }));
            }
        }

        self.last_id = Some(record.id.clone());
        Some(Ok(record))
    }
}

/// Lazy iterator of [`DiffEvent`]s
pub struct Differencer<P, C>
where
    P: Iterator<Item = Result<SnapshotRecord>>,
    C: Iterator<Item = Result<SnapshotRecord>>,
{
    previous: Peekable<Ordered<P>>,
    current: Peekable<Ordered<C>>,
    ordering: IdOrdering,
    failed: bool,
}

impl<P, C> Differencer<P, C>
where
    P: Iterator<Item = Result<SnapshotRecord>>,
    C: Iterator<Item = Result<SnapshotRecord>>,
{
    /// Create a differencer over two ordered record sequences
    pub fn new(previous: P, current: C, ordering: IdOrdering) -> Self {
        Self {
            previous: Ordered {
                inner: previous,
                ordering,
                last_id: None,
            }
            .peekable(),
            current: Ordered {
                inner: current,
                ordering,
                last_id: None,
            }
            .peekable(),
            ordering,
            failed: false,
        }
    }

    fn step(&mut self) -> Option<Result<DiffEvent>> {
        loop {
            // Surface input errors before comparing
            if let Some(Err(_)) = self.previous.peek() {
                if let Some(Err(e)) = self.previous.next() {
                    return Some(Err(e));
                }
            }
            if let Some(Err(_)) = self.current.peek() {
                if let Some(Err(e)) = self.current.next() {
                    return Some(Err(e));
                }
            }

            let order = match (self.previous.peek(), self.current.peek()) {
                (None, None) => return None,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(Ok(prev)), Some(Ok(cur))) => self.ordering.compare(&prev.id, &cur.id),
                _ => unreachable!("errors handled above"),
            };

            match order {
                Ordering::Less => {
                    let prev = self.previous.next()?.ok()?;
                    return Some(Ok(DiffEvent::Delete(prev.id)));
                }
                Ordering::Greater => {
                    let cur = self.current.next()?.ok()?;
                    return Some(Ok(DiffEvent::Upsert(cur)));
                }
                Ordering::Equal => {
                    let prev = self.previous.next()?.ok()?;
                    let cur = self.current.next()?.ok()?;
                    if prev.fingerprint != cur.fingerprint {
                        return Some(Ok(DiffEvent::Upsert(cur)));
                    }
                    // Unchanged; keep scanning
                }
            }
        }
    }
}

impl<P, C> Iterator for Differencer<P, C>
where
    P: Iterator<Item = Result<SnapshotRecord>>,
    C: Iterator<Item = Result<SnapshotRecord>>,
{
    type Item = Result<DiffEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.step();
        if matches!(item, Some(Err(_))) {
            self.failed = true;
        }
        item
    }
}

/// Convenience constructor mirroring [`Differencer::new`]
pub fn diff_snapshots<P, C>(previous: P, current: C, ordering: IdOrdering) -> Differencer<P, C>
where
    P: Iterator<Item = Result<SnapshotRecord>>,
    C: Iterator<Item = Result<SnapshotRecord>>,
{
    Differencer::new(previous, current, ordering)
}
