// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

/// This is a structure for issuing and reclaiming the entry handles of a single
/// table.  The namespace is sized to the table, and may be nearly 2^32 handles
/// wide, so free space is tracked as a short list of spans plus a bin of
/// individually recycled handles rather than as a dense bitmap.
use std::cmp::Ord;
use std::cmp::Ordering;
use std::collections::BTreeSet;

use slog::debug;

use crate::types::PipeError;
use crate::types::PipeResult;
use dal::EntryHandle;

/// Handle 0 is never issued, so callers may use it as "no entry".
pub const FIRST_HANDLE: EntryHandle = 1;

/// The largest number of handles a single table can have outstanding.
/// `u32::MAX` is reserved alongside 0.
pub const MAX_HANDLES: u32 = u32::MAX - 1;

// Once this many handles are sitting in the recycle bin, they are folded back
// into the span list.
const RECLAIM_THRESHOLD: usize = 4096;

/// A Span represents a contiguous range of handles, where the range is closed
/// on the bottom and open on the top.  In other words, a Span{1,4} will include
/// 1, 2, and 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    low: u64,
    high: u64,
}

impl Span {
    fn new(low: u64, high: u64) -> Self {
        Span { low, high }
    }

    fn single(handle: EntryHandle) -> Self {
        Span::new(handle as u64, handle as u64 + 1)
    }

    fn size(&self) -> u64 {
        self.high - self.low
    }

    // Take the lowest handle off the span.
    fn take_low(&mut self) -> EntryHandle {
        let handle = self.low as EntryHandle;
        self.low += 1;
        handle
    }
}

impl PartialOrd for Span {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// In the general case Ord is not well-defined for Spans, as they can be
// overlapping in several different ways.  The freelist never holds
// overlapping spans, and a lookup key for a single handle compares Equal to
// the span holding it.
impl Ord for Span {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.high <= other.low {
            Ordering::Less
        } else if self.low >= other.high {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }
}

/// A FreeMap hands out unique entry handles from `[FIRST_HANDLE,
/// FIRST_HANDLE + capacity)`.
pub struct FreeMap {
    // Where debug messages are logged
    log: slog::Logger,
    // Number of handles in the namespace
    capacity: u32,
    // Number of handles currently issued
    in_use: u32,
    // Individually freed handles, not yet folded back into the freelist
    recycled: BTreeSet<EntryHandle>,
    // Free ranges, ordered by their offset and never overlapping
    freelist: Vec<Span>,
}

impl FreeMap {
    pub fn new(log: &slog::Logger, name: impl ToString, capacity: u32) -> Self {
        let unit = format!("handles_{}", name.to_string());
        let log = log.new(slog::o!("unit" => unit));
        let capacity = capacity.min(MAX_HANDLES);
        debug!(log, "created new freemap";  "capacity" => capacity);
        let mut map = FreeMap {
            log,
            capacity,
            in_use: 0,
            recycled: BTreeSet::new(),
            freelist: Vec::new(),
        };
        map.reset();
        map
    }

    // Throw away all allocation state.  It is the caller's responsibility not
    // to free() handles allocated prior to a reset().
    pub fn reset(&mut self) {
        self.recycled = BTreeSet::new();
        self.freelist = vec![Span::new(
            FIRST_HANDLE as u64,
            FIRST_HANDLE as u64 + self.capacity as u64,
        )];
        self.in_use = 0;
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn in_use(&self) -> u32 {
        self.in_use
    }

    /// Issue a handle.  Recycled handles are reused before any never-issued
    /// handle.
    pub fn alloc(&mut self) -> PipeResult<EntryHandle> {
        if let Some(handle) = self.recycled.pop_first() {
            self.in_use += 1;
            #[cfg(not(test))]
            slog::trace!(self.log, "allocated {handle} from recycle bin");
            return Ok(handle);
        }

        if self.freelist.is_empty() {
            return Err(PipeError::TableFull(format!(
                "all {} handles in use",
                self.capacity
            )));
        }
        let handle = self.freelist[0].take_low();
        if self.freelist[0].size() == 0 {
            self.freelist.remove(0);
        }
        self.in_use += 1;
        #[cfg(not(test))]
        slog::trace!(self.log, "allocated {handle} from freelist");
        Ok(handle)
    }

    /// Whether `handle` is currently issued
    pub fn is_allocated(&self, handle: EntryHandle) -> bool {
        let in_range = handle >= FIRST_HANDLE
            && (handle as u64) < FIRST_HANDLE as u64 + self.capacity as u64;
        in_range
            && !self.recycled.contains(&handle)
            && self.freelist.binary_search(&Span::single(handle)).is_err()
    }

    /// Return a handle to the pool.  Freeing a handle that isn't currently
    /// issued means two owners believe they hold it, which is a bug in the
    /// caller, so this panics in every build profile.
    pub fn free(&mut self, handle: EntryHandle) {
        if !self.is_allocated(handle) {
            panic!("freeing handle {handle}, which is not allocated");
        }
        #[cfg(not(test))]
        slog::trace!(self.log, "freeing {handle}");
        self.recycled.insert(handle);
        self.in_use -= 1;
        if self.recycled.len() >= RECLAIM_THRESHOLD {
            self.reclaim();
        }
    }

    // Fold the recycle bin back into the freelist, coalescing adjacent spans.
    fn reclaim(&mut self) {
        let mut spans: Vec<Span> = std::mem::take(&mut self.freelist);
        spans.extend(self.recycled.iter().map(|h| Span::single(*h)));
        self.recycled.clear();

        spans.sort();
        let mut merged: Vec<Span> = Vec::with_capacity(spans.len());
        for span in spans {
            match merged.last_mut() {
                Some(last) if last.high == span.low => last.high = span.high,
                _ => merged.push(span),
            }
        }
        debug!(self.log, "reclaimed recycled handles";
            "spans" => merged.len());
        self.freelist = merged;
    }

    #[cfg(test)]
    fn first(&self) -> Option<Span> {
        self.freelist.first().copied()
    }
}

#[cfg(test)]
fn new_freemap(size: u32) -> FreeMap {
    let log =
        common::logging::init("test", &None, common::logging::LogFormat::Human)
            .unwrap();
    FreeMap::new(&log, "test", size)
}

// sanity check the Ord implementation for span
#[test]
fn test_ordering() -> anyhow::Result<()> {
    let a = Span::new(0, 5);
    assert_eq!(a.size(), 5);
    let b = Span::new(5, 10);
    let c = Span::new(10, 15);

    assert!(a < b);
    assert!(a < c);
    assert!(b < c);
    assert!(c > b);
    assert_eq!(Span::single(7).cmp(&b), Ordering::Equal);
    assert_eq!(Span::single(10).cmp(&b), Ordering::Greater);
    Ok(())
}

// Test simple allocation.
#[test]
fn test_basic() -> anyhow::Result<()> {
    let mut map = new_freemap(128);

    let a = map.alloc()?;
    assert_eq!(a, FIRST_HANDLE);
    assert_eq!(map.first().unwrap(), Span::new(2, 129));
    let b = map.alloc()?;
    assert_eq!(b, 2);
    assert!(map.is_allocated(a));
    assert!(map.is_allocated(b));
    assert!(!map.is_allocated(3));
    assert!(!map.is_allocated(0));
    assert_eq!(map.in_use(), 2);
    Ok(())
}

// Freed handles are reissued before fresh ones
#[test]
fn test_free() -> anyhow::Result<()> {
    let mut map = new_freemap(128);

    let a = map.alloc()?;
    let _b = map.alloc()?;
    map.free(a);
    assert!(!map.is_allocated(a));
    assert_eq!(map.alloc()?, a);
    assert_eq!(map.alloc()?, 3);
    Ok(())
}

#[test]
fn test_exhaustion() -> anyhow::Result<()> {
    let mut map = new_freemap(128);

    let mut s = Vec::new();
    for _ in 0..128 {
        let idx = map.alloc().expect("exhausted pool prematurely");
        s.push(idx);
    }
    assert!(matches!(map.alloc(), Err(PipeError::TableFull(_))));
    map.free(s.pop().unwrap());
    let z = map.alloc()?;
    assert_eq!(z, 128);

    Ok(())
}

#[test]
fn test_reclaim() -> anyhow::Result<()> {
    let mut map = new_freemap(RECLAIM_THRESHOLD as u32 * 2);

    let mut s = Vec::new();
    for _ in 0..RECLAIM_THRESHOLD {
        s.push(map.alloc()?);
    }
    // Free the handles in reverse order to scramble the recycle bin
    while let Some(idx) = s.pop() {
        map.free(idx);
    }

    // Everything has been coalesced back into a single span
    assert_eq!(
        map.first().unwrap(),
        Span::new(1, RECLAIM_THRESHOLD as u64 * 2 + 1)
    );
    assert_eq!(map.in_use(), 0);
    assert_eq!(map.alloc()?, FIRST_HANDLE);
    Ok(())
}

#[test]
fn test_full_namespace() -> anyhow::Result<()> {
    let mut map = new_freemap(u32::MAX);
    assert_eq!(map.capacity(), MAX_HANDLES);
    let a = map.alloc()?;
    assert!(map.is_allocated(a));
    assert!(!map.is_allocated(u32::MAX));
    Ok(())
}

#[test]
#[should_panic(expected = "not allocated")]
fn test_double_free() {
    let mut map = new_freemap(8);
    let a = map.alloc().unwrap();
    map.free(a);
    map.free(a);
}
