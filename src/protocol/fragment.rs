//! Fragment reassembly for split encapsulated packets
//!
//! A payload too large for one datagram is split into `compound_size`
//! pieces sharing a `compound_id`. Pieces are parked here until every index
//! has arrived, then concatenated in index order and handed back once.
//! Pieces are held as [`Bytes`] views into the datagram that carried them.
//!
//! Incomplete compounds are bounded so a peer cannot grow the buffer without
//! limit: a maximum number of open compounds (oldest evicted first), a cap
//! on the bytes held across all of them, and a time-to-live after which an
//! untouched compound is dropped.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::error::{ProtocolError, Result};
use crate::utils::metrics::global_metrics;

/// Pieces collected so far for one compound id
#[derive(Debug)]
struct FragmentSet {
    size: u32,
    pieces: Vec<Option<Bytes>>,
    filled: u32,
    held: usize,
    touched_at: Instant,
}

impl FragmentSet {
    fn new(size: u32) -> Self {
        Self {
            size,
            pieces: vec![None; size as usize],
            filled: 0,
            held: 0,
            touched_at: Instant::now(),
        }
    }

    fn set(&mut self, index: u32, bytes: Bytes) -> Result<()> {
        let slot = self
            .pieces
            .get_mut(index as usize)
            .ok_or(ProtocolError::FragmentIndexOutOfRange {
                index,
                size: self.size,
            })?;
        if slot.is_some() {
            return Err(ProtocolError::FragmentAlreadyFilled(index));
        }
        self.held += bytes.len();
        *slot = Some(bytes);
        self.filled += 1;
        self.touched_at = Instant::now();
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.filled == self.size
    }

    fn finish(self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.held);
        for piece in self.pieces.into_iter().flatten() {
            out.put(piece);
        }
        out.freeze()
    }
}

/// Limits applied to one reassembly buffer
#[derive(Debug, Clone, Copy)]
pub struct FragmentLimits {
    /// Largest accepted piece count for one compound
    pub max_compound_size: u32,
    /// Incomplete compounds kept before the oldest is evicted
    pub max_open_compounds: usize,
    /// Bytes held across all incomplete compounds
    pub max_pending_bytes: usize,
    /// Age after which an untouched incomplete compound is dropped
    pub stale_after: Duration,
}

impl Default for FragmentLimits {
    fn default() -> Self {
        Self {
            max_compound_size: 1024,
            max_open_compounds: 256,
            max_pending_bytes: 4 * 1024 * 1024,
            stale_after: Duration::from_secs(30),
        }
    }
}

/// Reassembly buffer keyed by compound id
#[derive(Debug)]
pub struct FragmentBuffer {
    sets: HashMap<u16, FragmentSet>,
    /// Opening order for FIFO eviction
    opened: VecDeque<u16>,
    /// Sum of `held` over `sets`
    held: usize,
    limits: FragmentLimits,
}

impl FragmentBuffer {
    pub fn new() -> Self {
        Self::with_limits(FragmentLimits::default())
    }

    pub fn with_limits(limits: FragmentLimits) -> Self {
        Self {
            sets: HashMap::new(),
            opened: VecDeque::new(),
            held: 0,
            limits,
        }
    }

    /// Number of incomplete compounds currently held
    pub fn pending(&self) -> usize {
        self.sets.len()
    }

    /// Bytes currently parked in incomplete compounds
    pub fn pending_bytes(&self) -> usize {
        self.held
    }

    /// Store one piece. Returns the joined payload when this piece completes
    /// the compound; the compound is forgotten at that point.
    pub fn put(
        &mut self,
        compound_size: u32,
        compound_id: u16,
        fragment_index: u32,
        bytes: Bytes,
    ) -> Result<Option<Bytes>> {
        self.evict_stale();

        match self.sets.get(&compound_id) {
            Some(existing) => {
                if existing.size != compound_size {
                    return Err(ProtocolError::CompoundSizeMismatch {
                        expected: existing.size,
                        actual: compound_size,
                    });
                }
            }
            None => {
                if compound_size == 0 || compound_size > self.limits.max_compound_size {
                    return Err(ProtocolError::OversizedCompound(compound_size));
                }
                if fragment_index >= compound_size {
                    return Err(ProtocolError::FragmentIndexOutOfRange {
                        index: fragment_index,
                        size: compound_size,
                    });
                }
                if self.sets.len() >= self.limits.max_open_compounds {
                    self.evict_oldest(compound_id);
                }
                self.opened.push_back(compound_id);
                self.sets
                    .insert(compound_id, FragmentSet::new(compound_size));
            }
        }

        self.make_room(compound_id, bytes.len())?;

        let Some(set) = self.sets.get_mut(&compound_id) else {
            return Ok(None);
        };
        let len = bytes.len();
        set.set(fragment_index, bytes)?;
        self.held += len;
        trace!(
            compound_id,
            fragment_index,
            filled = set.filled,
            size = set.size,
            "Fragment stored"
        );

        if !set.is_complete() {
            return Ok(None);
        }
        let Some(set) = self.remove(compound_id) else {
            return Ok(None);
        };
        global_metrics().compound_reassembled();
        Ok(Some(set.finish()))
    }

    /// Evict older compounds until `incoming` more bytes fit. When the
    /// compound being filled cannot fit on its own it is dropped as well.
    fn make_room(&mut self, compound_id: u16, incoming: usize) -> Result<()> {
        let limit = self.limits.max_pending_bytes;
        while self.held + incoming > limit {
            if !self.evict_oldest(compound_id) {
                let held = self.held;
                if self.remove(compound_id).is_some() {
                    global_metrics().compound_evicted();
                }
                return Err(ProtocolError::FragmentBudgetExceeded {
                    held: held + incoming,
                    limit,
                });
            }
        }
        Ok(())
    }

    fn remove(&mut self, compound_id: u16) -> Option<FragmentSet> {
        let set = self.sets.remove(&compound_id)?;
        self.held -= set.held;
        self.opened.retain(|id| *id != compound_id);
        Some(set)
    }

    /// Drop compounds not touched within `stale_after`
    fn evict_stale(&mut self) {
        let ttl = self.limits.stale_after;
        let before = self.sets.len();
        self.sets.retain(|_, set| set.touched_at.elapsed() < ttl);
        let removed = before - self.sets.len();
        if removed > 0 {
            let sets = &self.sets;
            self.opened.retain(|id| sets.contains_key(id));
            self.held = sets.values().map(|set| set.held).sum();
            for _ in 0..removed {
                global_metrics().compound_evicted();
            }
            debug!(removed, "Evicted stale incomplete compounds");
        }
    }

    /// Evict the oldest compound other than `keep`. False when none is left.
    fn evict_oldest(&mut self, keep: u16) -> bool {
        let Some(pos) = self.opened.iter().position(|id| *id != keep) else {
            return false;
        };
        let Some(id) = self.opened.remove(pos) else {
            return false;
        };
        if let Some(set) = self.sets.remove(&id) {
            self.held -= set.held;
            global_metrics().compound_evicted();
            debug!(compound_id = id, "Evicted oldest incomplete compound");
        }
        true
    }
}

impl Default for FragmentBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use std::thread;

    fn put(
        buf: &mut FragmentBuffer,
        size: u32,
        id: u16,
        index: u32,
        bytes: &'static [u8],
    ) -> Result<Option<Bytes>> {
        buf.put(size, id, index, Bytes::from_static(bytes))
    }

    #[test]
    fn test_reassembles_out_of_order() {
        let mut buf = FragmentBuffer::new();
        assert_eq!(put(&mut buf, 3, 7, 2, b"ef").unwrap(), None);
        assert_eq!(put(&mut buf, 3, 7, 0, b"ab").unwrap(), None);
        assert_eq!(buf.pending(), 1);
        assert_eq!(
            put(&mut buf, 3, 7, 1, b"cd").unwrap(),
            Some(Bytes::from_static(b"abcdef"))
        );
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let mut buf = FragmentBuffer::new();
        put(&mut buf, 2, 1, 0, b"x").unwrap();
        assert!(matches!(
            put(&mut buf, 2, 1, 0, b"x"),
            Err(ProtocolError::FragmentAlreadyFilled(0))
        ));
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let mut buf = FragmentBuffer::new();
        put(&mut buf, 2, 1, 0, b"x").unwrap();
        assert!(matches!(
            put(&mut buf, 3, 1, 1, b"y"),
            Err(ProtocolError::CompoundSizeMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_index_and_size_bounds() {
        let mut buf = FragmentBuffer::new();
        assert!(matches!(
            put(&mut buf, 2, 1, 2, b"x"),
            Err(ProtocolError::FragmentIndexOutOfRange { index: 2, size: 2 })
        ));
        assert!(matches!(
            put(&mut buf, 0, 1, 0, b"x"),
            Err(ProtocolError::OversizedCompound(0))
        ));
        assert!(matches!(
            put(&mut buf, 5000, 1, 0, b"x"),
            Err(ProtocolError::OversizedCompound(5000))
        ));
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn test_open_compound_limit_evicts_oldest() {
        let mut buf = FragmentBuffer::with_limits(FragmentLimits {
            max_open_compounds: 2,
            ..FragmentLimits::default()
        });
        put(&mut buf, 2, 1, 0, b"a").unwrap();
        put(&mut buf, 2, 2, 0, b"b").unwrap();
        put(&mut buf, 2, 3, 0, b"c").unwrap();
        assert_eq!(buf.pending(), 2);
        // compound 1 was evicted, so its second piece starts a fresh set
        assert_eq!(put(&mut buf, 2, 1, 1, b"z").unwrap(), None);
        assert_eq!(
            put(&mut buf, 2, 3, 1, b"d").unwrap(),
            Some(Bytes::from_static(b"cd"))
        );
    }

    #[test]
    fn test_stale_compounds_expire() {
        let mut buf = FragmentBuffer::with_limits(FragmentLimits {
            stale_after: Duration::from_millis(10),
            ..FragmentLimits::default()
        });
        put(&mut buf, 2, 4, 0, b"a").unwrap();
        thread::sleep(Duration::from_millis(20));
        put(&mut buf, 2, 5, 0, b"b").unwrap();
        assert_eq!(buf.pending(), 1);
    }

    #[test]
    fn test_single_piece_compound() {
        let mut buf = FragmentBuffer::new();
        assert_eq!(
            put(&mut buf, 1, 9, 0, b"whole").unwrap(),
            Some(Bytes::from_static(b"whole"))
        );
    }

    #[test]
    fn test_pending_bytes_cap_evicts_oldest() {
        let mut buf = FragmentBuffer::with_limits(FragmentLimits {
            max_pending_bytes: 8,
            ..FragmentLimits::default()
        });
        put(&mut buf, 2, 1, 0, b"aaaa").unwrap();
        put(&mut buf, 2, 2, 0, b"bbbb").unwrap();
        assert_eq!(buf.pending_bytes(), 8);
        // compound 1 makes room for compound 3
        put(&mut buf, 2, 3, 0, b"cc").unwrap();
        assert_eq!(buf.pending(), 2);
        assert_eq!(buf.pending_bytes(), 6);
        assert_eq!(
            put(&mut buf, 2, 2, 1, b"bb").unwrap(),
            Some(Bytes::from_static(b"bbbbbb"))
        );
        assert_eq!(buf.pending_bytes(), 2);
    }

    #[test]
    fn test_compound_larger_than_budget_is_dropped() {
        let mut buf = FragmentBuffer::with_limits(FragmentLimits {
            max_pending_bytes: 4,
            ..FragmentLimits::default()
        });
        put(&mut buf, 3, 1, 0, b"abc").unwrap();
        assert!(matches!(
            put(&mut buf, 3, 1, 1, b"def"),
            Err(ProtocolError::FragmentBudgetExceeded { held: 6, limit: 4 })
        ));
        assert_eq!(buf.pending(), 0);
        assert_eq!(buf.pending_bytes(), 0);
    }
}
