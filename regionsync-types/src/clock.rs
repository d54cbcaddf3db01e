//! Vector clocks for causality tracking between region replicas.
//!
//! Every file entity carries a clock mapping each region that ever mutated
//! it to a counter. Comparing two clocks tells whether one version
//! causally precedes the other or whether the edits were concurrent, which
//! is the only condition treated as a conflict. Wall-clock time is never
//! used for causality.

use crate::RegionId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Causality relationship between two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CausalOrder {
    /// First clock happened before second.
    Before,
    /// First clock happened after second.
    After,
    /// Neither clock dominates the other.
    Concurrent,
    /// Clocks are identical.
    Equal,
}

impl CausalOrder {
    /// Returns the ordering seen from the other operand.
    #[must_use]
    pub const fn reverse(self) -> Self {
        match self {
            Self::Before => Self::After,
            Self::After => Self::Before,
            other => other,
        }
    }
}

/// A vector clock keyed by region.
///
/// Missing keys count as zero, so `{eu: 1}` and `{eu: 1, us: 0}` are equal.
/// Serialises as a plain `region -> counter` map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    clocks: HashMap<RegionId, u64>,
}

impl VectorClock {
    /// Creates an empty clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter for a region (0 if absent).
    #[must_use]
    pub fn get(&self, region: &RegionId) -> u64 {
        self.clocks.get(region).copied().unwrap_or(0)
    }

    /// Iterates over every region entry.
    pub fn entries(&self) -> impl Iterator<Item = (&RegionId, u64)> {
        self.clocks.iter().map(|(region, &time)| (region, time))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    /// Advances the region's counter by one and returns the new value.
    ///
    /// Call exactly once per local mutation that produces a new version.
    pub fn increment(&mut self, region: &RegionId) -> u64 {
        let entry = self.clocks.entry(region.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Raises a region's counter to `time` if it is currently lower.
    pub fn observe(&mut self, region: &RegionId, time: u64) {
        let entry = self.clocks.entry(region.clone()).or_insert(0);
        *entry = (*entry).max(time);
    }

    /// Merges another clock into this one, keeping the element-wise maximum.
    ///
    /// Records "has seen" without producing a new version.
    pub fn merge(&mut self, other: &Self) {
        for (region, &time) in &other.clocks {
            self.observe(region, time);
        }
    }

    /// Returns the merge of this clock and another.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    /// Compares this clock with another.
    #[must_use]
    pub fn compare(&self, other: &Self) -> CausalOrder {
        let regions: HashSet<&RegionId> = self.clocks.keys().chain(other.clocks.keys()).collect();

        let mut ahead = false;
        let mut behind = false;
        for region in regions {
            let mine = self.get(region);
            let theirs = other.get(region);
            if mine > theirs {
                ahead = true;
            } else if mine < theirs {
                behind = true;
            }
            if ahead && behind {
                return CausalOrder::Concurrent;
            }
        }

        match (ahead, behind) {
            (false, false) => CausalOrder::Equal,
            (true, false) => CausalOrder::After,
            (false, true) => CausalOrder::Before,
            (true, true) => CausalOrder::Concurrent,
        }
    }

    /// Compares two possibly-absent clocks.
    ///
    /// An absent clock is before any present one; two absent clocks are equal.
    #[must_use]
    pub fn compare_optional(a: Option<&Self>, b: Option<&Self>) -> CausalOrder {
        match (a, b) {
            (None, None) => CausalOrder::Equal,
            (None, Some(_)) => CausalOrder::Before,
            (Some(_), None) => CausalOrder::After,
            (Some(a), Some(b)) => a.compare(b),
        }
    }

    #[must_use]
    pub fn is_before(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Before
    }

    #[must_use]
    pub fn is_after(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::After
    }

    #[must_use]
    pub fn is_concurrent(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Concurrent
    }

    /// Returns true if this clock is at least `other` for every region.
    #[must_use]
    pub fn dominates(&self, other: &Self) -> bool {
        matches!(self.compare(other), CausalOrder::After | CausalOrder::Equal)
    }
}

impl PartialEq for VectorClock {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Equal
    }
}

impl Eq for VectorClock {}

impl FromIterator<(RegionId, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (RegionId, u64)>>(iter: I) -> Self {
        let mut clock = Self::new();
        for (region, time) in iter {
            clock.observe(&region, time);
        }
        clock
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<_> = self.clocks.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        f.write_str("{")?;
        for (i, (region, time)) in entries.into_iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{region}: {time}")?;
        }
        f.write_str("}")
    }
}
