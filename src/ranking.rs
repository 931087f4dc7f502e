//! Deterministic ordering of quoted candidates.
//!
//! Each candidate is placed in its cheapest zone (ties go to the
//! lexicographically smallest zone). Candidates are then ordered by that
//! price, then by CPU count, then by memory size, with the instance type id
//! as the final tie-break so the order is total.

use std::cmp::Ordering;

use crate::discovery::{PriceQuote, QuotedCandidate};
use crate::inventory::InstanceTypeCandidate;

/// A candidate placed in its best zone.
#[derive(Clone, Debug, PartialEq)]
pub struct RankedCandidate {
    /// The instance type.
    pub candidate: InstanceTypeCandidate,
    /// Quote for the chosen zone.
    pub quote: PriceQuote,
}

impl RankedCandidate {
    /// Instance type id.
    #[must_use]
    pub fn instance_type(&self) -> &str {
        &self.candidate.id
    }

    /// Chosen zone.
    #[must_use]
    pub fn zone(&self) -> &str {
        self.quote.zone()
    }

    /// Spot price in the chosen zone.
    #[must_use]
    pub const fn price(&self) -> f64 {
        self.quote.price()
    }
}

/// Ranked candidates, cheapest first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RankedCandidates {
    entries: Vec<RankedCandidate>,
}

impl RankedCandidates {
    /// Number of ranked candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing survived ranking.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Candidates in rank order.
    #[must_use]
    pub fn as_slice(&self) -> &[RankedCandidate] {
        &self.entries
    }

    /// Starts a fresh pass over the ranking. Dropping a cursor part-way has
    /// no effect on the ranking or on other cursors.
    #[must_use]
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor {
            entries: &self.entries,
            position: 0,
        }
    }
}

/// Forward-only position within [`RankedCandidates`].
#[derive(Clone, Debug)]
pub struct Cursor<'a> {
    entries: &'a [RankedCandidate],
    position: usize,
}

impl Cursor<'_> {
    /// Number of candidates already handed out.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Number of candidates left.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.entries.len().saturating_sub(self.position)
    }
}

impl<'a> Iterator for Cursor<'a> {
    type Item = &'a RankedCandidate;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.get(self.position)?;
        self.position += 1;
        Some(entry)
    }
}

/// Ranks quoted candidates. Candidates without quotes are skipped.
#[must_use]
pub fn rank(quoted: Vec<QuotedCandidate>) -> RankedCandidates {
    let mut entries: Vec<RankedCandidate> = quoted
        .into_iter()
        .filter_map(|QuotedCandidate { candidate, quotes }| {
            best_quote(&quotes).map(|quote| RankedCandidate {
                candidate,
                quote: quote.clone(),
            })
        })
        .collect();
    entries.sort_by(compare);
    RankedCandidates { entries }
}

fn best_quote(quotes: &[PriceQuote]) -> Option<&PriceQuote> {
    quotes.iter().min_by(|left, right| {
        left.price()
            .total_cmp(&right.price())
            .then_with(|| left.zone().cmp(right.zone()))
    })
}

fn compare(left: &RankedCandidate, right: &RankedCandidate) -> Ordering {
    left.price()
        .total_cmp(&right.price())
        .then_with(|| left.candidate.cpu_cores.cmp(&right.candidate.cpu_cores))
        .then_with(|| {
            left.candidate
                .memory_gib
                .total_cmp(&right.candidate.memory_gib)
        })
        .then_with(|| left.candidate.id.cmp(&right.candidate.id))
        .then_with(|| left.zone().cmp(right.zone()))
}
