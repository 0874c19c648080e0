//! Partitioning of the global time axis over the ranks of a process group, and
//! parsing of time range expressions.

use std::collections::BTreeSet;
use std::ops::Range;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{GroupRank, TimeIndex};

/// A contiguous block partition of `nt` time slices over `size` ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeDomain {
    nt: usize,
    size: usize,
    local_nt: usize,
}

impl TimeDomain {
    /// Creates the partition. Every rank must own the same number of slices.
    pub fn new(nt: usize, size: usize) -> Result<Self, ConfigError> {
        if nt == 0 || size == 0 || nt % size != 0 {
            return Err(ConfigError::Partition { nt, size });
        }
        Ok(Self {
            nt,
            size,
            local_nt: nt / size,
        })
    }

    #[inline]
    pub fn nt(&self) -> usize {
        self.nt
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn local_nt(&self) -> usize {
        self.local_nt
    }

    /// Returns the rank owning `global` and the local index on that rank.
    #[inline]
    pub fn owner_of(&self, global: TimeIndex) -> (GroupRank, usize) {
        debug_assert!(global < self.nt);
        (global / self.local_nt, global % self.local_nt)
    }

    /// Inverse of [`TimeDomain::owner_of`].
    #[inline]
    pub fn global_time(&self, rank: GroupRank, local: usize) -> TimeIndex {
        rank * self.local_nt + local
    }

    /// The global times owned by `rank`.
    #[inline]
    pub fn local_range(&self, rank: GroupRank) -> Range<TimeIndex> {
        let start = rank * self.local_nt;
        start..start + self.local_nt
    }

    /// Maps `t` onto `[0, nt)` for a possibly negative offset.
    #[inline]
    pub fn wrap(&self, t: i64) -> TimeIndex {
        t.rem_euclid(self.nt as i64) as TimeIndex
    }
}

/// A deduplicated, ascending set of global times.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationSet(BTreeSet<TimeIndex>);

impl TranslationSet {
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The times in ascending order. Every rank iterates in this order, which
    /// keeps the collectives of the ranks paired up.
    pub fn iter(&self) -> impl Iterator<Item = TimeIndex> + '_ {
        self.0.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<TimeIndex> {
        self.iter().collect()
    }
}

impl FromIterator<TimeIndex> for TranslationSet {
    fn from_iter<I: IntoIterator<Item = TimeIndex>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a TranslationSet {
    type Item = &'a TimeIndex;
    type IntoIter = std::collections::btree_set::Iter<'a, TimeIndex>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Parses a list of times and inclusive ranges into a set of times below `nt`.
/// E.g. `2,4..6,9` -> `{2, 4, 5, 6, 9}`.
pub fn parse_range(spec: &str, nt: usize) -> Result<TranslationSet, ConfigError> {
    let parse_time = |token: &str, value: &str| -> Result<TimeIndex, ConfigError> {
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ConfigError::Parse {
                token: token.into(),
                spec: spec.into(),
            });
        }
        // Digits only, so failing here means the value overflowed
        let t = value.parse::<TimeIndex>().map_err(|_| ConfigError::Range {
            token: token.into(),
            spec: spec.into(),
        })?;
        if t >= nt {
            return Err(ConfigError::Range {
                token: token.into(),
                spec: spec.into(),
            });
        }
        Ok(t)
    };

    let mut out = BTreeSet::new();
    for token in spec.split(',').map(str::trim) {
        if token.is_empty() {
            continue;
        }
        if let Some((start, end)) = token.split_once("..") {
            let start = parse_time(token, start.trim())?;
            let end = parse_time(token, end.trim())?;
            out.extend(start..=end);
        } else {
            out.insert(parse_time(token, token)?);
        }
    }
    Ok(TranslationSet(out))
}

/// Enumerates the Cartesian product of a list of time sets, with the last set
/// varying fastest.
///
/// The sequence is lazy and finite. [`TimeSeq::restart`] rewinds it. An empty
/// list of sets yields a single empty tuple; if any set is empty, there are no
/// tuples at all.
#[derive(Debug, Clone)]
pub struct TimeSeq {
    sets: Vec<Vec<TimeIndex>>,
    odometer: Vec<usize>,
    done: bool,
}

impl TimeSeq {
    #[must_use]
    pub fn new(sets: &[TranslationSet]) -> Self {
        let sets = sets.iter().map(TranslationSet::to_vec).collect_vec();
        let done = sets.iter().any(Vec::is_empty);
        Self {
            odometer: vec![0; sets.len()],
            sets,
            done,
        }
    }

    /// Rewinds the sequence to its first tuple.
    pub fn restart(&mut self) {
        self.odometer.fill(0);
        self.done = self.sets.iter().any(Vec::is_empty);
    }

    /// The total number of tuples.
    pub fn count_tuples(&self) -> usize {
        self.sets.iter().map(Vec::len).product()
    }
}

impl Iterator for TimeSeq {
    type Item = Vec<TimeIndex>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let current = self
            .odometer
            .iter()
            .zip(&self.sets)
            .map(|(&i, set)| set[i])
            .collect_vec();

        // Advance the odometer, carrying from the last digit
        self.done = true;
        for digit in (0..self.odometer.len()).rev() {
            self.odometer[digit] += 1;
            if self.odometer[digit] < self.sets[digit].len() {
                self.done = false;
                break;
            }
            self.odometer[digit] = 0;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[usize]) -> TranslationSet {
        values.iter().copied().collect()
    }

    #[test]
    fn test_partition_requires_exact_division() {
        assert!(TimeDomain::new(8, 2).is_ok());
        assert_eq!(
            TimeDomain::new(10, 4),
            Err(ConfigError::Partition { nt: 10, size: 4 })
        );
        assert!(TimeDomain::new(8, 0).is_err());
        assert!(TimeDomain::new(0, 1).is_err());
    }

    #[test]
    fn test_owner_of_is_bijection() {
        for (nt, size) in [(8, 2), (12, 3), (7, 7), (16, 1), (64, 8)] {
            let domain = TimeDomain::new(nt, size).unwrap();
            let mut seen = vec![false; nt];
            for global in 0..nt {
                let (rank, local) = domain.owner_of(global);
                assert!(rank < size);
                assert!(local < domain.local_nt());
                assert_eq!(domain.global_time(rank, local), global);
                assert!(domain.local_range(rank).contains(&global));
                seen[global] = true;
            }
            assert!(seen.into_iter().all(|s| s));
        }
    }

    #[test]
    fn test_wrap() {
        let domain = TimeDomain::new(8, 2).unwrap();
        assert_eq!(domain.wrap(-1), 7);
        assert_eq!(domain.wrap(-8), 0);
        assert_eq!(domain.wrap(9), 1);
        assert_eq!(domain.wrap(3), 3);
    }

    #[test]
    fn test_wrap_sweep_touches_every_time_once() {
        let domain = TimeDomain::new(12, 3).unwrap();
        for dt in 0..12 {
            let mut hits = vec![0; 12];
            for rank in 0..3 {
                for t_last in 0..domain.local_nt() {
                    let t = domain.global_time(rank, t_last) as i64 - dt as i64;
                    hits[domain.wrap(t)] += 1;
                }
            }
            assert!(hits.iter().all(|&h| h == 1));
        }
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("2,4..6,9", 10).unwrap(), set(&[2, 4, 5, 6, 9]));
        assert_eq!(parse_range("3,3..4", 10).unwrap(), set(&[3, 4]));
        assert_eq!(parse_range(" 1 , 0..1 ", 10).unwrap(), set(&[0, 1]));
        assert_eq!(parse_range("", 10).unwrap(), set(&[]));
        assert_eq!(parse_range("5..3", 10).unwrap(), set(&[]));
    }

    #[test]
    fn test_parse_range_out_of_range() {
        assert_eq!(
            parse_range("11", 10),
            Err(ConfigError::Range {
                token: "11".into(),
                spec: "11".into()
            })
        );
        assert_eq!(
            parse_range("1,8..10", 10),
            Err(ConfigError::Range {
                token: "8..10".into(),
                spec: "1,8..10".into()
            })
        );
        assert!(matches!(
            parse_range("99999999999999999999999", 10),
            Err(ConfigError::Range { .. })
        ));
    }

    #[test]
    fn test_parse_range_malformed() {
        for spec in ["a", "1..", "..2", "1-3", "-1", "1...3"] {
            assert!(
                matches!(parse_range(spec, 10), Err(ConfigError::Parse { .. })),
                "{spec} should not parse"
            );
        }
    }

    #[test]
    fn test_time_seq() {
        let sets = [set(&[0, 2]), set(&[5]), set(&[1, 3])];
        let seq = TimeSeq::new(&sets);
        assert_eq!(seq.count_tuples(), 4);
        assert_eq!(
            seq.collect_vec(),
            vec![vec![0, 5, 1], vec![0, 5, 3], vec![2, 5, 1], vec![2, 5, 3]]
        );
    }

    #[test]
    fn test_time_seq_restart() {
        let mut seq = TimeSeq::new(&[set(&[1, 2])]);
        assert_eq!(seq.next(), Some(vec![1]));
        seq.restart();
        assert_eq!(seq.by_ref().collect_vec(), vec![vec![1], vec![2]]);
        assert_eq!(seq.next(), None);
        seq.restart();
        assert_eq!(seq.count(), 2);
    }

    #[test]
    fn test_time_seq_edge_cases() {
        assert_eq!(TimeSeq::new(&[]).collect_vec(), vec![Vec::<usize>::new()]);
        assert_eq!(TimeSeq::new(&[set(&[1]), set(&[])]).count(), 0);
    }
}
