//! # Access Stats
//! Mergeable hit counter per URL section plus a running total.
//!
//! Pure data: no locking here. The monitor decides who owns which instance.

use std::collections::HashMap;
use std::ops::AddAssign;

use serde::Serialize;

use crate::parser::Sample;

/// Hits per section. `total_hits` always equals the sum of `section_hits`,
/// which is why both fields are only mutated through the methods below.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessStats {
    section_hits: HashMap<String, u64>,
    total_hits: u64,
}

/// Immutable view handed to reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub section_hits: HashMap<String, u64>,
    pub total_hits: u64,
    /// `null` when there were no hits or no top section was asked for.
    pub most_popular_section: Option<String>,
}

impl AccessStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_hits(&self) -> u64 {
        self.total_hits
    }

    pub fn section_hits(&self) -> &HashMap<String, u64> {
        &self.section_hits
    }

    pub fn hits_for(&self, section: &str) -> u64 {
        self.section_hits.get(section).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.total_hits == 0
    }

    pub fn add_sample(&mut self, sample: &Sample) {
        self.add_section_hits(&sample.section, 1);
    }

    /// Fold `other`'s counts into `self`. Commutative and associative.
    pub fn merge(&mut self, other: &AccessStats) {
        for (section, hits) in &other.section_hits {
            self.add_section_hits(section, *hits);
        }
    }

    pub fn reset(&mut self) {
        self.section_hits.clear();
        self.total_hits = 0;
    }

    /// Section with the most hits. Ties go to whichever key the map yields
    /// first, which is not stable across differently-built maps.
    pub fn most_popular_section(&self) -> Option<&str> {
        let mut best: Option<(&str, u64)> = None;
        for (section, &hits) in &self.section_hits {
            match best {
                Some((_, top)) if hits <= top => {}
                _ => best = Some((section.as_str(), hits)),
            }
        }
        best.map(|(section, _)| section)
    }

    pub fn snapshot(&self, top_section: bool) -> StatsSnapshot {
        StatsSnapshot {
            section_hits: self.section_hits.clone(),
            total_hits: self.total_hits,
            most_popular_section: if top_section {
                self.most_popular_section().map(str::to_string)
            } else {
                None
            },
        }
    }

    fn add_section_hits(&mut self, section: &str, hits: u64) {
        if hits == 0 {
            return;
        }
        match self.section_hits.get_mut(section) {
            Some(n) => *n += hits,
            None => {
                self.section_hits.insert(section.to_string(), hits);
            }
        }
        self.total_hits += hits;
    }
}

impl AddAssign<&AccessStats> for AccessStats {
    fn add_assign(&mut self, other: &AccessStats) {
        self.merge(other);
    }
}

impl AddAssign<Option<&AccessStats>> for AccessStats {
    /// `None` is a no-op.
    fn add_assign(&mut self, other: Option<&AccessStats>) {
        if let Some(other) = other {
            self.merge(other);
        }
    }
}
