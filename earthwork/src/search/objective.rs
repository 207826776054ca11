use crate::scenario::{ScenarioParams, ScenarioResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Quantity the search minimises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// `|cut - fill|`
    NetEarthwork,

    /// `cut + fill`
    TotalEarthwork,
}

impl Objective {
    pub fn new(optimize_for_net_earthwork: bool) -> Self {
        if optimize_for_net_earthwork {
            Self::NetEarthwork
        } else {
            Self::TotalEarthwork
        }
    }

    pub fn metric(self, result: &ScenarioResult) -> f64 {
        match self {
            Self::NetEarthwork => result.net,
            Self::TotalEarthwork => result.total,
        }
    }

    /// Orders `a` before `b` when `a` is the better candidate.
    ///
    /// Candidates compare by metric, then total volume, then scan
    /// index, so equal optima resolve to the first one found in
    /// ascending parameter order.
    pub fn compare(self, a: &Evaluated, b: &Evaluated) -> Ordering {
        self.compare_volumes(&a.result, &b.result)
            .then(a.index.cmp(&b.index))
    }

    /// Like [Objective::compare], ignoring scan position.
    pub fn compare_volumes(self, a: &ScenarioResult, b: &ScenarioResult) -> Ordering {
        self.metric(a)
            .total_cmp(&self.metric(b))
            .then(a.total.total_cmp(&b.total))
    }

    /// Returns the best of `candidates`.
    pub fn best<'a, I>(self, candidates: I) -> Option<&'a Evaluated>
    where
        I: IntoIterator<Item = &'a Evaluated>,
    {
        candidates.into_iter().min_by(|a, b| self.compare(a, b))
    }
}

/// A successfully evaluated scenario and its scan position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluated {
    pub index: usize,
    pub params: ScenarioParams,
    pub result: ScenarioResult,
}
