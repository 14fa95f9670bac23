//! Weighted voting over engine results.
//!
//! Each responding engine casts `weight × confidence` for its status, or its
//! full weight when it reported `Error` (an engine that cannot decide counts
//! against every verdict). `Timeout` results are left out of both the
//! numerator and the denominator. A status wins when its share of the mass
//! reaches the majority threshold and is strictly more than half, so an
//! exact tie never wins; otherwise the request fails closed as a split.
//!
//! Sums are taken over sorted terms, so the tally does not depend on the
//! order results arrived in.

use crate::result::{Agreement, EngineStatus};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vote {
    pub status: EngineStatus,
    pub confidence: f64,
    pub weight: f64,
}

impl Vote {
    fn mass(&self) -> f64 {
        match self.status {
            EngineStatus::Verified | EngineStatus::Failed | EngineStatus::Blocked => {
                self.weight * self.confidence
            }
            EngineStatus::Error => self.weight,
            EngineStatus::Timeout => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tally {
    pub status: EngineStatus,
    pub confidence: f64,
    pub agreement: Agreement,
}

impl Tally {
    pub fn split() -> Self {
        Self {
            status: EngineStatus::Failed,
            confidence: 0.0,
            agreement: Agreement::Split,
        }
    }
}

/// Slack for summation order when a share is compared to the threshold.
const SHARE_EPSILON: f64 = 1e-9;

fn ordered_sum(mut terms: Vec<f64>) -> f64 {
    terms.sort_by(f64::total_cmp);
    terms.into_iter().sum()
}

/// Statuses that can carry a request, checked in this order.
const WINNABLE: [EngineStatus; 3] = [
    EngineStatus::Verified,
    EngineStatus::Blocked,
    EngineStatus::Failed,
];

pub fn aggregate(votes: &[Vote], majority_threshold: f64) -> Tally {
    let responded: Vec<&Vote> = votes
        .iter()
        .filter(|vote| vote.status != EngineStatus::Timeout)
        .collect();
    let total = ordered_sum(responded.iter().map(|vote| vote.mass()).collect());
    if responded.is_empty() || total <= 0.0 {
        return Tally::split();
    }

    let winner = WINNABLE.iter().find_map(|status| {
        let mass = ordered_sum(
            responded
                .iter()
                .filter(|vote| vote.status == *status)
                .map(|vote| vote.mass())
                .collect(),
        );
        let share = mass / total;
        let meets = share + SHARE_EPSILON >= majority_threshold;
        let outweighs = mass > total - mass;
        (meets && outweighs).then_some((*status, share))
    });
    let Some((status, share)) = winner else {
        return Tally::split();
    };

    let dispatched = ordered_sum(votes.iter().map(|vote| vote.weight).collect());
    let answered = ordered_sum(responded.iter().map(|vote| vote.weight).collect());
    let coverage = if dispatched > 0.0 {
        answered / dispatched
    } else {
        0.0
    };
    let agreement = if responded.iter().all(|vote| vote.status == status) {
        Agreement::Unanimous
    } else {
        Agreement::Majority
    };
    Tally {
        status,
        confidence: (share * coverage).clamp(0.0, 1.0),
        agreement,
    }
}
