//! Seed allocation across the submission x run hierarchy.
//!
//! Every run on the grid is identified by its submission index `j` and its
//! index `r` within that submission. Both are folded into a single RNG seed
//! with Cantor's pairing function, which is a bijection on `N x N`, so two
//! distinct runs never share a seed regardless of which node executes them.

/// index of a submission unit within a campaign
pub type SubmissionIndex = u32;
/// index of a run within a submission unit, bounded by `MAX_RUNS_PER_SUBMISSION`
pub type RunIndex = u8;
pub type Seed = u64;

/// hard cap on concurrent runs per grid node
pub const MAX_RUNS_PER_SUBMISSION: RunIndex = 4;

/// Cantor pairing of `(submission, run)`.
///
/// `floor((j + r) * (j + r + 1) / 2) + r`. One of the two factors is always
/// even, so it is halved before the multiplication; with a `u32` submission
/// and `u8` run index the result then always fits into `u64`.
pub fn seed(submission: SubmissionIndex, run: RunIndex) -> Seed {
    let sum = submission as u64 + run as u64;
    let triangle = if sum % 2 == 0 {
        (sum / 2) * (sum + 1)
    } else {
        sum * ((sum + 1) / 2)
    };

    triangle + run as u64
}

/// seeds for all runs of a single submission, in run order
pub fn seeds_for(submission: SubmissionIndex, runs: RunIndex) -> impl Iterator<Item = Seed> {
    (0..runs).map(move |run| seed(submission, run))
}

#[cfg(test)]
#[path = "seed_test.rs"]
mod seed_test;
