use super::{seed, seeds_for, MAX_RUNS_PER_SUBMISSION};
use std::collections::HashMap;

#[test]
pub fn documented_value() {
    // floor(0.5 * 11 * 12) + 1
    assert_eq!(seed(10, 1), 67);
    assert_eq!(seed(0, 0), 0);
    assert_eq!(seed(100, 0), 5050);
}

#[test]
pub fn submission_ten_yields_four_distinct_seeds() {
    let seeds: Vec<_> = seeds_for(10, MAX_RUNS_PER_SUBMISSION).collect();

    assert_eq!(seeds, vec![55, 67, 80, 94]);
}

#[test]
pub fn deterministic() {
    for j in [0, 1, 17, 9_999, u32::MAX] {
        for r in 0..MAX_RUNS_PER_SUBMISSION {
            assert_eq!(seed(j, r), seed(j, r));
        }
    }
}

#[test]
pub fn collision_free_over_operating_range() {
    let mut seen = HashMap::with_capacity(10_001 * MAX_RUNS_PER_SUBMISSION as usize);

    for j in 0..=10_000u32 {
        for r in 0..MAX_RUNS_PER_SUBMISSION {
            if let Some(previous) = seen.insert(seed(j, r), (j, r)) {
                panic!("seed collision between {previous:?} and {:?}", (j, r));
            }
        }
    }

    assert_eq!(seen.len(), 10_001 * MAX_RUNS_PER_SUBMISSION as usize);
}

#[test]
pub fn extreme_inputs_do_not_overflow() {
    let sum = u32::MAX as u128 + u8::MAX as u128;
    let expected = sum * (sum + 1) / 2 + u8::MAX as u128;

    assert_eq!(seed(u32::MAX, u8::MAX) as u128, expected);
}
