//! Eviction Engine Module
//!
//! Approximate LFU sweep: nodes at or below the 10th percentile of usage are
//! removed, frequently used survivors have their counters decayed.

/// Usage counts above this value are decayed by a sweep.
pub const DECAY_FLOOR: u64 = 9;

// == Threshold ==
/// Returns the usage value at the 10th percentile of `usage`.
///
/// The slice is sorted in place. Returns `None` for an empty slice.
pub fn percentile_threshold(usage: &mut [u64]) -> Option<u64> {
    if usage.is_empty() {
        return None;
    }
    usage.sort_unstable();
    Some(usage[usage.len() / 10])
}

// == Decay ==
/// Decays a usage counter to `floor(sqrt(count + 100))`.
///
/// Counters at or below [`DECAY_FLOOR`] are returned unchanged.
pub fn decay(count: u64) -> u64 {
    if count <= DECAY_FLOOR {
        return count;
    }
    ((count as f64) + 100.0).sqrt().floor() as u64
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_empty() {
        assert_eq!(percentile_threshold(&mut []), None);
    }

    #[test]
    fn test_threshold_small_population_is_minimum() {
        let mut usage = vec![7, 3, 9, 1, 5];
        assert_eq!(percentile_threshold(&mut usage), Some(1));
        assert_eq!(usage, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn test_threshold_tenth_percentile() {
        let mut usage: Vec<u64> = (0..20).rev().collect();
        // 20 / 10 = index 2 of the sorted list
        assert_eq!(percentile_threshold(&mut usage), Some(2));
    }

    #[test]
    fn test_decay_leaves_small_counts() {
        for count in 0..=DECAY_FLOOR {
            assert_eq!(decay(count), count);
        }
    }

    #[test]
    fn test_decay_values() {
        assert_eq!(decay(10), 10);
        assert_eq!(decay(13), 10);
        assert_eq!(decay(21), 11);
        assert_eq!(decay(900), 31);
        assert_eq!(decay(9_900), 100);
    }
}
