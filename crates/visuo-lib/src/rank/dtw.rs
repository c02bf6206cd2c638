//! Dynamic time warping with absolute-difference cost and the symmetric
//! (1, 1, 1) step pattern.

/// Cumulative alignment cost. Two empty sequences are at distance zero; an
/// empty and a non-empty one are infinitely apart.
pub fn dtw_distance(a: &[f64], b: &[f64]) -> f64 {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return 0.0,
        (true, false) | (false, true) => return f64::INFINITY,
        _ => {}
    }
    let m = b.len();
    let mut prev = vec![f64::INFINITY; m + 1];
    let mut curr = vec![f64::INFINITY; m + 1];
    prev[0] = 0.0;
    for &x in a {
        curr[0] = f64::INFINITY;
        for j in 1..=m {
            let cost = (x - b[j - 1]).abs();
            let best = prev[j - 1].min(prev[j]).min(curr[j - 1]);
            curr[j] = cost + best;
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[m]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn identical_sequences_are_at_zero() {
        let mut rng = StdRng::seed_from_u64(11);
        for len in 1..8 {
            let a: Vec<f64> = (0..len).map(|_| rng.gen_range(-10.0..10.0)).collect();
            assert_eq!(dtw_distance(&a, &a), 0.0);
        }
    }

    #[test]
    fn distance_is_symmetric() {
        let mut rng = StdRng::seed_from_u64(12);
        for _ in 0..50 {
            let la = rng.gen_range(1..9);
            let lb = rng.gen_range(1..9);
            let a: Vec<f64> = (0..la).map(|_| rng.gen_range(-5.0..5.0)).collect();
            let b: Vec<f64> = (0..lb).map(|_| rng.gen_range(-5.0..5.0)).collect();
            assert_eq!(dtw_distance(&a, &b), dtw_distance(&b, &a));
        }
    }

    #[test]
    fn warping_absorbs_repeats() {
        assert_eq!(dtw_distance(&[1.0, 2.0, 3.0], &[1.0, 2.0, 2.0, 3.0]), 0.0);
        assert_eq!(dtw_distance(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), 3.0);
        assert_eq!(dtw_distance(&[], &[1.0]), f64::INFINITY);
    }
}
