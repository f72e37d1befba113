use proptest::prelude::*;

use resample_ab::bootstrap_ci::bca_adjusted_levels;
use resample_ab::tools::{add_one_pvalue, fold_two_sided, ConfidenceBounds};
use resample_ab::{
    permutation_test, EmpiricalBootstrapTest, ResampleError, SessionConfig, Sidedness, Statistic,
};

fn sample() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-1_000.0..1_000.0f64, 1..40)
}

proptest! {
    #[test]
    fn bounds_are_complementary(level in 0.001..0.999f64) {
        let b = ConfidenceBounds::new(level).unwrap();
        prop_assert!((b.left + b.right - 1.0).abs() < 1e-12);
        prop_assert!(b.left < b.right);
    }

    #[test]
    fn intervals_are_ordered(level in 0.01..0.99f64, data in sample()) {
        let ci = ConfidenceBounds::new(level).unwrap().interval(&data);
        prop_assert!(ci.lower <= ci.upper);
    }

    #[test]
    fn invalid_levels_are_rejected(level in prop_oneof![-5.0..=0.0f64, 1.0..5.0f64]) {
        prop_assert!(matches!(
            ConfidenceBounds::new(level),
            Err(ResampleError::Configuration(_))
        ));
    }

    #[test]
    fn smoothed_pvalues_stay_in_range(n in 1usize..10_000, frac in 0.0..=1.0f64) {
        let count = ((n as f64) * frac).floor() as usize;
        let p = add_one_pvalue(count.min(n), n);
        prop_assert!(p >= 1.0 / (n as f64 + 1.0) && p <= 1.0);
        let two = fold_two_sided(p);
        prop_assert!((0.0..=1.0).contains(&two));
    }

    #[test]
    fn zero_corrections_are_identity(level in 0.5..0.999f64) {
        let b = ConfidenceBounds::new(level).unwrap();
        let (l, r) = bca_adjusted_levels(b, 0.0, 0.0);
        prop_assert!((l - b.left).abs() < 1e-9);
        prop_assert!((r - b.right).abs() < 1e-9);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn permutation_pvalues_in_range(a in sample(), b in sample(), seed in any::<u64>()) {
        let n = 64;
        let cfg = SessionConfig::default().with_resamples(n).with_seed(seed);
        let one = permutation_test(&[&a, &b], &Statistic::mean(), Sidedness::OneSided, &cfg).unwrap();
        prop_assert!(one.pvalue >= 1.0 / (n as f64 + 1.0) && one.pvalue <= 1.0);
        let two = permutation_test(&[&a, &b], &Statistic::mean(), Sidedness::TwoSided, &cfg).unwrap();
        prop_assert!((0.0..=1.0).contains(&two.pvalue));
        prop_assert!(two.permutation_diff_ci.lower <= two.permutation_diff_ci.upper);
    }

    #[test]
    fn paired_bootstrap_needs_equal_lengths(a in sample(), b in sample()) {
        prop_assume!(a.len() != b.len());
        let mut t = EmpiricalBootstrapTest::new(SessionConfig::default().with_resamples(8)).unwrap();
        let err = t.resample(&[&a, &b], false, false).unwrap_err();
        prop_assert!(matches!(err, ResampleError::Configuration(_)));
        prop_assert!(!t.parameters().resampled);
    }

    #[test]
    fn bootstrap_pvalues_in_range(a in sample(), b in sample(), seed in any::<u64>()) {
        let n = 64;
        let cfg = SessionConfig::default().with_resamples(n).with_seed(seed);
        let mut t = EmpiricalBootstrapTest::new(cfg).unwrap();
        t.resample(&[&a, &b], false, true).unwrap();
        let one = t.compute(Sidedness::OneSided).unwrap();
        prop_assert!(one.significance >= 1.0 / (n as f64 + 1.0) && one.significance <= 1.0);
    }
}
