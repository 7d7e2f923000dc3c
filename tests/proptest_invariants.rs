
use std::sync::Arc;

use fme_core::{
    BucketRange, EvaluatorBuilder, InMemoryStorage, MAX_TRAFFIC_VALUE, RuleDecision,
    SharedSettings, UserContext, allocate_ranges, find_range, inclusion_bucket, variation_bucket,
};
use proptest::prelude::*;
use serde_json::json;
use strategies::{ab_settings, arb_dsl, arb_full_weights, arb_user, arb_user_id, arb_weights};

fn chosen_variation(weights: &[f64], percent_traffic: f64, user: &UserContext) -> Option<u64> {
    let evaluator = EvaluatorBuilder::new()
        .settings(Arc::new(ab_settings(weights, percent_traffic, &json!({}))))
        .build();
    evaluator
        .evaluate("f", user)
        .experiment()
        .map(RuleDecision::variation_id)
}

// ---------------------------------------------------------------------------
// Invariant 1: Determinism
//
// The same settings and user must always land in the same variation, across
// evaluators and across repeated calls.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn determinism_repeated(weights in arb_full_weights(), id in arb_user_id()) {
        let user = UserContext::new(id);
        let first = chosen_variation(&weights, 100.0, &user);
        for _ in 0..3 {
            prop_assert_eq!(first, chosen_variation(&weights, 100.0, &user));
        }
    }

    #[test]
    fn buckets_stay_in_bounds(seed in ".{0,64}") {
        let bucket = variation_bucket(&seed);
        prop_assert!((1..=MAX_TRAFFIC_VALUE).contains(&bucket));
        let bucket = inclusion_bucket(&seed);
        prop_assert!((1..=100).contains(&bucket));
    }
}

// ---------------------------------------------------------------------------
// Invariant 2: Range allocation
//
// Ranges are contiguous from 1, never overlap, and never pass 10000. Weights
// summing to 100 cover every bucket exactly once.
// ---------------------------------------------------------------------------

fn assigned(ranges: &[Option<BucketRange>]) -> Vec<BucketRange> {
    ranges.iter().flatten().copied().collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn ranges_are_contiguous_and_capped(weights in arb_weights()) {
        let ranges = allocate_ranges(weights.iter().copied());
        prop_assert_eq!(ranges.len(), weights.len());
        let mut next = 1;
        for range in assigned(&ranges) {
            prop_assert_eq!(range.start, next);
            prop_assert!(range.start <= range.end);
            prop_assert!(range.end <= MAX_TRAFFIC_VALUE);
            next = range.end + 1;
        }
    }

    #[test]
    fn full_weights_partition_the_space(weights in arb_full_weights(), seed in "[a-z0-9_]{1,32}") {
        let ranges = allocate_ranges(weights.iter().copied());
        let covered: u32 = assigned(&ranges).iter().map(|r| r.end - r.start + 1).sum();
        prop_assert_eq!(covered, MAX_TRAFFIC_VALUE);

        let bucket = variation_bucket(&seed);
        let owners = ranges
            .iter()
            .filter(|r| r.is_some_and(|r| r.contains(bucket)))
            .count();
        prop_assert_eq!(owners, 1);
        prop_assert!(find_range(&ranges, bucket).is_some());
    }
}

// ---------------------------------------------------------------------------
// Invariant 3: Traffic bounds
//
// 0% traffic never enables the flag; 100% traffic with full weights always does.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn zero_traffic_never_enables(weights in arb_full_weights(), id in arb_user_id()) {
        prop_assert_eq!(chosen_variation(&weights, 0.0, &UserContext::new(id)), None);
    }

    #[test]
    fn full_traffic_always_enables(weights in arb_full_weights(), id in arb_user_id()) {
        let variation = chosen_variation(&weights, 100.0, &UserContext::new(id));
        prop_assert!(variation.is_some());
        let index = variation.unwrap() as usize - 1;
        prop_assert!(weights[index] > 0.0, "zero-weight variation {} chosen", index + 1);
    }
}

// ---------------------------------------------------------------------------
// Invariant 4: Segmentation algebra
//
// Double negation and single-child combinators are transparent, and
// pre-segmentation gates a full-traffic campaign exactly as the standalone
// segmentation entry point says.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn double_negation(dsl in arb_dsl(4), user in arb_user()) {
        let evaluator = EvaluatorBuilder::new().build();
        let direct = evaluator.evaluate_segmentation(&dsl, &user);
        let wrapped = json!({"not": {"not": dsl}});
        prop_assert_eq!(direct, evaluator.evaluate_segmentation(&wrapped, &user));
    }

    #[test]
    fn single_child_combinators(dsl in arb_dsl(3), user in arb_user()) {
        let evaluator = EvaluatorBuilder::new().build();
        let direct = evaluator.evaluate_segmentation(&dsl, &user);
        let wrapped = json!({"and": [dsl.clone()]});
        prop_assert_eq!(direct, evaluator.evaluate_segmentation(&wrapped, &user));
        prop_assert_eq!(direct, evaluator.evaluate_segmentation(&json!({"or": [dsl]}), &user));
    }

    #[test]
    fn presegmentation_gates_decision(dsl in arb_dsl(3), user in arb_user()) {
        let settings = ab_settings(&[50.0, 50.0], 100.0, &dsl);
        let evaluator = EvaluatorBuilder::new().settings(Arc::new(settings)).build();
        let passes = evaluator.evaluate_segmentation(&dsl, &user);
        prop_assert_eq!(evaluator.evaluate("f", &user).is_enabled(), passes);
    }
}

// ---------------------------------------------------------------------------
// Invariant 5: Stickiness
//
// Once persisted, a variation survives a weight change as long as it still
// exists in the new settings.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn stored_variation_survives_reweighting(
        before in arb_full_weights(),
        id in arb_user_id(),
    ) {
        let shared = Arc::new(SharedSettings::new(ab_settings(&before, 100.0, &json!({}))));
        let evaluator = EvaluatorBuilder::new()
            .settings(Arc::clone(&shared))
            .storage(Arc::new(InMemoryStorage::new()))
            .build();
        let user = UserContext::new(id);
        let first = evaluator.evaluate("f", &user);
        let chosen = first.experiment().map(RuleDecision::variation_id);
        prop_assert!(chosen.is_some());

        let mut after = vec![0.0; before.len()];
        if let Some(last) = after.last_mut() {
            *last = 100.0;
        }
        shared.replace(ab_settings(&after, 100.0, &json!({})));
        let second = evaluator.evaluate("f", &user);
        prop_assert_eq!(second.experiment().map(RuleDecision::variation_id), chosen);
    }
}
