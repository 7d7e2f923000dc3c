//! Forced variations for AB campaigns.
//!
//! Each variation's own DSL is evaluated against the variation-targeting
//! attributes. One match wins outright; several matches are re-weighted to
//! 100 and bucketed with the campaign seed.

use tracing::info;

use crate::bucketing::{BucketRange, allocate_ranges, find_range, variation_bucket};
use crate::campaign::{bucketing_seed, label, scale_weights};
use crate::segment::{Attributes, SegmentEvaluator};
use crate::types::{Campaign, Variation};

/// Ranges for matched variations after rescaling their weights to 100.
#[must_use]
pub fn rescaled_ranges(weights: &[f64]) -> Vec<Option<BucketRange>> {
    let mut weights = weights.to_vec();
    scale_weights(&mut weights);
    allocate_ranges(weights)
}

/// The variation forced for this user, if any.
#[must_use]
pub fn whitelisted_variation<'c>(
    segments: &SegmentEvaluator<'_>,
    campaign: &'c Campaign,
    user_id: &str,
    attributes: Attributes<'_>,
) -> Option<&'c Variation> {
    let mut targeted = Vec::new();
    for variation in &campaign.variations {
        let Some(segment) = variation.segment() else {
            info!(
                user_id,
                campaign_key = %label(campaign),
                variation_key = %variation.key,
                "whitelisting_skip"
            );
            continue;
        };
        if segments.evaluate(segment, attributes) {
            targeted.push(variation);
        }
    }

    let winner = match targeted.as_slice() {
        [] => None,
        [only] => Some(*only),
        many => {
            let weights: Vec<f64> = many.iter().map(|v| v.weight).collect();
            let ranges = rescaled_ranges(&weights);
            let bucket = variation_bucket(&bucketing_seed(user_id, campaign, None));
            find_range(&ranges, bucket).map(|i| many[i])
        }
    };

    info!(
        user_id,
        campaign_key = %label(campaign),
        status = if winner.is_some() { "passed" } else { "failed" },
        variation_key = winner.map_or("", |v| v.key.as_str()),
        "whitelisting_status"
    );
    winner
}
