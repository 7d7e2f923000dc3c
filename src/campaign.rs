//! Campaign decision service: traffic inclusion, variation bucketing and
//! pre-segmentation for a single campaign.

use tracing::{debug, info};

use crate::bucketing::{MAX_TRAFFIC_VALUE, bucket_value, find_range, hash, inclusion_bucket};
use crate::segment::{Attributes, SegmentEvaluator};
use crate::types::{Campaign, CampaignType, Variation};

/// Salt replacing the campaign id in seeds, if one is configured.
fn salt(campaign: &Campaign) -> Option<&str> {
    let salt = match campaign.kind {
        CampaignType::Ab => campaign.salt.as_deref(),
        CampaignType::Rollout | CampaignType::Personalize => {
            campaign.variations.first().and_then(|v| v.salt.as_deref())
        }
    };
    salt.filter(|s| !s.is_empty())
}

/// Seed for inclusion and whitelisting: `groupId_userId` inside a group
/// tie-break, otherwise `salt_userId` or `campaignId_userId`.
#[must_use]
pub fn bucketing_seed(user_id: &str, campaign: &Campaign, group_id: Option<u64>) -> String {
    if let Some(group_id) = group_id {
        return format!("{group_id}_{user_id}");
    }
    match salt(campaign) {
        Some(salt) => format!("{salt}_{user_id}"),
        None => format!("{}_{user_id}", campaign.id),
    }
}

/// Name used for the campaign in log events.
pub(crate) fn label(campaign: &Campaign) -> String {
    match campaign.kind {
        CampaignType::Ab => campaign.key.clone(),
        CampaignType::Rollout | CampaignType::Personalize => format!(
            "{}_{}",
            campaign.name.as_deref().unwrap_or(&campaign.key),
            campaign.rule_key()
        ),
    }
}

/// Traffic threshold: the first variation's weight for rollout and
/// personalize, `percentTraffic` for AB.
fn traffic_allocation(campaign: &Campaign) -> f64 {
    match campaign.kind {
        CampaignType::Ab => campaign.percent_traffic,
        CampaignType::Rollout | CampaignType::Personalize => {
            campaign.variations.first().map_or(0.0, |v| v.weight)
        }
    }
}

/// Whether the user falls inside the campaign's traffic.
#[must_use]
pub fn is_user_part_of_campaign(user_id: &str, campaign: &Campaign) -> bool {
    let bucket = inclusion_bucket(&bucketing_seed(user_id, campaign, None));
    let part = bucket != 0 && f64::from(bucket) <= traffic_allocation(campaign);
    debug!(
        user_id,
        campaign_key = campaign.rule_key(),
        bucket,
        part,
        "user_part_of_campaign"
    );
    part
}

/// Bucket the user into one of an AB campaign's variation ranges.
#[must_use]
pub fn bucket_user_to_variation<'c>(
    user_id: &str,
    account_id: u64,
    campaign: &'c Campaign,
) -> Option<&'c Variation> {
    let seed = match campaign.salt.as_deref().filter(|s| !s.is_empty()) {
        Some(salt) => format!("{salt}_{account_id}_{user_id}"),
        None => format!("{}_{account_id}_{user_id}", campaign.id),
    };
    let multiplier = if campaign.percent_traffic == 0.0 { 0.0 } else { 1.0 };
    let bucket = bucket_value(&seed, MAX_TRAFFIC_VALUE, multiplier);
    debug!(
        user_id,
        campaign_key = campaign.rule_key(),
        percent_traffic = campaign.percent_traffic,
        bucket,
        hash = hash(&seed),
        "user_bucket_to_variation"
    );
    let ranges: Vec<_> = campaign.variations.iter().map(Variation::range).collect();
    find_range(&ranges, bucket).map(|i| &campaign.variations[i])
}

/// Variation the user is allotted, or `None` when outside the campaign's traffic.
#[must_use]
pub fn variation_allotted<'c>(
    user_id: &str,
    account_id: u64,
    campaign: &'c Campaign,
) -> Option<&'c Variation> {
    if !is_user_part_of_campaign(user_id, campaign) {
        return None;
    }
    match campaign.kind {
        CampaignType::Ab => bucket_user_to_variation(user_id, account_id, campaign),
        CampaignType::Rollout | CampaignType::Personalize => campaign.variations.first(),
    }
}

/// [`variation_allotted`] with the bucket outcome logged.
#[must_use]
pub fn evaluate_traffic<'c>(
    user_id: &str,
    account_id: u64,
    campaign: &'c Campaign,
) -> Option<&'c Variation> {
    let variation = variation_allotted(user_id, account_id, campaign);
    match variation {
        Some(variation) => info!(
            user_id,
            campaign_key = campaign.rule_key(),
            variation_key = %variation.key,
            "user_campaign_bucket_info: got variation"
        ),
        None => info!(
            user_id,
            campaign_key = %label(campaign),
            "user_campaign_bucket_info: did not get any variation"
        ),
    }
    variation
}

/// Evaluate the campaign's pre-segmentation DSL. No DSL means the user passes.
#[must_use]
pub fn pre_segmentation(
    segments: &SegmentEvaluator<'_>,
    campaign: &Campaign,
    user_id: &str,
    attributes: Attributes<'_>,
) -> bool {
    let Some(segment) = campaign.pre_segment() else {
        info!(user_id, campaign_key = %label(campaign), "segmentation_skip");
        return true;
    };
    let passed = segments.evaluate(segment, attributes);
    info!(
        user_id,
        campaign_key = %label(campaign),
        status = if passed { "passed" } else { "failed" },
        "segmentation_status"
    );
    passed
}

/// Rescale weights in place so they sum to 100; all-zero weights become equal shares.
pub fn scale_weights(weights: &mut [f64]) {
    if weights.is_empty() {
        return;
    }
    let total: f64 = weights.iter().sum();
    if total == 0.0 {
        let equal = 100.0 / weights.len() as f64;
        weights.iter_mut().for_each(|w| *w = equal);
    } else {
        weights.iter_mut().for_each(|w| *w = *w / total * 100.0);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::services::Services;
    use crate::types::{Settings, UserContext};

    fn settings(json: &str) -> Settings {
        Settings::from_json(json).unwrap()
    }

    fn ab(percent: u32, salt: Option<&str>) -> Settings {
        let salt = salt.map_or("null".to_owned(), |s| format!("\"{s}\""));
        settings(&format!(
            r#"{{"accountId": 100, "campaigns": [{{"id": 7, "key": "ab", "type": "AB",
                "percentTraffic": {percent}, "salt": {salt},
                "variations": [{{"id": 1, "key": "a", "weight": 50}}, {{"id": 2, "key": "b", "weight": 50}}]}}]}}"#
        ))
    }

    #[test]
    fn seeds() {
        let settings = ab(100, None);
        let campaign = settings.campaign(7).unwrap();
        assert_eq!(bucketing_seed("u", campaign, None), "7_u");
        assert_eq!(bucketing_seed("u", campaign, Some(3)), "3_u");

        let salted = ab(100, Some("pepper"));
        assert_eq!(bucketing_seed("u", salted.campaign(7).unwrap(), None), "pepper_u");
    }

    #[test]
    fn rollout_seed_uses_variation_salt() {
        let settings = settings(
            r#"{"campaigns": [{"id": 9, "key": "r", "type": "ROLLOUT", "salt": "ignored",
                "variations": [{"id": 1, "key": "on", "weight": 100, "salt": "vsalt"}]}]}"#,
        );
        assert_eq!(bucketing_seed("u", settings.campaign(9).unwrap(), None), "vsalt_u");
    }

    #[test]
    fn full_traffic_includes_everyone() {
        let settings = ab(100, None);
        let campaign = settings.campaign(7).unwrap();
        for user in ["a", "b", "c", "user-42"] {
            assert!(is_user_part_of_campaign(user, campaign));
            assert!(variation_allotted(user, 100, campaign).is_some());
        }
    }

    #[test]
    fn zero_traffic_excludes_everyone() {
        let settings = ab(0, None);
        let campaign = settings.campaign(7).unwrap();
        for user in ["a", "b", "c", "user-42"] {
            assert!(!is_user_part_of_campaign(user, campaign));
            assert_eq!(bucket_user_to_variation(user, 100, campaign), None);
        }
    }

    #[test]
    fn inclusion_matches_bucket_threshold() {
        let settings = ab(37, None);
        let campaign = settings.campaign(7).unwrap();
        for i in 0..200 {
            let user = format!("user-{i}");
            let bucket = inclusion_bucket(&format!("7_{user}"));
            assert_eq!(is_user_part_of_campaign(&user, campaign), bucket <= 37);
        }
    }

    #[test]
    fn variation_bucket_follows_ranges() {
        let settings = ab(100, None);
        let campaign = settings.campaign(7).unwrap();
        for i in 0..200 {
            let user = format!("user-{i}");
            let bucket = crate::bucketing::variation_bucket(&format!("7_100_{user}"));
            let expected = if bucket <= 5000 { 1 } else { 2 };
            assert_eq!(
                bucket_user_to_variation(&user, 100, campaign).map(|v| v.id),
                Some(expected)
            );
        }
    }

    #[test]
    fn rollout_allots_its_only_variation() {
        let settings = settings(
            r#"{"campaigns": [{"id": 9, "key": "r", "type": "ROLLOUT",
                "variations": [{"id": 4, "key": "on", "weight": 100}]}]}"#,
        );
        let campaign = settings.campaign(9).unwrap();
        assert_eq!(evaluate_traffic("u", 0, campaign).map(|v| v.id), Some(4));
    }

    #[test]
    fn pre_segmentation_passes_without_dsl() {
        let settings = ab(100, None);
        let campaign = settings.campaign(7).unwrap();
        let user = UserContext::new("u");
        let services = Services::new();
        let segments = SegmentEvaluator::new(&settings, &user, &services);
        let vars = HashMap::new();
        assert!(pre_segmentation(&segments, campaign, "u", Attributes::new(&vars)));
    }

    #[test]
    fn pre_segmentation_uses_first_variation_for_rollout() {
        let settings = settings(
            r#"{"campaigns": [{"id": 9, "key": "r", "type": "ROLLOUT",
                "segments": {"custom_variable": {"plan": "free"}},
                "variations": [{"id": 4, "key": "on", "weight": 100,
                                "segments": {"custom_variable": {"plan": "pro"}}}]}]}"#,
        );
        let campaign = settings.campaign(9).unwrap();
        let user = UserContext::new("u").custom_variable("plan", "pro");
        let services = Services::new();
        let segments = SegmentEvaluator::new(&settings, &user, &services);
        assert!(pre_segmentation(
            &segments,
            campaign,
            "u",
            Attributes::new(user.custom_variables())
        ));
    }

    #[test]
    fn scale_weights_to_hundred() {
        let mut weights = [30.0, 20.0];
        scale_weights(&mut weights);
        assert_eq!(weights, [60.0, 40.0]);

        let mut zeros = [0.0; 4];
        scale_weights(&mut zeros);
        assert_eq!(zeros, [25.0; 4]);
    }
}
