//! Mutually exclusive group resolution.
//!
//! Resolving a group walks every feature that links one of its members,
//! drops features whose rollouts shut the user out, and picks at most one
//! winner among the remaining member campaigns. A persisted decision for a
//! member always beats fresh bucketing.

use std::collections::HashSet;

use tracing::{info, warn};

use crate::bucketing::{allocate_ranges, find_range, variation_bucket};
use crate::campaign::{is_user_part_of_campaign, pre_segmentation};
use crate::segment::Attributes;
use crate::session::{EvaluationSession, Scope};
use crate::types::{Campaign, CampaignType, Feature, Group, GroupAlgorithm, StorageRecord};

/// Decides whether a feature's rollout rules let the user through.
///
/// Implemented by the rule orchestrator; a passing rollout is recorded in the session.
pub trait RolloutGate {
    fn rollout_passed(&self, feature: &Feature, session: &mut EvaluationSession) -> bool;
}

/// Winning campaign of `group_id` for this user, if it belongs to `feature`.
///
/// A winner linked only to some other feature is reported as `None`.
pub fn resolve_group_winner<'a>(
    scope: &Scope<'a>,
    gate: &dyn RolloutGate,
    group_id: u64,
    feature: &Feature,
    session: &mut EvaluationSession,
) -> Option<&'a Campaign> {
    let Some(group) = scope.settings.groups.get(&group_id) else {
        warn!(group_id, "group not found in settings");
        return None;
    };

    let mut seen = HashSet::new();
    let mut candidates: Vec<(&'a Feature, &'a Campaign)> = Vec::new();
    for member_feature in features_in_group(scope, group) {
        if !gate.rollout_passed(member_feature, session) {
            continue;
        }
        for campaign in member_feature.linked_campaigns() {
            let identity = campaign.identity();
            if group.campaigns.contains(&identity) && seen.insert(identity) {
                candidates.push((member_feature, campaign));
            }
        }
    }

    let (with_storage, eligible) = partition(scope, &candidates);
    let pool = if with_storage.is_empty() {
        eligible
    } else {
        with_storage
    };

    let winner = match pool.as_slice() {
        [] => None,
        [only] => Some(*only),
        many => match group.algorithm() {
            GroupAlgorithm::Random => random_winner(scope, group_id, many),
            GroupAlgorithm::Advanced => advanced_winner(scope, group_id, group, many),
        },
    };
    let Some(winner) = winner else {
        info!(group_id, user_id = scope.user_id(), "meg_winner_campaign: none");
        return None;
    };
    info!(
        group_id,
        user_id = scope.user_id(),
        campaign_key = %winner.key,
        algorithm = ?group.algorithm(),
        "meg_winner_campaign"
    );

    let identity = winner.identity();
    feature
        .linked_campaigns()
        .iter()
        .any(|c| c.identity() == identity)
        .then_some(winner)
}

/// Features linking any member of the group, in member order then feature order.
fn features_in_group<'a>(scope: &Scope<'a>, group: &Group) -> Vec<&'a Feature> {
    let mut features: Vec<&'a Feature> = Vec::new();
    for member in &group.campaigns {
        for feature in &scope.settings.features {
            let links = feature
                .linked_campaigns()
                .iter()
                .any(|c| c.identity() == *member);
            if links && !features.iter().any(|f| f.key == feature.key) {
                features.push(feature);
            }
        }
    }
    features
}

/// Split candidates into those with a persisted decision naming them and
/// those fresh candidates passing pre-segmentation and traffic.
fn partition<'a>(
    scope: &Scope<'a>,
    candidates: &[(&'a Feature, &'a Campaign)],
) -> (Vec<&'a Campaign>, Vec<&'a Campaign>) {
    let user_id = scope.user_id();
    let segments = scope.segments();
    let mut with_storage = Vec::new();
    let mut eligible = Vec::new();

    for (feature, campaign) in candidates {
        let stored = scope.services.stored(&feature.key, user_id);
        if stored
            .as_ref()
            .is_some_and(|record| names_campaign(scope, record, campaign))
        {
            info!(user_id, campaign_key = %campaign.key, "meg_campaign_found_in_storage");
            with_storage.push(*campaign);
            continue;
        }

        let identity = scope.identity(campaign);
        let attributes = Attributes::new(scope.user.custom_variables()).with_identity(&identity);
        if pre_segmentation(&segments, campaign, user_id, attributes)
            && is_user_part_of_campaign(user_id, campaign)
        {
            info!(user_id, campaign_key = %campaign.key, "meg_campaign_eligible");
            eligible.push(*campaign);
        }
    }
    (with_storage, eligible)
}

fn names_campaign(scope: &Scope<'_>, record: &StorageRecord, campaign: &Campaign) -> bool {
    let Some((key, variation_id)) = record.experiment() else {
        return false;
    };
    if key != campaign.key
        || scope
            .settings
            .variation_by_campaign_key(key, variation_id)
            .is_none()
    {
        return false;
    }
    match campaign.kind {
        CampaignType::Personalize => campaign
            .variations
            .first()
            .is_some_and(|v| v.id == variation_id),
        CampaignType::Ab | CampaignType::Rollout => true,
    }
}

/// Equal shares, one draw with the group seed.
fn random_winner<'a>(
    scope: &Scope<'_>,
    group_id: u64,
    pool: &[&'a Campaign],
) -> Option<&'a Campaign> {
    let share = 100.0 / pool.len() as f64;
    weighted_draw(scope, group_id, pool.iter().map(|c| (*c, share)))
}

/// First pool member named in the priority list, otherwise a weighted draw
/// over pool members present in the weight table.
fn advanced_winner<'a>(
    scope: &Scope<'_>,
    group_id: u64,
    group: &Group,
    pool: &[&'a Campaign],
) -> Option<&'a Campaign> {
    for priority in &group.p {
        if let Some(campaign) = pool.iter().find(|c| c.identity() == *priority) {
            return Some(*campaign);
        }
    }
    let weighted = pool.iter().filter_map(|c| {
        group
            .wt
            .get(&c.identity())
            .or_else(|| group.wt.get(&c.id.to_string()))
            .map(|weight| (*c, *weight))
    });
    weighted_draw(scope, group_id, weighted)
}

fn weighted_draw<'a>(
    scope: &Scope<'_>,
    group_id: u64,
    weighted: impl Iterator<Item = (&'a Campaign, f64)>,
) -> Option<&'a Campaign> {
    let (campaigns, weights): (Vec<&'a Campaign>, Vec<f64>) = weighted.unzip();
    let ranges = allocate_ranges(weights);
    let bucket = variation_bucket(&format!("{group_id}_{}", scope.user_id()));
    find_range(&ranges, bucket).map(|i| campaigns[i])
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::services::Services;
    use crate::types::{Settings, UserContext};

    struct Open;

    impl RolloutGate for Open {
        fn rollout_passed(&self, _: &Feature, _: &mut EvaluationSession) -> bool {
            true
        }
    }

    struct Closed<'f>(&'f str, Cell<usize>);

    impl RolloutGate for Closed<'_> {
        fn rollout_passed(&self, feature: &Feature, _: &mut EvaluationSession) -> bool {
            self.1.set(self.1.get() + 1);
            feature.key != self.0
        }
    }

    fn settings(et: u8, p: &str, wt: &str) -> Settings {
        Settings::from_json(&format!(
            r#"{{"accountId": 1,
            "features": [
                {{"id": 1, "key": "f1", "rules": [{{"campaignId": 10}}]}},
                {{"id": 2, "key": "f2", "rules": [{{"campaignId": 20}}]}}
            ],
            "campaigns": [
                {{"id": 10, "key": "c10", "type": "AB", "percentTraffic": 100,
                  "variations": [{{"id": 1, "key": "a", "weight": 100}}]}},
                {{"id": 20, "key": "c20", "type": "AB", "percentTraffic": 100,
                  "variations": [{{"id": 1, "key": "a", "weight": 100}}]}}
            ],
            "groups": {{"7": {{"campaigns": ["10", "20"], "et": {et}, "p": {p}, "wt": {wt}}}}},
            "campaignGroups": {{"10": 7, "20": 7}}}}"#
        ))
        .unwrap()
    }

    fn resolve(
        settings: &Settings,
        user: &str,
        feature: &str,
        gate: &dyn RolloutGate,
    ) -> Option<u64> {
        let user = UserContext::new(user);
        let services = Services::new();
        let scope = Scope::new(settings, &user, &services);
        let feature = settings.feature(feature).unwrap();
        resolve_group_winner(&scope, gate, 7, feature, &mut EvaluationSession::new()).map(|c| c.id)
    }

    #[test]
    fn random_draw_matches_group_seed() {
        let settings = settings(1, "[]", "{}");
        for i in 0..50 {
            let user = format!("user-{i}");
            let bucket = variation_bucket(&format!("7_{user}"));
            let expected = if bucket <= 5000 { 10 } else { 20 };
            let feature = if expected == 10 { "f1" } else { "f2" };
            assert_eq!(resolve(&settings, &user, feature, &Open), Some(expected));
        }
    }

    #[test]
    fn winner_outside_feature_is_not_attributed() {
        let settings = settings(2, r#"["20"]"#, "{}");
        assert_eq!(resolve(&settings, "u", "f2", &Open), Some(20));
        assert_eq!(resolve(&settings, "u", "f1", &Open), None);
    }

    #[test]
    fn advanced_priority_wins_outright() {
        let settings = settings(2, r#"["20", "10"]"#, r#"{"10": 100}"#);
        for i in 0..20 {
            assert_eq!(resolve(&settings, &format!("u{i}"), "f2", &Open), Some(20));
        }
    }

    #[test]
    fn advanced_weights_restrict_pool() {
        let settings = settings(2, "[]", r#"{"10": 100}"#);
        for i in 0..20 {
            assert_eq!(resolve(&settings, &format!("u{i}"), "f1", &Open), Some(10));
        }
    }

    #[test]
    fn failed_rollout_removes_feature() {
        let settings = settings(2, r#"["20"]"#, "{}");
        let gate = Closed("f2", Cell::new(0));
        assert_eq!(resolve(&settings, "u", "f1", &gate), Some(10));
        assert_eq!(gate.1.get(), 2);
    }

    #[test]
    fn unknown_group_has_no_winner() {
        let settings = settings(1, "[]", "{}");
        let user = UserContext::new("u");
        let services = Services::new();
        let scope = Scope::new(&settings, &user, &services);
        let feature = settings.feature("f1").unwrap();
        assert!(
            resolve_group_winner(&scope, &Open, 99, feature, &mut EvaluationSession::new())
                .is_none()
        );
    }
}
