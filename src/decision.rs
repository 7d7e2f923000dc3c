//! Rule orchestration: whitelisting, group short-circuits, pre-segmentation
//! and group resolution for one campaign rule.

use tracing::info;

use crate::campaign::{evaluate_traffic, label, pre_segmentation};
use crate::meg::{RolloutGate, resolve_group_winner};
use crate::segment::Attributes;
use crate::session::{EvaluationSession, GroupWinner, MEG_META_KEY_PREFIX, RolloutInfo, Scope};
use crate::types::{Campaign, CampaignType, Feature, Variation};
use crate::whitelist::whitelisted_variation;

/// Result of evaluating one rule before traffic is tested.
#[derive(Debug, Clone, Copy)]
pub struct RuleOutcome<'a> {
    /// The user may proceed to traffic allocation (or was whitelisted).
    pub pre_segmentation: bool,
    /// Variation forced by whitelisting; traffic allocation is skipped.
    pub whitelisted: Option<&'a Variation>,
}

impl<'a> RuleOutcome<'a> {
    fn passed(pre_segmentation: bool) -> Self {
        Self {
            pre_segmentation,
            whitelisted: None,
        }
    }

    fn forced(variation: &'a Variation) -> Self {
        Self {
            pre_segmentation: true,
            whitelisted: Some(variation),
        }
    }
}

/// Evaluates campaign rules against one [`Scope`].
#[derive(Debug, Clone, Copy)]
pub struct RuleEvaluator<'s, 'a> {
    scope: &'s Scope<'a>,
}

impl<'s, 'a> RuleEvaluator<'s, 'a> {
    #[must_use]
    pub fn new(scope: &'s Scope<'a>) -> Self {
        Self { scope }
    }

    /// Decide whether `campaign`, reached through `feature`, lets the user through.
    pub fn evaluate_rule(
        &self,
        feature: &Feature,
        campaign: &'a Campaign,
        session: &mut EvaluationSession,
    ) -> RuleOutcome<'a> {
        let scope = self.scope;
        let user_id = scope.user_id();
        let identity = scope.identity(campaign);
        let segments = scope.segments();

        if campaign.kind == CampaignType::Ab {
            if campaign.is_forced_variation_enabled {
                let targeting = Attributes::new(scope.user.variation_targeting_variables())
                    .with_identity(&identity);
                if let Some(variation) =
                    whitelisted_variation(&segments, campaign, user_id, targeting)
                {
                    return RuleOutcome::forced(variation);
                }
            } else {
                info!(user_id, campaign_key = %label(campaign), "whitelisting_skip");
            }
        }

        let group_id = scope.settings.group_of(campaign).map(|(id, _)| id);
        if let Some(group_id) = group_id {
            if let Some(winner) = session.group_winner(group_id) {
                return RuleOutcome::passed(winner.admits(campaign));
            }
            if let Some(winner) = self.stored_group_winner(group_id) {
                session.set_group_winner(group_id, winner);
                return RuleOutcome::passed(winner.admits(campaign));
            }
        }

        let attributes = Attributes::new(scope.user.custom_variables()).with_identity(&identity);
        let passed = pre_segmentation(&segments, campaign, user_id, attributes);
        let Some(group_id) = group_id.filter(|_| passed) else {
            return RuleOutcome::passed(passed);
        };

        let winner = resolve_group_winner(scope, self, group_id, feature, session)
            .map_or(GroupWinner::Nobody, GroupWinner::of);
        session.set_group_winner(group_id, winner);
        RuleOutcome::passed(winner.admits(campaign))
    }

    fn stored_group_winner(&self, group_id: u64) -> Option<GroupWinner> {
        let key = format!("{MEG_META_KEY_PREFIX}{group_id}");
        let record = self.scope.services.stored(&key, self.scope.user_id())?;
        let campaign_id = record.experiment_id?;
        let campaign_key = record.experiment_key.as_deref()?;
        info!(
            user_id = self.scope.user_id(),
            campaign_key, group_id, "meg_campaign_found_in_storage"
        );
        Some(GroupWinner::from_stored(
            self.scope.settings,
            campaign_id,
            record.experiment_variation_id,
        ))
    }
}

impl RolloutGate for RuleEvaluator<'_, '_> {
    fn rollout_passed(&self, feature: &Feature, session: &mut EvaluationSession) -> bool {
        if session.rollout(&feature.key).is_some() {
            return true;
        }
        let scope = self.scope;
        let mut rollouts = feature.rollouts().peekable();
        if rollouts.peek().is_none() {
            info!(feature_key = %feature.key, "meg_skip_rollout_evaluate_experiments");
            return true;
        }

        let segments = scope.segments();
        let passing = rollouts.find(|rule| {
            let identity = scope.identity(rule);
            let attributes =
                Attributes::new(scope.user.custom_variables()).with_identity(&identity);
            pre_segmentation(&segments, rule, scope.user_id(), attributes)
        });
        let Some(rule) = passing else {
            return false;
        };
        let Some(variation) = evaluate_traffic(scope.user_id(), scope.account_id(), rule) else {
            return false;
        };
        session.record_rollout(
            &feature.key,
            RolloutInfo {
                campaign_id: rule.id,
                campaign_key: rule.key.clone(),
                variation_id: Some(variation.id),
            },
        );
        true
    }
}
