//! Per-call state shared by the decision pipeline.
//!
//! A [`Scope`] bundles the read-only inputs of one evaluation; an
//! [`EvaluationSession`] carries the accumulators built up while a single
//! top-level call runs. Neither is shared between calls.

use std::collections::HashMap;

use uuid::Uuid;

use crate::segment::SegmentEvaluator;
use crate::services::Services;
use crate::types::{Campaign, CampaignType, GatewayData, Settings, UserContext};

/// Namespace name the user-list identity chain starts from.
const USER_LIST_SEED: &str = "https://vwo.com";

/// Storage key prefix under which a group's persisted winner lives.
pub const MEG_META_KEY_PREFIX: &str = "_vwo_meta_meg_";

/// Deterministic per-account user hash used as `_vwoUserId` by campaigns
/// with user lists enabled: upper-case hex, no dashes.
#[must_use]
pub fn user_list_id(user_id: &str, account_id: u64) -> String {
    let root = Uuid::new_v5(&Uuid::NAMESPACE_URL, USER_LIST_SEED.as_bytes());
    let account = Uuid::new_v5(&root, account_id.to_string().as_bytes());
    Uuid::new_v5(&account, user_id.as_bytes())
        .simple()
        .to_string()
        .to_uppercase()
}

/// Read-only inputs of one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub settings: &'a Settings,
    pub user: &'a UserContext,
    pub gateway: Option<&'a GatewayData>,
    pub services: &'a Services,
}

impl<'a> Scope<'a> {
    #[must_use]
    pub fn new(settings: &'a Settings, user: &'a UserContext, services: &'a Services) -> Self {
        Self {
            settings,
            user,
            gateway: user.gateway(),
            services,
        }
    }

    /// Gateway data fetched for this call; ignored when the context carries its own.
    #[must_use]
    pub fn with_gateway(mut self, gateway: Option<&'a GatewayData>) -> Self {
        if self.gateway.is_none() {
            self.gateway = gateway;
        }
        self
    }

    #[must_use]
    pub fn user_id(&self) -> &'a str {
        self.user.id()
    }

    #[must_use]
    pub fn account_id(&self) -> u64 {
        self.settings.account_id
    }

    pub(crate) fn segments(&self) -> SegmentEvaluator<'a> {
        SegmentEvaluator::new(self.settings, self.user, self.services).with_gateway(self.gateway)
    }

    /// Value of `_vwoUserId` while evaluating `campaign`.
    pub(crate) fn identity(&self, campaign: &Campaign) -> String {
        if campaign.is_user_list_enabled {
            user_list_id(self.user.id(), self.account_id())
        } else {
            self.user.id().to_owned()
        }
    }
}

/// Rollout that let a feature through during this call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutInfo {
    pub campaign_id: u64,
    pub campaign_key: String,
    pub variation_id: Option<u64>,
}

/// Resolved winner of a mutually exclusive group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupWinner {
    Campaign(u64),
    /// Personalize winners are a single variation of a campaign.
    Variation { campaign_id: u64, variation_id: u64 },
    /// The group was resolved and nobody won.
    Nobody,
}

impl GroupWinner {
    #[must_use]
    pub fn of(campaign: &Campaign) -> Self {
        match (campaign.kind, campaign.variations.first()) {
            (CampaignType::Personalize, Some(variation)) => GroupWinner::Variation {
                campaign_id: campaign.id,
                variation_id: variation.id,
            },
            _ => GroupWinner::Campaign(campaign.id),
        }
    }

    /// Winner named by a persisted group record.
    pub(crate) fn from_stored(
        settings: &Settings,
        campaign_id: u64,
        variation_id: Option<u64>,
    ) -> Self {
        let personalize = settings
            .campaign(campaign_id)
            .is_some_and(|c| c.kind == CampaignType::Personalize);
        match variation_id {
            Some(variation_id) if personalize => GroupWinner::Variation {
                campaign_id,
                variation_id,
            },
            _ => GroupWinner::Campaign(campaign_id),
        }
    }

    /// `true` when `campaign` is this winner.
    #[must_use]
    pub fn admits(&self, campaign: &Campaign) -> bool {
        *self == Self::of(campaign)
    }
}

/// Accumulators of one top-level decision call.
#[derive(Debug, Default)]
pub struct EvaluationSession {
    evaluated_features: HashMap<String, RolloutInfo>,
    group_winners: HashMap<u64, GroupWinner>,
}

impl EvaluationSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rollout(&mut self, feature_key: &str, info: RolloutInfo) {
        self.evaluated_features.insert(feature_key.to_owned(), info);
    }

    #[must_use]
    pub fn rollout(&self, feature_key: &str) -> Option<&RolloutInfo> {
        self.evaluated_features.get(feature_key)
    }

    pub fn set_group_winner(&mut self, group_id: u64, winner: GroupWinner) {
        self.group_winners.insert(group_id, winner);
    }

    #[must_use]
    pub fn group_winner(&self, group_id: u64) -> Option<GroupWinner> {
        self.group_winners.get(&group_id).copied()
    }
}
