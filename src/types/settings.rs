use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as Json;

use super::SettingsError;
use crate::bucketing::{BucketRange, allocate_ranges, single_range};
use crate::error::FmeError;
use crate::segment::Segment;

/// Immutable settings snapshot.
///
/// Build one with [`Settings::from_json`] or [`Settings::from_file`]; both run
/// [`Settings::process`], which allocates variation ranges, compiles every
/// segmentation DSL and links campaigns to features.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, deserialize_with = "nullable")]
    pub features: Vec<Feature>,
    #[serde(default, deserialize_with = "nullable")]
    pub campaigns: Vec<Campaign>,
    #[serde(default, deserialize_with = "nullable")]
    pub groups: HashMap<u64, Group>,
    /// Campaign identity (`"cid"` or `"cid_vid"`) to group id.
    #[serde(default, deserialize_with = "nullable")]
    pub campaign_groups: HashMap<String, u64>,
    #[serde(default, deserialize_with = "nullable")]
    pub account_id: u64,
    #[serde(default)]
    pub sdk_key: Option<String>,
    #[serde(default)]
    pub version: Option<u64>,
}

/// A feature flag and the campaign rules attached to it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub id: u64,
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub rules: Vec<Rule>,
    #[serde(default, deserialize_with = "nullable")]
    pub variables: Vec<Variable>,
    #[serde(skip)]
    pub(crate) linked: Vec<Campaign>,
    #[serde(skip)]
    pub(crate) requires_gateway: bool,
}

impl Feature {
    /// One campaign per rule, in rule order, narrowed to the rule's variation.
    #[must_use]
    pub fn linked_campaigns(&self) -> &[Campaign] {
        &self.linked
    }

    /// `true` when some rule's targeting needs location or user-agent classification.
    #[must_use]
    pub fn requires_gateway(&self) -> bool {
        self.requires_gateway
    }

    pub(crate) fn rollouts(&self) -> impl Iterator<Item = &Campaign> {
        self.linked
            .iter()
            .filter(|c| c.kind == CampaignType::Rollout)
    }

    pub(crate) fn experiments(&self) -> impl Iterator<Item = &Campaign> {
        self.linked
            .iter()
            .filter(|c| c.kind != CampaignType::Rollout)
    }
}

/// Reference from a feature to a campaign.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub campaign_id: u64,
    #[serde(default)]
    pub variation_id: Option<u64>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub rule_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CampaignType {
    #[serde(rename = "ROLLOUT")]
    Rollout,
    #[serde(rename = "PERSONALIZE")]
    Personalize,
    #[serde(rename = "AB")]
    Ab,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: u64,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: CampaignType,
    #[serde(default, deserialize_with = "nullable")]
    pub percent_traffic: f64,
    #[serde(default)]
    pub segments: Json,
    #[serde(default, deserialize_with = "nullable")]
    pub is_forced_variation_enabled: bool,
    #[serde(default, deserialize_with = "nullable")]
    pub is_user_list_enabled: bool,
    #[serde(default, deserialize_with = "nullable")]
    pub variations: Vec<Variation>,
    #[serde(default)]
    pub salt: Option<String>,
    #[serde(default)]
    pub rule_key: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(skip)]
    pub(crate) segment: Option<Segment>,
}

impl Campaign {
    /// Key under which the campaign appears in groups: `"cid"`, or
    /// `"cid_vid"` for personalize campaigns.
    #[must_use]
    pub fn identity(&self) -> String {
        match (self.kind, self.variations.first()) {
            (CampaignType::Personalize, Some(variation)) => format!("{}_{}", self.id, variation.id),
            _ => self.id.to_string(),
        }
    }

    #[must_use]
    pub fn variation(&self, id: u64) -> Option<&Variation> {
        self.variations.iter().find(|v| v.id == id)
    }

    /// Compiled DSL gating entry into the campaign: the first variation's for
    /// rollout and personalize, the campaign's own for AB.
    #[must_use]
    pub fn pre_segment(&self) -> Option<&Segment> {
        match self.kind {
            CampaignType::Ab => self.segment.as_ref(),
            CampaignType::Rollout | CampaignType::Personalize => {
                self.variations.first().and_then(|v| v.segment.as_ref())
            }
        }
    }

    /// Rule key carried over from the feature rule that linked this copy.
    #[must_use]
    pub fn rule_key(&self) -> &str {
        self.rule_key.as_deref().unwrap_or(&self.key)
    }

    fn allocate(&mut self) {
        match self.kind {
            CampaignType::Ab => {
                let ranges = allocate_ranges(self.variations.iter().map(|v| v.weight));
                for (variation, range) in self.variations.iter_mut().zip(ranges) {
                    variation.range = range;
                }
            }
            CampaignType::Rollout | CampaignType::Personalize => {
                for variation in &mut self.variations {
                    variation.range = single_range(variation.weight);
                }
            }
        }
    }

    /// Any DSL of the campaign or its variations needs gateway data.
    fn requires_gateway(&self) -> bool {
        self.segment
            .iter()
            .chain(self.variations.iter().filter_map(|v| v.segment.as_ref()))
            .any(Segment::requires_gateway)
    }

    fn compile(&mut self) {
        self.segment = Segment::compile(&self.segments);
        for variation in &mut self.variations {
            variation.segment = Segment::compile(&variation.segments);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    pub id: u64,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub weight: f64,
    #[serde(default)]
    pub segments: Json,
    #[serde(default, deserialize_with = "nullable")]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub salt: Option<String>,
    #[serde(skip)]
    pub(crate) range: Option<BucketRange>,
    #[serde(skip)]
    pub(crate) segment: Option<Segment>,
}

impl Variation {
    /// Allocated bucket range; `None` means the variation is never selected by bucketing.
    #[must_use]
    pub fn range(&self) -> Option<BucketRange> {
        self.range
    }

    #[must_use]
    pub fn segment(&self) -> Option<&Segment> {
        self.segment.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub id: u64,
    pub key: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub value: Json,
}

/// Tie-break strategy of a mutually exclusive group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupAlgorithm {
    Random,
    Advanced,
}

/// A mutually exclusive group of campaigns.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub name: Option<String>,
    /// Member identities, `"cid"` or `"cid_vid"`.
    #[serde(default, deserialize_with = "id_list")]
    pub campaigns: Vec<String>,
    #[serde(default)]
    pub et: Option<u8>,
    /// Priority order for the advanced algorithm.
    #[serde(default, deserialize_with = "id_list")]
    pub p: Vec<String>,
    /// Weights for the advanced algorithm, keyed by identity.
    #[serde(default, deserialize_with = "nullable")]
    pub wt: HashMap<String, f64>,
}

impl Group {
    #[must_use]
    pub fn algorithm(&self) -> GroupAlgorithm {
        match self.et {
            Some(2) => GroupAlgorithm::Advanced,
            _ => GroupAlgorithm::Random,
        }
    }
}

impl Settings {
    /// Parse and process a settings document.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] if the JSON is malformed or references are broken.
    pub fn from_json(input: &str) -> Result<Self, SettingsError> {
        let settings: Settings = serde_json::from_str(input)?;
        settings.process()
    }

    /// Read, parse and process a settings file.
    ///
    /// # Errors
    ///
    /// Returns [`FmeError`] on I/O failure or invalid settings.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FmeError> {
        let input = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&input)?)
    }

    /// Allocate ranges, compile DSLs and link campaigns to features.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::DuplicateCampaign`] or
    /// [`SettingsError::UnknownCampaign`].
    pub fn process(mut self) -> Result<Self, SettingsError> {
        let mut seen = HashSet::new();
        for campaign in &mut self.campaigns {
            if !seen.insert(campaign.id) {
                return Err(SettingsError::DuplicateCampaign { id: campaign.id });
            }
            campaign.allocate();
            campaign.compile();
        }

        let campaigns = &self.campaigns;
        for feature in &mut self.features {
            let mut linked = Vec::with_capacity(feature.rules.len());
            for rule in &feature.rules {
                let Some(original) = campaigns.iter().find(|c| c.id == rule.campaign_id) else {
                    return Err(SettingsError::UnknownCampaign {
                        feature: feature.key.clone(),
                        campaign: rule.campaign_id,
                    });
                };
                let mut campaign = original.clone();
                if rule.rule_key.is_some() {
                    campaign.rule_key.clone_from(&rule.rule_key);
                }
                if let Some(variation_id) = rule.variation_id
                    && let Some(variation) = campaign.variation(variation_id).cloned()
                {
                    campaign.variations = vec![variation];
                }
                linked.push(campaign);
            }
            feature.requires_gateway = linked.iter().any(Campaign::requires_gateway);
            feature.linked = linked;
        }
        Ok(self)
    }

    #[must_use]
    pub fn feature(&self, key: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.key == key)
    }

    #[must_use]
    pub fn feature_by_id(&self, id: u64) -> Option<&Feature> {
        self.features.iter().find(|f| f.id == id)
    }

    #[must_use]
    pub fn campaign(&self, id: u64) -> Option<&Campaign> {
        self.campaigns.iter().find(|c| c.id == id)
    }

    /// Campaign with the given key, together with one of its variations.
    #[must_use]
    pub fn variation_by_campaign_key(
        &self,
        campaign_key: &str,
        variation_id: u64,
    ) -> Option<(&Campaign, &Variation)> {
        let campaign = self.campaigns.iter().find(|c| c.key == campaign_key)?;
        Some((campaign, campaign.variation(variation_id)?))
    }

    /// Group the campaign belongs to, with its id.
    #[must_use]
    pub fn group_of(&self, campaign: &Campaign) -> Option<(u64, &Group)> {
        let group_id = *self.campaign_groups.get(&campaign.identity())?;
        Some((group_id, self.groups.get(&group_id)?))
    }
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn id_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Json>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| match v {
            Json::String(s) => Some(s),
            Json::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect())
}
