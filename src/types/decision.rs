use std::fmt;

use serde_json::Value as Json;

use super::settings::{Campaign, Variable, Variation};

/// The variation a single campaign rule granted.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct RuleDecision {
    campaign_id: u64,
    campaign_key: String,
    variation_id: u64,
    variation_key: String,
    whitelisted: bool,
}

impl RuleDecision {
    pub(crate) fn new(campaign: &Campaign, variation: &Variation, whitelisted: bool) -> Self {
        Self {
            campaign_id: campaign.id,
            campaign_key: campaign.key.clone(),
            variation_id: variation.id,
            variation_key: variation.key.clone(),
            whitelisted,
        }
    }

    #[must_use]
    pub fn campaign_id(&self) -> u64 {
        self.campaign_id
    }

    #[must_use]
    pub fn campaign_key(&self) -> &str {
        &self.campaign_key
    }

    #[must_use]
    pub fn variation_id(&self) -> u64 {
        self.variation_id
    }

    #[must_use]
    pub fn variation_key(&self) -> &str {
        &self.variation_key
    }

    /// `true` when the variation was forced by whitelisting rather than bucketed.
    #[must_use]
    pub fn whitelisted(&self) -> bool {
        self.whitelisted
    }
}

/// Outcome of evaluating one feature flag for one user.
///
/// Returned by [`Evaluator::evaluate()`](crate::Evaluator::evaluate). A
/// disabled decision carries no rule decisions and no variables.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct Decision {
    feature_key: String,
    enabled: bool,
    variables: Vec<Variable>,
    rollout: Option<RuleDecision>,
    experiment: Option<RuleDecision>,
}

impl Decision {
    pub(crate) fn disabled(feature_key: impl Into<String>) -> Self {
        Self {
            feature_key: feature_key.into(),
            enabled: false,
            variables: Vec::new(),
            rollout: None,
            experiment: None,
        }
    }

    pub(crate) fn enabled(
        feature_key: impl Into<String>,
        variables: Vec<Variable>,
        rollout: Option<RuleDecision>,
        experiment: Option<RuleDecision>,
    ) -> Self {
        Self {
            feature_key: feature_key.into(),
            enabled: true,
            variables,
            rollout,
            experiment,
        }
    }

    #[must_use]
    pub fn feature_key(&self) -> &str {
        &self.feature_key
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Variables of the last granted variation.
    #[must_use]
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Value of one variable by key.
    #[must_use]
    pub fn variable(&self, key: &str) -> Option<&Json> {
        self.variables
            .iter()
            .find(|v| v.key == key)
            .map(|v| &v.value)
    }

    #[must_use]
    pub fn rollout(&self) -> Option<&RuleDecision> {
        self.rollout.as_ref()
    }

    #[must_use]
    pub fn experiment(&self) -> Option<&RuleDecision> {
        self.experiment.as_ref()
    }

    /// The experiment variation when there is one, otherwise the rollout's.
    #[must_use]
    pub fn variation(&self) -> Option<&RuleDecision> {
        self.experiment.as_ref().or(self.rollout.as_ref())
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.enabled { "enabled" } else { "disabled" };
        write!(f, "{}: {state}", self.feature_key)?;
        if let Some(rule) = self.variation() {
            write!(f, " ({}/{})", rule.campaign_key, rule.variation_key)?;
        }
        Ok(())
    }
}
