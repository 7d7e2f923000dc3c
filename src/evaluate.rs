use std::sync::Arc;

use serde_json::Value as Json;
use tracing::{debug, error, info, warn};

use crate::campaign::evaluate_traffic;
use crate::decision::RuleEvaluator;
use crate::meg::resolve_group_winner;
use crate::segment::{Attributes, Segment};
use crate::services::{
    AttributeGatewayService, GatewayQuery, ListMembershipService, Services, SettingsProvider,
    StorageConnector,
};
use crate::session::{EvaluationSession, RolloutInfo, Scope};
use crate::types::{
    Decision, GatewayData, RuleDecision, Settings, StorageRecord, UserContext, ValidationError,
    Variable,
};

/// Builder for an [`Evaluator`].
///
/// Every collaborator except the settings provider is optional and defaults
/// to a no-op.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use fme_core::{EvaluatorBuilder, InMemoryStorage, Settings, UserContext};
///
/// let settings = Settings::from_json(r#"{"accountId": 1, "features": [], "campaigns": []}"#).unwrap();
/// let evaluator = EvaluatorBuilder::new()
///     .settings(Arc::new(settings))
///     .storage(Arc::new(InMemoryStorage::new()))
///     .build();
///
/// let decision = evaluator.evaluate("checkout", &UserContext::new("user-1"));
/// assert!(!decision.is_enabled());
/// ```
#[derive(Default)]
pub struct EvaluatorBuilder {
    settings: Option<Arc<dyn SettingsProvider>>,
    services: Services,
}

impl EvaluatorBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn settings(mut self, provider: impl SettingsProvider + 'static) -> Self {
        self.settings = Some(Arc::new(provider));
        self
    }

    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn StorageConnector>) -> Self {
        self.services = self.services.storage(storage);
        self
    }

    #[must_use]
    pub fn list_membership(mut self, lists: Arc<dyn ListMembershipService>) -> Self {
        self.services = self.services.list_membership(lists);
        self
    }

    #[must_use]
    pub fn gateway(mut self, gateway: Arc<dyn AttributeGatewayService>) -> Self {
        self.services = self.services.gateway(gateway);
        self
    }

    /// Build the evaluator. Without a settings provider it evaluates against
    /// empty settings, so every flag is disabled.
    #[must_use]
    pub fn build(self) -> Evaluator {
        Evaluator {
            settings: self
                .settings
                .unwrap_or_else(|| Arc::new(Arc::new(Settings::default()))),
            services: self.services,
        }
    }
}

/// Decides feature flags for users. Thread-safe and designed to live behind `Arc`.
pub struct Evaluator {
    settings: Arc<dyn SettingsProvider>,
    services: Services,
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

/// Outcome accumulated while walking a feature's rules.
#[derive(Default)]
struct FlagState {
    enabled: bool,
    variables: Vec<Variable>,
    rollout: Option<RuleDecision>,
    experiment: Option<RuleDecision>,
}

impl Evaluator {
    /// Decide `feature_key` for `user`. Invalid arguments yield a disabled decision.
    pub fn evaluate(&self, feature_key: &str, user: &UserContext) -> Decision {
        self.try_evaluate(feature_key, user).unwrap_or_else(|err| {
            error!(feature_key, %err, "invalid evaluation request");
            Decision::disabled(feature_key)
        })
    }

    /// Decide `feature_key` for `user`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the user id or feature key is empty.
    pub fn try_evaluate(
        &self,
        feature_key: &str,
        user: &UserContext,
    ) -> Result<Decision, ValidationError> {
        if user.id().is_empty() {
            return Err(ValidationError::EmptyUserId);
        }
        if feature_key.is_empty() {
            return Err(ValidationError::EmptyFeatureKey);
        }

        let settings = self.settings.settings();
        let mut session = EvaluationSession::new();
        let mut state = FlagState::default();

        if let Some(record) = self.services.stored(feature_key, user.id()) {
            if record.experiment_variation_id.is_some() {
                if let Some((key, variation_id)) = record.experiment()
                    && let Some((campaign, variation)) =
                        settings.variation_by_campaign_key(key, variation_id)
                {
                    info!(
                        user_id = user.id(),
                        experiment_key = key,
                        variation_key = %variation.key,
                        "stored_variation_found: experiment"
                    );
                    return Ok(Decision::enabled(
                        feature_key,
                        variation.variables.clone(),
                        None,
                        Some(RuleDecision::new(campaign, variation, false)),
                    ));
                }
            } else if let Some((key, variation_id)) = record.rollout()
                && let Some((campaign, variation)) =
                    settings.variation_by_campaign_key(key, variation_id)
            {
                info!(
                    user_id = user.id(),
                    rollout_key = key,
                    variation_key = %variation.key,
                    "stored_variation_found: rollout"
                );
                state.enabled = true;
                state.variables = variation.variables.clone();
                state.rollout = Some(RuleDecision::new(campaign, variation, false));
                session.record_rollout(
                    feature_key,
                    RolloutInfo {
                        campaign_id: campaign.id,
                        campaign_key: campaign.key.clone(),
                        variation_id: Some(variation.id),
                    },
                );
            }
        }

        let Some(feature) = settings.feature(feature_key) else {
            error!(feature_key, "feature_not_found");
            return Ok(Decision::disabled(feature_key));
        };

        let fetched = if feature.requires_gateway() && user.gateway().is_none() {
            self.fetch_gateway(user, settings.account_id)
        } else {
            None
        };
        let scope = Scope::new(&settings, user, &self.services).with_gateway(fetched.as_ref());
        let rules = RuleEvaluator::new(&scope);
        let account_id = settings.account_id;

        let mut rollouts = feature.rollouts().peekable();
        let has_rollouts = rollouts.peek().is_some();
        let mut check_experiments = false;
        if has_rollouts && !state.enabled {
            let passing = rollouts.find(|rule| {
                rules
                    .evaluate_rule(feature, *rule, &mut session)
                    .pre_segmentation
            });
            if let Some(rule) = passing {
                session.record_rollout(
                    &feature.key,
                    RolloutInfo {
                        campaign_id: rule.id,
                        campaign_key: rule.key.clone(),
                        variation_id: rule.variations.first().map(|v| v.id),
                    },
                );
                if let Some(variation) = evaluate_traffic(user.id(), account_id, rule) {
                    state.enabled = true;
                    state.variables = variation.variables.clone();
                    state.rollout = Some(RuleDecision::new(rule, variation, false));
                    check_experiments = true;
                }
            }
        } else {
            if !has_rollouts {
                debug!(feature_key, "experiments_evaluation_when_no_rollout_present");
            }
            check_experiments = true;
        }

        if check_experiments {
            for rule in feature.experiments() {
                let outcome = rules.evaluate_rule(feature, rule, &mut session);
                if !outcome.pre_segmentation {
                    continue;
                }
                let granted = match outcome.whitelisted {
                    Some(variation) => Some((variation, true)),
                    None => evaluate_traffic(user.id(), account_id, rule).map(|v| (v, false)),
                };
                if let Some((variation, whitelisted)) = granted {
                    state.enabled = true;
                    state.variables = variation.variables.clone();
                    state.experiment = Some(RuleDecision::new(rule, variation, whitelisted));
                }
                break;
            }
        }

        if !state.enabled {
            return Ok(Decision::disabled(feature_key));
        }
        self.persist(&feature.key, user.id(), &state);
        Ok(Decision::enabled(
            feature_key,
            state.variables,
            state.rollout,
            state.experiment,
        ))
    }

    /// Evaluate a segmentation DSL against the user's custom variables.
    ///
    /// A missing DSL (`null` or `{}`) passes.
    #[must_use]
    pub fn evaluate_segmentation(&self, dsl: &Json, user: &UserContext) -> bool {
        let Some(segment) = Segment::compile(dsl) else {
            return true;
        };
        let settings = self.settings.settings();
        let scope = Scope::new(&settings, user, &self.services);
        let attributes = Attributes::new(user.custom_variables()).with_identity(user.id());
        scope.segments().evaluate(&segment, attributes)
    }

    /// Resolve the winner of `group_id` for `user`, as seen from `feature_key`.
    ///
    /// Runs in a fresh session; returns the winning campaign id only if it
    /// belongs to the feature.
    #[must_use]
    pub fn resolve_group_winner(
        &self,
        group_id: u64,
        feature_key: &str,
        user: &UserContext,
    ) -> Option<u64> {
        let settings = self.settings.settings();
        let feature = settings.feature(feature_key)?;
        let scope = Scope::new(&settings, user, &self.services);
        let rules = RuleEvaluator::new(&scope);
        let mut session = EvaluationSession::new();
        resolve_group_winner(&scope, &rules, group_id, feature, &mut session).map(|c| c.id)
    }

    fn fetch_gateway(&self, user: &UserContext, account_id: u64) -> Option<GatewayData> {
        if user.agent().is_none() && user.ip().is_none() {
            return None;
        }
        let query = GatewayQuery {
            user_agent: user.agent().map(str::to_owned),
            ip_address: user.ip().map(str::to_owned),
            account_id,
        };
        match self.services.gateway.query(&query) {
            Ok(Some(reply)) => GatewayData::from_json(&reply)
                .inspect_err(|err| warn!(%err, "gateway reply unreadable"))
                .ok(),
            Ok(None) => None,
            Err(err) => {
                warn!(%err, "gateway lookup failed");
                None
            }
        }
    }

    fn persist(&self, feature_key: &str, user_id: &str, state: &FlagState) {
        let mut record = StorageRecord::new(feature_key, user_id);
        if let Some(rollout) = &state.rollout {
            record = record.with_rollout(
                rollout.campaign_id(),
                rollout.campaign_key(),
                rollout.variation_id(),
            );
        }
        if let Some(experiment) = &state.experiment {
            record = record.with_experiment(
                experiment.campaign_id(),
                experiment.campaign_key(),
                experiment.variation_id(),
            );
        }
        if let Err(err) = self.services.storage.set(&record) {
            error!(feature_key, user_id, %err, "storing_data_error");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::services::InMemoryStorage;
    use crate::types::ServiceError;

    const SETTINGS: &str = r#"{"accountId": 1,
        "features": [{"id": 1, "key": "checkout", "rules": [
            {"campaignId": 1, "ruleKey": "rollout"},
            {"campaignId": 2, "ruleKey": "test"}
        ]}],
        "campaigns": [
            {"id": 1, "key": "checkout_rollout", "type": "ROLLOUT",
             "variations": [{"id": 1, "key": "on", "weight": 100,
                "variables": [{"id": 1, "key": "color", "type": "string", "value": "grey"}]}]},
            {"id": 2, "key": "checkout_ab", "type": "AB", "percentTraffic": 100,
             "variations": [
                {"id": 1, "key": "control", "weight": 50,
                 "variables": [{"id": 1, "key": "color", "type": "string", "value": "blue"}]},
                {"id": 2, "key": "variant", "weight": 50,
                 "variables": [{"id": 1, "key": "color", "type": "string", "value": "red"}]}
             ]}
        ]}"#;

    fn evaluator(storage: Arc<InMemoryStorage>) -> Evaluator {
        EvaluatorBuilder::new()
            .settings(Arc::new(Settings::from_json(SETTINGS).unwrap()))
            .storage(storage)
            .build()
    }

    #[test]
    fn validation_errors() {
        let e = evaluator(Arc::new(InMemoryStorage::new()));
        assert_eq!(
            e.try_evaluate("checkout", &UserContext::new("")),
            Err(ValidationError::EmptyUserId)
        );
        assert_eq!(
            e.try_evaluate("", &UserContext::new("u")),
            Err(ValidationError::EmptyFeatureKey)
        );
        assert!(!e.evaluate("", &UserContext::new("u")).is_enabled());
    }

    #[test]
    fn missing_feature_is_disabled() {
        let e = evaluator(Arc::new(InMemoryStorage::new()));
        assert!(!e.evaluate("nope", &UserContext::new("u")).is_enabled());
    }

    #[test]
    fn rollout_then_experiment_is_persisted() {
        let storage = Arc::new(InMemoryStorage::new());
        let e = evaluator(storage.clone());
        let decision = e.evaluate("checkout", &UserContext::new("u"));

        assert!(decision.is_enabled());
        assert_eq!(decision.rollout().map(RuleDecision::campaign_id), Some(1));
        let experiment = decision.experiment().unwrap();
        assert_eq!(experiment.campaign_id(), 2);
        let expected = if experiment.variation_id() == 1 { "blue" } else { "red" };
        assert_eq!(decision.variable("color"), Some(&json!(expected)));

        let record = storage.record("checkout", "u").unwrap();
        assert_eq!(record.rollout_id, Some(1));
        assert_eq!(record.experiment_key.as_deref(), Some("checkout_ab"));
        assert_eq!(record.experiment_variation_id, Some(experiment.variation_id()));
    }

    #[test]
    fn stored_experiment_wins_without_rewrite() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.insert(StorageRecord::new("checkout", "u").with_experiment(2, "checkout_ab", 2));
        let e = evaluator(storage.clone());
        let decision = e.evaluate("checkout", &UserContext::new("u"));
        assert_eq!(decision.experiment().map(RuleDecision::variation_key), Some("variant"));
        assert!(decision.rollout().is_none());
        assert_eq!(decision.variable("color"), Some(&json!("red")));
        assert_eq!(storage.record("checkout", "u").unwrap().rollout_id, None);
    }

    #[test]
    fn stored_experiment_for_removed_variation_is_ignored() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.insert(StorageRecord::new("checkout", "u").with_experiment(2, "checkout_ab", 99));
        let e = evaluator(storage);
        let decision = e.evaluate("checkout", &UserContext::new("u"));
        assert_eq!(decision.experiment().map(RuleDecision::campaign_id), Some(2));
        assert_ne!(decision.experiment().map(RuleDecision::variation_id), Some(99));
    }

    #[test]
    fn segmentation_entry_point() {
        let e = evaluator(Arc::new(InMemoryStorage::new()));
        let user = UserContext::new("u").custom_variable("eq", "eq_value");
        assert!(e.evaluate_segmentation(
            &json!({"and": [{"custom_variable": {"eq": "eq_value"}}]}),
            &user
        ));
        assert!(!e.evaluate_segmentation(&json!({"custom_variable": {"eq": "Eq_Value"}}), &user));
        assert!(e.evaluate_segmentation(&json!({}), &user));
    }

    #[test]
    fn gateway_is_fetched_once_when_required() {
        let settings = Settings::from_json(
            r#"{"accountId": 9,
            "features": [{"id": 1, "key": "geo", "rules": [{"campaignId": 1}]}],
            "campaigns": [{"id": 1, "key": "geo_rollout", "type": "ROLLOUT",
                "variations": [{"id": 1, "key": "on", "weight": 100,
                    "segments": {"and": [{"country": "US"}]}}]}]}"#,
        )
        .unwrap();
        let queries = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&queries);
        let gateway = move |q: &GatewayQuery| -> Result<Option<String>, ServiceError> {
            seen.lock().unwrap().push(q.clone());
            Ok(Some(r#"{"location": {"country": "US"}}"#.to_owned()))
        };
        let e = EvaluatorBuilder::new()
            .settings(Arc::new(settings))
            .gateway(Arc::new(gateway))
            .build();

        let user = UserContext::new("u").ip_address("8.8.8.8");
        assert!(e.evaluate("geo", &user).is_enabled());
        let recorded = queries.lock().unwrap().clone();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].account_id, 9);
        assert_eq!(recorded[0].ip_address.as_deref(), Some("8.8.8.8"));

        assert!(!e.evaluate("geo", &UserContext::new("u")).is_enabled());
        assert_eq!(queries.lock().unwrap().len(), 1);
    }
}
