use serde::{Deserialize, Serialize};

/// Persisted decision for one `(feature, user)` pair.
///
/// Group winners are stored under the synthetic feature key
/// `"_vwo_meta_meg_<groupId>"` using the `experiment*` fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageRecord {
    pub feature_key: String,
    #[serde(rename = "user")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout_variation_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_variation_id: Option<u64>,
}

impl StorageRecord {
    #[must_use]
    pub fn new(feature_key: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            feature_key: feature_key.into(),
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Record a rollout decision.
    #[must_use]
    pub fn with_rollout(mut self, id: u64, key: impl Into<String>, variation_id: u64) -> Self {
        self.rollout_id = Some(id);
        self.rollout_key = Some(key.into());
        self.rollout_variation_id = Some(variation_id);
        self
    }

    /// Record an experiment decision.
    #[must_use]
    pub fn with_experiment(mut self, id: u64, key: impl Into<String>, variation_id: u64) -> Self {
        self.experiment_id = Some(id);
        self.experiment_key = Some(key.into());
        self.experiment_variation_id = Some(variation_id);
        self
    }

    /// `true` when the record carries any decision beyond its identifying keys.
    #[must_use]
    pub fn has_decision(&self) -> bool {
        self.rollout_id.is_some()
            || self.rollout_key.is_some()
            || self.rollout_variation_id.is_some()
            || self.experiment_id.is_some()
            || self.experiment_key.is_some()
            || self.experiment_variation_id.is_some()
    }

    /// Stored experiment key and variation id, if both are present and non-empty.
    pub(crate) fn experiment(&self) -> Option<(&str, u64)> {
        let key = self.experiment_key.as_deref().filter(|k| !k.is_empty())?;
        Some((key, self.experiment_variation_id?))
    }

    /// Stored rollout key and variation id; requires a rollout id as well.
    pub(crate) fn rollout(&self) -> Option<(&str, u64)> {
        self.rollout_id?;
        let key = self.rollout_key.as_deref().filter(|k| !k.is_empty())?;
        Some((key, self.rollout_variation_id?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_record_has_no_decision() {
        let record = StorageRecord::new("checkout", "user-1");
        assert!(!record.has_decision());
        assert_eq!(record.experiment(), None);
        assert_eq!(record.rollout(), None);
    }

    #[test]
    fn experiment_accessor() {
        let record = StorageRecord::new("checkout", "user-1").with_experiment(7, "exp", 2);
        assert!(record.has_decision());
        assert_eq!(record.experiment(), Some(("exp", 2)));
    }

    #[test]
    fn empty_experiment_key_is_ignored() {
        let mut record = StorageRecord::new("checkout", "user-1").with_experiment(7, "", 2);
        assert_eq!(record.experiment(), None);
        record.experiment_key = Some("exp".into());
        assert_eq!(record.experiment(), Some(("exp", 2)));
    }

    #[test]
    fn rollout_requires_id() {
        let mut record = StorageRecord::new("checkout", "user-1").with_rollout(3, "roll", 1);
        assert_eq!(record.rollout(), Some(("roll", 1)));
        record.rollout_id = None;
        assert_eq!(record.rollout(), None);
    }

    #[test]
    fn serde_uses_wire_names() {
        let record = StorageRecord::new("checkout", "user-1").with_experiment(7, "exp", 2);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["featureKey"], "checkout");
        assert_eq!(json["user"], "user-1");
        assert_eq!(json["experimentVariationId"], 2);
        assert!(json.get("rolloutId").is_none());
    }
}
