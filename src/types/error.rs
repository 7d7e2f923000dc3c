use thiserror::Error;

/// Settings that cannot be turned into a usable snapshot.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid settings json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate campaign id {id}")]
    DuplicateCampaign { id: u64 },

    #[error("feature '{feature}' references unknown campaign {campaign}")]
    UnknownCampaign { feature: String, campaign: u64 },
}

/// Arguments rejected before any decision work starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("user id must not be empty")]
    EmptyUserId,

    #[error("feature key must not be empty")]
    EmptyFeatureKey,
}

/// Failure reported by a collaborator (storage, list membership, gateway).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("malformed service reply: {0}")]
    Malformed(String),
}
