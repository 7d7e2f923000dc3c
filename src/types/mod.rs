mod context;
mod decision;
mod error;
mod settings;
mod storage;
mod value;

pub use context::{GatewayData, UserContext};
pub use decision::{Decision, RuleDecision};
pub use error::{ServiceError, SettingsError, ValidationError};
pub use settings::{
    Campaign, CampaignType, Feature, Group, GroupAlgorithm, Rule, Settings, Variable, Variation,
};
pub use storage::StorageRecord;
pub use value::Value;

pub(crate) use value::canonical_text;
