//! Offline decision core for feature flags, rollouts and experiments.
//!
//! Given a processed [`Settings`] snapshot and a [`UserContext`], an
//! [`Evaluator`] decides whether a feature is enabled for the user, which
//! rollout and experiment variations apply, and which variables they carry.
//! Decisions are deterministic: bucketing hashes stable seeds with
//! MurmurHash3, so the same user always lands in the same variation.

mod bucketing;
mod campaign;
mod decision;
mod error;
mod evaluate;
mod meg;
mod operand;
mod segment;
mod services;
mod session;
mod types;
mod whitelist;

pub use bucketing::{
    BucketRange, HASH_SEED, MAX_TRAFFIC_PERCENT, MAX_TRAFFIC_VALUE, allocate_ranges, bucket_value,
    find_range, hash, inclusion_bucket, murmur3_32, single_range, step_factor, variation_bucket,
};
pub use campaign::{
    bucket_user_to_variation, bucketing_seed, evaluate_traffic, is_user_part_of_campaign,
    pre_segmentation, scale_weights, variation_allotted,
};
pub use decision::{RuleEvaluator, RuleOutcome};
pub use error::FmeError;
pub use evaluate::{Evaluator, EvaluatorBuilder};
pub use meg::{RolloutGate, resolve_group_winner};
pub use operand::{CompareOp, Operand, Pattern};
pub use segment::{
    Attributes, DeviceKey, DeviceMatcher, LocationKey, Segment, SegmentEvaluator, Toggle,
    UserMatch, VWO_USER_ID,
};
pub use services::{
    AttributeGatewayService, GatewayQuery, InMemoryStorage, ListMembershipService, ListQuery,
    NoLookup, NoStorage, Services, SettingsProvider, SharedSettings, StorageConnector,
};
pub use session::{
    EvaluationSession, GroupWinner, MEG_META_KEY_PREFIX, RolloutInfo, Scope, user_list_id,
};
pub use types::{
    Campaign, CampaignType, Decision, Feature, GatewayData, Group, GroupAlgorithm, Rule,
    RuleDecision, ServiceError, Settings, SettingsError, StorageRecord, UserContext,
    ValidationError, Value, Variable, Variation,
};
pub use whitelist::{rescaled_ranges, whitelisted_variation};
