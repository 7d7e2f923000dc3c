use std::collections::HashMap;

use percent_encoding::percent_decode_str;
use tracing::debug;

use super::{DeviceKey, DeviceMatcher, LocationKey, Segment, Toggle, UserMatch};
use crate::operand::Operand;
use crate::services::{ListMembershipService, ListQuery, Services, StorageConnector};
use crate::types::{GatewayData, Settings, UserContext, Value};

/// Attribute carrying the user's identity for `user` leaves and list checks.
pub const VWO_USER_ID: &str = "_vwoUserId";

/// Attribute map a DSL is evaluated against, with an optional identity
/// override for [`VWO_USER_ID`].
#[derive(Debug, Clone, Copy)]
pub struct Attributes<'a> {
    values: &'a HashMap<String, Value>,
    identity: Option<&'a str>,
}

impl<'a> Attributes<'a> {
    #[must_use]
    pub fn new(values: &'a HashMap<String, Value>) -> Self {
        Self {
            values,
            identity: None,
        }
    }

    #[must_use]
    pub fn with_identity(mut self, identity: &'a str) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Canonical tag form of an attribute, if present.
    #[must_use]
    pub fn tag(&self, name: &str) -> Option<String> {
        if name == VWO_USER_ID
            && let Some(identity) = self.identity
        {
            return Some(identity.to_owned());
        }
        self.values.get(name).map(Value::to_tag_string)
    }
}

/// Evaluates compiled [`Segment`]s for one user.
pub struct SegmentEvaluator<'a> {
    settings: &'a Settings,
    user: &'a UserContext,
    gateway: Option<&'a GatewayData>,
    storage: &'a dyn StorageConnector,
    lists: &'a dyn ListMembershipService,
}

impl<'a> SegmentEvaluator<'a> {
    #[must_use]
    pub fn new(settings: &'a Settings, user: &'a UserContext, services: &'a Services) -> Self {
        Self {
            settings,
            user,
            gateway: user.gateway(),
            storage: services.storage.as_ref(),
            lists: services.lists.as_ref(),
        }
    }

    /// Use externally resolved classification when the context carries none.
    #[must_use]
    pub fn with_gateway(mut self, gateway: Option<&'a GatewayData>) -> Self {
        if self.gateway.is_none() {
            self.gateway = gateway;
        }
        self
    }

    /// Evaluate a DSL. Never fails; anything that cannot be decided is `false`.
    #[must_use]
    pub fn evaluate(&self, segment: &Segment, attributes: Attributes<'_>) -> bool {
        match segment {
            Segment::Not(inner) => !self.evaluate(inner, attributes),
            Segment::And(children) => self.every(children, attributes),
            Segment::Or(children) => self.some(children, attributes),
            Segment::CustomVariable { attribute, operand } => {
                self.custom_variable(attribute, operand, attributes)
            }
            Segment::User(rule) => self.user_leaf(rule, attributes),
            Segment::UserAgent(operand) => self.user_agent_leaf(operand),
            // Location, device and featureId leaves only count inside and/or.
            Segment::Location { .. }
            | Segment::Device { .. }
            | Segment::FeatureToggle { .. }
            | Segment::Unknown(_) => false,
        }
    }

    fn every(&self, children: &[Segment], attributes: Attributes<'_>) -> bool {
        let mut location: HashMap<LocationKey, &str> = HashMap::new();
        for child in children {
            if let Segment::Location { key, value } = child {
                location.insert(*key, value);
                if location.len() == children.len() {
                    return self.location_matches(&location);
                }
                continue;
            }
            if !self.evaluate(child, attributes) {
                return false;
            }
        }
        true
    }

    fn some(&self, children: &[Segment], attributes: Attributes<'_>) -> bool {
        let mut classification: HashMap<DeviceKey, Vec<&DeviceMatcher>> = HashMap::new();
        let mut device_keys = 0;
        for child in children {
            match child {
                Segment::Device { key, values } => {
                    classification.entry(*key).or_default().extend(values);
                    device_keys += 1;
                }
                Segment::FeatureToggle { feature_id, toggle } => {
                    return self.feature_toggle(*feature_id, *toggle);
                }
                _ => {}
            }
            if device_keys > 0 && device_keys == children.len() {
                return self.user_agent_matches(&classification);
            }
            if self.evaluate(child, attributes) {
                return true;
            }
        }
        false
    }

    fn custom_variable(&self, name: &str, operand: &Operand, attributes: Attributes<'_>) -> bool {
        let Some(tag) = attributes.tag(name) else {
            return false;
        };
        match operand {
            Operand::InList(list) => self.in_list(list, tag),
            other => other.matches(&tag),
        }
    }

    fn user_leaf(&self, rule: &UserMatch, attributes: Attributes<'_>) -> bool {
        let Some(identity) = attributes.tag(VWO_USER_ID) else {
            return false;
        };
        match rule {
            UserMatch::Ids(ids) => ids.iter().any(|id| *id == identity),
            UserMatch::InList(list) => self.in_list(list, identity),
        }
    }

    fn user_agent_leaf(&self, operand: &Operand) -> bool {
        let Some(agent) = self.user.agent() else {
            return false;
        };
        let agent = agent.replace('+', " ");
        let decoded = percent_decode_str(&agent).decode_utf8_lossy();
        operand.matches(&decoded)
    }

    fn in_list(&self, list_id: &str, attribute: String) -> bool {
        if list_id.is_empty() {
            return false;
        }
        let query = ListQuery {
            attribute,
            list_id: list_id.to_owned(),
            account_id: self.settings.account_id,
        };
        match self.lists.query(&query) {
            Ok(Some(reply)) => reply.trim().eq_ignore_ascii_case("true"),
            Ok(None) => false,
            Err(err) => {
                debug!(list_id, %err, "list membership lookup failed");
                false
            }
        }
    }

    fn feature_toggle(&self, feature_id: u64, toggle: Toggle) -> bool {
        let Some(feature) = self.settings.feature_by_id(feature_id) else {
            debug!(feature_id, "feature not found for featureId leaf");
            return false;
        };
        let decided = match self.storage.get(&feature.key, self.user.id()) {
            Ok(record) => record.is_some_and(|r| r.has_decision()),
            Err(err) => {
                debug!(feature_key = %feature.key, %err, "stored data unreadable");
                false
            }
        };
        match toggle {
            Toggle::On => decided,
            Toggle::Off => !decided,
        }
    }

    fn location_matches(&self, expected: &HashMap<LocationKey, &str>) -> bool {
        if self.user.ip().is_none() {
            debug!(user_id = self.user.id(), "no ip address for location targeting");
            return false;
        }
        let Some(actual) = self.gateway.map(|g| &g.location).filter(|l| !l.is_empty()) else {
            return false;
        };
        expected.iter().all(|(key, value)| {
            actual
                .get(key.as_str())
                .is_some_and(|found| unquote(found) == unquote(value))
        })
    }

    fn user_agent_matches(&self, expected: &HashMap<DeviceKey, Vec<&DeviceMatcher>>) -> bool {
        if self.user.agent().is_none() {
            debug!(user_id = self.user.id(), "no user agent for device targeting");
            return false;
        }
        let Some(actual) = self
            .gateway
            .map(|g| &g.user_agent)
            .filter(|ua| !ua.is_empty())
        else {
            return false;
        };
        actual.iter().any(|(name, value)| {
            DeviceKey::from_name(name)
                .and_then(|key| expected.get(&key))
                .is_some_and(|matchers| matchers.iter().any(|m| m.matches(value)))
        })
    }
}

fn unquote(value: &str) -> &str {
    let trimmed = value.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim()
}
