//! Segmentation DSL.
//!
//! A DSL node is a JSON object with a single key naming a combinator
//! (`and`, `or`, `not`) or a leaf (`custom_variable`, `user`, `ua`,
//! `country`, `region`, `city`, `os`, `browser_string`, `device_type`,
//! `device`, `featureId`). Nodes are compiled once into [`Segment`];
//! anything unrecognized becomes [`Segment::Unknown`] and evaluates to `false`.

mod evaluate;

pub use evaluate::{Attributes, SegmentEvaluator, VWO_USER_ID};

use serde_json::Value as Json;

use crate::operand::{Operand, Pattern};

/// Location keys resolved from the user's IP address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationKey {
    Country,
    Region,
    City,
}

impl LocationKey {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LocationKey::Country => "country",
            LocationKey::Region => "region",
            LocationKey::City => "city",
        }
    }
}

/// User-agent classification keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKey {
    Os,
    BrowserString,
    DeviceType,
    Device,
}

impl DeviceKey {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKey::Os => "os",
            DeviceKey::BrowserString => "browser_string",
            DeviceKey::DeviceType => "device_type",
            DeviceKey::Device => "device",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "os" => Some(DeviceKey::Os),
            "browser_string" => Some(DeviceKey::BrowserString),
            "device_type" => Some(DeviceKey::DeviceType),
            "device" => Some(DeviceKey::Device),
            _ => None,
        }
    }
}

/// One expected value of a user-agent classification key.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMatcher {
    /// Lower-cased literal.
    Exact(String),
    /// `wildcard(..)` form, case-insensitive, `*` matching any run of characters.
    Wildcard(Pattern),
}

impl DeviceMatcher {
    fn new(raw: &str) -> Self {
        let lowered = raw.to_lowercase();
        match lowered
            .strip_prefix("wildcard(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Some(body) => {
                let source = body
                    .split('*')
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(".*");
                DeviceMatcher::Wildcard(Pattern::new(&format!("(?i){source}")))
            }
            None => DeviceMatcher::Exact(lowered),
        }
    }

    pub(crate) fn matches(&self, actual: &str) -> bool {
        match self {
            DeviceMatcher::Exact(expected) => *expected == actual.trim().to_lowercase(),
            DeviceMatcher::Wildcard(pattern) => pattern.is_full_match(actual),
        }
    }
}

/// Whether a `featureId` leaf asks for a stored decision (`On`) or its absence (`Off`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    On,
    Off,
}

/// Match rule of a `user` leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum UserMatch {
    Ids(Vec<String>),
    InList(String),
}

/// Compiled segmentation DSL.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    And(Vec<Segment>),
    Or(Vec<Segment>),
    Not(Box<Segment>),
    CustomVariable { attribute: String, operand: Operand },
    User(UserMatch),
    UserAgent(Operand),
    Location { key: LocationKey, value: String },
    Device { key: DeviceKey, values: Vec<DeviceMatcher> },
    FeatureToggle { feature_id: u64, toggle: Toggle },
    Unknown(String),
}

impl Segment {
    /// Compile a DSL node. Returns `None` for an absent DSL (null or an empty object),
    /// which callers treat as "no targeting".
    #[must_use]
    pub fn compile(dsl: &Json) -> Option<Self> {
        match dsl {
            Json::Null => None,
            Json::Object(map) if map.is_empty() => None,
            node => Some(Self::from_node(node)),
        }
    }

    /// Parse a JSON string and compile it.
    ///
    /// # Errors
    ///
    /// Returns [`serde_json::Error`] if the input is not JSON.
    pub fn from_json(input: &str) -> Result<Option<Self>, serde_json::Error> {
        let dsl: Json = serde_json::from_str(input)?;
        Ok(Self::compile(&dsl))
    }

    fn from_node(node: &Json) -> Self {
        let Some((key, value)) = node.as_object().and_then(|m| m.iter().next()) else {
            return Segment::Unknown(node.to_string());
        };
        match key.as_str() {
            "and" => Self::children(value).map_or_else(|| unknown(key), Segment::And),
            "or" => Self::children(value).map_or_else(|| unknown(key), Segment::Or),
            "not" if value.is_object() => Segment::Not(Box::new(Self::from_node(value))),
            "custom_variable" => custom_variable(value).unwrap_or_else(|| unknown(key)),
            "user" => user(value).unwrap_or_else(|| unknown(key)),
            "ua" => scalar_text(value).map_or_else(
                || unknown(key),
                |text| Segment::UserAgent(Operand::parse(&text)),
            ),
            "country" | "region" | "city" => {
                let location = match key.as_str() {
                    "country" => LocationKey::Country,
                    "region" => LocationKey::Region,
                    _ => LocationKey::City,
                };
                scalar_text(value).map_or_else(
                    || unknown(key),
                    |text| Segment::Location {
                        key: location,
                        value: text,
                    },
                )
            }
            "featureId" => feature_toggle(value).unwrap_or_else(|| unknown(key)),
            other => match DeviceKey::from_name(other) {
                Some(device) => Segment::Device {
                    key: device,
                    values: text_list(value)
                        .iter()
                        .map(|v| DeviceMatcher::new(v))
                        .collect(),
                },
                None => unknown(other),
            },
        }
    }

    fn children(value: &Json) -> Option<Vec<Segment>> {
        value
            .as_array()
            .map(|nodes| nodes.iter().map(Self::from_node).collect())
    }

    /// `true` when evaluating this DSL needs location or user-agent classification.
    #[must_use]
    pub fn requires_gateway(&self) -> bool {
        match self {
            Segment::And(children) | Segment::Or(children) => {
                children.iter().any(Segment::requires_gateway)
            }
            Segment::Not(inner) => inner.requires_gateway(),
            Segment::Location { .. } | Segment::Device { .. } => true,
            Segment::CustomVariable { .. }
            | Segment::User(_)
            | Segment::UserAgent(_)
            | Segment::FeatureToggle { .. }
            | Segment::Unknown(_) => false,
        }
    }
}

fn unknown(key: &str) -> Segment {
    Segment::Unknown(key.to_owned())
}

fn scalar_text(value: &Json) -> Option<String> {
    match value {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        Json::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn text_list(value: &Json) -> Vec<String> {
    match value {
        Json::Array(items) => items.iter().filter_map(scalar_text).collect(),
        other => scalar_text(other).into_iter().collect(),
    }
}

fn custom_variable(value: &Json) -> Option<Segment> {
    let (attribute, operand) = value.as_object()?.iter().next()?;
    Some(Segment::CustomVariable {
        attribute: attribute.clone(),
        operand: Operand::parse(&scalar_text(operand)?),
    })
}

fn user(value: &Json) -> Option<Segment> {
    let text = match value {
        Json::Array(items) => items
            .iter()
            .filter_map(scalar_text)
            .collect::<Vec<_>>()
            .join(","),
        other => scalar_text(other)?,
    };
    if let Operand::InList(list) = Operand::parse(&text) {
        return Some(Segment::User(UserMatch::InList(list)));
    }
    let ids = text
        .split(',')
        .map(|id| id.replace('"', "").trim().to_owned())
        .collect();
    Some(Segment::User(UserMatch::Ids(ids)))
}

fn feature_toggle(value: &Json) -> Option<Segment> {
    let (id, state) = value.as_object()?.iter().next()?;
    let toggle = match state.as_str()? {
        "on" => Toggle::On,
        "off" => Toggle::Off,
        _ => return None,
    };
    Some(Segment::FeatureToggle {
        feature_id: id.trim().parse().ok()?,
        toggle,
    })
}
