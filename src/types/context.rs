use std::collections::HashMap;

use serde::{Deserialize, Deserializer};

use super::Value;

/// Everything the decision core knows about the user being evaluated.
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    id: String,
    custom_variables: HashMap<String, Value>,
    variation_targeting_variables: HashMap<String, Value>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    gateway: Option<GatewayData>,
}

impl UserContext {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Attribute used by campaign pre-segmentation.
    #[must_use]
    pub fn custom_variable(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.custom_variables.insert(name.to_owned(), value.into());
        self
    }

    /// Attribute used by whitelisting (forced variations).
    #[must_use]
    pub fn variation_targeting_variable(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.variation_targeting_variables
            .insert(name.to_owned(), value.into());
        self
    }

    #[must_use]
    pub fn ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    #[must_use]
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Pre-resolved location and user-agent classification. When set, the
    /// gateway collaborator is not consulted.
    #[must_use]
    pub fn gateway_data(mut self, data: GatewayData) -> Self {
        self.gateway = Some(data);
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn custom_variables(&self) -> &HashMap<String, Value> {
        &self.custom_variables
    }

    #[must_use]
    pub fn variation_targeting_variables(&self) -> &HashMap<String, Value> {
        &self.variation_targeting_variables
    }

    #[must_use]
    pub fn ip(&self) -> Option<&str> {
        self.ip_address.as_deref().filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn agent(&self) -> Option<&str> {
        self.user_agent.as_deref().filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn gateway(&self) -> Option<&GatewayData> {
        self.gateway.as_ref()
    }
}

/// Location and user-agent classification resolved by the gateway collaborator.
///
/// Wire shape: `{"location": {"country": "US", ..}, "userAgent": {"os": "Mac OS", ..}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GatewayData {
    #[serde(default, deserialize_with = "scalar_map")]
    pub location: HashMap<String, String>,
    #[serde(default, rename = "userAgent", deserialize_with = "scalar_map")]
    pub user_agent: HashMap<String, String>,
}

impl GatewayData {
    /// Parse the gateway's JSON reply.
    ///
    /// # Errors
    ///
    /// Returns [`serde_json::Error`] when the reply is not the expected shape.
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    #[must_use]
    pub fn with_location(mut self, key: &str, value: &str) -> Self {
        self.location.insert(key.to_owned(), value.to_owned());
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, key: &str, value: &str) -> Self {
        self.user_agent.insert(key.to_owned(), value.to_owned());
        self
    }
}

fn scalar_map<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<HashMap<String, serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| match v {
            serde_json::Value::String(s) => Some((k, s)),
            serde_json::Value::Null => None,
            other => Some((k, other.to_string())),
        })
        .collect())
}
