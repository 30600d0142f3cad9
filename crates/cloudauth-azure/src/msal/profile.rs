//! Azure CLI active profile (`azureProfile.json`)

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

pub const AZURE_CLOUD: &str = "AzureCloud";
pub const STATE_ENABLED: &str = "Enabled";

/// Account type recorded in a subscription's `user` block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileUserType {
    User,
    ServicePrincipal,
}

impl ProfileUserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileUserType::User => "user",
            ProfileUserType::ServicePrincipal => "servicePrincipal",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileUser {
    pub name: String,
    #[serde(rename = "type")]
    pub user_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Subscription {
    pub id: String,
    pub name: String,
    pub tenant_id: String,
    pub is_default: bool,
    pub state: String,
    pub environment_name: String,
    pub user: ProfileUser,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One element of the profile's `subscriptions` array
///
/// Elements that don't fit [`Subscription`] (a `null` name, a bare string)
/// are carried through unchanged as `Raw`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubscriptionEntry {
    Record(Subscription),
    Raw(Value),
}

impl SubscriptionEntry {
    pub fn id(&self) -> Option<&str> {
        match self {
            SubscriptionEntry::Record(sub) => Some(&sub.id),
            SubscriptionEntry::Raw(value) => value.get("id").and_then(Value::as_str),
        }
    }

    pub fn is_default(&self) -> bool {
        match self {
            SubscriptionEntry::Record(sub) => sub.is_default,
            SubscriptionEntry::Raw(value) => value
                .get("isDefault")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }

    pub fn as_record(&self) -> Option<&Subscription> {
        match self {
            SubscriptionEntry::Record(sub) => Some(sub),
            SubscriptionEntry::Raw(_) => None,
        }
    }

    fn clear_default(&mut self) {
        match self {
            SubscriptionEntry::Record(sub) => sub.is_default = false,
            SubscriptionEntry::Raw(Value::Object(map)) => {
                if let Some(flag) = map.get_mut("isDefault") {
                    *flag = Value::Bool(false);
                }
            }
            SubscriptionEntry::Raw(_) => {}
        }
    }

    fn make_default(&mut self, tenant_id: &str, user: &ProfileUser) {
        match self {
            SubscriptionEntry::Record(sub) => {
                sub.tenant_id = tenant_id.to_string();
                sub.is_default = true;
                sub.state = STATE_ENABLED.to_string();
                sub.environment_name = AZURE_CLOUD.to_string();
                sub.user = user.clone();
            }
            SubscriptionEntry::Raw(Value::Object(map)) => {
                map.insert("tenantId".into(), json!(tenant_id));
                map.insert("isDefault".into(), json!(true));
                map.insert("state".into(), json!(STATE_ENABLED));
                map.insert("environmentName".into(), json!(AZURE_CLOUD));
                map.insert(
                    "user".into(),
                    json!({"name": user.name, "type": user.user_type}),
                );
            }
            SubscriptionEntry::Raw(_) => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AzureProfile {
    pub installation_id: String,
    #[serde(deserialize_with = "lenient_subscriptions")]
    pub subscriptions: Vec<SubscriptionEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AzureProfile {
    /// Parse profile bytes, stripping a UTF-8 BOM
    ///
    /// Unparseable input yields `None` so the caller can start fresh.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let bytes = strip_bom(bytes);
        match serde_json::from_slice(bytes) {
            Ok(profile) => Some(profile),
            Err(e) => {
                debug!("Failed to parse Azure profile, starting from empty profile: {}", e);
                None
            }
        }
    }

    /// Serialize without a BOM
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    /// Make `subscription_id` the single default subscription
    ///
    /// Every other entry is marked non-default, including raw ones that
    /// carry an `isDefault` flag. With an empty id nothing is matched or
    /// added, leaving no default at all.
    pub fn set_default_subscription(
        &mut self,
        subscription_id: &str,
        tenant_id: &str,
        username: &str,
        user_type: ProfileUserType,
    ) {
        let user = ProfileUser {
            name: username.to_string(),
            user_type: user_type.as_str().to_string(),
        };

        let mut found = false;
        self.subscriptions.retain_mut(|entry| {
            if subscription_id.is_empty() || entry.id() != Some(subscription_id) {
                entry.clear_default();
                return true;
            }
            if found {
                // duplicate entry for the same subscription
                return false;
            }
            found = true;
            entry.make_default(tenant_id, &user);
            true
        });

        if !found && !subscription_id.is_empty() {
            self.subscriptions.push(SubscriptionEntry::Record(Subscription {
                id: subscription_id.to_string(),
                name: subscription_id.to_string(),
                tenant_id: tenant_id.to_string(),
                is_default: true,
                state: STATE_ENABLED.to_string(),
                environment_name: AZURE_CLOUD.to_string(),
                user,
                extra: Map::new(),
            }));
        }
    }
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}

/// Accept any JSON for `subscriptions`; elements that aren't records stay raw
fn lenient_subscriptions<'de, D>(deserializer: D) -> Result<Vec<SubscriptionEntry>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Array(items) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .map(|item| match serde_json::from_value(item.clone()) {
            Ok(sub) => SubscriptionEntry::Record(sub),
            Err(e) => {
                debug!("Keeping unrecognized subscription entry as-is: {}", e);
                SubscriptionEntry::Raw(item)
            }
        })
        .collect())
}
