//! [`HubAdapter`] – actuators behind a central home-automation hub.
//!
//! The hub exposes a REST API:
//!
//! | Call | Endpoint |
//! |---|---|
//! | state query | `GET  /api/states/{entity_id}` |
//! | entity list | `GET  /api/states` |
//! | switch | `POST /api/services/{domain}/turn_on` / `turn_off` with `{"entity_id": …}` |
//! | reachability | `GET  /api/` |
//!
//! The entity's domain is the segment of its id before the first `.`
//! (`switch.ferm_heater` → `switch`).  Every request carries the configured
//! long-lived token as a bearer credential.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use ferment_types::{DeviceInfo, FermentError, SwitchState};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::actuator::{Actuator, AdapterError};
use crate::address::{ActuatorAddress, Scheme};

const SWITCH_DOMAIN: &str = "switch";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Connection parameters for the hub backend.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub enabled: bool,
    /// e.g. `http://homeassistant.local:8123`
    #[serde(default)]
    pub base_url: String,
    /// Long-lived access token.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            token: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl fmt::Debug for HubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubConfig")
            .field("enabled", &self.enabled)
            .field("base_url", &self.base_url)
            .field(
                "token",
                if self.token.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct EntityState {
    entity_id: String,
    state: String,
    #[serde(default)]
    attributes: Map<String, Value>,
}

impl EntityState {
    fn switch_state(&self) -> Option<SwitchState> {
        // "unavailable" / "unknown" are deliberately not mapped.
        match self.state.to_ascii_lowercase().as_str() {
            "on" => Some(SwitchState::On),
            "off" => Some(SwitchState::Off),
            _ => None,
        }
    }

    fn power_w(&self) -> Option<f64> {
        ["current_power_w", "power"]
            .iter()
            .find_map(|key| self.attributes.get(*key).and_then(Value::as_f64))
    }

    fn friendly_name(&self) -> String {
        self.attributes
            .get("friendly_name")
            .and_then(Value::as_str)
            .unwrap_or(&self.entity_id)
            .to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HubAdapter
// ─────────────────────────────────────────────────────────────────────────────

/// Adapter for `hub://` addresses.
pub struct HubAdapter {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl HubAdapter {
    /// Build an adapter from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`FermentError::Config`] when the base URL is empty or the
    /// HTTP client cannot be constructed.
    pub fn new(config: &HubConfig) -> Result<Self, FermentError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(FermentError::Config("hub base_url is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FermentError::Config(format!("hub HTTP client: {e}")))?;
        Ok(Self {
            base_url,
            token: config.token.clone(),
            client,
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.token.is_empty() {
            request
        } else {
            request.bearer_auth(&self.token)
        }
    }

    fn entity_id(address: &ActuatorAddress) -> Result<&str, AdapterError> {
        match address {
            ActuatorAddress::Hub { entity_id } => Ok(entity_id),
            other => Err(AdapterError::WrongScheme(other.to_string())),
        }
    }

    async fn fetch_state(&self, entity_id: &str) -> Result<EntityState, AdapterError> {
        let url = format!("{}/api/states/{}", self.base_url, entity_id);
        let state = self
            .authorized(self.client.get(&url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(state)
    }

    async fn call_service(
        &self,
        entity_id: &str,
        state: SwitchState,
    ) -> Result<(), AdapterError> {
        let domain = match entity_id.split_once('.') {
            Some((domain, _)) if !domain.is_empty() => domain,
            _ => {
                return Err(AdapterError::BadResponse(format!(
                    "cannot infer a domain from entity '{entity_id}'"
                )));
            }
        };
        let service = match state {
            SwitchState::On => "turn_on",
            SwitchState::Off => "turn_off",
        };
        let url = format!("{}/api/services/{}/{}", self.base_url, domain, service);
        self.authorized(self.client.post(&url))
            .json(&json!({ "entity_id": entity_id }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn fetch_all(&self) -> Result<Vec<EntityState>, AdapterError> {
        let url = format!("{}/api/states", self.base_url);
        let states = self
            .authorized(self.client.get(&url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(states)
    }
}

#[async_trait]
impl Actuator for HubAdapter {
    fn scheme(&self) -> Scheme {
        Scheme::Hub
    }

    async fn get_state(&self, address: &ActuatorAddress) -> Option<SwitchState> {
        let result = match Self::entity_id(address) {
            Ok(entity_id) => self.fetch_state(entity_id).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(entity) => {
                let state = entity.switch_state();
                if state.is_none() {
                    debug!(entity = %entity.entity_id, raw = %entity.state, "hub reported a non-boolean state");
                }
                state
            }
            Err(e) => {
                warn!(address = %address, error = %e, "hub state query failed");
                None
            }
        }
    }

    async fn set_state(&self, address: &ActuatorAddress, state: SwitchState) -> bool {
        let result = match Self::entity_id(address) {
            Ok(entity_id) => self.call_service(entity_id, state).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(address = %address, state = %state, error = %e, "hub service call failed");
                false
            }
        }
    }

    async fn test_connection(&self) -> bool {
        let url = format!("{}/api/", self.base_url);
        match self.authorized(self.client.get(&url)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "hub unreachable");
                false
            }
        }
    }

    async fn discover_devices(&self) -> Vec<DeviceInfo> {
        let prefix = format!("{SWITCH_DOMAIN}.");
        match self.fetch_all().await {
            Ok(states) => states
                .into_iter()
                .filter(|s| s.entity_id.starts_with(&prefix))
                .map(|s| DeviceInfo {
                    entity_id: format!("hub://{}", s.entity_id),
                    name: s.friendly_name(),
                    device_type: SWITCH_DOMAIN.to_string(),
                    state: s.switch_state(),
                    power_w: s.power_w(),
                    extra: [("raw_state".to_string(), s.state.clone())]
                        .into_iter()
                        .collect(),
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "hub discovery failed");
                Vec::new()
            }
        }
    }

    async fn get_power_usage(&self, address: &ActuatorAddress) -> Option<f64> {
        let entity_id = Self::entity_id(address).ok()?;
        match self.fetch_state(entity_id).await {
            Ok(entity) => entity.power_w(),
            Err(e) => {
                debug!(address = %address, error = %e, "hub power query failed");
                None
            }
        }
    }
}
