//! [`DirectAdapter`] – switches controlled over their own local HTTP API.
//!
//! Two device generations are supported:
//!
//! | Generation | Read | Write | Fields |
//! |---|---|---|---|
//! | [`Generation::Rpc`] | `GET /rpc/Switch.GetStatus?id={ch}` | `GET /rpc/Switch.Set?id={ch}&on={bool}` | `output`, `apower` |
//! | [`Generation::Legacy`] | `GET /relay/{ch}` | `GET /relay/{ch}?turn={on,off}` | `ison`, `power` (from `/meter/{ch}`) |
//!
//! A host starts as [`Generation::Unknown`].  The first call tries the RPC
//! API and falls back to the legacy one; whichever answers is remembered per
//! host so later calls go straight to the right API.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ferment_types::{DeviceInfo, FermentError, SwitchState};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::actuator::{Actuator, AdapterError};
use crate::address::{ActuatorAddress, Scheme};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters for the direct-device backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Known device hosts (`host` or `host:port`) used for discovery and
    /// reachability checks.
    #[serde(default)]
    pub hosts: Vec<String>,
}

fn default_enabled() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    5
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            timeout_secs: default_timeout_secs(),
            hosts: Vec::new(),
        }
    }
}

/// API generation of a device host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    /// Not yet determined.
    Unknown,
    /// JSON-RPC style API (`/rpc/...`).
    Rpc,
    /// Legacy key-value HTTP API (`/relay/...`).
    Legacy,
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RpcSwitchStatus {
    output: Option<bool>,
    apower: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct LegacyRelay {
    ison: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct LegacyMeter {
    power: Option<f64>,
}

/// Identification document served at `/shelly` by both generations.
#[derive(Debug, Deserialize)]
struct DeviceIdent {
    #[serde(default, rename = "gen")]
    gen_number: Option<u8>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

impl DeviceIdent {
    fn generation(&self) -> Generation {
        match self.gen_number {
            Some(g) if g >= 2 => Generation::Rpc,
            _ => Generation::Legacy,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DirectAdapter
// ─────────────────────────────────────────────────────────────────────────────

/// Adapter for `direct://host[:port]/channel` addresses.
pub struct DirectAdapter {
    client: reqwest::Client,
    hosts: Vec<String>,
    generations: Mutex<HashMap<String, Generation>>,
}

impl DirectAdapter {
    /// # Errors
    ///
    /// Returns [`FermentError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &DirectConfig) -> Result<Self, FermentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FermentError::Config(format!("direct HTTP client: {e}")))?;
        Ok(Self {
            client,
            hosts: config.hosts.clone(),
            generations: Mutex::new(HashMap::new()),
        })
    }

    /// Cached generation of `authority`.
    pub fn generation(&self, authority: &str) -> Generation {
        self.generations
            .lock()
            .map(|cache| cache.get(authority).copied().unwrap_or(Generation::Unknown))
            .unwrap_or(Generation::Unknown)
    }

    fn remember(&self, authority: &str, generation: Generation) {
        if let Ok(mut cache) = self.generations.lock() {
            if cache.insert(authority.to_string(), generation) != Some(generation) {
                debug!(host = authority, ?generation, "device generation detected");
            }
        }
    }

    fn target(address: &ActuatorAddress) -> Result<(String, u8), AdapterError> {
        match (address, address.authority()) {
            (ActuatorAddress::Direct { channel, .. }, Some(authority)) => Ok((authority, *channel)),
            _ => Err(AdapterError::WrongScheme(address.to_string())),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, AdapterError> {
        let value = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(value)
    }

    /// Run `rpc` or `legacy` depending on the host's known generation,
    /// probing RPC first (then legacy) when the generation is unknown.
    async fn dispatch<T, R, RF, L, LF>(&self, authority: &str, rpc: R, legacy: L) -> Option<T>
    where
        R: FnOnce() -> RF,
        RF: Future<Output = Result<T, AdapterError>>,
        L: FnOnce() -> LF,
        LF: Future<Output = Result<T, AdapterError>>,
    {
        match self.generation(authority) {
            Generation::Rpc => rpc()
                .await
                .map_err(|e| warn!(host = authority, error = %e, "RPC request failed"))
                .ok(),
            Generation::Legacy => legacy()
                .await
                .map_err(|e| warn!(host = authority, error = %e, "legacy request failed"))
                .ok(),
            Generation::Unknown => match rpc().await {
                Ok(value) => {
                    self.remember(authority, Generation::Rpc);
                    Some(value)
                }
                Err(rpc_err) => {
                    debug!(host = authority, error = %rpc_err, "RPC API unavailable, trying legacy API");
                    match legacy().await {
                        Ok(value) => {
                            self.remember(authority, Generation::Legacy);
                            Some(value)
                        }
                        Err(legacy_err) => {
                            warn!(
                                host = authority,
                                rpc_error = %rpc_err,
                                legacy_error = %legacy_err,
                                "device unreachable on both APIs"
                            );
                            None
                        }
                    }
                }
            },
        }
    }

    async fn rpc_status(&self, authority: &str, channel: u8) -> Result<RpcSwitchStatus, AdapterError> {
        self.get_json(&format!("http://{authority}/rpc/Switch.GetStatus?id={channel}"))
            .await
    }

    async fn rpc_set(&self, authority: &str, channel: u8, on: bool) -> Result<(), AdapterError> {
        let url = format!("http://{authority}/rpc/Switch.Set?id={channel}&on={on}");
        self.client.get(&url).send().await?.error_for_status()?;
        Ok(())
    }

    async fn legacy_relay(&self, authority: &str, channel: u8) -> Result<LegacyRelay, AdapterError> {
        self.get_json(&format!("http://{authority}/relay/{channel}"))
            .await
    }

    async fn legacy_set(&self, authority: &str, channel: u8, state: SwitchState) -> Result<(), AdapterError> {
        let relay: LegacyRelay = self
            .get_json(&format!("http://{authority}/relay/{channel}?turn={state}"))
            .await?;
        match relay.ison {
            Some(ison) if ison != state.is_on() => Err(AdapterError::BadResponse(format!(
                "relay reports ison={ison} after turn={state}"
            ))),
            _ => Ok(()),
        }
    }

    async fn legacy_power(&self, authority: &str, channel: u8) -> Result<Option<f64>, AdapterError> {
        let meter: LegacyMeter = self
            .get_json(&format!("http://{authority}/meter/{channel}"))
            .await?;
        Ok(meter.power)
    }

    async fn identify(&self, authority: &str) -> Result<DeviceIdent, AdapterError> {
        let ident: DeviceIdent = self.get_json(&format!("http://{authority}/shelly")).await?;
        self.remember(authority, ident.generation());
        Ok(ident)
    }
}

#[async_trait]
impl Actuator for DirectAdapter {
    fn scheme(&self) -> Scheme {
        Scheme::Direct
    }

    async fn get_state(&self, address: &ActuatorAddress) -> Option<SwitchState> {
        let (authority, channel) = match Self::target(address) {
            Ok(target) => target,
            Err(e) => {
                warn!(error = %e, "direct adapter cannot read address");
                return None;
            }
        };
        let on = self
            .dispatch(
                &authority,
                || async {
                    let status = self.rpc_status(&authority, channel).await?;
                    Ok::<_, AdapterError>(status.output)
                },
                || async {
                    let relay = self.legacy_relay(&authority, channel).await?;
                    Ok::<_, AdapterError>(relay.ison)
                },
            )
            .await
            .flatten();
        on.map(SwitchState::from_bool)
    }

    async fn set_state(&self, address: &ActuatorAddress, state: SwitchState) -> bool {
        let (authority, channel) = match Self::target(address) {
            Ok(target) => target,
            Err(e) => {
                warn!(error = %e, "direct adapter cannot write address");
                return false;
            }
        };
        self.dispatch(
            &authority,
            || self.rpc_set(&authority, channel, state.is_on()),
            || self.legacy_set(&authority, channel, state),
        )
        .await
        .is_some()
    }

    async fn test_connection(&self) -> bool {
        if self.hosts.is_empty() {
            return true;
        }
        for host in &self.hosts {
            if self.identify(host).await.is_ok() {
                return true;
            }
        }
        false
    }

    async fn discover_devices(&self) -> Vec<DeviceInfo> {
        let mut devices = Vec::with_capacity(self.hosts.len());
        for host in &self.hosts {
            let ident = match self.identify(host).await {
                Ok(ident) => ident,
                Err(e) => {
                    warn!(host = %host, error = %e, "direct discovery probe failed");
                    continue;
                }
            };
            let address = match ActuatorAddress::parse(&format!("direct://{host}/0")) {
                Ok(address) => address,
                Err(e) => {
                    warn!(host = %host, error = %e, "configured host is not addressable");
                    continue;
                }
            };
            let generation = ident.generation();
            let state = self.get_state(&address).await;
            let power_w = self.get_power_usage(&address).await;
            let model = ident.model.clone().or(ident.kind.clone()).unwrap_or_default();
            let name = ident
                .name
                .clone()
                .or(ident.id.clone())
                .unwrap_or_else(|| host.clone());

            let mut extra = std::collections::BTreeMap::new();
            extra.insert(
                "generation".to_string(),
                match generation {
                    Generation::Rpc => "rpc",
                    Generation::Legacy => "legacy",
                    Generation::Unknown => "unknown",
                }
                .to_string(),
            );
            if !model.is_empty() {
                extra.insert("model".to_string(), model);
            }

            devices.push(DeviceInfo {
                entity_id: address.to_string(),
                name,
                device_type: "switch".to_string(),
                state,
                power_w,
                extra,
            });
        }
        devices
    }

    async fn get_power_usage(&self, address: &ActuatorAddress) -> Option<f64> {
        let (authority, channel) = Self::target(address).ok()?;
        self.dispatch(
            &authority,
            || async {
                let status = self.rpc_status(&authority, channel).await?;
                Ok::<_, AdapterError>(status.apower)
            },
            || self.legacy_power(&authority, channel),
        )
        .await
        .flatten()
    }
}
