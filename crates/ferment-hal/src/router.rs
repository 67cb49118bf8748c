//! [`ActuatorRouter`] – address-scheme router and adapter lifecycle owner.
//!
//! The router holds a [`RouterConfig`] snapshot and a lazily-built map from
//! [`Scheme`] to adapter.  Every call parses the address once, picks the
//! adapter for its scheme and forwards the call.
//!
//! # Reconfiguration
//!
//! [`ActuatorRouter::reconfigure`] compares the new configuration with the
//! current one.  Identical configurations are a no-op; otherwise the built-in
//! adapters are closed and dropped, and rebuilt on next use.  Adapters added
//! with [`ActuatorRouter::register_adapter`] are not owned by the
//! configuration and survive reconfiguration.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use ferment_types::{DeviceInfo, FermentError, SwitchState};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::actuator::Actuator;
use crate::address::{ActuatorAddress, Scheme};
use crate::direct::{DirectAdapter, DirectConfig};
use crate::hub::{HubAdapter, HubConfig};

/// Which backends are enabled and how to reach them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub direct: DirectConfig,
}

/// The narrow actuator interface the control loop depends on.
///
/// [`ActuatorRouter`] is the production implementation; tests substitute an
/// in-memory fake.
#[async_trait]
pub trait ActuatorControl: Send + Sync {
    /// `Ok(None)` means the device is unreachable or reports a non-boolean
    /// state.
    async fn get_state(&self, address: &str) -> Result<Option<SwitchState>, FermentError>;

    /// `Ok(false)` means the backend did not confirm the write.
    async fn set_state(&self, address: &str, state: SwitchState) -> Result<bool, FermentError>;
}

type AdapterMap = BTreeMap<Scheme, Arc<dyn Actuator>>;

struct RouterState {
    config: RouterConfig,
    /// `None` until first use after construction or reconfiguration.
    built: Option<AdapterMap>,
    registered: AdapterMap,
}

/// Routes scheme-prefixed addresses to protocol adapters.
pub struct ActuatorRouter {
    state: RwLock<RouterState>,
}

impl ActuatorRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            state: RwLock::new(RouterState {
                config,
                built: None,
                registered: AdapterMap::new(),
            }),
        }
    }

    /// Current configuration snapshot.
    pub async fn config(&self) -> RouterConfig {
        self.state.read().await.config.clone()
    }

    /// `true` once the built-in adapters have been constructed.
    pub async fn is_initialized(&self) -> bool {
        self.state.read().await.built.is_some()
    }

    /// Install `adapter` for its [`Actuator::scheme`], taking precedence over
    /// any built-in adapter for the same scheme.
    pub async fn register_adapter(&self, adapter: Arc<dyn Actuator>) {
        let scheme = adapter.scheme();
        let previous = self
            .state
            .write()
            .await
            .registered
            .insert(scheme, adapter);
        if let Some(previous) = previous {
            previous.close().await;
        }
        info!(scheme = %scheme, "custom adapter registered");
    }

    /// Adapter serving `scheme`.
    ///
    /// # Errors
    ///
    /// [`FermentError::NoAdapter`] when the scheme is disabled or has no
    /// adapter at all.
    pub async fn adapter_for(&self, scheme: Scheme) -> Result<Arc<dyn Actuator>, FermentError> {
        {
            let state = self.state.read().await;
            if let Some(adapter) = state.registered.get(&scheme) {
                return Ok(Arc::clone(adapter));
            }
            if let Some(built) = &state.built {
                return built.get(&scheme).cloned().ok_or_else(|| no_adapter(scheme));
            }
        }

        let mut state = self.state.write().await;
        if state.built.is_none() {
            let built = build_adapters(&state.config);
            debug!(schemes = ?built.keys().collect::<Vec<_>>(), "adapters initialised");
            state.built = Some(built);
        }
        state
            .built
            .as_ref()
            .and_then(|built| built.get(&scheme).cloned())
            .ok_or_else(|| no_adapter(scheme))
    }

    /// Parse `address` and resolve the adapter that serves it.
    ///
    /// # Errors
    ///
    /// Propagates parse errors and [`FermentError::NoAdapter`].
    pub async fn route(
        &self,
        address: &str,
    ) -> Result<(Arc<dyn Actuator>, ActuatorAddress), FermentError> {
        let parsed = ActuatorAddress::parse(address)?;
        let adapter = self.adapter_for(parsed.scheme()).await?;
        Ok((adapter, parsed))
    }

    /// # Errors
    ///
    /// See [`ActuatorRouter::route`].
    pub async fn get_power_usage(&self, address: &str) -> Result<Option<f64>, FermentError> {
        let (adapter, parsed) = self.route(address).await?;
        Ok(adapter.get_power_usage(&parsed).await)
    }

    /// Discover devices on one scheme, or on every available adapter when
    /// `scheme` is `None`.
    ///
    /// # Errors
    ///
    /// [`FermentError::NoAdapter`] when a specific `scheme` has no adapter.
    pub async fn discover_devices(
        &self,
        scheme: Option<Scheme>,
    ) -> Result<Vec<DeviceInfo>, FermentError> {
        let adapters = match scheme {
            Some(scheme) => vec![self.adapter_for(scheme).await?],
            None => self.all_adapters().await,
        };
        let mut devices = Vec::new();
        for adapter in adapters {
            devices.extend(adapter.discover_devices().await);
        }
        Ok(devices)
    }

    /// # Errors
    ///
    /// [`FermentError::NoAdapter`] when `scheme` has no adapter.
    pub async fn test_connection(&self, scheme: Scheme) -> Result<bool, FermentError> {
        Ok(self.adapter_for(scheme).await?.test_connection().await)
    }

    /// Swap in `config`.  Returns `true` when the configuration changed and
    /// the built-in adapters were torn down.
    pub async fn reconfigure(&self, config: RouterConfig) -> bool {
        let old = {
            let mut state = self.state.write().await;
            if state.config == config {
                debug!("router configuration unchanged");
                return false;
            }
            state.config = config;
            state.built.take()
        };
        if let Some(old) = old {
            close_all(old.into_values()).await;
        }
        info!("router reconfigured; adapters will be rebuilt on next use");
        true
    }

    /// Release every adapter, built-in and registered.
    pub async fn close(&self) {
        let (built, registered) = {
            let mut state = self.state.write().await;
            (
                state.built.take().unwrap_or_default(),
                std::mem::take(&mut state.registered),
            )
        };
        close_all(built.into_values().chain(registered.into_values())).await;
    }

    async fn all_adapters(&self) -> Vec<Arc<dyn Actuator>> {
        let mut schemes = Vec::new();
        for scheme in [Scheme::Hub, Scheme::Direct, Scheme::Relay] {
            if let Ok(adapter) = self.adapter_for(scheme).await {
                schemes.push(adapter);
            }
        }
        schemes
    }
}

#[async_trait]
impl ActuatorControl for ActuatorRouter {
    async fn get_state(&self, address: &str) -> Result<Option<SwitchState>, FermentError> {
        let (adapter, parsed) = self.route(address).await?;
        Ok(adapter.get_state(&parsed).await)
    }

    async fn set_state(&self, address: &str, state: SwitchState) -> Result<bool, FermentError> {
        let (adapter, parsed) = self.route(address).await?;
        Ok(adapter.set_state(&parsed, state).await)
    }
}

fn build_adapters(config: &RouterConfig) -> AdapterMap {
    let mut adapters = AdapterMap::new();
    if config.hub.enabled {
        match HubAdapter::new(&config.hub) {
            Ok(hub) => {
                adapters.insert(Scheme::Hub, Arc::new(hub) as Arc<dyn Actuator>);
            }
            Err(e) => error!(error = %e, "hub adapter could not be built"),
        }
    }
    if config.direct.enabled {
        match DirectAdapter::new(&config.direct) {
            Ok(direct) => {
                adapters.insert(Scheme::Direct, Arc::new(direct) as Arc<dyn Actuator>);
            }
            Err(e) => error!(error = %e, "direct adapter could not be built"),
        }
    }
    adapters
}

async fn close_all(adapters: impl Iterator<Item = Arc<dyn Actuator>>) {
    for adapter in adapters {
        adapter.close().await;
    }
}

fn no_adapter(scheme: Scheme) -> FermentError {
    FermentError::NoAdapter {
        scheme: scheme.as_str().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRelay {
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Actuator for CountingRelay {
        fn scheme(&self) -> Scheme {
            Scheme::Relay
        }
        async fn get_state(&self, _address: &ActuatorAddress) -> Option<SwitchState> {
            Some(SwitchState::On)
        }
        async fn set_state(&self, _address: &ActuatorAddress, _state: SwitchState) -> bool {
            true
        }
        async fn test_connection(&self) -> bool {
            true
        }
        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn hub_config(url: &str) -> RouterConfig {
        RouterConfig {
            hub: HubConfig {
                enabled: true,
                base_url: url.to_string(),
                ..HubConfig::default()
            },
            direct: DirectConfig::default(),
        }
    }

    #[tokio::test]
    async fn adapters_are_built_lazily() {
        let router = ActuatorRouter::new(RouterConfig::default());
        assert!(!router.is_initialized().await);
        assert!(router.adapter_for(Scheme::Direct).await.is_ok());
        assert!(router.is_initialized().await);
    }

    #[tokio::test]
    async fn disabled_scheme_reports_no_adapter() {
        let router = ActuatorRouter::new(RouterConfig::default());
        let err = router.get_state("switch.heater").await.unwrap_err();
        assert_eq!(
            err,
            FermentError::NoAdapter {
                scheme: "hub".into()
            }
        );
        let err = router
            .set_state("relay://gw/r1", SwitchState::On)
            .await
            .unwrap_err();
        assert!(matches!(err, FermentError::NoAdapter { .. }));
    }

    #[tokio::test]
    async fn unknown_scheme_reports_no_adapter() {
        let router = ActuatorRouter::new(RouterConfig::default());
        let err = router.get_state("zigbee://plug").await.unwrap_err();
        assert!(matches!(err, FermentError::NoAdapter { scheme } if scheme == "zigbee"));
    }

    #[tokio::test]
    async fn legacy_address_routes_to_hub() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/api/states/switch.heater")
            .with_header("content-type", "application/json")
            .with_body(r#"{"entity_id":"switch.heater","state":"off"}"#)
            .expect(1)
            .create_async()
            .await;
        let router = ActuatorRouter::new(hub_config(&server.url()));
        assert_eq!(
            router.get_state("switch.heater").await.unwrap(),
            Some(SwitchState::Off)
        );
        m.assert_async().await;
    }

    #[tokio::test]
    async fn identical_reconfigure_is_a_no_op() {
        let router = ActuatorRouter::new(hub_config("http://hub.local:8123"));
        router.adapter_for(Scheme::Hub).await.unwrap();
        assert!(!router.reconfigure(hub_config("http://hub.local:8123")).await);
        assert!(router.is_initialized().await);
    }

    #[tokio::test]
    async fn changed_reconfigure_rebuilds_lazily() {
        let router = ActuatorRouter::new(hub_config("http://hub.local:8123"));
        router.adapter_for(Scheme::Hub).await.unwrap();

        assert!(router.reconfigure(RouterConfig::default()).await);
        assert!(!router.is_initialized().await);
        assert!(router.adapter_for(Scheme::Hub).await.is_err());
        assert_eq!(router.config().await, RouterConfig::default());
    }

    #[tokio::test]
    async fn registered_adapter_survives_reconfigure_and_is_closed() {
        let closed = Arc::new(AtomicUsize::new(0));
        let router = ActuatorRouter::new(RouterConfig::default());
        router
            .register_adapter(Arc::new(CountingRelay {
                closed: Arc::clone(&closed),
            }))
            .await;

        assert_eq!(
            router.get_state("relay://gw/r1").await.unwrap(),
            Some(SwitchState::On)
        );
        router.reconfigure(hub_config("http://hub.local:8123")).await;
        assert!(router.set_state("relay://gw/r1", SwitchState::Off).await.unwrap());
        assert!(router.test_connection(Scheme::Relay).await.unwrap());

        router.close().await;
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(router.adapter_for(Scheme::Relay).await.is_err());
    }

    #[tokio::test]
    async fn discover_all_skips_missing_adapters() {
        let router = ActuatorRouter::new(RouterConfig::default());
        // Direct adapter with no hosts discovers nothing; hub is disabled.
        assert!(router.discover_devices(None).await.unwrap().is_empty());
        assert!(router.discover_devices(Some(Scheme::Hub)).await.is_err());
    }
}
