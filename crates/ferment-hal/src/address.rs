//! [`ActuatorAddress`] – scheme-prefixed actuator addressing.
//!
//! Batches store their heater/cooler as plain strings such as
//! `hub://switch.ferm_heater` or `direct://192.168.1.40/1`.  The string is
//! parsed exactly once, at the router boundary, into a tagged value so the
//! adapters never have to re-parse it.
//!
//! | Form | Parsed as |
//! |---|---|
//! | `hub://switch.heater` | [`ActuatorAddress::Hub`] |
//! | `switch.heater` (no scheme, legacy) | [`ActuatorAddress::Hub`] |
//! | `direct://10.0.0.5` | [`ActuatorAddress::Direct`], channel 0 |
//! | `direct://10.0.0.5:8080/1` | [`ActuatorAddress::Direct`], port 8080, channel 1 |
//! | `relay://gw1/relay_3` | [`ActuatorAddress::Relay`] |
//!
//! Scheme matching is case-insensitive.  Parsing is pure: the [`Display`]
//! form of a parsed address parses back to the same value.
//!
//! [`Display`]: std::fmt::Display

use std::fmt;

use ferment_types::FermentError;

const SCHEME_SEPARATOR: &str = "://";

/// The protocol family an address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scheme {
    /// Central home-automation hub (REST service API).
    Hub,
    /// A switch's own local HTTP API.
    Direct,
    /// Third-party relay gateway; no built-in adapter.
    Relay,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Hub => "hub",
            Scheme::Direct => "direct",
            Scheme::Relay => "relay",
        }
    }

    /// Case-insensitive lookup of a scheme name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "hub" => Some(Scheme::Hub),
            "direct" => Some(Scheme::Direct),
            "relay" => Some(Scheme::Relay),
            _ => None,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed actuator address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActuatorAddress {
    /// Hub entity id, e.g. `switch.ferm_heater`.
    Hub { entity_id: String },
    /// A directly addressed switch output.
    Direct {
        host: String,
        port: Option<u16>,
        channel: u8,
    },
    /// An output behind a relay gateway.
    Relay { gateway: String, resource: String },
}

impl ActuatorAddress {
    /// Parse `raw` into an address.
    ///
    /// # Errors
    ///
    /// * [`FermentError::NoAdapter`] for an unrecognised `scheme://` prefix.
    /// * [`FermentError::InvalidAddress`] when the resource part is empty or
    ///   malformed for its scheme.
    pub fn parse(raw: &str) -> Result<Self, FermentError> {
        let raw = raw.trim();
        let (scheme, resource) = match raw.split_once(SCHEME_SEPARATOR) {
            Some((name, rest)) => {
                let scheme = Scheme::from_name(name).ok_or_else(|| FermentError::NoAdapter {
                    scheme: name.to_ascii_lowercase(),
                })?;
                (scheme, rest)
            }
            // Legacy addresses predate schemes and always meant the hub.
            None => (Scheme::Hub, raw),
        };

        if resource.is_empty() {
            return Err(invalid(raw, "empty resource"));
        }

        match scheme {
            Scheme::Hub => Ok(ActuatorAddress::Hub {
                entity_id: resource.to_string(),
            }),
            Scheme::Direct => parse_direct(raw, resource),
            Scheme::Relay => match resource.split_once('/') {
                Some((gateway, rest)) if !gateway.is_empty() && !rest.is_empty() => {
                    Ok(ActuatorAddress::Relay {
                        gateway: gateway.to_string(),
                        resource: rest.to_string(),
                    })
                }
                _ => Err(invalid(raw, "expected 'gateway/resource'")),
            },
        }
    }

    pub fn scheme(&self) -> Scheme {
        match self {
            ActuatorAddress::Hub { .. } => Scheme::Hub,
            ActuatorAddress::Direct { .. } => Scheme::Direct,
            ActuatorAddress::Relay { .. } => Scheme::Relay,
        }
    }

    /// `host` or `host:port` for direct addresses.
    pub fn authority(&self) -> Option<String> {
        match self {
            ActuatorAddress::Direct {
                host,
                port: Some(port),
                ..
            } => Some(format!("{host}:{port}")),
            ActuatorAddress::Direct { host, port: None, .. } => Some(host.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for ActuatorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuatorAddress::Hub { entity_id } => write!(f, "hub://{entity_id}"),
            ActuatorAddress::Direct {
                host,
                port,
                channel,
            } => match port {
                Some(port) => write!(f, "direct://{host}:{port}/{channel}"),
                None => write!(f, "direct://{host}/{channel}"),
            },
            ActuatorAddress::Relay { gateway, resource } => {
                write!(f, "relay://{gateway}/{resource}")
            }
        }
    }
}

fn parse_direct(raw: &str, resource: &str) -> Result<ActuatorAddress, FermentError> {
    let (authority, channel) = match resource.split_once('/') {
        Some((authority, "")) => (authority, 0),
        Some((authority, channel)) => {
            let channel = channel
                .parse::<u8>()
                .map_err(|_| invalid(raw, "channel must be a small non-negative integer"))?;
            (authority, channel)
        }
        None => (resource, 0),
    };

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| invalid(raw, "port must be a number between 0 and 65535"))?;
            (host, Some(port))
        }
        None => (authority, None),
    };

    if host.is_empty() {
        return Err(invalid(raw, "missing host"));
    }

    Ok(ActuatorAddress::Direct {
        host: host.to_string(),
        port,
        channel,
    })
}

fn invalid(address: &str, reason: &str) -> FermentError {
    FermentError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    }
}
