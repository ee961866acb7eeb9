use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::trace::{TraceSink, TracingSink};

/// Relay server used when [`Settings`] has no override.
pub const DEFAULT_TURN_URI: &str = "turn:collabra@turn.collabramusic.com";

/// Credential for [`DEFAULT_TURN_URI`].
pub const DEFAULT_TURN_CREDENTIAL: &str = "siicckk";

/// Reflector server used when [`Settings`] has no override.
pub const DEFAULT_STUN_URI: &str = "stun:turn.collabramusic.com";

const SCHEMES: &[&str] = &["stun:", "stuns:", "turn:", "turns:"];

/// Errors in relay/reflector settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The comma separated URI list has an empty entry.
    #[error("Empty server URI in list: {0:?}")]
    EmptyUri(String),

    /// The URI doesn't start with `stun:`, `stuns:`, `turn:` or `turns:`.
    #[error("Unsupported server URI scheme: {0}")]
    UnsupportedScheme(String),
}

/// One ICE server, as in `RTCIceServer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URIs.
    pub urls: Vec<String>,
    /// TURN username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// TURN credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Server without credentials.
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        IceServer {
            urls: urls.into_iter().map(Into::into).collect(),
            username: None,
            credential: None,
        }
    }
}

/// Configuration handed to the [`EndpointFactory`][crate::EndpointFactory].
///
/// Serializes to the `RTCConfiguration` shape.
///
/// ```
/// # use loopcall::{IceConfig, IceServer};
/// let config = IceConfig::from(IceServer::new(["stun:stun.example.org"]));
/// let json = serde_json::to_string(&config).unwrap();
/// assert_eq!(json, r#"{"iceServers":[{"urls":["stun:stun.example.org"]}]}"#);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceConfig {
    /// The servers.
    pub ice_servers: Vec<IceServer>,
}

impl From<IceServer> for IceConfig {
    fn from(server: IceServer) -> Self {
        IceConfig {
            ice_servers: vec![server],
        }
    }
}

/// Overrides for the relay/reflector servers.
///
/// URIs are comma separated lists. Missing or empty values mean the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// TURN server URIs.
    #[serde(rename = "turnURI")]
    pub turn_uri: Option<String>,
    /// TURN username.
    pub turn_username: Option<String>,
    /// TURN credential.
    pub turn_credential: Option<String>,
    /// STUN server URIs.
    #[serde(rename = "stunURI")]
    pub stun_uri: Option<String>,
}

fn override_of(uri: &Option<String>) -> Option<&str> {
    uri.as_deref().filter(|u| !u.is_empty())
}

fn split_uris(list: &str) -> Result<Vec<String>, ConfigError> {
    list.split(',')
        .map(|uri| {
            let uri = uri.trim();
            if uri.is_empty() {
                return Err(ConfigError::EmptyUri(list.to_string()));
            }
            if !SCHEMES.iter().any(|s| uri.starts_with(s)) {
                return Err(ConfigError::UnsupportedScheme(uri.to_string()));
            }
            Ok(uri.to_string())
        })
        .collect()
}

/// The default relay configuration.
pub fn default_relay_config() -> IceConfig {
    IceServer {
        urls: vec![DEFAULT_TURN_URI.to_string()],
        username: None,
        credential: Some(DEFAULT_TURN_CREDENTIAL.to_string()),
    }
    .into()
}

/// The default reflector configuration.
pub fn default_reflector_config() -> IceConfig {
    IceServer::new([DEFAULT_STUN_URI]).into()
}

/// Relay configuration from settings.
///
/// With a `turn_uri` override the username and credential default to empty strings.
pub fn relay_config(settings: &Settings) -> Result<IceConfig, ConfigError> {
    let Some(uris) = override_of(&settings.turn_uri) else {
        return Ok(default_relay_config());
    };

    Ok(IceServer {
        urls: split_uris(uris)?,
        username: Some(settings.turn_username.clone().unwrap_or_default()),
        credential: Some(settings.turn_credential.clone().unwrap_or_default()),
    }
    .into())
}

/// Reflector configuration from settings.
pub fn reflector_config(settings: &Settings) -> Result<IceConfig, ConfigError> {
    let Some(uris) = override_of(&settings.stun_uri) else {
        return Ok(default_reflector_config());
    };

    Ok(IceServer::new(split_uris(uris)?).into())
}

/// Resolve the relay (TURN) configuration.
///
/// Malformed settings are logged and replaced by the defaults. The result is emitted
/// as a `turn-config` event on `sink`.
pub async fn resolve_relay_config(settings: &Settings, sink: &dyn TraceSink) -> IceConfig {
    let config = relay_config(settings).unwrap_or_else(|e| {
        warn!("Using default relay config: {}", e);
        default_relay_config()
    });
    emit_config(sink, "turn-config", &config);

    // Deliver asynchronously, never from within the caller's poll.
    tokio::task::yield_now().await;
    config
}

/// Resolve the reflector (STUN) configuration.
///
/// Malformed settings are logged and replaced by the defaults. The result is emitted
/// as a `stun-config` event on `sink`.
pub async fn resolve_reflector_config(settings: &Settings, sink: &dyn TraceSink) -> IceConfig {
    let config = reflector_config(settings).unwrap_or_else(|e| {
        warn!("Using default reflector config: {}", e);
        default_reflector_config()
    });
    emit_config(sink, "stun-config", &config);

    tokio::task::yield_now().await;
    config
}

fn emit_config(sink: &dyn TraceSink, event: &str, config: &IceConfig) {
    match serde_json::to_value(config) {
        Ok(v) => sink.emit(event, v),
        Err(e) => debug!("Failed to serialize {}: {}", event, e),
    }
}

/// Config for creating a [`Call`][crate::Call].
///
/// ```
/// # use loopcall::{CallConfig, IceConfig, IceServer, RecordingSink};
/// # use std::sync::Arc;
/// let sink = Arc::new(RecordingSink::default());
/// let config = CallConfig::new()
///     .set_ice_config(IceServer::new(["stun:stun.example.org"]).into())
///     .set_trace_sink(sink);
///
/// assert_eq!(config.ice_config().ice_servers.len(), 1);
/// ```
#[derive(Clone)]
pub struct CallConfig {
    ice_config: IceConfig,
    trace_sink: Arc<dyn TraceSink>,
}

impl CallConfig {
    /// Creates a config with no ICE servers that traces to `tracing`.
    pub fn new() -> Self {
        CallConfig::default()
    }

    /// ICE configuration both endpoints are created with.
    pub fn ice_config(&self) -> &IceConfig {
        &self.ice_config
    }

    /// Set the ICE configuration.
    ///
    /// Typically the result of [`resolve_relay_config()`] or
    /// [`resolve_reflector_config()`].
    pub fn set_ice_config(mut self, ice_config: IceConfig) -> Self {
        self.ice_config = ice_config;
        self
    }

    /// Sink for trace events.
    pub fn trace_sink(&self) -> &Arc<dyn TraceSink> {
        &self.trace_sink
    }

    /// Set the sink for trace events.
    ///
    /// Defaults to [`TracingSink`].
    pub fn set_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = sink;
        self
    }

    pub(crate) fn to_trace_payload(&self) -> serde_json::Value {
        json!({ "config": self.ice_config })
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        CallConfig {
            ice_config: IceConfig::default(),
            trace_sink: Arc::new(TracingSink),
        }
    }
}

impl fmt::Debug for CallConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallConfig")
            .field("ice_config", &self.ice_config)
            .finish_non_exhaustive()
    }
}
