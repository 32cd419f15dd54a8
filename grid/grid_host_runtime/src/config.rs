//! Host configuration read from `DELTA_GRID_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::connection::Backoff;
use crate::error::{GridError, Result};
use crate::interpolate::DEFAULT_PASSES;
use crate::protocol::Addressing;
use crate::table::DEFAULT_MAX_ROWS;

pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:6060";
pub const DEFAULT_ROUTE: &str = "update";
const DEFAULT_INBOUND_QUEUE_CAP: usize = 256;
const DEFAULT_OUTBOUND_QUEUE_CAP: usize = 256;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    pub endpoint: String,
    pub route: String,
    pub params: Map<String, Value>,
    pub addressing: Addressing,
    pub interpolation_passes: usize,
    pub backoff: Backoff,
    pub connect_timeout: Duration,
    pub max_rows: usize,
    pub inbound_queue_cap: usize,
    pub outbound_queue_cap: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            route: DEFAULT_ROUTE.to_string(),
            params: Map::new(),
            addressing: Addressing::Addressed,
            interpolation_passes: DEFAULT_PASSES,
            backoff: Backoff::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_rows: DEFAULT_MAX_ROWS,
            inbound_queue_cap: DEFAULT_INBOUND_QUEUE_CAP,
            outbound_queue_cap: DEFAULT_OUTBOUND_QUEUE_CAP,
        }
    }
}

impl HostConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from `lookup`. Numeric settings that are missing,
    /// unparsable or zero keep their defaults; the endpoint must name a port.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let endpoint = lookup("DELTA_GRID_ENDPOINT").unwrap_or(defaults.endpoint);
        validate_endpoint(&endpoint)?;

        let route = lookup("DELTA_GRID_ROUTE")
            .map(|route| route.trim_matches('/').to_string())
            .filter(|route| !route.is_empty())
            .unwrap_or(defaults.route);

        let params = parse_params_json(&lookup("DELTA_GRID_PARAMS").unwrap_or_default());

        let addressing = lookup("DELTA_GRID_ADDRESS")
            .filter(|address| !address.is_empty())
            .map_or(Addressing::Addressed, Addressing::Fixed);

        let base_ms = positive(&lookup, "DELTA_GRID_BACKOFF_BASE_MS")
            .unwrap_or(defaults.backoff.base().as_millis() as u64);
        let cap_ms = positive(&lookup, "DELTA_GRID_BACKOFF_CAP_MS")
            .unwrap_or(defaults.backoff.cap().as_millis() as u64);
        let connect_timeout_ms = positive(&lookup, "DELTA_GRID_CONNECT_TIMEOUT_MS")
            .unwrap_or(defaults.connect_timeout.as_millis() as u64);

        Ok(Self {
            endpoint,
            route,
            params,
            addressing,
            interpolation_passes: positive(&lookup, "DELTA_GRID_INTERPOLATION_PASSES")
                .unwrap_or(defaults.interpolation_passes),
            backoff: Backoff::new(Duration::from_millis(base_ms), Duration::from_millis(cap_ms)),
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            max_rows: positive(&lookup, "DELTA_GRID_MAX_ROWS").unwrap_or(defaults.max_rows),
            inbound_queue_cap: positive(&lookup, "DELTA_GRID_INBOUND_QUEUE_CAP")
                .unwrap_or(defaults.inbound_queue_cap),
            outbound_queue_cap: positive(&lookup, "DELTA_GRID_OUTBOUND_QUEUE_CAP")
                .unwrap_or(defaults.outbound_queue_cap),
        })
    }

    /// The `user` route parameter, echoed in every status frame.
    pub fn user(&self) -> String {
        self.params.get("user").map(param_text).unwrap_or_default()
    }

    /// Path and query sent as the connection handshake, e.g.
    /// `/depth?company=acme&user=alice`.
    pub fn handshake_target(&self) -> String {
        let query: Vec<String> = self
            .params
            .iter()
            .map(|(key, value)| format!("{key}={}", param_text(value)))
            .collect();

        if query.is_empty() {
            format!("/{}", self.route)
        } else {
            format!("/{}?{}", self.route, query.join("&"))
        }
    }
}

pub fn parse_params_json(raw: &str) -> Map<String, Value> {
    if raw.is_empty() {
        return Map::new();
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(_) => Map::new(),
    }
}

fn param_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    lookup(key)
        .and_then(|raw| raw.trim().parse::<T>().ok())
        .filter(|value| *value > T::default())
}

fn validate_endpoint(endpoint: &str) -> Result<()> {
    let port = endpoint
        .rsplit_once(':')
        .map(|(host, port)| (host.is_empty(), port.parse::<u16>()));

    match port {
        Some((false, Ok(_))) => Ok(()),
        _ => Err(GridError::Config {
            key: "DELTA_GRID_ENDPOINT",
            details: format!("expected host:port, got {endpoint:?}"),
        }),
    }
}
