//! Client configuration file parser.
//!
//! `key = value` lines, `#` comments.  Per-kind and per-topic tables use a
//! dotted key: `color.Polygon = #00c853`, `topic_color.lane_boundary = #ffffff`,
//! `history_limit.LineString = 20`, `life_time.Point = 2.5`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use log::warn;
use url::Url;

use crate::error::{ClientError, Result};
use crate::geometry::GeometryKind;
use crate::history::{RetentionConfig, RetentionPolicy};
use crate::style::{Color, StyleConfig};
use crate::transport::session::Backoff;

// Defaults
const WS_URL:                 &str = "ws://127.0.0.1:6789/ws";
const CONNECT_TIMEOUT:        u64  = 5;
const RECONNECT_BASE_MS:      u64  = 1000;
const RECONNECT_MAX_ATTEMPTS: u32  = 10;
const RECONNECT_MAX_EXPONENT: u32  = 5;
const SUBSCRIBE_DELAY_MS:     u64  = 300;

/// Full client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // ── Stream source ─────────────────────────────────────────────────────────
    /// WebSocket URL (`ws://` or `wss://`).  A `topics` query parameter
    /// overrides every other source of the initial topic set.
    pub ws_url: String,
    /// HTTP endpoint serving `{"topics": [...]}`.
    pub catalog_url: Option<String>,
    /// Explicit initial topics.
    pub topics: Option<Vec<String>>,
    // ── Session ───────────────────────────────────────────────────────────────
    pub connect_timeout: Duration,
    pub backoff:         Backoff,
    pub subscribe_delay: Duration,
    // ── Persistence ───────────────────────────────────────────────────────────
    /// Directory for `selected_topics.json`; in-memory only when unset.
    pub state_dir: Option<PathBuf>,
    // ── Presentation ──────────────────────────────────────────────────────────
    pub retention: RetentionConfig,
    pub styles:    StyleConfig,
    // ── Process ───────────────────────────────────────────────────────────────
    pub log_syslog: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url:          WS_URL.to_string(),
            catalog_url:     None,
            topics:          None,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT),
            backoff:         Backoff {
                base:         Duration::from_millis(RECONNECT_BASE_MS),
                max_exponent: RECONNECT_MAX_EXPONENT,
                max_attempts: RECONNECT_MAX_ATTEMPTS,
            },
            subscribe_delay: Duration::from_millis(SUBSCRIBE_DELAY_MS),
            state_dir:       None,
            retention:       RetentionConfig::default(),
            styles:          StyleConfig::default(),
            log_syslog:      false,
        }
    }
}

/// Parse `path` as a `cviz_client.conf` key=value configuration file.
pub fn load_config(path: &Path) -> Result<ClientConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| ClientError::Config(format!("cannot read {}: {e}", path.display())))?;
    Ok(parse_config(&content))
}

/// Parse configuration text.  Unknown keys are ignored; unparsable values
/// keep their defaults.
pub fn parse_config(content: &str) -> ClientConfig {
    let mut cfg = ClientConfig::default();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, '=');
        let key = match parts.next() {
            Some(k) => k.trim(),
            None => continue,
        };
        let val = match parts.next() {
            Some(v) => v.trim().to_string(),
            None => continue,
        };
        if val.is_empty() {
            continue;
        }

        // table keys keep the case of their suffix (topic names are opaque)
        if let Some((table, name)) = key.split_once('.') {
            apply_table(&mut cfg, &table.to_ascii_lowercase(), name.trim(), &val);
            continue;
        }

        let b = &mut cfg.backoff;
        match key.to_ascii_lowercase().as_str() {
            "ws_url"                 => cfg.ws_url          = val,
            "catalog_url"            => cfg.catalog_url     = Some(val),
            "topics"                 => cfg.topics          = Some(split_list(&val)),
            "state_dir"              => cfg.state_dir       = Some(PathBuf::from(&val)),
            "connect_timeout"        => cfg.connect_timeout = Duration::from_secs(val.parse().unwrap_or(CONNECT_TIMEOUT)),
            "reconnect_base_ms"      => b.base              = Duration::from_millis(val.parse().unwrap_or(RECONNECT_BASE_MS)),
            "reconnect_max_attempts" => b.max_attempts      = val.parse().unwrap_or(RECONNECT_MAX_ATTEMPTS),
            "reconnect_max_exponent" => b.max_exponent      = val.parse().unwrap_or(RECONNECT_MAX_EXPONENT),
            "subscribe_delay_ms"     => cfg.subscribe_delay = Duration::from_millis(val.parse().unwrap_or(SUBSCRIBE_DELAY_MS)),
            "log_syslog"             => cfg.log_syslog      = val == "true" || val == "1" || val == "yes",
            "fallback_color" => {
                if let Some(c) = Color::parse_hex(&val) {
                    cfg.styles.fallback = c;
                }
            }
            _ => {} // ignore unknown keys
        }
    }

    cfg
}

fn apply_table(cfg: &mut ClientConfig, table: &str, name: &str, val: &str) {
    if table == "topic_color" {
        match Color::parse_hex(val) {
            Some(c) => { cfg.styles.topic_colors.insert(name.to_string(), c); }
            None    => warn!("config: bad color {val:?} for topic {name}"),
        }
        return;
    }

    let kind = match GeometryKind::from_str(name) {
        Ok(k)  => k,
        Err(e) => { warn!("config: {table}.{name}: {e}"); return; }
    };
    match table {
        "color" => match Color::parse_hex(val) {
            Some(c) => { cfg.styles.kind_colors.insert(kind, c); }
            None    => warn!("config: bad color {val:?} for {kind}"),
        },
        "history_limit" => {
            if let Ok(n) = val.parse::<usize>() {
                retention_entry(&mut cfg.retention.defaults, kind).history_limit = n.max(1);
            }
        }
        "life_time" => {
            if let Some(d) = val.parse::<f64>().ok().and_then(|s| Duration::try_from_secs_f64(s).ok()) {
                retention_entry(&mut cfg.retention.defaults, kind).life_time = d;
            }
        }
        _ => {}
    }
}

fn retention_entry(defaults: &mut HashMap<GeometryKind, RetentionPolicy>, kind: GeometryKind) -> &mut RetentionPolicy {
    defaults.entry(kind).or_default()
}

fn split_list(val: &str) -> Vec<String> {
    val.split(',').map(str::trim).filter(|t| !t.is_empty()).map(String::from).collect()
}

/// Validate that required fields are usable.
pub fn validate_config(cfg: &ClientConfig) -> Result<()> {
    let url = Url::parse(&cfg.ws_url)
        .map_err(|e| ClientError::Config(format!("ws_url {:?}: {e}", cfg.ws_url)))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ClientError::Config(format!("ws_url must be ws:// or wss://, got {}", url.scheme())));
    }
    if let Some(c) = &cfg.catalog_url {
        let url = Url::parse(c).map_err(|e| ClientError::Config(format!("catalog_url {c:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::Config("catalog_url must be http:// or https://".into()));
        }
    }
    if cfg.backoff.max_attempts == 0 {
        return Err(ClientError::Config("reconnect_max_attempts must be at least 1".into()));
    }
    if cfg.connect_timeout.is_zero() {
        return Err(ClientError::Config("connect_timeout must be non-zero".into()));
    }
    Ok(())
}
