// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the blog API service.
//!
//! Every field has a serde default so a partial config file (or none at all)
//! yields a working service. [`Config::from_env`] layers environment
//! variables on top of the defaults.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the blog API service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Throttling configuration
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Pagination configuration
    #[serde(default)]
    pub pagination: PaginationConfig,

    /// Uploaded media configuration
    #[serde(default)]
    pub media: MediaConfig,

    /// Authentication policy
    #[serde(default)]
    pub auth: AuthConfig,

    /// Resource store call budget in milliseconds (default: 5000)
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Browser origins allowed by CORS; empty disables the CORS layer
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Per-identity request throttling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Requests per window for anonymous callers (default: 50)
    #[serde(default = "default_rate")]
    pub anon_rate: u32,

    /// Requests per window for authenticated callers (default: 50)
    #[serde(default = "default_rate")]
    pub user_rate: u32,

    /// Window width in seconds (default: 60)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// How often closed windows are evicted, in seconds (default: 60)
    #[serde(default = "default_window_secs")]
    pub cleanup_interval_secs: u64,
}

/// Page-number pagination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// Items per page when the request does not ask for a size (default: 10)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Upper bound for a client-requested `page_size` (default: 100)
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

/// Where uploaded images live and how they are addressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Directory holding uploaded files (default: ./media)
    #[serde(default = "default_media_root")]
    pub root: PathBuf,

    /// URL prefix the media root is served under (default: /media/)
    #[serde(default = "default_media_url")]
    pub url_prefix: String,

    /// Largest accepted request body in bytes (default: 10 MiB)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Authentication policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Reject create/update/delete from anonymous callers (default: false)
    #[serde(default)]
    pub require_auth_for_writes: bool,

    /// Reverse proxies whose `X-Forwarded-For` header is believed (default: none)
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

// Default value functions
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_rate() -> u32 {
    50
}

fn default_window_secs() -> u64 {
    60
}

fn default_page_size() -> usize {
    10
}

fn default_max_page_size() -> usize {
    100
}

fn default_media_root() -> PathBuf {
    PathBuf::from("media")
}

fn default_media_url() -> String {
    "/media/".to_string()
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_store_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            throttle: ThrottleConfig::default(),
            pagination: PaginationConfig::default(),
            media: MediaConfig::default(),
            auth: AuthConfig::default(),
            store_timeout_ms: default_store_timeout_ms(),
            metrics: MetricsConfig::default(),
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            anon_rate: default_rate(),
            user_rate: default_rate(),
            window_secs: default_window_secs(),
            cleanup_interval_secs: default_window_secs(),
        }
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root: default_media_root(),
            url_prefix: default_media_url(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl ThrottleConfig {
    /// Get the rate window duration
    pub fn window_duration(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Get the interval between cleanup sweeps
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            throttle: ThrottleConfig {
                anon_rate: parse_var(&lookup, "THROTTLE_ANON_RATE")
                    .unwrap_or(defaults.throttle.anon_rate),
                user_rate: parse_var(&lookup, "THROTTLE_USER_RATE")
                    .unwrap_or(defaults.throttle.user_rate),
                window_secs: parse_var(&lookup, "THROTTLE_WINDOW_SECS")
                    .unwrap_or(defaults.throttle.window_secs),
                cleanup_interval_secs: parse_var(&lookup, "THROTTLE_CLEANUP_SECS")
                    .unwrap_or(defaults.throttle.cleanup_interval_secs),
            },
            pagination: PaginationConfig {
                page_size: parse_var(&lookup, "PAGE_SIZE")
                    .filter(|size: &usize| *size > 0)
                    .unwrap_or(defaults.pagination.page_size),
                max_page_size: parse_var(&lookup, "MAX_PAGE_SIZE")
                    .filter(|size: &usize| *size > 0)
                    .unwrap_or(defaults.pagination.max_page_size),
            },
            media: MediaConfig {
                root: lookup("MEDIA_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.media.root),
                // Uploads need a path of their own to be served from
                url_prefix: lookup("MEDIA_URL")
                    .filter(|prefix| !prefix.trim().trim_matches('/').is_empty())
                    .unwrap_or(defaults.media.url_prefix),
                max_upload_bytes: parse_var(&lookup, "MAX_UPLOAD_BYTES")
                    .unwrap_or(defaults.media.max_upload_bytes),
            },
            auth: AuthConfig {
                require_auth_for_writes: parse_var(&lookup, "REQUIRE_AUTH_FOR_WRITES")
                    .unwrap_or(defaults.auth.require_auth_for_writes),
                trusted_proxies: lookup("TRUSTED_PROXIES")
                    .map(|raw| {
                        raw.split(',')
                            .filter_map(|ip| ip.trim().parse().ok())
                            .collect()
                    })
                    .unwrap_or(defaults.auth.trusted_proxies),
            },
            store_timeout_ms: parse_var(&lookup, "STORE_TIMEOUT_MS")
                .unwrap_or(defaults.store_timeout_ms),
            metrics: MetricsConfig {
                enabled: parse_var(&lookup, "METRICS_ENABLED")
                    .unwrap_or(defaults.metrics.enabled),
                path: lookup("METRICS_PATH").unwrap_or(defaults.metrics.path),
            },
            allowed_origins: lookup("ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or(defaults.allowed_origins),
        }
    }

    /// Get the resource store call budget
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}
