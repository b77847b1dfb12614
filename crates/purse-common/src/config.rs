//! Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::mint_url::MintUrl;

/// Maximum unresolved pending mints per user in the lookback window
pub const MAX_PENDING_PER_USER: usize = 5;
/// Smallest accepted operation amount
pub const MIN_AMOUNT: u64 = 1;
/// Largest accepted operation amount
pub const MAX_AMOUNT: u64 = 1_000_000;
/// Amount above which a warning is attached to admission
pub const LARGE_AMOUNT_WARN: u64 = 100_000;
/// Seconds between poller ticks
pub const POLL_INTERVAL_SECS: u64 = 10;
/// Total seconds a poller may run
pub const POLL_BUDGET_SECS: u64 = 180;
/// Consecutive tick failures before a poller aborts
pub const POLL_MAX_CONSECUTIVE_ERRORS: u32 = 3;
/// Seconds of history considered when counting pending mints
pub const PENDING_LOOKBACK_SECS: u64 = 24 * 60 * 60;
/// Age in seconds after which a pending mint counts as stuck
pub const STUCK_THRESHOLD_SECS: u64 = 60 * 60;

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default mint url
    pub mint_url: MintUrl,
    /// Maximum unresolved pending mints per user
    pub max_pending_per_user: usize,
    /// Smallest accepted amount
    pub min_amount: Amount,
    /// Largest accepted amount
    pub max_amount: Amount,
    /// Warn threshold for large amounts
    pub large_amount_warn: Amount,
    /// Seconds between poller ticks
    pub poll_interval_secs: u64,
    /// Total seconds a poller may run
    pub poll_budget_secs: u64,
    /// Consecutive tick failures before a poller aborts
    pub poll_max_consecutive_errors: u32,
    /// Seconds of history considered when counting pending mints
    pub pending_lookback_secs: u64,
    /// Age in seconds after which a pending mint counts as stuck
    pub stuck_threshold_secs: u64,
    /// Mint HTTP settings
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mint_url: MintUrl::default(),
            max_pending_per_user: MAX_PENDING_PER_USER,
            min_amount: Amount::from(MIN_AMOUNT),
            max_amount: Amount::from(MAX_AMOUNT),
            large_amount_warn: Amount::from(LARGE_AMOUNT_WARN),
            poll_interval_secs: POLL_INTERVAL_SECS,
            poll_budget_secs: POLL_BUDGET_SECS,
            poll_max_consecutive_errors: POLL_MAX_CONSECUTIVE_ERRORS,
            pending_lookback_secs: PENDING_LOOKBACK_SECS,
            stuck_threshold_secs: STUCK_THRESHOLD_SECS,
            http: HttpConfig::default(),
        }
    }
}

impl Config {
    /// Config for a mint url with all defaults
    pub fn for_mint(mint_url: MintUrl) -> Self {
        Self {
            mint_url,
            ..Default::default()
        }
    }

    /// Poller tick interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Total poller budget
    pub fn poll_budget(&self) -> Duration {
        Duration::from_secs(self.poll_budget_secs)
    }
}

/// Mint HTTP settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Pin connections to IPv4
    pub ipv4_only: bool,
    /// TCP keep-alive interval in seconds
    pub tcp_keepalive_secs: u64,
    /// Socket timeout in seconds
    pub socket_timeout_secs: u64,
    /// Maximum pooled sockets per mint host
    pub max_sockets: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            ipv4_only: true,
            tcp_keepalive_secs: 60,
            socket_timeout_secs: 30,
            max_sockets: 10,
        }
    }
}

impl HttpConfig {
    /// Socket timeout
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }

    /// TCP keep-alive interval
    pub fn tcp_keepalive(&self) -> Duration {
        Duration::from_secs(self.tcp_keepalive_secs)
    }
}
