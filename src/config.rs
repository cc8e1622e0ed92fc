//! Application configuration loaded from environment variables.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::BotError;
use crate::network::{default_tracked_tokens, Network, TrackedToken};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Operation Modes ===
    /// Simulation mode (delegate, bridge and swaps are simulated).
    #[serde(default = "default_true")]
    pub dry_run: bool,

    // === Networks & Tokens ===
    /// Comma-separated list of networks to scan.
    #[serde(default = "default_networks")]
    pub networks: String,

    /// Optional RPC overrides, `network=url` pairs separated by commas.
    #[serde(default)]
    pub rpc_urls: Option<String>,

    /// Optional JSON file with the tracked token list.
    #[serde(default)]
    pub tokens_file: Option<String>,

    // === Price Source ===
    /// Aggregator gateway base URL.
    #[serde(default = "default_price_api_url")]
    pub price_api_url: String,

    /// Optional bearer key for the aggregator gateway.
    #[serde(default)]
    pub price_api_key: Option<String>,

    /// Minimum spacing between per-network price batch calls.
    #[serde(default = "default_price_request_delay_ms")]
    pub price_request_delay_ms: u64,

    // === Scheduling ===
    /// Seconds between opportunity scans.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_seconds: u64,

    /// Seconds between price monitor refreshes.
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_seconds: u64,

    // === Trading Parameters ===
    /// Maximum trade size in whole token units.
    #[serde(default = "default_max_trade_size")]
    pub max_trade_size: Decimal,

    /// Minimum net profit percent handed to the delegate strategy.
    #[serde(default = "default_min_profit_percent")]
    pub min_profit_percent: Decimal,

    /// Price move (percent) that triggers a change notification.
    #[serde(default = "default_price_change_threshold")]
    pub price_change_threshold_percent: Decimal,

    /// Bridge cost used when a route is missing from the cost table.
    #[serde(default = "default_bridge_fallback_cost")]
    pub bridge_fallback_cost_usd: Decimal,

    /// Slippage tolerance for swaps, in percent.
    #[serde(default = "default_slippage")]
    pub slippage_percent: Decimal,

    // === Execution Delegate ===
    /// Agent service base URL. No delegate is used when unset.
    #[serde(default)]
    pub delegate_api_url: Option<String>,

    /// Agent service API key.
    #[serde(default)]
    pub delegate_api_key: Option<String>,

    /// Name to register the agent under.
    #[serde(default = "default_delegate_name")]
    pub delegate_name: String,

    // === Bridge ===
    /// Bridge relay base URL.
    #[serde(default = "default_bridge_api_url")]
    pub bridge_api_url: String,

    /// How long to wait for a bridge attestation.
    #[serde(default = "default_bridge_timeout")]
    pub bridge_confirmation_timeout_seconds: u64,

    /// Bridge status poll interval.
    #[serde(default = "default_bridge_poll")]
    pub bridge_poll_interval_seconds: u64,

    /// Swap the bridged token into the settlement asset on arrival.
    #[serde(default)]
    pub settle_on_arrival: bool,

    /// Symbol of the settlement asset.
    #[serde(default = "default_settlement_symbol")]
    pub settlement_symbol: String,

    // === HTTP ===
    /// Outbound HTTP timeout.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    // === Server Configuration ===
    /// HTTP server port for the command surface.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Expose Prometheus metrics.
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Prometheus exporter port.
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,

    /// Enable verbose logging.
    #[serde(default)]
    pub verbose: bool,
}

fn default_true() -> bool {
    true
}

fn default_networks() -> String {
    "ethereum,arbitrum,optimism,base,polygon".to_string()
}

fn default_price_api_url() -> String {
    "http://127.0.0.1:8787".to_string()
}

fn default_price_request_delay_ms() -> u64 {
    1000
}

fn default_scan_interval() -> u64 {
    30
}

fn default_monitor_interval() -> u64 {
    60
}

fn default_max_trade_size() -> Decimal {
    Decimal::new(1000, 0)
}

fn default_min_profit_percent() -> Decimal {
    Decimal::new(5, 1) // 0.5%
}

fn default_price_change_threshold() -> Decimal {
    Decimal::ONE // 1%
}

fn default_bridge_fallback_cost() -> Decimal {
    Decimal::new(10, 0)
}

fn default_slippage() -> Decimal {
    Decimal::ONE
}

fn default_delegate_name() -> String {
    "crosschain-arb".to_string()
}

fn default_bridge_api_url() -> String {
    "http://127.0.0.1:8788".to_string()
}

fn default_bridge_timeout() -> u64 {
    900
}

fn default_bridge_poll() -> u64 {
    15
}

fn default_settlement_symbol() -> String {
    "USDC".to_string()
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

fn default_port() -> u16 {
    8080
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dry_run: default_true(),
            networks: default_networks(),
            rpc_urls: None,
            tokens_file: None,
            price_api_url: default_price_api_url(),
            price_api_key: None,
            price_request_delay_ms: default_price_request_delay_ms(),
            scan_interval_seconds: default_scan_interval(),
            monitor_interval_seconds: default_monitor_interval(),
            max_trade_size: default_max_trade_size(),
            min_profit_percent: default_min_profit_percent(),
            price_change_threshold_percent: default_price_change_threshold(),
            bridge_fallback_cost_usd: default_bridge_fallback_cost(),
            slippage_percent: default_slippage(),
            delegate_api_url: None,
            delegate_api_key: None,
            delegate_name: default_delegate_name(),
            bridge_api_url: default_bridge_api_url(),
            bridge_confirmation_timeout_seconds: default_bridge_timeout(),
            bridge_poll_interval_seconds: default_bridge_poll(),
            settle_on_arrival: false,
            settlement_symbol: default_settlement_symbol(),
            http_timeout_ms: default_http_timeout_ms(),
            port: default_port(),
            metrics_enabled: default_true(),
            metrics_port: default_metrics_port(),
            rust_log: default_log_level(),
            verbose: false,
        }
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Load configuration and validate it.
    pub fn load_validated() -> crate::Result<Self> {
        Self::load()?.validated()
    }

    /// Consume the configuration if it passes [`Config::validate`].
    pub fn validated(self) -> crate::Result<Self> {
        self.validate().map_err(BotError::InvalidConfig)?;
        Ok(self)
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        let networks = self.active_networks()?;
        if networks.len() < 2 {
            return Err("NETWORKS must list at least two networks".to_string());
        }

        self.rpc_endpoints()?;

        if self.max_trade_size <= Decimal::ZERO {
            return Err("MAX_TRADE_SIZE must be positive".to_string());
        }

        if self.min_profit_percent < Decimal::ZERO {
            return Err("MIN_PROFIT_PERCENT must not be negative".to_string());
        }

        if self.price_change_threshold_percent <= Decimal::ZERO {
            return Err("PRICE_CHANGE_THRESHOLD_PERCENT must be positive".to_string());
        }

        if self.slippage_percent <= Decimal::ZERO || self.slippage_percent >= Decimal::ONE_HUNDRED {
            return Err("SLIPPAGE_PERCENT must be between 0 and 100".to_string());
        }

        if self.scan_interval_seconds == 0 || self.monitor_interval_seconds == 0 {
            return Err("scan and monitor intervals must be at least 1 second".to_string());
        }

        if self.bridge_poll_interval_seconds == 0 {
            return Err("BRIDGE_POLL_INTERVAL_SECONDS must be at least 1".to_string());
        }

        for (name, value) in [
            ("PRICE_API_URL", Some(&self.price_api_url)),
            ("BRIDGE_API_URL", Some(&self.bridge_api_url)),
            ("DELEGATE_API_URL", self.delegate_api_url.as_ref()),
        ] {
            if let Some(value) = value {
                url::Url::parse(value).map_err(|e| format!("{} is not a valid URL: {}", name, e))?;
            }
        }

        Ok(())
    }

    /// Parse the configured network list.
    pub fn active_networks(&self) -> Result<Vec<Network>, String> {
        let mut networks = Vec::new();
        for name in self.networks.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let network =
                Network::from_str(name).map_err(|_| format!("unknown network in NETWORKS: {}", name))?;
            if !networks.contains(&network) {
                networks.push(network);
            }
        }
        Ok(networks)
    }

    /// RPC endpoint per active network, overrides first, public defaults otherwise.
    pub fn rpc_endpoints(&self) -> Result<HashMap<Network, String>, String> {
        let mut endpoints: HashMap<Network, String> = self
            .active_networks()?
            .into_iter()
            .map(|n| (n, n.default_rpc_url().to_string()))
            .collect();

        if let Some(overrides) = &self.rpc_urls {
            for pair in overrides.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let (name, url) = pair
                    .split_once('=')
                    .ok_or_else(|| format!("RPC_URLS entry must be network=url: {}", pair))?;
                let network = Network::from_str(name.trim())
                    .map_err(|_| format!("unknown network in RPC_URLS: {}", name))?;
                url::Url::parse(url.trim())
                    .map_err(|e| format!("invalid RPC url for {}: {}", network, e))?;
                endpoints.insert(network, url.trim().to_string());
            }
        }

        Ok(endpoints)
    }

    /// Load the tracked token list from `TOKENS_FILE` or the built-in registry.
    pub fn tracked_tokens(&self) -> Result<Vec<TrackedToken>, String> {
        let tokens = match &self.tokens_file {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| format!("failed to read TOKENS_FILE {}: {}", path, e))?;
                serde_json::from_str::<Vec<TrackedToken>>(&raw)
                    .map_err(|e| format!("failed to parse TOKENS_FILE {}: {}", path, e))?
            }
            None => default_tracked_tokens(),
        };

        if tokens.is_empty() {
            return Err("tracked token list is empty".to_string());
        }
        for token in &tokens {
            token.validate()?;
        }
        Ok(tokens)
    }

    /// Scan interval as a Duration.
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_seconds)
    }

    /// Monitor interval as a Duration.
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_seconds)
    }

    /// Price request spacing as a Duration.
    pub fn price_request_delay(&self) -> Duration {
        Duration::from_millis(self.price_request_delay_ms)
    }

    /// Outbound HTTP timeout as a Duration.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}
