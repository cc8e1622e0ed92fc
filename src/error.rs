//! Unified error types for the arbitrage bot.

use thiserror::Error;

use crate::network::Network;

/// Unified error type for the arbitrage bot.
#[derive(Error, Debug)]
pub enum BotError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Price or quote source error.
    #[error("price source error: {0}")]
    Price(#[from] PriceError),

    /// Network provider error.
    #[error("network provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Execution delegate error.
    #[error("delegate error: {0}")]
    Delegate(#[from] DelegateError),

    /// Bridge service error.
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// Opportunity scan error.
    #[error("arbitrage error: {0}")]
    Arbitrage(#[from] ArbitrageError),

    /// Execution error.
    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// HTTP request error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Price and quote source errors.
#[derive(Error, Debug)]
pub enum PriceError {
    /// Prices for a network could not be fetched.
    #[error("prices unavailable on {network}: {reason}")]
    Unavailable {
        /// Network whose prices are missing.
        network: Network,
        /// Reason for failure.
        reason: String,
    },

    /// Source is throttling us.
    #[error("rate limited: retry after {retry_after_seconds}s")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_seconds: u64,
    },

    /// Quote request failed.
    #[error("quote failed on {network}: {reason}")]
    QuoteFailed {
        /// Network of the quote.
        network: Network,
        /// Reason for failure.
        reason: String,
    },

    /// Swap submission failed or reverted.
    #[error("swap failed on {network}: {reason}")]
    SwapFailed {
        /// Network of the swap.
        network: Network,
        /// Reason for failure.
        reason: String,
    },

    /// Response could not be parsed.
    #[error("failed to parse price response: {0}")]
    ParseError(String),

    /// HTTP request failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Network provider (RPC) errors.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// No RPC endpoint configured for the network.
    #[error("no rpc endpoint configured for {0}")]
    NotConfigured(Network),

    /// JSON-RPC error object returned by the node.
    #[error("rpc error on {network}: code={code} {message}")]
    Rpc {
        /// Network of the node.
        network: Network,
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },

    /// Response could not be parsed.
    #[error("failed to parse rpc response: {0}")]
    ParseError(String),

    /// HTTP request failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Execution delegate (trading agent) errors.
#[derive(Error, Debug)]
pub enum DelegateError {
    /// Agent registration failed.
    #[error("agent registration failed: {0}")]
    RegistrationFailed(String),

    /// Strategy definition was rejected.
    #[error("strategy rejected for agent {agent_id}: {reason}")]
    StrategyRejected {
        /// Agent identifier.
        agent_id: String,
        /// Rejection reason.
        reason: String,
    },

    /// Action execution failed.
    #[error("action failed for agent {agent_id}: {reason}")]
    ActionFailed {
        /// Agent identifier.
        agent_id: String,
        /// Failure reason.
        reason: String,
    },

    /// HTTP request failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Bridge service errors.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Route is not supported by the bridge.
    #[error("unsupported bridge route {source_network} -> {target_network}")]
    UnsupportedRoute {
        /// Source network.
        source_network: Network,
        /// Target network.
        target_network: Network,
    },

    /// Transfer could not be started or was reported failed.
    #[error("bridge transfer failed: {0}")]
    TransferFailed(String),

    /// Cross-chain attestation did not arrive in time.
    #[error("bridge transfer {transfer_id} not confirmed within {waited_seconds}s")]
    AttestationTimeout {
        /// Transfer identifier.
        transfer_id: String,
        /// Seconds waited before giving up.
        waited_seconds: u64,
    },

    /// HTTP request failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Opportunity scan errors.
#[derive(Error, Debug)]
pub enum ArbitrageError {
    /// Fewer than two networks are active, so no pair exists.
    #[error("need at least two active networks, have {configured}")]
    InsufficientNetworks {
        /// Number of active networks.
        configured: usize,
    },

    /// No tokens are tracked.
    #[error("no tracked tokens configured")]
    NoTrackedTokens,

    /// Scan could not complete.
    #[error("scan failed: {0}")]
    ScanFailed(String),
}

/// Execution pipeline errors.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// Another execution holds the guard.
    #[error("an execution is already in flight")]
    Busy,

    /// The token has no address on a network the opportunity needs.
    #[error("token {symbol} has no address on {network}")]
    MissingTokenAddress {
        /// Token symbol.
        symbol: String,
        /// Network without an address.
        network: Network,
    },

    /// Fallback bridge leg failed.
    #[error("fallback bridge failed: {0}")]
    Bridge(#[from] BridgeError),

    /// Optional settlement swap failed after the bridge confirmed.
    #[error("settlement swap failed: {0}")]
    Settlement(#[from] PriceError),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, BotError>;
