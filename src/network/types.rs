//! Network and tracked-token types.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// EVM network the bot scans.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Network {
    /// Ethereum mainnet.
    #[strum(to_string = "ethereum", serialize = "eth", serialize = "mainnet")]
    Ethereum,
    /// Arbitrum One.
    #[strum(to_string = "arbitrum", serialize = "arb")]
    Arbitrum,
    /// OP Mainnet.
    #[strum(to_string = "optimism", serialize = "op")]
    Optimism,
    /// Base.
    Base,
    /// Polygon PoS.
    #[strum(to_string = "polygon", serialize = "matic")]
    Polygon,
    /// Avalanche C-Chain.
    #[strum(to_string = "avalanche", serialize = "avax")]
    Avalanche,
    /// BNB Smart Chain.
    #[strum(to_string = "bsc", serialize = "bnb")]
    Bsc,
}

impl Network {
    /// EVM chain id.
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Ethereum => 1,
            Network::Arbitrum => 42161,
            Network::Optimism => 10,
            Network::Base => 8453,
            Network::Polygon => 137,
            Network::Avalanche => 43114,
            Network::Bsc => 56,
        }
    }

    /// Public RPC endpoint used when none is configured.
    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            Network::Ethereum => "https://eth.llamarpc.com",
            Network::Arbitrum => "https://arb1.arbitrum.io/rpc",
            Network::Optimism => "https://mainnet.optimism.io",
            Network::Base => "https://mainnet.base.org",
            Network::Polygon => "https://polygon-rpc.com",
            Network::Avalanche => "https://api.avax.network/ext/bc/C/rpc",
            Network::Bsc => "https://bsc-dataseed.binance.org",
        }
    }

    /// Symbol of the asset gas is paid in.
    pub fn native_symbol(&self) -> &'static str {
        match self {
            Network::Ethereum | Network::Arbitrum | Network::Optimism | Network::Base => "ETH",
            Network::Polygon => "POL",
            Network::Avalanche => "AVAX",
            Network::Bsc => "BNB",
        }
    }

    /// Reference USD price of the native asset, used for gas estimates.
    pub fn reference_native_price_usd(&self) -> Decimal {
        match self {
            Network::Ethereum | Network::Arbitrum | Network::Optimism | Network::Base => {
                Decimal::new(3000, 0)
            }
            Network::Polygon => Decimal::new(50, 2), // 0.50
            Network::Avalanche => Decimal::new(30, 0),
            Network::Bsc => Decimal::new(600, 0),
        }
    }
}

/// A token scanned across networks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedToken {
    /// Ticker symbol (e.g. "USDC").
    pub symbol: String,
    /// Contract address per network. Missing entries mean "not tracked there".
    pub addresses: HashMap<Network, String>,
    /// Decimal precision of the smallest unit.
    pub decimals: u8,
}

impl TrackedToken {
    /// Create a token with no addresses.
    pub fn new(symbol: impl Into<String>, decimals: u8) -> Self {
        Self {
            symbol: symbol.into(),
            addresses: HashMap::new(),
            decimals,
        }
    }

    /// Add an address for a network.
    pub fn with_address(mut self, network: Network, address: impl Into<String>) -> Self {
        self.addresses.insert(network, address.into());
        self
    }

    /// Address on a network, if tracked there.
    pub fn address_on(&self, network: Network) -> Option<&str> {
        self.addresses.get(&network).map(String::as_str)
    }

    /// Check every address is a well-formed 20-byte hex address.
    pub fn validate(&self) -> Result<(), String> {
        if self.symbol.is_empty() {
            return Err("token symbol is required".to_string());
        }
        if self.decimals > 24 {
            return Err(format!("{}: decimals {} out of range", self.symbol, self.decimals));
        }
        for (network, address) in &self.addresses {
            if !is_valid_address(address) {
                return Err(format!(
                    "{}: invalid address on {}: {}",
                    self.symbol, network, address
                ));
            }
        }
        Ok(())
    }
}

/// Check an EVM address is `0x` followed by 40 hex characters.
pub fn is_valid_address(address: &str) -> bool {
    match address.strip_prefix("0x") {
        Some(body) => body.len() == 40 && hex::decode(body).is_ok(),
        None => false,
    }
}

/// Built-in token universe used when no token file is configured.
pub fn default_tracked_tokens() -> Vec<TrackedToken> {
    vec![
        TrackedToken::new("USDC", 6)
            .with_address(Network::Ethereum, "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48")
            .with_address(Network::Arbitrum, "0xaf88d065e77c8cC2239327C5EDb3A432268e5831")
            .with_address(Network::Optimism, "0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85")
            .with_address(Network::Base, "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913")
            .with_address(Network::Polygon, "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359")
            .with_address(Network::Avalanche, "0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E"),
        TrackedToken::new("USDT", 6)
            .with_address(Network::Ethereum, "0xdAC17F958D2ee523a2206206994597C13D831ec7")
            .with_address(Network::Arbitrum, "0xFd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9")
            .with_address(Network::Optimism, "0x94b008aA00579c1307B0EF2c499aD98a8ce58e58")
            .with_address(Network::Polygon, "0xc2132D05D31c914a87C6611C10748AEb04B58e8F")
            .with_address(Network::Avalanche, "0x9702230A8Ea53601f5cD2dc00fDBc13d4dF4A8c7"),
        TrackedToken::new("WETH", 18)
            .with_address(Network::Ethereum, "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2")
            .with_address(Network::Arbitrum, "0x82aF49447D8a07e3bd95BD0d56f35241523fBab1")
            .with_address(Network::Optimism, "0x4200000000000000000000000000000000000006")
            .with_address(Network::Base, "0x4200000000000000000000000000000000000006")
            .with_address(Network::Polygon, "0x7ceB23fD6bC0adD59E62ac25578270cFf1b9f619"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn network_parses_aliases_case_insensitively() {
        assert_eq!(Network::from_str("ethereum").unwrap(), Network::Ethereum);
        assert_eq!(Network::from_str("ETH").unwrap(), Network::Ethereum);
        assert_eq!(Network::from_str("Arbitrum").unwrap(), Network::Arbitrum);
        assert_eq!(Network::from_str("matic").unwrap(), Network::Polygon);
        assert!(Network::from_str("solana").is_err());
    }

    #[test]
    fn network_displays_lowercase() {
        assert_eq!(Network::Optimism.to_string(), "optimism");
        assert_eq!(Network::Bsc.to_string(), "bsc");
    }

    #[test]
    fn default_tokens_are_valid() {
        for token in default_tracked_tokens() {
            assert!(token.validate().is_ok(), "{} invalid", token.symbol);
        }
    }

    #[test]
    fn address_validation() {
        assert!(is_valid_address("0x4200000000000000000000000000000000000006"));
        assert!(!is_valid_address("4200000000000000000000000000000000000006"));
        assert!(!is_valid_address("0x42"));
        assert!(!is_valid_address("0xZZ00000000000000000000000000000000000006"));
    }

    #[test]
    fn tokens_deserialize_from_json() {
        let json = r#"[{"symbol":"USDC","decimals":6,"addresses":{"base":"0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"}}]"#;
        let tokens: Vec<TrackedToken> = serde_json::from_str(json).unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(
            tokens[0].address_on(Network::Base),
            Some("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913")
        );
        assert_eq!(tokens[0].address_on(Network::Ethereum), None);
    }
}
