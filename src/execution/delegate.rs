//! Execution delegate: an external trading agent that runs arbitrage actions.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::DelegateError;
use crate::network::{Network, TrackedToken};

/// Action payload sent to the agent, keyed by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DelegateAction {
    /// Buy on the source network, move to the target network, sell there.
    CrossChainArbitrage {
        /// Network the token is cheaper on.
        source_network: Network,
        /// Network the token is pricier on.
        target_network: Network,
        /// Token address on the source network.
        source_token: String,
        /// Token address on the target network.
        target_token: String,
        /// Amount in the token's smallest unit.
        #[serde(with = "crate::utils::u128_string")]
        amount: u128,
    },
}

/// One tradable route the agent may act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    /// Token symbol.
    pub symbol: String,
    /// Source network.
    pub source_network: Network,
    /// Token address on the source network.
    pub source_token: String,
    /// Target network.
    pub target_network: Network,
    /// Token address on the target network.
    pub target_token: String,
}

/// Strategy the agent is configured with at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    /// Routes the agent may trade.
    pub token_pairs: Vec<TokenPair>,
    /// Minimum net profit, in percent.
    pub min_profit_threshold: Decimal,
    /// Maximum trade size in whole token units.
    pub max_trade_size: Decimal,
}

impl Strategy {
    /// Build a strategy covering every ordered network pair a token trades on.
    pub fn for_tokens(
        tokens: &[TrackedToken],
        networks: &[Network],
        min_profit_threshold: Decimal,
        max_trade_size: Decimal,
    ) -> Self {
        let mut token_pairs = Vec::new();
        for token in tokens {
            for &source in networks {
                for &target in networks {
                    if source == target {
                        continue;
                    }
                    if let (Some(src), Some(dst)) = (token.address_on(source), token.address_on(target)) {
                        token_pairs.push(TokenPair {
                            symbol: token.symbol.clone(),
                            source_network: source,
                            source_token: src.to_string(),
                            target_network: target,
                            target_token: dst.to_string(),
                        });
                    }
                }
            }
        }

        Self {
            token_pairs,
            min_profit_threshold,
            max_trade_size,
        }
    }
}

/// Acknowledgement of an executed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReceipt {
    /// Agent-side reference for the action.
    pub reference: String,
}

/// External agent able to execute arbitrage actions.
#[async_trait]
pub trait ExecutionDelegate: Send + Sync {
    /// Register an agent and return its id.
    async fn register(&self, name: &str, description: &str) -> Result<String, DelegateError>;

    /// Configure the agent's strategy.
    async fn define_strategy(&self, agent_id: &str, strategy: &Strategy) -> Result<(), DelegateError>;

    /// Ask the agent to perform an action.
    async fn execute(&self, agent_id: &str, action: &DelegateAction) -> Result<ActionReceipt, DelegateError>;
}

#[derive(Debug, Serialize)]
struct RegisterBody<'a> {
    name: &'a str,
    description: &'a str,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ActionResponse {
    reference: Option<String>,
    status: Option<String>,
    error: Option<String>,
}

/// REST client for the agent service.
#[derive(Debug, Clone)]
pub struct HttpDelegateClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpDelegateClient {
    /// Create a client for the agent service at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DelegateError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_millis(1500))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl ExecutionDelegate for HttpDelegateClient {
    #[instrument(skip(self, description))]
    async fn register(&self, name: &str, description: &str) -> Result<String, DelegateError> {
        let url = format!("{}/agents", self.base_url);
        let response = self
            .authorize(self.http.post(&url))
            .json(&RegisterBody { name, description })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DelegateError::RegistrationFailed(format!(
                "HTTP {} - {}",
                status, body
            )));
        }

        let registered: RegisterResponse = response.json().await.map_err(|e| {
            DelegateError::RegistrationFailed(format!("failed to parse response: {}", e))
        })?;

        info!(agent_id = %registered.id, "Agent registered");
        Ok(registered.id)
    }

    #[instrument(skip(self, strategy), fields(pairs = strategy.token_pairs.len()))]
    async fn define_strategy(&self, agent_id: &str, strategy: &Strategy) -> Result<(), DelegateError> {
        let url = format!("{}/agents/{}/strategy", self.base_url, agent_id);
        let response = self.authorize(self.http.put(&url)).json(strategy).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DelegateError::StrategyRejected {
                agent_id: agent_id.to_string(),
                reason: format!("HTTP {} - {}", status, body),
            });
        }

        debug!("Strategy accepted");
        Ok(())
    }

    #[instrument(skip(self, action))]
    async fn execute(&self, agent_id: &str, action: &DelegateAction) -> Result<ActionReceipt, DelegateError> {
        let url = format!("{}/agents/{}/actions", self.base_url, agent_id);
        let response = self.authorize(self.http.post(&url)).json(action).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DelegateError::ActionFailed {
                agent_id: agent_id.to_string(),
                reason: format!("HTTP {} - {}", status, body),
            });
        }

        let result: ActionResponse = response.json().await.map_err(|e| DelegateError::ActionFailed {
            agent_id: agent_id.to_string(),
            reason: format!("failed to parse response: {}", e),
        })?;

        if let Some(error) = result.error {
            return Err(DelegateError::ActionFailed {
                agent_id: agent_id.to_string(),
                reason: error,
            });
        }

        if result.status.as_deref() == Some("failed") {
            return Err(DelegateError::ActionFailed {
                agent_id: agent_id.to_string(),
                reason: "agent reported failure".to_string(),
            });
        }

        let reference = result.reference.ok_or_else(|| DelegateError::ActionFailed {
            agent_id: agent_id.to_string(),
            reason: "no reference in response".to_string(),
        })?;

        Ok(ActionReceipt { reference })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    #[test]
    fn action_serializes_with_type_tag() {
        let action = DelegateAction::CrossChainArbitrage {
            source_network: Network::Arbitrum,
            target_network: Network::Base,
            source_token: "0xaa".to_string(),
            target_token: "0xbb".to_string(),
            amount: 1_000_000_000,
        };

        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "cross_chain_arbitrage",
                "source_network": "arbitrum",
                "target_network": "base",
                "source_token": "0xaa",
                "target_token": "0xbb",
                "amount": "1000000000",
            })
        );

        let back: DelegateAction = serde_json::from_value(json).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn strategy_covers_ordered_pairs_with_addresses() {
        let tokens = vec![
            TrackedToken::new("USDC", 6)
                .with_address(Network::Ethereum, "0x01")
                .with_address(Network::Base, "0x02"),
            TrackedToken::new("WETH", 18).with_address(Network::Base, "0x03"),
        ];
        let networks = [Network::Ethereum, Network::Base, Network::Polygon];

        let strategy = Strategy::for_tokens(&tokens, &networks, dec!(0.5), dec!(1000));

        assert_eq!(strategy.token_pairs.len(), 2);
        assert!(strategy.token_pairs.iter().all(|p| p.symbol == "USDC"));
        assert!(strategy
            .token_pairs
            .iter()
            .any(|p| p.source_network == Network::Base && p.target_network == Network::Ethereum));
        assert_eq!(strategy.min_profit_threshold, dec!(0.5));
    }
}
