// src/config.rs
//
// Engine configuration document: accounts, markets, strategies. The file
// format is JSON; validation resolves string references into arena
// handles and rejects anything inconsistent before the reactor starts.

use std::collections::HashMap;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};
use crate::strategy::OrderbackParams;
use crate::types::{AccountId, Amount, MarketId, StrategyId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bind address for the Prometheus endpoint, e.g. "127.0.0.1:9100".
    #[serde(default)]
    pub metrics_bind: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    pub accounts: Vec<AccountConfig>,
    pub markets: Vec<MarketConfig>,
    pub strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub id: String,
    pub driver: String,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_rps: u32,
    #[serde(default)]
    pub ws_private: bool,
    #[serde(default)]
    pub ws_public: bool,
    #[serde(default)]
    pub fetch_private_balance: bool,
}

fn default_rate_limit() -> u32 {
    8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketConfig {
    pub id: String,
    pub account: String,
    /// Venue-side symbol; defaults to `id`.
    #[serde(default)]
    pub symbol: Option<String>,
    pub base: String,
    pub quote: String,
    #[serde(default)]
    pub min_amount: Amount,
    #[serde(default = "default_precision")]
    pub amount_precision: u32,
    #[serde(default = "default_precision")]
    pub price_precision: u32,
    #[serde(default)]
    pub fetch_public_orderbook: bool,
    #[serde(default)]
    pub listen_public_trades: bool,
}

fn default_precision() -> u32 {
    8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRef {
    pub account_id: String,
    pub market_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FxConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub rate: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Tick period in seconds.
    pub period: f64,
    #[serde(default)]
    pub period_random_delay: f64,
    /// Initial executor queue delay in seconds.
    #[serde(default)]
    pub delay: f64,
    #[serde(default)]
    pub delay_the_first_execute: bool,
    /// Another strategy whose target websocket gates this one's ticks.
    #[serde(default)]
    pub linked_strategy: Option<String>,
    pub target: MarketRef,
    pub sources: Vec<MarketRef>,
    pub params: OrderbackParams,
    #[serde(default)]
    pub fx: Option<FxConfig>,
}

/// String references resolved into arena handles.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStrategy {
    pub id: StrategyId,
    pub config: StrategyConfig,
    pub target_account: AccountId,
    pub target_market: MarketId,
    pub sources: Vec<(AccountId, MarketId)>,
    pub linked: Option<StrategyId>,
}

impl EngineConfig {
    pub fn from_json(json: &str) -> EngineResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| EngineError::Configuration(format!("invalid config: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EngineError::Configuration(format!(
                "cannot read {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json(&raw)
    }

    /// Resolve every cross-reference and validate strategy parameters.
    pub fn resolve(&self) -> EngineResult<Vec<ResolvedStrategy>> {
        let account_ids = index_unique(self.accounts.iter().map(|a| a.id.as_str()), "account")?;
        let market_ids = index_unique(self.markets.iter().map(|m| m.id.as_str()), "market")?;
        let strategy_ids =
            index_unique(self.strategies.iter().map(|s| s.id.as_str()), "strategy")?;

        for market in &self.markets {
            if !account_ids.contains_key(market.account.as_str()) {
                return Err(EngineError::Configuration(format!(
                    "market {} references unknown account {}",
                    market.id, market.account
                )));
            }
        }

        let resolve_ref = |r: &MarketRef| -> EngineResult<(AccountId, MarketId)> {
            let account = account_ids.get(r.account_id.as_str()).ok_or_else(|| {
                EngineError::Configuration(format!("unknown account {}", r.account_id))
            })?;
            let market = market_ids.get(r.market_id.as_str()).ok_or_else(|| {
                EngineError::Configuration(format!("unknown market {}", r.market_id))
            })?;
            Ok((AccountId(*account), MarketId(*market)))
        };

        let mut resolved = Vec::with_capacity(self.strategies.len());
        for (index, strategy) in self.strategies.iter().enumerate() {
            if strategy.kind != "orderback" {
                return Err(EngineError::Configuration(format!(
                    "unknown strategy type {}",
                    strategy.kind
                )));
            }
            if strategy.period <= 0.0 {
                return Err(EngineError::Configuration(format!(
                    "strategy {}: period must be positive",
                    strategy.id
                )));
            }
            strategy.params.validate()?;
            if let Some(fx) = &strategy.fx {
                if fx.kind != "fixed" {
                    return Err(EngineError::Configuration(format!(
                        "strategy {}: unknown fx type {}",
                        strategy.id, fx.kind
                    )));
                }
            }
            let (target_account, target_market) = resolve_ref(&strategy.target)?;
            let sources = strategy
                .sources
                .iter()
                .map(&resolve_ref)
                .collect::<EngineResult<Vec<_>>>()?;
            let linked = match &strategy.linked_strategy {
                Some(name) => Some(StrategyId(*strategy_ids.get(name.as_str()).ok_or_else(
                    || {
                        EngineError::Configuration(format!(
                            "strategy {}: unknown linked strategy {name}",
                            strategy.id
                        ))
                    },
                )?)),
                None => None,
            };
            resolved.push(ResolvedStrategy {
                id: StrategyId(index),
                config: strategy.clone(),
                target_account,
                target_market,
                sources,
                linked,
            });
        }
        Ok(resolved)
    }
}

fn index_unique<'a>(
    ids: impl Iterator<Item = &'a str>,
    what: &str,
) -> EngineResult<HashMap<&'a str, usize>> {
    let mut map = HashMap::new();
    for (index, id) in ids.enumerate() {
        if map.insert(id, index).is_some() {
            return Err(EngineError::Configuration(format!(
                "duplicate {what} id {id}"
            )));
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> &'static str {
        r#"{
            "metrics_bind": "127.0.0.1:9100",
            "accounts": [
                {"id": "target", "driver": "mock", "ws_private": true},
                {"id": "source", "driver": "mock", "fetch_private_balance": true}
            ],
            "markets": [
                {"id": "t-btcusd", "account": "target", "base": "BTC", "quote": "USD",
                 "min_amount": "0.001", "amount_precision": 4, "price_precision": 2},
                {"id": "s-btcusd", "account": "source", "base": "BTC", "quote": "USD",
                 "fetch_public_orderbook": true}
            ],
            "strategies": [
                {"id": "mirror-1", "type": "orderback", "period": 2.5,
                 "target": {"account_id": "target", "market_id": "t-btcusd"},
                 "sources": [{"account_id": "source", "market_id": "s-btcusd"}],
                 "params": {
                    "levels_price_step": "0.5",
                    "levels_price_func": "constant",
                    "levels_count": 5,
                    "spread_bids": "0.01",
                    "spread_asks": "0.01",
                    "side": "both",
                    "enable_orderback": true
                 }}
            ]
        }"#
    }

    #[test]
    fn sample_config_parses_and_resolves() {
        let config = EngineConfig::from_json(sample()).unwrap();
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.len(), 1);
        let strategy = &resolved[0];
        assert_eq!(strategy.target_account, AccountId(0));
        assert_eq!(strategy.target_market, MarketId(0));
        assert_eq!(strategy.sources, vec![(AccountId(1), MarketId(1))]);
        assert_eq!(strategy.config.params.levels_count, 5);
        // Defaults fill in.
        assert_eq!(strategy.config.params.orderback_grace_time, 1.0);
    }

    #[test]
    fn unknown_strategy_type_is_rejected() {
        let raw = sample().replace("\"orderback\"", "\"grid\"");
        let config = EngineConfig::from_json(&raw).unwrap();
        assert!(matches!(
            config.resolve().unwrap_err(),
            EngineError::Configuration(_)
        ));
    }

    #[test]
    fn unknown_market_reference_is_rejected() {
        let raw = sample().replace("\"market_id\": \"s-btcusd\"", "\"market_id\": \"nope\"");
        let config = EngineConfig::from_json(&raw).unwrap();
        assert!(config.resolve().is_err());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let raw = sample().replace("\"id\": \"source\"", "\"id\": \"target\"");
        let config = EngineConfig::from_json(&raw).unwrap();
        assert!(config.resolve().is_err());
    }

    #[test]
    fn invalid_params_are_rejected() {
        let raw = sample().replace("\"levels_count\": 5", "\"levels_count\": 0");
        let config = EngineConfig::from_json(&raw).unwrap();
        assert!(config.resolve().is_err());
    }
}
