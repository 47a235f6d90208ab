//! Broker and market-data seams.
//!
//! Live venues are external collaborators; the orchestrator only depends on
//! these traits. `SimBroker`/`SimPriceFeed` provide the simulation mode used
//! when no live broker is connected, and double as test fixtures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{MarketType, OrderStatus, OrderType, Side, TradeFill};
use crate::error::{FlotillaError, Result};

/// Order placement seam toward the brokerage collaborator.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Establish the session; returns whether live trading is available.
    async fn connect(&self) -> Result<bool>;

    async fn disconnect(&self) -> Result<()>;

    /// Place an order; resolves with the fill or an error. Callers must not
    /// advance their own state when this fails.
    async fn place_order(
        &self,
        symbol: &str,
        market_type: MarketType,
        side: Side,
        quantity: Decimal,
        order_type: OrderType,
    ) -> Result<TradeFill>;
}

/// Latest-price seam toward the market-data collaborator.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn last_price(&self, symbol: &str) -> Result<Decimal>;
}

/// Shared in-process price table.
#[derive(Default)]
pub struct SimPriceFeed {
    prices: DashMap<String, Decimal>,
}

impl SimPriceFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.insert(symbol.to_string(), price);
    }
}

#[async_trait]
impl PriceFeed for SimPriceFeed {
    async fn last_price(&self, symbol: &str) -> Result<Decimal> {
        self.prices
            .get(symbol)
            .map(|entry| *entry.value())
            .ok_or_else(|| FlotillaError::PriceUnavailable(symbol.to_string()))
    }
}

/// Simulated broker: fills market orders instantly at the feed price.
pub struct SimBroker {
    feed: Arc<SimPriceFeed>,
    /// Simulated fill slippage amplitude in basis points (0 = exact fills)
    jitter_bps: u32,
    failing: AtomicBool,
}

impl SimBroker {
    pub fn new(feed: Arc<SimPriceFeed>) -> Self {
        Self {
            feed,
            jitter_bps: 0,
            failing: AtomicBool::new(false),
        }
    }

    pub fn with_jitter_bps(mut self, jitter_bps: u32) -> Self {
        self.jitter_bps = jitter_bps;
        self
    }

    /// Force subsequent orders to fail, for exercising retry paths.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn jittered(&self, price: Decimal) -> Decimal {
        if self.jitter_bps == 0 {
            return price;
        }
        let bps = rand::thread_rng().gen_range(-(self.jitter_bps as i64)..=self.jitter_bps as i64);
        price * (Decimal::ONE + Decimal::new(bps, 4))
    }
}

#[async_trait]
impl Broker for SimBroker {
    async fn connect(&self) -> Result<bool> {
        info!("SimBroker connected (simulation mode)");
        Ok(false)
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn place_order(
        &self,
        symbol: &str,
        market_type: MarketType,
        side: Side,
        quantity: Decimal,
        order_type: OrderType,
    ) -> Result<TradeFill> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FlotillaError::OrderSubmission(format!(
                "simulated order failure for {symbol}"
            )));
        }

        let price = self.feed.last_price(symbol).await?;
        let fill_price = self.jittered(price);
        debug!(
            "SimBroker fill: {} {} {} {} @ {} ({:?})",
            side, quantity, symbol, market_type, fill_price, order_type
        );

        Ok(TradeFill {
            trade_id: format!("SIM-{}", Uuid::new_v4().simple()),
            symbol: symbol.to_string(),
            side,
            quantity,
            fill_price,
            status: OrderStatus::Filled,
            timestamp: Utc::now(),
            simulated: true,
        })
    }
}
