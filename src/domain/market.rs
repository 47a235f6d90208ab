use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Instrument class a signal or position belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    Equity,
    Options,
    Futures,
    Crypto,
    Forex,
}

impl MarketType {
    /// Whether quantities in this market trade in whole units
    pub fn integral_units(&self) -> bool {
        matches!(self, MarketType::Equity | MarketType::Options | MarketType::Futures)
    }
}

impl std::fmt::Display for MarketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketType::Equity => write!(f, "equity"),
            MarketType::Options => write!(f, "options"),
            MarketType::Futures => write!(f, "futures"),
            MarketType::Crypto => write!(f, "crypto"),
            MarketType::Forex => write!(f, "forex"),
        }
    }
}

/// Trade side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Filled,
    Cancelled,
    Rejected,
}

/// Round a quantity for the given instrument class.
///
/// Equities, options, and futures trade in whole units; continuously
/// divisible instruments are rounded to four decimal places.
pub fn round_quantity(market_type: MarketType, quantity: Decimal) -> Decimal {
    if market_type.integral_units() {
        quantity.trunc()
    } else {
        quantity.round_dp(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn equity_quantities_truncate_to_whole_units() {
        assert_eq!(round_quantity(MarketType::Equity, dec!(50.7)), dec!(50));
        assert_eq!(round_quantity(MarketType::Options, dec!(2.999)), dec!(2));
    }

    #[test]
    fn crypto_quantities_keep_four_decimals() {
        assert_eq!(round_quantity(MarketType::Crypto, dec!(0.123456)), dec!(0.1235));
        assert_eq!(round_quantity(MarketType::Forex, dec!(1.00001)), dec!(1.0000));
    }
}
