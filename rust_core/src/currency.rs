//! Financial precision utilities and currency conversion.
//!
//! # Design Philosophy
//!
//! - All internal calculations use i64 minor units (cents, pence, fen, ...)
//! - Conversion to/from f64 major units happens only at API boundaries
//! - Rounding is explicit and documented
//!
//! Exchange rates come from an injected [`ExchangeRateSource`]; the engine
//! loads a [`RateTable`] snapshot once per aggregation run and converts
//! against that table only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// ISO-4217 style currency code ("USD", "EUR", "CNY", ...).
///
/// Stored upper-cased so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn new(code: &str) -> Self {
        Self(code.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn usd() -> Self {
        Self("USD".to_string())
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CurrencyCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

/// Money value stored as integer minor units (i64) for precision.
///
/// This type prevents floating-point precision errors in price calculations
/// by using integer arithmetic internally. The currency it denominates is
/// carried separately (quotes and snapshots pair a `Money` with a
/// [`CurrencyCode`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Money {
    /// Value in minor units (1/100 of the major unit)
    minor: i64,
}

impl Money {
    /// Create from minor units directly (no conversion)
    #[inline]
    pub const fn from_minor(minor: i64) -> Self {
        Self { minor }
    }

    /// Create from major units (rounds to nearest minor unit)
    #[inline]
    pub fn from_major(major: f64) -> Self {
        Self {
            minor: (major * 100.0).round() as i64,
        }
    }

    /// Create zero value
    #[inline]
    pub const fn zero() -> Self {
        Self { minor: 0 }
    }

    /// Get value in minor units
    #[inline]
    pub const fn minor(&self) -> i64 {
        self.minor
    }

    /// Get value as major units (for display/API)
    #[inline]
    pub fn as_major(&self) -> f64 {
        self.minor as f64 / 100.0
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.minor == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.minor > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.minor < 0
    }

    #[inline]
    pub const fn abs(&self) -> Self {
        Self {
            minor: self.minor.abs(),
        }
    }

    #[inline]
    pub fn min(self, other: Self) -> Self {
        Self {
            minor: self.minor.min(other.minor),
        }
    }

    #[inline]
    pub fn max(self, other: Self) -> Self {
        Self {
            minor: self.minor.max(other.minor),
        }
    }

    /// Percentage of this value, rounded to the nearest minor unit but never
    /// below `floor` (marketplace fees charge at least one minor unit).
    pub fn percent_with_floor(&self, percent: i64, floor: i64) -> Self {
        let raw = (self.minor as f64 * percent as f64 / 100.0).round() as i64;
        Self {
            minor: raw.max(floor),
        }
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self {
            minor: self.minor + other.minor,
        }
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Self {
            minor: self.minor - other.minor,
        }
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: i64) -> Self {
        Self {
            minor: self.minor * rhs,
        }
    }
}

impl Div<i64> for Money {
    type Output = Self;

    #[inline]
    fn div(self, rhs: i64) -> Self {
        Self {
            minor: self.minor / rhs,
        }
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self { minor: -self.minor }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minor < 0 {
            write!(f, "-{:.2}", (-self.minor) as f64 / 100.0)
        } else {
            write!(f, "{:.2}", self.minor as f64 / 100.0)
        }
    }
}

/// Typed conversion failure. "Currency unknown" is a result the caller can
/// inspect, not a panic and not an anyhow blob.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    #[error("unsupported currency conversion: {from} -> {to}")]
    UnsupportedCurrency { from: CurrencyCode, to: CurrencyCode },
}

/// Injected exchange-rate lookup. Sourcing rates (ECB, openexchangerates,
/// the Steam currency table, ...) is a collaborator concern.
#[async_trait]
pub trait ExchangeRateSource: Send + Sync {
    /// Rate such that `amount_in_to = amount_in_from * rate`.
    async fn get_exchange_rate(
        &self,
        from: &CurrencyCode,
        to: &CurrencyCode,
        as_of: DateTime<Utc>,
    ) -> anyhow::Result<f64>;
}

/// Immutable snapshot of exchange rates, loaded once per aggregation run.
#[derive(Debug, Clone, Default)]
pub struct RateTable {
    rates: HashMap<(CurrencyCode, CurrencyCode), f64>,
    as_of: Option<DateTime<Utc>>,
}

impl RateTable {
    /// Build a table from explicit rates (tests, fixtures).
    pub fn with_rates(rates: Vec<(CurrencyCode, CurrencyCode, f64)>) -> Self {
        Self {
            rates: rates
                .into_iter()
                .map(|(from, to, rate)| ((from, to), rate))
                .collect(),
            as_of: None,
        }
    }

    /// Load a snapshot covering every ordered pair of `currencies` from the
    /// injected source.
    pub async fn load(
        source: &dyn ExchangeRateSource,
        currencies: &[CurrencyCode],
        as_of: DateTime<Utc>,
    ) -> anyhow::Result<Self> {
        let mut rates = HashMap::new();
        for from in currencies {
            for to in currencies {
                if from == to {
                    continue;
                }
                let rate = source.get_exchange_rate(from, to, as_of).await?;
                rates.insert((from.clone(), to.clone()), rate);
            }
        }
        Ok(Self {
            rates,
            as_of: Some(as_of),
        })
    }

    pub fn as_of(&self) -> Option<DateTime<Utc>> {
        self.as_of
    }

    /// Convert an amount between currencies, rounding to the nearest minor
    /// unit. Identity conversions always succeed.
    pub fn convert(
        &self,
        amount: Money,
        from: &CurrencyCode,
        to: &CurrencyCode,
    ) -> Result<Money, ConversionError> {
        if from == to {
            return Ok(amount);
        }
        let rate = self.rates.get(&(from.clone(), to.clone())).ok_or_else(|| {
            ConversionError::UnsupportedCurrency {
                from: from.clone(),
                to: to.clone(),
            }
        })?;
        Ok(Money::from_minor((amount.minor() as f64 * rate).round() as i64))
    }
}
