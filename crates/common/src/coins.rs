//! Multi-denomination coin amounts.
//!
//! A [`CoinSet`] is always kept normalized: sorted by denom, one entry per
//! denom and no zero amounts. Parsing accepts the usual comma separated form
//! (`"1000uumee,5uatom"`); decimal amounts are truncated to whole units.

use crate::error::CoinError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MIN_DENOM_LEN: usize = 3;
const MAX_DENOM_LEN: usize = 128;

/// A single amount of one denomination
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: u128,
}

impl Coin {
    pub fn new(amount: u128, denom: impl Into<String>) -> Result<Self, CoinError> {
        let denom = denom.into();
        validate_denom(&denom)?;
        Ok(Self { denom, amount })
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

/// Normalized set of coins
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoinSet(Vec<Coin>);

impl CoinSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Parse a comma separated list of coins.
    ///
    /// An empty (or whitespace only) string yields the empty set. Repeating a
    /// denom is an error, zero amounts are dropped.
    pub fn parse(input: &str) -> Result<Self, CoinError> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(Self::new());
        }

        let mut coins = Vec::new();
        for part in input.split(',') {
            let coin = parse_coin(part.trim())?;
            if coins.iter().any(|c: &Coin| c.denom == coin.denom) {
                return Err(CoinError::DuplicateDenom(coin.denom));
            }
            coins.push(coin);
        }

        coins.retain(|c| c.amount > 0);
        coins.sort_by(|a, b| a.denom.cmp(&b.denom));
        Ok(Self(coins))
    }

    /// Sum of `self` and `other`, merging equal denoms
    pub fn add(&self, other: &CoinSet) -> Result<CoinSet, CoinError> {
        let mut merged = self.0.clone();
        for coin in &other.0 {
            match merged.iter_mut().find(|c| c.denom == coin.denom) {
                Some(existing) => {
                    existing.amount = existing
                        .amount
                        .checked_add(coin.amount)
                        .ok_or_else(|| CoinError::Overflow(coin.denom.clone()))?;
                }
                None => merged.push(coin.clone()),
            }
        }
        merged.retain(|c| c.amount > 0);
        merged.sort_by(|a, b| a.denom.cmp(&b.denom));
        Ok(Self(merged))
    }

    pub fn amount_of(&self, denom: &str) -> u128 {
        self.0
            .iter()
            .find(|c| c.denom == denom)
            .map(|c| c.amount)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Coin> {
        self.0.iter()
    }
}

impl FromStr for CoinSet {
    type Err = CoinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CoinSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, coin) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", coin)?;
        }
        Ok(())
    }
}

fn parse_coin(expr: &str) -> Result<Coin, CoinError> {
    let split = expr
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .ok_or_else(|| CoinError::InvalidCoin(expr.to_string()))?;
    let (number, rest) = expr.split_at(split);
    let denom = rest.trim_start();

    let whole = match number.split_once('.') {
        Some((whole, frac)) => {
            if frac.is_empty() || !frac.chars().all(|c| c.is_ascii_digit()) {
                return Err(CoinError::InvalidCoin(expr.to_string()));
            }
            if whole.is_empty() {
                "0"
            } else {
                whole
            }
        }
        None => number,
    };

    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return Err(CoinError::InvalidCoin(expr.to_string()));
    }

    validate_denom(denom)?;

    let amount = whole
        .parse::<u128>()
        .map_err(|_| CoinError::Overflow(denom.to_string()))?;

    Ok(Coin {
        denom: denom.to_string(),
        amount,
    })
}

fn validate_denom(denom: &str) -> Result<(), CoinError> {
    let mut chars = denom.chars();
    let first_ok = chars.next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false);
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | ':' | '.' | '_' | '-'));

    if !first_ok || !rest_ok || denom.len() < MIN_DENOM_LEN || denom.len() > MAX_DENOM_LEN {
        return Err(CoinError::InvalidDenom(denom.to_string()));
    }
    Ok(())
}
