use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Which side of the exchange the request owner is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// Stored integer code, kept compatible with the legacy `requestType` column.
    pub fn code(self) -> i64 {
        match self {
            Direction::Buy => 0,
            Direction::Sell => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Direction::Buy),
            1 => Some(Direction::Sell),
            _ => None,
        }
    }
}

/// A published trade request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub id: i64,
    pub owner: String,
    pub direction: Direction,
    pub quantity: i64,
    pub currency: String,
    pub bank: String,
    /// Positive: the buyer pays the fee. Negative: the seller pays. Zero: split.
    pub fee: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl TradeRequest {
    /// Returns `(seller, buyer)` when `counterparty` takes this request.
    pub fn parties<'a>(&'a self, counterparty: &'a str) -> (&'a str, &'a str) {
        match self.direction {
            Direction::Sell => (self.owner.as_str(), counterparty),
            Direction::Buy => (counterparty, self.owner.as_str()),
        }
    }
}

/// Fields of a trade request before it gets an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTradeRequest {
    pub owner: String,
    pub direction: Direction,
    pub quantity: i64,
    pub currency: String,
    pub bank: String,
    pub fee: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl NewTradeRequest {
    pub fn with_id(self, id: i64) -> TradeRequest {
        TradeRequest {
            id,
            owner: self.owner,
            direction: self.direction,
            quantity: self.quantity,
            currency: self.currency,
            bank: self.bank,
            fee: self.fee,
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }
}

/// Presence of this row means a negotiation is active on `request_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingLock {
    pub request_id: i64,
    pub seller: String,
    pub buyer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowEntry {
    pub handle: String,
    pub votes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub users: i64,
    pub with_notifications: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Language {
    En,
    #[default]
    Ru,
}

impl Language {
    pub fn code(self) -> i64 {
        match self {
            Language::En => 0,
            Language::Ru => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Language::En),
            1 => Some(Language::Ru),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ru => "ru",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Language::En),
            "ru" => Ok(Language::Ru),
            other => Err(format!("unknown language: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(direction: Direction) -> TradeRequest {
        TradeRequest {
            id: 1,
            owner: "alice".into(),
            direction,
            quantity: 100,
            currency: "USD".into(),
            bank: "Chase".into(),
            fee: 0.0,
            start_date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2030, 2, 1).unwrap(),
        }
    }

    #[test]
    fn parties_follow_direction() {
        assert_eq!(request(Direction::Sell).parties("bob"), ("alice", "bob"));
        assert_eq!(request(Direction::Buy).parties("bob"), ("bob", "alice"));
    }

    #[test]
    fn language_parses_tags() {
        assert_eq!("EN".parse::<Language>(), Ok(Language::En));
        assert_eq!(" ru ".parse::<Language>(), Ok(Language::Ru));
        assert!("de".parse::<Language>().is_err());
    }
}
