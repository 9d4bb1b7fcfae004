use chrono::NaiveDate;
use thiserror::Error;

use crate::i18n::Key;

pub const DATE_FORMAT: &str = "%d.%m.%Y";

const MAX_BANK_LEN: usize = 64;
const MAX_HANDLE_LEN: usize = 32;
const MAX_ASSET_LEN: usize = 16;

/// Malformed user input. The conversation re-prompts and stays put.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("quantity must be a positive whole number")]
    Quantity,
    #[error("unknown currency {0}")]
    Currency(String),
    #[error("bank name must be 1-{MAX_BANK_LEN} characters")]
    Bank,
    #[error("fee must be a number between -100 and 100")]
    Fee,
    #[error("dates must look like dd.mm.yyyy")]
    Date,
    #[error("end date is before start date")]
    EndBeforeStart,
    #[error("end date is in the past")]
    EndInPast,
    #[error("not a valid handle")]
    Handle,
    #[error("not a valid request id")]
    RequestId,
    #[error("not a valid asset name")]
    Asset,
}

impl InputError {
    pub fn key(&self) -> Key {
        match self {
            InputError::Quantity => Key::InvalidQuantity,
            InputError::Currency(_) => Key::UnknownCurrency,
            InputError::Bank => Key::InvalidBank,
            InputError::Fee => Key::InvalidFee,
            InputError::Date => Key::InvalidDate,
            InputError::EndBeforeStart => Key::EndBeforeStart,
            InputError::EndInPast => Key::EndInPast,
            InputError::Handle => Key::InvalidHandle,
            InputError::RequestId => Key::InvalidRequestId,
            InputError::Asset => Key::AddAssetUsage,
        }
    }
}

pub fn parse_quantity(input: &str) -> Result<i64, InputError> {
    let digits: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    match digits.parse::<i64>() {
        Ok(q) if q > 0 => Ok(q),
        _ => Err(InputError::Quantity),
    }
}

/// Matches case-insensitively and returns the catalog spelling.
pub fn match_currency(input: &str, catalog: &[String]) -> Result<String, InputError> {
    let wanted = input.trim();
    catalog
        .iter()
        .find(|c| c.eq_ignore_ascii_case(wanted))
        .cloned()
        .ok_or_else(|| InputError::Currency(wanted.to_string()))
}

pub fn parse_bank(input: &str) -> Result<String, InputError> {
    let bank = input.trim();
    let len = bank.chars().count();
    if len == 0 || len > MAX_BANK_LEN || bank.starts_with('/') {
        return Err(InputError::Bank);
    }
    Ok(bank.to_string())
}

pub fn parse_fee(input: &str) -> Result<f64, InputError> {
    let cleaned = input.trim().trim_end_matches('%').trim().replace(',', ".");
    match cleaned.parse::<f64>() {
        Ok(fee) if fee.is_finite() && (-100.0..=100.0).contains(&fee) => Ok(fee),
        _ => Err(InputError::Fee),
    }
}

pub fn parse_date(input: &str) -> Result<NaiveDate, InputError> {
    NaiveDate::parse_from_str(input.trim(), DATE_FORMAT).map_err(|_| InputError::Date)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dates {
    Single(NaiveDate),
    Range(NaiveDate, NaiveDate),
}

/// One date, or two separated by a dash or whitespace.
pub fn parse_dates(input: &str) -> Result<Dates, InputError> {
    let parts: Vec<&str> = input
        .split(|c: char| c == '-' || c == '–' || c == '—' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .collect();

    match parts.as_slice() {
        [single] => Ok(Dates::Single(parse_date(single)?)),
        [start, end] => Ok(Dates::Range(parse_date(start)?, parse_date(end)?)),
        _ => Err(InputError::Date),
    }
}

pub fn validate_window(start: NaiveDate, end: NaiveDate, today: NaiveDate) -> Result<(), InputError> {
    if end < start {
        return Err(InputError::EndBeforeStart);
    }
    if end < today {
        return Err(InputError::EndInPast);
    }
    Ok(())
}

/// Accepts `name` or `@name`.
pub fn parse_handle(input: &str) -> Result<String, InputError> {
    let handle = input.trim().trim_start_matches('@');
    let valid = !handle.is_empty()
        && handle.len() <= MAX_HANDLE_LEN
        && handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(InputError::Handle);
    }
    Ok(handle.to_string())
}

/// Accepts `42` or `#42`.
pub fn parse_request_id(input: &str) -> Result<i64, InputError> {
    match input.trim().trim_start_matches('#').parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(InputError::RequestId),
    }
}

pub fn parse_asset(input: &str) -> Result<String, InputError> {
    let name = input.trim();
    let valid = !name.is_empty()
        && name.len() <= MAX_ASSET_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric());
    if !valid {
        return Err(InputError::Asset);
    }
    Ok(name.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn quantity_must_be_positive_integer() {
        assert_eq!(parse_quantity("100"), Ok(100));
        assert_eq!(parse_quantity(" 1 000 "), Ok(1000));
        assert_eq!(parse_quantity("0"), Err(InputError::Quantity));
        assert_eq!(parse_quantity("-5"), Err(InputError::Quantity));
        assert_eq!(parse_quantity("ten"), Err(InputError::Quantity));
        assert_eq!(parse_quantity("1.5"), Err(InputError::Quantity));
    }

    #[test]
    fn currency_uses_catalog_spelling() {
        let catalog = vec!["USD".to_string(), "USDT".to_string()];
        assert_eq!(match_currency("usd", &catalog), Ok("USD".to_string()));
        assert_eq!(
            match_currency("GBP", &catalog),
            Err(InputError::Currency("GBP".into()))
        );
    }

    #[test]
    fn fee_accepts_sign_and_comma() {
        assert_eq!(parse_fee("0"), Ok(0.0));
        assert_eq!(parse_fee("-1,5"), Ok(-1.5));
        assert_eq!(parse_fee("2%"), Ok(2.0));
        assert_eq!(parse_fee("101"), Err(InputError::Fee));
        assert_eq!(parse_fee("NaN"), Err(InputError::Fee));
        assert_eq!(parse_fee("free"), Err(InputError::Fee));
    }

    #[test]
    fn bank_rejects_empty_long_and_commands() {
        assert_eq!(parse_bank("  Chase "), Ok("Chase".to_string()));
        assert_eq!(parse_bank("   "), Err(InputError::Bank));
        assert_eq!(parse_bank("/start"), Err(InputError::Bank));
        assert_eq!(parse_bank(&"x".repeat(65)), Err(InputError::Bank));
    }

    #[test]
    fn dates_single_or_range() {
        assert_eq!(
            parse_dates("01.01.2030-01.02.2030"),
            Ok(Dates::Range(date(2030, 1, 1), date(2030, 2, 1)))
        );
        assert_eq!(
            parse_dates("01.01.2030 – 01.02.2030"),
            Ok(Dates::Range(date(2030, 1, 1), date(2030, 2, 1)))
        );
        assert_eq!(parse_dates("15.03.2030"), Ok(Dates::Single(date(2030, 3, 15))));
        assert_eq!(parse_dates("31.02.2030"), Err(InputError::Date));
        assert_eq!(parse_dates("tomorrow"), Err(InputError::Date));
        assert_eq!(parse_dates("01.01.2030 02.01.2030 03.01.2030"), Err(InputError::Date));
    }

    #[test]
    fn window_checks_order_and_past() {
        let today = date(2030, 1, 10);
        assert_eq!(validate_window(date(2030, 1, 1), date(2030, 1, 10), today), Ok(()));
        assert_eq!(
            validate_window(date(2030, 1, 5), date(2030, 1, 4), today),
            Err(InputError::EndBeforeStart)
        );
        assert_eq!(
            validate_window(date(2030, 1, 1), date(2030, 1, 9), today),
            Err(InputError::EndInPast)
        );
    }

    #[test]
    fn handles_and_ids() {
        assert_eq!(parse_handle("@Bob_1"), Ok("Bob_1".to_string()));
        assert_eq!(parse_handle("bob smith"), Err(InputError::Handle));
        assert_eq!(parse_handle("@"), Err(InputError::Handle));
        assert_eq!(parse_request_id("#12"), Ok(12));
        assert_eq!(parse_request_id("0"), Err(InputError::RequestId));
        assert_eq!(parse_asset("doge"), Ok("DOGE".to_string()));
        assert_eq!(parse_asset("DO GE"), Err(InputError::Asset));
    }
}
