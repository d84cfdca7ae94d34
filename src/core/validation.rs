//! Input validation for conversation steps.
//!
//! Every function returns the normalized value on success. Errors carry a
//! user-facing explanation and are turned into a re-prompt by the router.

use lazy_regex::regex_is_match;
use thiserror::Error;

pub const STORE_NAME_LEN: (usize, usize) = (3, 50);
pub const STORE_DESCRIPTION_LEN: (usize, usize) = (10, 200);
pub const PRODUCT_NAME_LEN: (usize, usize) = (2, 100);
pub const PRODUCT_DESCRIPTION_LEN: (usize, usize) = (5, 1000);
pub const ADDRESS_LEN: (usize, usize) = (10, 300);
pub const MAX_PRICE: i64 = 999_999_999;

/// Validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be at least {min} characters long")]
    TooShort { field: &'static str, min: usize },

    #[error("{field} must be at most {max} characters long")]
    TooLong { field: &'static str, max: usize },

    #[error("Price must be a whole number, for example 25000")]
    NotANumber,

    #[error("Price must be between 1 and 999,999,999")]
    PriceOutOfRange,

    #[error("Phone number must contain 7 to 15 digits, optionally starting with +")]
    InvalidPhone,

    #[error("That does not look like a bot token from @BotFather")]
    InvalidToken,

    #[error("Please choose one of the plans: free, pro or vip")]
    UnknownPlan,

    #[error("Please send a photo")]
    ExpectedPhoto,

    #[error("Please send a text message")]
    ExpectedText,
}

fn bounded(field: &'static str, input: &str, (min, max): (usize, usize)) -> Result<String, ValidationError> {
    let value = input.trim();
    let len = value.chars().count();
    if len < min {
        return Err(ValidationError::TooShort { field, min });
    }
    if len > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(value.to_string())
}

pub fn store_name(input: &str) -> Result<String, ValidationError> {
    bounded("Store name", input, STORE_NAME_LEN)
}

pub fn store_description(input: &str) -> Result<String, ValidationError> {
    bounded("Store description", input, STORE_DESCRIPTION_LEN)
}

pub fn product_name(input: &str) -> Result<String, ValidationError> {
    bounded("Product name", input, PRODUCT_NAME_LEN)
}

pub fn product_description(input: &str) -> Result<String, ValidationError> {
    bounded("Product description", input, PRODUCT_DESCRIPTION_LEN)
}

pub fn address(input: &str) -> Result<String, ValidationError> {
    bounded("Address", input, ADDRESS_LEN)
}

/// Parses a price, accepting thousands separators (`25,000`).
pub fn price(input: &str) -> Result<i64, ValidationError> {
    let cleaned: String = input.trim().chars().filter(|c| *c != ',' && *c != ' ').collect();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::NotANumber);
    }
    let value: i64 = cleaned.parse().map_err(|_| ValidationError::PriceOutOfRange)?;
    if value <= 0 || value > MAX_PRICE {
        return Err(ValidationError::PriceOutOfRange);
    }
    Ok(value)
}

/// Normalizes a phone number by dropping spaces and dashes.
pub fn phone(input: &str) -> Result<String, ValidationError> {
    let cleaned: String = input.trim().chars().filter(|c| !matches!(c, ' ' | '-')).collect();
    if regex_is_match!(r"^\+?[0-9]{7,15}$", &cleaned) {
        Ok(cleaned)
    } else {
        Err(ValidationError::InvalidPhone)
    }
}

/// Checks the `<bot id>:<secret>` shape of a Telegram bot token.
pub fn bot_token(input: &str) -> Result<String, ValidationError> {
    let token = input.trim();
    if regex_is_match!(r"^[0-9]{5,}:[A-Za-z0-9_-]{30,}$", token) {
        Ok(token.to_string())
    } else {
        Err(ValidationError::InvalidToken)
    }
}
