use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Processing,
    Shipped,
    Delivered,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "processing" => Some(Self::Processing),
            "shipped" => Some(Self::Shipped),
            "delivered" => Some(Self::Delivered),
            _ => None,
        }
    }
}

/// Order record as exposed to the orchestration core. Customer identity
/// fields are masked before they leave the record store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub merchant_id: String,
    pub customer_email_masked: String,
    pub customer_phone_last4: String,
    pub item_id: ItemId,
    pub item_category: String,
    pub order_date: NaiveDate,
    pub delivery_date: Option<NaiveDate>,
    pub item_price: Decimal,
    pub shipping_fee: Decimal,
    pub quantity: u32,
    pub status: OrderStatus,
}

impl Order {
    pub fn days_since_delivery(&self, today: NaiveDate) -> Option<i64> {
        self.delivery_date.map(|delivered| (today - delivered).num_days())
    }
}

/// Exactly one lookup key per request: order id, account email, or the last
/// four digits of the phone number on file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderIdentifier {
    OrderId(String),
    Email(String),
    PhoneLast4(String),
}

impl OrderIdentifier {
    pub fn validate(&self) -> Result<(), DomainError> {
        match self {
            Self::OrderId(value) if value.trim().is_empty() => {
                Err(DomainError::InvariantViolation("order id must not be empty".to_string()))
            }
            Self::Email(value) if !value.contains('@') => Err(DomainError::InvariantViolation(
                format!("`{value}` is not a usable account email"),
            )),
            Self::PhoneLast4(value)
                if value.len() != 4 || !value.chars().all(|c| c.is_ascii_digit()) =>
            {
                Err(DomainError::InvariantViolation(
                    "phone lookup requires exactly four digits".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

pub fn mask_email(email: &str) -> String {
    let Some((local, domain)) = email.split_once('@') else {
        return "***".to_string();
    };
    // Slice on characters, not bytes; local parts are not always ASCII.
    let chars: Vec<char> = local.chars().collect();
    let masked_local = if chars.len() <= 2 {
        let head: String = chars.iter().take(1).collect();
        format!("{head}*")
    } else {
        let head: String = chars.iter().take(2).collect();
        format!("{head}{}", "*".repeat(chars.len() - 2))
    };
    format!("{masked_local}@{domain}")
}

#[cfg(test)]
mod tests {
    use super::{mask_email, OrderIdentifier, OrderStatus};

    #[test]
    fn order_status_round_trips_from_storage_encoding() {
        for status in [OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn phone_identifier_requires_four_digits() {
        assert!(OrderIdentifier::PhoneLast4("1234".to_string()).validate().is_ok());
        assert!(OrderIdentifier::PhoneLast4("123".to_string()).validate().is_err());
        assert!(OrderIdentifier::PhoneLast4("12ab".to_string()).validate().is_err());
    }

    #[test]
    fn email_masking_keeps_domain_and_leading_characters() {
        assert_eq!(mask_email("alice@example.com"), "al***@example.com");
        assert_eq!(mask_email("bo@example.com"), "b*@example.com");
        assert_eq!(mask_email("not-an-email"), "***");
    }

    #[test]
    fn email_masking_counts_characters_not_bytes() {
        assert_eq!(mask_email("ä@example.com"), "ä*@example.com");
        assert_eq!(mask_email("åsa@example.com"), "ås*@example.com");
    }
}
