//! Store plans and the limits each plan grants.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::core::config::Config;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PlanType {
    Free,
    Pro,
    Vip,
}

impl PlanType {
    pub fn is_paid(self) -> bool {
        !matches!(self, PlanType::Free)
    }

    /// Parses the `plan_<name>` button identifier.
    pub fn from_action(action: &str) -> Option<Self> {
        action.strip_prefix("plan_").and_then(|p| p.parse().ok())
    }

    pub fn action(self) -> String {
        format!("plan_{}", self)
    }

    /// Parses the `upgrade_<name>` button an existing store renews with.
    pub fn from_renewal_action(action: &str) -> Option<Self> {
        action.strip_prefix("upgrade_").and_then(|p| p.parse().ok())
    }

    pub fn renewal_action(self) -> String {
        format!("upgrade_{}", self)
    }
}

/// Whether a store capped at `limit` products (None = unlimited) may add one
/// more to the `current` ones.
pub fn within_product_limit(limit: Option<u32>, current: u32) -> bool {
    limit.map_or(true, |limit| current < limit)
}

/// Limits attached to a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub plan: PlanType,
    /// One-off price for a validity period
    pub price: i64,
    /// Maximum number of products (None = unlimited)
    pub product_limit: Option<u32>,
    /// Commission taken from each order, in percent
    pub commission_percent: u8,
    /// How long one payment keeps the store active
    pub validity_months: u32,
}

impl PlanLimits {
    /// Expiry for a store activated or extended at `from`.
    pub fn expiry_from(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        from.checked_add_months(Months::new(self.validity_months))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Product limit as stored in the database (-1 = unlimited).
    pub fn product_limit_column(&self) -> i64 {
        self.product_limit.map_or(-1, i64::from)
    }
}

/// Plan table resolved against configured prices.
#[derive(Debug, Clone, Copy)]
pub struct PlanCatalog {
    pub pro_price: i64,
    pub vip_price: i64,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self {
            pro_price: 50_000,
            vip_price: 150_000,
        }
    }
}

impl PlanCatalog {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pro_price: config.pro_plan_price,
            vip_price: config.vip_plan_price,
        }
    }

    pub fn limits(&self, plan: PlanType) -> PlanLimits {
        match plan {
            PlanType::Free => PlanLimits {
                plan,
                price: 0,
                product_limit: Some(10),
                commission_percent: 5,
                validity_months: 12,
            },
            PlanType::Pro => PlanLimits {
                plan,
                price: self.pro_price,
                product_limit: Some(200),
                commission_percent: 5,
                validity_months: 1,
            },
            PlanType::Vip => PlanLimits {
                plan,
                price: self.vip_price,
                product_limit: None,
                commission_percent: 0,
                validity_months: 1,
            },
        }
    }
}

/// Formats an amount with thousands separators, e.g. `150,000`.
pub fn format_price(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if amount < 0 {
        out.insert(0, '-');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_free_plan_limits() {
        let limits = PlanCatalog::default().limits(PlanType::Free);
        assert_eq!(limits.price, 0);
        assert_eq!(limits.product_limit, Some(10));
        assert_eq!(limits.commission_percent, 5);
        assert!(within_product_limit(limits.product_limit, 9));
        assert!(!within_product_limit(limits.product_limit, 10));
    }

    #[test]
    fn test_vip_is_unlimited() {
        let limits = PlanCatalog::default().limits(PlanType::Vip);
        assert_eq!(limits.product_limit, None);
        assert_eq!(limits.product_limit_column(), -1);
        assert_eq!(limits.commission_percent, 0);
        assert!(within_product_limit(limits.product_limit, 1_000_000));
    }

    #[test]
    fn test_plan_parsing() {
        assert_eq!("FREE".parse::<PlanType>().ok(), Some(PlanType::Free));
        assert_eq!(PlanType::from_action("plan_vip"), Some(PlanType::Vip));
        assert_eq!(PlanType::from_action("plan_gold"), None);
        assert_eq!(PlanType::Pro.action(), "plan_pro");
        assert_eq!(PlanType::from_renewal_action("upgrade_vip"), Some(PlanType::Vip));
        assert_eq!(PlanType::from_renewal_action("plan_vip"), None);
        assert_eq!(PlanType::Pro.renewal_action(), "upgrade_pro");
        assert!(PlanType::Pro.is_paid());
        assert!(!PlanType::Free.is_paid());
    }

    #[test]
    fn test_expiry() {
        let start = Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap();
        let catalog = PlanCatalog::default();
        assert_eq!(
            catalog.limits(PlanType::Free).expiry_from(start),
            Utc.with_ymd_and_hms(2027, 1, 31, 12, 0, 0).unwrap()
        );
        assert_eq!(
            catalog.limits(PlanType::Pro).expiry_from(start),
            Utc.with_ymd_and_hms(2026, 2, 28, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(0), "0");
        assert_eq!(format_price(999), "999");
        assert_eq!(format_price(50_000), "50,000");
        assert_eq!(format_price(1_234_567), "1,234,567");
    }
}
