//! Payer MSISDN selection and Tanzanian E.164 normalization.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::payments::error::{PaymentError, PaymentResult};

static MSISDN_RE: OnceLock<Option<Regex>> = OnceLock::new();

const COUNTRY_CODE: &str = "255";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Staff,
    Customer,
}

impl UserRole {
    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "admin" | "superuser" => UserRole::Admin,
            "staff" | "manager" => UserRole::Staff,
            _ => UserRole::Customer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Staff => "staff",
            UserRole::Customer => "customer",
        }
    }

    pub fn acts_for_customers(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Staff)
    }
}

/// The actor graph around a payment that the phone rules look at.
#[derive(Debug, Clone, PartialEq)]
pub struct PayerContext {
    pub tenant_id: i64,
    pub username: String,
    pub role: UserRole,
    pub user_phone: Option<String>,
    pub profile_phone: Option<String>,
    pub booking_customer_phone: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Picks the phone to charge (first rule wins) and normalizes it.
pub fn resolve_payer_phone(ctx: &PayerContext) -> PaymentResult<String> {
    let booking_phone = if ctx.role.acts_for_customers() {
        present(&ctx.booking_customer_phone)
    } else {
        None
    };

    let raw = booking_phone
        .or_else(|| present(&ctx.profile_phone))
        .or_else(|| present(&ctx.user_phone))
        .ok_or_else(|| PaymentError::MissingPayerPhone {
            username: ctx.username.clone(),
        })?;

    normalize_msisdn(raw)
}

/// Normalizes to `+255XXXXXXXXX`.
pub fn normalize_msisdn(raw: &str) -> PaymentResult<String> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();

    let candidate = if let Some(rest) = compact.strip_prefix('+') {
        format!("+{}", rest)
    } else if compact.starts_with(COUNTRY_CODE) {
        format!("+{}", compact)
    } else if let Some(rest) = compact.strip_prefix('0') {
        format!("+{}{}", COUNTRY_CODE, rest)
    } else {
        compact
    };

    if is_valid_msisdn(&candidate) {
        Ok(candidate)
    } else {
        Err(PaymentError::InvalidPhoneFormat {
            phone: raw.to_string(),
        })
    }
}

pub fn is_valid_msisdn(value: &str) -> bool {
    match MSISDN_RE.get_or_init(|| Regex::new(r"^\+255\d{9}$").ok()) {
        Some(re) => re.is_match(value),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: UserRole) -> PayerContext {
        PayerContext {
            tenant_id: 42,
            username: "U42".to_string(),
            role,
            user_phone: None,
            profile_phone: None,
            booking_customer_phone: None,
        }
    }

    #[test]
    fn profile_phone_is_normalized() {
        let mut c = ctx(UserRole::Customer);
        c.profile_phone = Some("0712345678".to_string());
        c.user_phone = Some("0799999999".to_string());
        assert_eq!(resolve_payer_phone(&c).unwrap(), "+255712345678");
    }

    #[test]
    fn staff_pays_with_booking_customer_phone() {
        let mut c = ctx(UserRole::Staff);
        c.profile_phone = Some("0712345678".to_string());
        c.booking_customer_phone = Some("+255699000111".to_string());
        assert_eq!(resolve_payer_phone(&c).unwrap(), "+255699000111");
    }

    #[test]
    fn customer_never_uses_booking_phone() {
        let mut c = ctx(UserRole::Customer);
        c.booking_customer_phone = Some("+255699000111".to_string());
        c.user_phone = Some("255 688-000-111".to_string());
        assert_eq!(resolve_payer_phone(&c).unwrap(), "+255688000111");
    }

    #[test]
    fn admin_without_booking_phone_falls_back_to_own_profile() {
        let mut c = ctx(UserRole::Admin);
        c.booking_customer_phone = Some("   ".to_string());
        c.profile_phone = Some("0655 123 456".to_string());
        assert_eq!(resolve_payer_phone(&c).unwrap(), "+255655123456");
    }

    #[test]
    fn missing_phone_reports_username() {
        let mut c = ctx(UserRole::Customer);
        c.username = "U99".to_string();
        match resolve_payer_phone(&c) {
            Err(PaymentError::MissingPayerPhone { username }) => assert_eq!(username, "U99"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn normalization_rejects_foreign_and_short_numbers() {
        for bad in ["+254712345678", "071234567", "12345", "+2557123456789", "07123x5678"] {
            assert!(
                matches!(normalize_msisdn(bad), Err(PaymentError::InvalidPhoneFormat { .. })),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn every_accepted_output_matches_the_e164_shape() {
        for good in ["0712345678", "255712345678", "+255712345678", "0712-345-678"] {
            let msisdn = normalize_msisdn(good).unwrap();
            assert!(is_valid_msisdn(&msisdn));
            assert_eq!(msisdn.len(), 13);
        }
    }
}
