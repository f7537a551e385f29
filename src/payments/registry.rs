use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::str::FromStr;

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::{ProviderKind, ProviderRecord};

/// Providers shipped with the service: (code, display name, kind, fee %).
const BUILTIN_PROVIDERS: [(&str, &str, ProviderKind, &str); 7] = [
    ("airtel", "Airtel", ProviderKind::MobileMoney, "1.50"),
    ("tigo", "Tigo", ProviderKind::MobileMoney, "1.50"),
    ("halopesa", "Halopesa", ProviderKind::MobileMoney, "1.50"),
    ("azampesa", "Azampesa", ProviderKind::MobileMoney, "1.00"),
    ("mpesa", "Mpesa", ProviderKind::MobileMoney, "1.50"),
    ("crdb", "CRDB", ProviderKind::Bank, "1.00"),
    ("nmb", "NMB", ProviderKind::Bank, "1.00"),
];

/// In-process catalogue of payment providers.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderRecord>,
}

impl ProviderRegistry {
    pub fn new(records: Vec<ProviderRecord>) -> PaymentResult<Self> {
        let mut providers = HashMap::new();
        for record in records {
            validate_fee(&record)?;
            let key = normalize_code(&record.code);
            if key.is_empty() {
                return Err(PaymentError::ValidationError {
                    message: "provider code cannot be empty".to_string(),
                    field: Some("code".to_string()),
                });
            }
            providers.insert(key, record);
        }
        Ok(Self { providers })
    }

    pub fn builtin() -> Self {
        Self {
            providers: builtin_records()
                .into_iter()
                .map(|r| (normalize_code(&r.code), r))
                .collect(),
        }
    }

    /// Active provider by code (case-insensitive).
    pub fn get(&self, code: &str) -> PaymentResult<&ProviderRecord> {
        let record = self
            .providers
            .get(&normalize_code(code))
            .ok_or_else(|| PaymentError::UnknownProvider {
                code: code.to_string(),
            })?;
        if !record.is_active {
            return Err(PaymentError::ProviderInactive {
                code: record.code.clone(),
            });
        }
        Ok(record)
    }

    pub fn list_active(&self) -> Vec<&ProviderRecord> {
        let mut active: Vec<&ProviderRecord> =
            self.providers.values().filter(|p| p.is_active).collect();
        active.sort_by(|a, b| a.code.cmp(&b.code));
        active
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

pub fn builtin_records() -> Vec<ProviderRecord> {
    BUILTIN_PROVIDERS
        .iter()
        .map(|(code, name, kind, fee)| ProviderRecord {
            code: code.to_string(),
            display_name: name.to_string(),
            kind: *kind,
            is_active: true,
            fee_percent: BigDecimal::from_str(fee).unwrap_or_default(),
        })
        .collect()
}

fn normalize_code(code: &str) -> String {
    code.trim().to_lowercase()
}

fn validate_fee(record: &ProviderRecord) -> PaymentResult<()> {
    let fee = &record.fee_percent;
    let in_range = *fee >= BigDecimal::from(0) && *fee <= BigDecimal::from(100);
    if !in_range || fee.with_scale(2) != *fee {
        return Err(PaymentError::ValidationError {
            message: format!(
                "fee for provider {} must be between 0 and 100 with at most 2 decimals",
                record.code
            ),
            field: Some("fee_percent".to_string()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(code: &str, active: bool, fee: &str) -> ProviderRecord {
        ProviderRecord {
            code: code.to_string(),
            display_name: code.to_uppercase(),
            kind: ProviderKind::MobileMoney,
            is_active: active,
            fee_percent: BigDecimal::from_str(fee).unwrap(),
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = ProviderRegistry::builtin();
        let airtel = registry.get("Airtel").expect("airtel is built in");
        assert_eq!(airtel.display_name, "Airtel");
        assert_eq!(airtel.kind, ProviderKind::MobileMoney);
        assert_eq!(registry.get("CRDB").unwrap().kind, ProviderKind::Bank);
    }

    #[test]
    fn unknown_and_inactive_providers_fail_distinctly() {
        let registry =
            ProviderRegistry::new(vec![record("tigo", false, "1.50"), record("airtel", true, "1")])
                .unwrap();
        assert!(matches!(
            registry.get("vodacom"),
            Err(PaymentError::UnknownProvider { .. })
        ));
        assert!(matches!(
            registry.get("tigo"),
            Err(PaymentError::ProviderInactive { .. })
        ));
        let active: Vec<&str> = registry.list_active().iter().map(|p| p.code.as_str()).collect();
        assert_eq!(active, vec!["airtel"]);
    }

    #[test]
    fn fee_must_be_a_two_decimal_percentage() {
        assert!(ProviderRegistry::new(vec![record("a", true, "100.00")]).is_ok());
        assert!(ProviderRegistry::new(vec![record("a", true, "100.01")]).is_err());
        assert!(ProviderRegistry::new(vec![record("a", true, "-1")]).is_err());
        assert!(ProviderRegistry::new(vec![record("a", true, "1.125")]).is_err());
    }
}
