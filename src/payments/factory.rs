use crate::payments::credentials::{ProviderEnv, Secret};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::providers::{AzamPayBankProvider, AzamPayMnoProvider, AzamPayTokenSource};
use crate::payments::signature::{CallbackVerifier, HmacSha256Verifier};
use crate::payments::token_cache::TokenSource;
use crate::payments::types::{CallbackPayload, ProviderKind, WebhookVerificationResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Maps provider kinds to adapters, plus the token source they share.
#[derive(Clone)]
pub struct PaymentProviderFactory {
    adapters: HashMap<ProviderKind, Arc<dyn PaymentProvider>>,
    callback_adapter: Arc<dyn PaymentProvider>,
    token_source: Arc<dyn TokenSource>,
}

impl PaymentProviderFactory {
    /// AzamPay for mobile money and banks, callbacks verified with an HMAC
    /// keyed by the client secret. Without a client secret every callback is
    /// rejected.
    pub fn azampay(env: &ProviderEnv) -> PaymentResult<Self> {
        let secret = env
            .client_secret
            .clone()
            .unwrap_or_else(|| Secret::new(String::new()));
        let verifier: Arc<dyn CallbackVerifier> = Arc::new(HmacSha256Verifier::new(secret));
        Self::azampay_with_verifier(verifier)
    }

    pub fn azampay_with_verifier(verifier: Arc<dyn CallbackVerifier>) -> PaymentResult<Self> {
        let mno: Arc<dyn PaymentProvider> = Arc::new(AzamPayMnoProvider::new(verifier.clone())?);
        let bank: Arc<dyn PaymentProvider> = Arc::new(AzamPayBankProvider::new(verifier)?);
        let token_source: Arc<dyn TokenSource> = Arc::new(AzamPayTokenSource::new()?);
        Ok(Self::new(token_source, mno).with_adapter(ProviderKind::Bank, bank))
    }

    /// `mobile_money` is served by `default_adapter`, which also verifies
    /// callbacks.
    pub fn new(token_source: Arc<dyn TokenSource>, default_adapter: Arc<dyn PaymentProvider>) -> Self {
        let mut adapters = HashMap::new();
        adapters.insert(ProviderKind::MobileMoney, default_adapter.clone());
        Self {
            adapters,
            callback_adapter: default_adapter,
            token_source,
        }
    }

    pub fn with_adapter(mut self, kind: ProviderKind, adapter: Arc<dyn PaymentProvider>) -> Self {
        self.adapters.insert(kind, adapter);
        self
    }

    pub fn adapter_for(&self, kind: ProviderKind) -> PaymentResult<Arc<dyn PaymentProvider>> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| PaymentError::UnknownProvider {
                code: format!("no checkout adapter for {} providers", kind),
            })
    }

    pub fn token_source(&self) -> Arc<dyn TokenSource> {
        self.token_source.clone()
    }

    pub fn verify_callback(
        &self,
        payload: &CallbackPayload,
        header_signature: Option<&str>,
    ) -> WebhookVerificationResult {
        self.callback_adapter
            .verify_callback_signature(payload, header_signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::signature::SharedSecretVerifier;
    use crate::payments::utils::sign_hmac_sha256_hex;

    #[test]
    fn adapters_are_selected_by_provider_kind() {
        let factory = PaymentProviderFactory::azampay_with_verifier(Arc::new(
            SharedSecretVerifier::new(Secret::new("s")),
        ))
        .unwrap();
        assert_eq!(
            factory.adapter_for(ProviderKind::MobileMoney).unwrap().code(),
            "azampay_mno"
        );
        assert_eq!(
            factory.adapter_for(ProviderKind::Bank).unwrap().code(),
            "azampay_bank"
        );
        assert!(matches!(
            factory.adapter_for(ProviderKind::Gateway),
            Err(PaymentError::UnknownProvider { .. })
        ));
        assert_eq!(factory.token_source().provider(), "azampay");
    }

    #[test]
    fn callbacks_are_rejected_without_client_secret() {
        let factory = PaymentProviderFactory::azampay(&ProviderEnv::from_lookup(|_| None)).unwrap();
        let signature = sign_hmac_sha256_hex(b"42-abc|X|10000|success", "").unwrap();
        let body = serde_json::json!({
            "externalId": "42-abc",
            "transactionId": "X",
            "amount": "10000",
            "status": "success",
            "signature": signature,
        });
        let payload = CallbackPayload::from_slice(body.to_string().as_bytes()).unwrap();

        let result = factory.verify_callback(&payload, None);
        assert!(!result.valid);
        assert_eq!(result.reason.as_deref(), Some("callback secret not configured"));
    }
}
