use crate::payments::credentials::{ProviderEnv, Secret};
use crate::payments::error::PaymentResult;
use crate::payments::types::{
    CallbackPayload, CheckoutContext, CheckoutOutcome, CheckoutRequest, RawProviderResponse,
    WebhookVerificationResult,
};
use async_trait::async_trait;

/// A checkout channel. The initiator and reconciler only talk to providers
/// through this trait.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Stable adapter name used in logs and persisted transactions.
    fn code(&self) -> &str;

    fn build_checkout_request(&self, ctx: &CheckoutContext) -> PaymentResult<CheckoutRequest>;

    /// Sends the request. Only transport failures are errors; declines come
    /// back as a response for [`PaymentProvider::parse_checkout_response`].
    async fn submit_checkout(
        &self,
        env: &ProviderEnv,
        token: &Secret,
        request: &CheckoutRequest,
    ) -> PaymentResult<RawProviderResponse>;

    fn parse_checkout_response(&self, response: &RawProviderResponse) -> CheckoutOutcome;

    fn verify_callback_signature(
        &self,
        payload: &CallbackPayload,
        header_signature: Option<&str>,
    ) -> WebhookVerificationResult;
}
