//! Callback authenticity checks.
//!
//! AzamPay does not document a signature scheme, so verification sits behind
//! [`CallbackVerifier`] and can be swapped without touching the reconciler.

use crate::payments::credentials::Secret;
use crate::payments::types::{CallbackPayload, WebhookVerificationResult};
use crate::payments::utils::{secure_eq, verify_hmac_sha256_hex};

pub trait CallbackVerifier: Send + Sync {
    fn verify(&self, payload: &CallbackPayload, header_signature: Option<&str>)
        -> WebhookVerificationResult;
}

fn rejected(reason: &str) -> WebhookVerificationResult {
    WebhookVerificationResult {
        valid: false,
        reason: Some(reason.to_string()),
    }
}

const SECRET_NOT_CONFIGURED: &str = "callback secret not configured";

fn accepted() -> WebhookVerificationResult {
    WebhookVerificationResult {
        valid: true,
        reason: None,
    }
}

/// Hex HMAC-SHA256 over [`CallbackPayload::signing_string`], keyed with the
/// client secret. The signature may travel in the body or in a header.
///
/// An empty secret rejects every callback; an empty HMAC key is trivially
/// forgeable.
pub struct HmacSha256Verifier {
    secret: Secret,
}

impl HmacSha256Verifier {
    pub fn new(secret: Secret) -> Self {
        Self { secret }
    }
}

impl CallbackVerifier for HmacSha256Verifier {
    fn verify(
        &self,
        payload: &CallbackPayload,
        header_signature: Option<&str>,
    ) -> WebhookVerificationResult {
        if self.secret.expose().is_empty() {
            return rejected(SECRET_NOT_CONFIGURED);
        }
        let Some(signature) = payload.signature.as_deref().or(header_signature) else {
            return rejected("missing signature");
        };
        if verify_hmac_sha256_hex(
            payload.signing_string().as_bytes(),
            self.secret.expose(),
            signature,
        ) {
            accepted()
        } else {
            rejected("signature mismatch")
        }
    }
}

/// Plain shared-secret comparison, for deployments where the provider is
/// configured to echo a static token.
pub struct SharedSecretVerifier {
    secret: Secret,
}

impl SharedSecretVerifier {
    pub fn new(secret: Secret) -> Self {
        Self { secret }
    }
}

impl CallbackVerifier for SharedSecretVerifier {
    fn verify(
        &self,
        payload: &CallbackPayload,
        header_signature: Option<&str>,
    ) -> WebhookVerificationResult {
        if self.secret.expose().is_empty() {
            return rejected(SECRET_NOT_CONFIGURED);
        }
        let Some(signature) = payload.signature.as_deref().or(header_signature) else {
            return rejected("missing signature");
        };
        if secure_eq(signature.trim().as_bytes(), self.secret.expose().as_bytes()) {
            accepted()
        } else {
            rejected("signature mismatch")
        }
    }
}
