//! One-time verification codes and captchas.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::Rng;
use serde::Serialize;

use crate::error::{ShopError, ShopResult};
use crate::persistence::EntityStore;

/// Lifetime of a code or captcha.
const CODE_TTL_MINUTES: i64 = 10;

/// Captcha alphabet without look-alike characters.
const CAPTCHA_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A freshly issued verification code.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedCode {
    /// Row id.
    pub id: i64,
    /// The code to deliver.
    pub code: String,
}

/// A freshly issued captcha.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct CaptchaChallenge {
    /// Handle the client sends back.
    pub id: String,
    /// Text to render.
    pub code: String,
}

/// Issues and checks codes sent over e-mail or SMS.
#[async_trait]
pub trait VerificationIssuer: Send + Sync + std::fmt::Debug {
    /// Creates a code for `receiver`.
    async fn issue(&self, channel: &str, receiver: &str, purpose: &str) -> ShopResult<IssuedCode>;
    /// Consumes a code; `false` when wrong, expired or already used.
    async fn verify(&self, channel: &str, receiver: &str, purpose: &str, code: &str)
    -> ShopResult<bool>;
}

/// Issues and checks captchas.
#[async_trait]
pub trait CaptchaIssuer: Send + Sync + std::fmt::Debug {
    /// Creates a captcha.
    async fn issue(&self) -> ShopResult<CaptchaChallenge>;
    /// Consumes a captcha; any attempt burns it.
    async fn verify(&self, id: &str, code: &str) -> ShopResult<bool>;
}

fn six_digits() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

fn captcha_text(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .filter_map(|_| CAPTCHA_ALPHABET.get(rng.gen_range(0..CAPTCHA_ALPHABET.len())))
        .map(|b| char::from(*b))
        .collect()
}

/// Six-digit codes stored in `verification_codes`.
#[derive(Debug)]
pub struct StoreVerificationIssuer {
    store: Arc<dyn EntityStore>,
}

impl StoreVerificationIssuer {
    /// An issuer over `store`.
    #[must_use]
    pub const fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl VerificationIssuer for StoreVerificationIssuer {
    async fn issue(&self, channel: &str, receiver: &str, purpose: &str) -> ShopResult<IssuedCode> {
        if receiver.trim().is_empty() {
            return Err(ShopError::InvalidInput("receiver is required".to_string()));
        }
        let code = six_digits();
        let expires_at = Utc::now() + Duration::minutes(CODE_TTL_MINUTES);
        let row = self
            .store
            .create_verification_code(channel, receiver, purpose, &code, expires_at)
            .await?;
        tracing::debug!(id = row.id, channel, purpose, "verification code issued");
        Ok(IssuedCode { id: row.id, code })
    }

    async fn verify(
        &self,
        channel: &str,
        receiver: &str,
        purpose: &str,
        code: &str,
    ) -> ShopResult<bool> {
        self.store
            .consume_verification_code(channel, receiver, purpose, code, Utc::now())
            .await
    }
}

/// Captchas stored in `captchas`.
#[derive(Debug)]
pub struct StoreCaptchaIssuer {
    store: Arc<dyn EntityStore>,
}

impl StoreCaptchaIssuer {
    /// An issuer over `store`.
    #[must_use]
    pub const fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CaptchaIssuer for StoreCaptchaIssuer {
    async fn issue(&self) -> ShopResult<CaptchaChallenge> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let code = captcha_text(5);
        let expires_at = Utc::now() + Duration::minutes(CODE_TTL_MINUTES);
        self.store.create_captcha(&id, &code, expires_at).await?;
        Ok(CaptchaChallenge { id, code })
    }

    async fn verify(&self, id: &str, code: &str) -> ShopResult<bool> {
        self.store.consume_captcha(id, code, Utc::now()).await
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::persistence::test_support;

    #[test]
    fn generated_codes_have_expected_shape() {
        let code = six_digits();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        let text = captcha_text(5);
        assert_eq!(text.len(), 5);
        assert!(text.bytes().all(|b| CAPTCHA_ALPHABET.contains(&b)));
    }

    #[tokio::test]
    async fn issued_code_verifies_once() {
        let store = test_support::store().await;
        let issuer = StoreVerificationIssuer::new(store);
        let Ok(issued) = issuer.issue("email", "a@example.com", "register").await else {
            panic!("issue failed");
        };
        let Ok(false) = issuer.verify("email", "a@example.com", "login", &issued.code).await else {
            panic!("wrong purpose accepted");
        };
        let Ok(true) = issuer.verify("email", "a@example.com", "register", &issued.code).await else {
            panic!("code rejected");
        };
        let Ok(false) = issuer.verify("email", "a@example.com", "register", &issued.code).await else {
            panic!("code reused");
        };
    }

    #[tokio::test]
    async fn empty_receiver_is_rejected() {
        let store = test_support::store().await;
        let issuer = StoreVerificationIssuer::new(store);
        let Err(ShopError::InvalidInput(_)) = issuer.issue("sms", " ", "login").await else {
            panic!("empty receiver accepted");
        };
    }

    #[tokio::test]
    async fn wrong_captcha_burns_it() {
        let store = test_support::store().await;
        let issuer = StoreCaptchaIssuer::new(store);
        let Ok(challenge) = issuer.issue().await else {
            panic!("issue failed");
        };
        let Ok(false) = issuer.verify(&challenge.id, "nope").await else {
            panic!("wrong captcha accepted");
        };
        let Ok(false) = issuer.verify(&challenge.id, &challenge.code).await else {
            panic!("burned captcha accepted");
        };
    }
}
