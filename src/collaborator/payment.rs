//! Payment provider seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::Order;
use crate::error::{ShopError, ShopResult};

/// What the payer needs to complete a payment.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct PaymentInstructions {
    /// Provider method name.
    pub method: String,
    /// Reference the provider echoes back in its callback.
    pub merchant_ref: String,
    /// Amount to pay in minor units.
    pub amount: i64,
    /// ISO currency code.
    pub currency: String,
    /// Free-form instructions for the payer.
    pub instructions: String,
}

/// Normalised provider notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, utoipa::ToSchema)]
pub struct PaymentCallback {
    /// The reference handed out with the instructions.
    pub merchant_ref: String,
    /// Provider trade number.
    pub trade_no: String,
    /// Whether the provider reports the payment as settled.
    pub paid: bool,
}

/// A payment method backed by an outside provider.
#[async_trait]
pub trait PaymentProvider: Send + Sync + std::fmt::Debug {
    /// Method name stored on payment rows.
    fn method(&self) -> &str;

    /// Instructions for paying `order`; `merchant_ref` identifies the
    /// payment row created for the attempt.
    async fn start_payment(&self, order: &Order, merchant_ref: &str) -> ShopResult<PaymentInstructions>;

    /// Parses and authenticates a raw callback body.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidInput`] for a malformed payload.
    fn parse_callback(&self, payload: &serde_json::Value) -> ShopResult<PaymentCallback>;
}

#[derive(Debug, Deserialize)]
struct ManualCallbackBody {
    merchant_ref: String,
    trade_no: String,
    status: String,
}

/// Bank transfer: the payer wires money and an operator or bank hook
/// reports it through the callback endpoint.
#[derive(Debug, Clone)]
pub struct ManualPaymentProvider {
    account: String,
}

impl ManualPaymentProvider {
    /// A provider pointing payers at `account`.
    #[must_use]
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }
}

#[async_trait]
impl PaymentProvider for ManualPaymentProvider {
    fn method(&self) -> &str {
        "bank_transfer"
    }

    async fn start_payment(&self, order: &Order, merchant_ref: &str) -> ShopResult<PaymentInstructions> {
        Ok(PaymentInstructions {
            method: self.method().to_string(),
            merchant_ref: merchant_ref.to_string(),
            amount: order.total_amount,
            currency: order.currency.clone(),
            instructions: format!(
                "transfer {} {} to {} quoting {merchant_ref}",
                order.total_amount, order.currency, self.account
            ),
        })
    }

    fn parse_callback(&self, payload: &serde_json::Value) -> ShopResult<PaymentCallback> {
        let body: ManualCallbackBody = serde_json::from_value(payload.clone())
            .map_err(|e| ShopError::InvalidInput(format!("invalid callback: {e}")))?;
        let merchant_ref = body.merchant_ref.trim().to_string();
        let trade_no = body.trade_no.trim().to_string();
        if merchant_ref.is_empty() || trade_no.is_empty() {
            return Err(ShopError::InvalidInput(
                "callback needs merchant_ref and trade_no".to_string(),
            ));
        }
        let paid = matches!(
            body.status.trim().to_ascii_lowercase().as_str(),
            "paid" | "success" | "succeeded" | "trade_success"
        );
        Ok(PaymentCallback {
            merchant_ref,
            trade_no,
            paid,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn callback_status_maps_to_paid() {
        let provider = ManualPaymentProvider::new("ACME 0001");
        let payload = serde_json::json!({
            "merchant_ref": " pending-1-99 ",
            "trade_no": "T-1",
            "status": "SUCCESS",
        });
        let Ok(cb) = provider.parse_callback(&payload) else {
            panic!("parse failed");
        };
        assert_eq!(cb.merchant_ref, "pending-1-99");
        assert!(cb.paid);

        let payload = serde_json::json!({"merchant_ref": "m", "trade_no": "t", "status": "closed"});
        let Ok(cb) = provider.parse_callback(&payload) else {
            panic!("parse failed");
        };
        assert!(!cb.paid);
    }

    #[test]
    fn callback_requires_references() {
        let provider = ManualPaymentProvider::new("ACME 0001");
        let payload = serde_json::json!({"merchant_ref": "", "trade_no": "T", "status": "paid"});
        let Err(ShopError::InvalidInput(_)) = provider.parse_callback(&payload) else {
            panic!("empty reference accepted");
        };
        let Err(ShopError::InvalidInput(_)) = provider.parse_callback(&serde_json::json!([1])) else {
            panic!("array accepted");
        };
    }
}
