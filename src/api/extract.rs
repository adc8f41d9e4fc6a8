//! Caller identity extractors.
//!
//! Authentication happens in front of this service. The fronting gateway
//! forwards the resolved account id in `X-User-Id`, and the back office in
//! `X-Admin-Id`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ShopError;

/// Header carrying the customer id.
pub const USER_HEADER: &str = "x-user-id";
/// Header carrying the operator id.
pub const ADMIN_HEADER: &str = "x-admin-id";

/// The calling customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub i64);

/// The calling operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminId(pub i64);

fn header_id(parts: &Parts, name: &str) -> Result<i64, ShopError> {
    let Some(raw) = parts.headers.get(name) else {
        tracing::debug!(header = name, uri = %parts.uri, "identity header missing");
        return Err(ShopError::Forbidden(format!("missing {name} header")));
    };
    raw.to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| ShopError::Forbidden(format!("malformed {name} header")))
}

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = ShopError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_id(parts, USER_HEADER).map(Self)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for AdminId {
    type Rejection = ShopError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_id(parts, ADMIN_HEADER).map(Self)
    }
}
