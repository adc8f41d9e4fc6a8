//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Resource endpoints are mounted under `/api/v1`, back-office endpoints
//! under `/api/v1/admin`. `/health` and the OpenAPI document sit at the
//! root.

pub mod dto;
pub mod extract;
pub mod handlers;
pub mod openapi;

use axum::Router;

use crate::app_state::AppState;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
        .merge(openapi::routes())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::api::extract::{ADMIN_HEADER, USER_HEADER};
    use crate::collaborator::{ManualPaymentProvider, SimulatedAutomation};
    use crate::config::ShopConfig;
    use crate::domain::EventBus;
    use crate::persistence::{EntityStore, test_support};

    struct TestApp {
        router: Router,
        store: Arc<dyn EntityStore>,
    }

    async fn app() -> TestApp {
        let store = test_support::store().await;
        let state = AppState::new(
            Arc::clone(&store),
            Arc::new(SimulatedAutomation::new()),
            Arc::new(ManualPaymentProvider::new("ACME 001")),
            EventBus::new(64),
            &ShopConfig::in_memory(),
        );
        TestApp {
            router: build_router().with_state(state),
            store,
        }
    }

    async fn call(
        router: &Router,
        method: &str,
        uri: &str,
        identity: Option<(&str, i64)>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((header, id)) = identity {
            builder = builder.header(header, id.to_string());
        }
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let Ok(request) = builder.body(body) else {
            panic!("request build failed");
        };
        let response = router
            .clone()
            .oneshot(request)
            .await
            .unwrap_or_else(|never| match never {});
        let status = response.status();
        let Ok(bytes) = axum::body::to_bytes(response.into_body(), usize::MAX).await else {
            panic!("body read failed");
        };
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            let Ok(value) = serde_json::from_slice(&bytes) else {
                panic!("response is not json: {bytes:?}");
            };
            value
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_database() {
        let t = app().await;
        let (status, body) = call(&t.router, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["database"], "up");
    }

    #[tokio::test]
    async fn identity_header_is_required() {
        let t = app().await;
        let (status, body) = call(&t.router, "GET", "/api/v1/cart", None, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["error"]["message"].as_str().is_some_and(|m| m.contains(USER_HEADER)));

        let (status, _) = call(&t.router, "GET", "/api/v1/admin/orders", Some((USER_HEADER, 1)), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admin_routes_accept_admin_identity() {
        let t = app().await;
        let admin = Some((ADMIN_HEADER, 9));
        let (status, page) = call(&t.router, "GET", "/api/v1/admin/orders", admin, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(page["data"].as_array().is_some_and(Vec::is_empty));

        let (status, _) = call(&t.router, "POST", "/api/v1/admin/orders/77/approve", admin, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cart_checkout_and_balance_payment() {
        let t = app().await;
        let alice = test_support::user(&t.store, "alice").await;
        let (_, package, image) = test_support::catalog(&t.store).await;
        let user = Some((USER_HEADER, alice.id));

        let (status, line) = call(
            &t.router,
            "POST",
            "/api/v1/cart",
            user,
            Some(json!({"package_id": package.id, "system_id": image.id, "qty": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(line["amount"], 99_900);

        let (status, detail) =
            call(&t.router, "POST", "/api/v1/orders/checkout", user, Some(json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(detail["order"]["status"], "pending_payment");
        let Some(order_id) = detail["order"]["id"].as_i64() else {
            panic!("no order id in {detail}");
        };

        let pay = json!({"method": "balance", "amount": 99_900});
        let uri = format!("/api/v1/orders/{order_id}/payments");
        let (status, _) = call(&t.router, "POST", &uri, user, Some(pay.clone())).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, wallet) = call(
            &t.router,
            "POST",
            &format!("/api/v1/admin/wallets/{}/adjust", alice.id),
            Some((ADMIN_HEADER, 9)),
            Some(json!({"delta": 100_000, "note": "top up"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(wallet["balance"], 100_000);

        let (status, payment) = call(&t.router, "POST", &uri, user, Some(pay)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(payment["status"], "approved");

        let (status, detail) =
            call(&t.router, "GET", &format!("/api/v1/orders/{order_id}"), user, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["order"]["status"], "provisioning");

        let (status, page) = call(&t.router, "GET", "/api/v1/wallet/transactions", user, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["pagination"]["count"], 2);
    }

    #[tokio::test]
    async fn foreign_orders_are_not_found() {
        let t = app().await;
        let alice = test_support::user(&t.store, "alice").await;
        let (status, body) = call(
            &t.router,
            "GET",
            "/api/v1/orders/4242",
            Some((USER_HEADER, alice.id)),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"]["code"].is_number());
    }

    #[tokio::test]
    async fn openapi_lists_routes() {
        let t = app().await;
        let (status, doc) = call(&t.router, "GET", "/api-docs/openapi.json", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(doc["paths"]["/api/v1/orders/checkout"].is_object());
        assert!(doc["paths"]["/api/v1/admin/orders/{id}/approve"].is_object());
    }
}
