//! Cart service: priced cart lines per user.

use std::sync::Arc;

use serde::Deserialize;

use super::pricing;
use crate::domain::{CartItem, CartSpec, NewCartItem};
use crate::error::{ShopError, ShopResult};
use crate::persistence::EntityStore;

/// Add or replace request for one cart line.
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct CartItemRequest {
    /// Package to buy.
    pub package_id: i64,
    /// OS image to install.
    pub system_id: i64,
    /// Addons and term.
    #[serde(default)]
    pub spec: CartSpec,
    /// Instances; values ≤ 0 mean 1.
    #[serde(default)]
    pub qty: i64,
}

/// Prices and stores cart lines.
///
/// Every write re-prices the line against the current catalog, so a stored
/// `amount` is always `unit_total × qty` at the time of the last change.
#[derive(Debug, Clone)]
pub struct CartService {
    store: Arc<dyn EntityStore>,
}

impl CartService {
    /// Creates a new `CartService`.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    async fn priced(&self, user_id: i64, req: &CartItemRequest) -> ShopResult<NewCartItem> {
        let qty = if req.qty <= 0 { 1 } else { req.qty };
        let line = pricing::price_line(&*self.store, req.package_id, req.system_id, &req.spec).await?;
        let amount = line
            .quote
            .unit_total
            .checked_mul(qty)
            .ok_or_else(|| ShopError::InvalidInput("cart amount overflows".to_string()))?;
        Ok(NewCartItem {
            user_id,
            package_id: line.package.id,
            system_id: line.image.id,
            spec_json: serde_json::to_string(&line.spec)?,
            qty,
            amount,
        })
    }

    /// Adds a priced line.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::InvalidInput`] when the line cannot be sold and
    /// [`ShopError::NotFound`] for unknown catalog rows.
    pub async fn add_item(&self, user_id: i64, req: &CartItemRequest) -> ShopResult<CartItem> {
        let item = self.priced(user_id, req).await?;
        let row = self.store.add_cart_item(&item).await?;
        tracing::info!(user_id, cart_item_id = row.id, amount = row.amount, "cart item added");
        Ok(row)
    }

    /// Replaces a line owned by the user.
    ///
    /// # Errors
    ///
    /// Same as [`CartService::add_item`]; [`ShopError::NotFound`] when the
    /// line does not belong to the user.
    pub async fn update_item(
        &self,
        user_id: i64,
        id: i64,
        req: &CartItemRequest,
    ) -> ShopResult<CartItem> {
        let item = self.priced(user_id, req).await?;
        self.store.update_cart_item(id, &item).await
    }

    /// Removes a line.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::NotFound`] when the line does not belong to the
    /// user.
    pub async fn remove_item(&self, user_id: i64, id: i64) -> ShopResult<()> {
        self.store.delete_cart_item(id, user_id).await
    }

    /// Lines of a user.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list(&self, user_id: i64) -> ShopResult<Vec<CartItem>> {
        self.store.list_cart_items(user_id).await
    }

    /// Empties the cart.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn clear(&self, user_id: i64) -> ShopResult<()> {
        self.store.clear_cart(user_id).await
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::persistence::test_support;

    #[tokio::test]
    async fn add_prices_line_and_defaults_qty() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let (_, package, image) = test_support::catalog(&store).await;
        let carts = CartService::new(Arc::clone(&store));
        let req = CartItemRequest {
            package_id: package.id,
            system_id: image.id,
            spec: CartSpec {
                add_cores: 1,
                ..CartSpec::default()
            },
            qty: 0,
        };
        let Ok(row) = carts.add_item(alice.id, &req).await else {
            panic!("add failed");
        };
        assert_eq!(row.qty, 1);
        // 99900 + 1 core × 1000, one month
        assert_eq!(row.amount, 100_900);
        let Ok(spec) = CartSpec::parse(&row.spec_json) else {
            panic!("stored spec unreadable");
        };
        assert_eq!(spec.duration_months, 1);

        let Ok(updated) = carts
            .update_item(alice.id, row.id, &CartItemRequest { qty: 3, ..req })
            .await
        else {
            panic!("update failed");
        };
        assert_eq!(updated.amount, 302_700);
    }

    #[tokio::test]
    async fn out_of_range_addon_is_rejected() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let (_, package, image) = test_support::catalog(&store).await;
        let carts = CartService::new(Arc::clone(&store));
        let req = CartItemRequest {
            package_id: package.id,
            system_id: image.id,
            spec: CartSpec {
                add_bw_mbps: 10,
                ..CartSpec::default()
            },
            qty: 1,
        };
        let Err(ShopError::InvalidInput(_)) = carts.add_item(alice.id, &req).await else {
            panic!("disallowed addon accepted");
        };
        let Ok(rows) = carts.list(alice.id).await else {
            panic!("list failed");
        };
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        let (_, package, image) = test_support::catalog(&store).await;
        let carts = CartService::new(Arc::clone(&store));
        let req = CartItemRequest {
            package_id: package.id,
            system_id: image.id,
            spec: CartSpec::default(),
            qty: 1,
        };
        let Ok(first) = carts.add_item(alice.id, &req).await else {
            panic!("add failed");
        };
        tokio_test::assert_ok!(carts.add_item(alice.id, &req).await);
        tokio_test::assert_err!(carts.remove_item(alice.id + 1, first.id).await);
        tokio_test::assert_ok!(carts.remove_item(alice.id, first.id).await);
        tokio_test::assert_ok!(carts.clear(alice.id).await);
        let Ok(rows) = carts.list(alice.id).await else {
            panic!("list failed");
        };
        assert!(rows.is_empty());
    }
}
