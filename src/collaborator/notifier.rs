//! User notifications.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ShopResult;
use crate::persistence::EntityStore;

/// Sends a named notification to a user.
#[async_trait]
pub trait Notifier: Send + Sync + std::fmt::Debug {
    /// Delivers `template` rendered with `data` to every channel of the
    /// user.
    async fn notify(&self, user_id: i64, template: &str, data: &serde_json::Value) -> ShopResult<()>;
}

/// Replaces `{{key}}` placeholders with top-level values of `data`.
///
/// Strings are inserted verbatim, other JSON values in their compact form.
/// Unknown keys render as empty.
#[must_use]
pub fn render_template(body: &str, data: &serde_json::Value) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(start) = rest.find("{{") {
        let (head, tail) = rest.split_at(start);
        out.push_str(head);
        let Some(end) = tail.find("}}") else {
            out.push_str(tail);
            return out;
        };
        let key = tail.get(2..end).unwrap_or_default().trim();
        match data.get(key) {
            Some(serde_json::Value::String(s)) => out.push_str(s),
            Some(serde_json::Value::Null) | None => {}
            Some(other) => out.push_str(&other.to_string()),
        }
        rest = tail.get(end + 2..).unwrap_or_default();
    }
    out.push_str(rest);
    out
}

/// Renders stored e-mail templates and writes every delivery to the log.
#[derive(Debug)]
pub struct LogNotifier {
    store: Arc<dyn EntityStore>,
}

impl LogNotifier {
    /// A notifier reading templates and tokens from `store`.
    #[must_use]
    pub const fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: i64, template: &str, data: &serde_json::Value) -> ShopResult<()> {
        let user = self.store.get_user(user_id).await?;
        match self.store.get_email_template(template).await? {
            Some(tpl) if tpl.enabled => {
                tracing::info!(
                    user_id,
                    to = %user.email,
                    template,
                    subject = %render_template(&tpl.subject, data),
                    body = %render_template(&tpl.body, data),
                    "email sent"
                );
            }
            _ => tracing::debug!(user_id, template, "no enabled email template"),
        }
        for token in self.store.list_push_tokens(user_id).await? {
            tracing::info!(user_id, platform = %token.platform, template, "push sent");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::persistence::test_support;

    #[test]
    fn placeholders_render_from_data() {
        let data = serde_json::json!({"name": "vps-1", "days": 3, "none": null});
        assert_eq!(
            render_template("{{ name }} expires in {{days}} days{{none}}{{missing}}", &data),
            "vps-1 expires in 3 days"
        );
    }

    #[test]
    fn unterminated_placeholder_is_kept() {
        let data = serde_json::json!({});
        assert_eq!(render_template("hello {{name", &data), "hello {{name");
    }

    #[tokio::test]
    async fn notify_reads_template_and_tokens() {
        let store = test_support::store().await;
        let alice = test_support::user(&store, "alice").await;
        tokio_test::assert_ok!(
            store
                .upsert_email_template("vps_expired", "{{name}} expired", "bye", true)
                .await
        );
        tokio_test::assert_ok!(store.register_push_token(alice.id, "ios", "tok-1").await);
        let notifier = LogNotifier::new(Arc::clone(&store));
        tokio_test::assert_ok!(
            notifier
                .notify(alice.id, "vps_expired", &serde_json::json!({"name": "vps-1"}))
                .await
        );
        tokio_test::assert_ok!(notifier.notify(alice.id, "unknown", &serde_json::json!({})).await);
    }

    #[tokio::test]
    async fn unknown_user_fails() {
        let store = test_support::store().await;
        let notifier = LogNotifier::new(store);
        tokio_test::assert_err!(notifier.notify(404, "any", &serde_json::json!({})).await);
    }
}
