//! Push payload rendering and the notifications a controller has shown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

use crate::NotificationDefaults;

/// Incoming push message. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub notification: Option<PushNotification>,
    #[serde(default)]
    pub data: Option<PushData>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotification {
    pub title: Option<String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushData {
    pub url: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
}

/// A notification as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub title: String,
    pub body: String,
    pub icon: Url,
    pub badge: Url,
    /// Target opened on click, unresolved.
    pub url: String,
}

/// Result of clicking a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// An existing window already showed the target and was focused.
    Focused(String),
    /// A new window was opened on the target.
    Opened(String),
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

impl PushPayload {
    fn title(&self) -> Option<&str> {
        self.notification
            .as_ref()
            .and_then(|n| non_empty(&n.title))
            .or_else(|| self.data.as_ref().and_then(|d| non_empty(&d.title)))
    }

    fn body(&self) -> Option<&str> {
        self.notification
            .as_ref()
            .and_then(|n| non_empty(&n.body))
            .or_else(|| self.data.as_ref().and_then(|d| non_empty(&d.body)))
    }

    fn url(&self) -> Option<&str> {
        self.data.as_ref().and_then(|d| non_empty(&d.url))
    }
}

/// Build the notification for a payload.
///
/// Title and body prefer the `notification` block, then `data`, then the
/// defaults. Icons resolve against `scope`; unresolvable icons fall back to
/// the scope itself.
pub fn render(payload: &PushPayload, defaults: &NotificationDefaults, scope: &Url) -> Notification {
    static COUNTER: AtomicU64 = AtomicU64::new(1);

    let resolve = |path: &str| scope.join(path).unwrap_or_else(|_| scope.clone());

    Notification {
        id: COUNTER.fetch_add(1, Ordering::Relaxed),
        title: payload.title().unwrap_or(&defaults.title).to_string(),
        body: payload.body().unwrap_or(&defaults.body).to_string(),
        icon: resolve(&defaults.icon),
        badge: resolve(&defaults.badge),
        url: payload.url().unwrap_or(&defaults.url).to_string(),
    }
}

/// Notifications currently displayed.
#[derive(Debug, Clone, Default)]
pub struct NotificationCenter {
    shown: Arc<RwLock<Vec<Notification>>>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn show(&self, notification: Notification) {
        self.shown.write().await.push(notification);
    }

    /// Close a notification. Returns whether it was shown.
    pub async fn close(&self, id: u64) -> bool {
        let mut shown = self.shown.write().await;
        let before = shown.len();
        shown.retain(|n| n.id != id);
        shown.len() != before
    }

    pub async fn shown(&self) -> Vec<Notification> {
        self.shown.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Url {
        Url::parse("https://shop.example.com/admin/").unwrap()
    }

    #[test]
    fn test_render_defaults() {
        let n = render(&PushPayload::default(), &NotificationDefaults::default(), &scope());
        assert_eq!(n.title, "You're So Golden");
        assert_eq!(n.body, "You have a new notification");
        assert_eq!(n.url, "./index.html");
        assert_eq!(n.icon.as_str(), "https://shop.example.com/admin/icon-192.png");
    }

    #[test]
    fn test_render_prefers_notification_block() {
        let payload: PushPayload = serde_json::from_str(
            r#"{
                "notification": {"title": "New order", "body": "Order #1042"},
                "data": {"title": "ignored", "body": "ignored", "url": "./orders.html"}
            }"#,
        )
        .unwrap();

        let n = render(&payload, &NotificationDefaults::default(), &scope());
        assert_eq!(n.title, "New order");
        assert_eq!(n.body, "Order #1042");
        assert_eq!(n.url, "./orders.html");
    }

    #[test]
    fn test_render_data_only_and_empty_strings() {
        let payload: PushPayload = serde_json::from_str(
            r#"{"notification": {"title": ""}, "data": {"title": "Low stock", "body": ""}}"#,
        )
        .unwrap();

        let n = render(&payload, &NotificationDefaults::default(), &scope());
        assert_eq!(n.title, "Low stock");
        assert_eq!(n.body, "You have a new notification");
    }

    #[tokio::test]
    async fn test_notification_center() {
        let center = NotificationCenter::new();
        let n = render(&PushPayload::default(), &NotificationDefaults::default(), &scope());
        let id = n.id;

        center.show(n).await;
        assert_eq!(center.shown().await.len(), 1);
        assert!(center.close(id).await);
        assert!(!center.close(id).await);
        assert!(center.shown().await.is_empty());
    }
}
