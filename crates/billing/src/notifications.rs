//! In-app notifications for organization admins

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::store::BillingStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    PaymentSuccess,
    PaymentFailed,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::PaymentSuccess => "payment_success",
            NotificationType::PaymentFailed => "payment_failed",
        }
    }
}

/// One `notifications` row
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub title: String,
    pub message: String,
    pub notification_type: NotificationType,
}

/// Fans a message out to every admin/owner profile of an organization
#[derive(Clone)]
pub struct AdminNotifier {
    store: Arc<dyn BillingStore>,
}

impl AdminNotifier {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Returns how many notifications were written. Failures are logged, not
    /// returned: a missed notification must not undo a reconciled payment.
    pub async fn notify_admins(
        &self,
        organization_id: Uuid,
        notification_type: NotificationType,
        title: &str,
        message: &str,
    ) -> usize {
        let admins = match self.store.list_org_admins(organization_id).await {
            Ok(admins) => admins,
            Err(e) => {
                tracing::error!(
                    org_id = %organization_id,
                    error = %e,
                    "Failed to load organization admins for notification"
                );
                return 0;
            }
        };

        let mut sent = 0;
        for user_id in admins {
            let notification = NewNotification {
                user_id,
                organization_id,
                title: title.to_string(),
                message: message.to_string(),
                notification_type,
            };
            match self.store.insert_notification(notification).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    tracing::error!(
                        org_id = %organization_id,
                        user_id = %user_id,
                        error = %e,
                        "Failed to create admin notification"
                    );
                }
            }
        }

        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;

    #[tokio::test]
    async fn test_notifies_every_admin() {
        let store = Arc::new(MemoryStore::new());
        let org_id = Uuid::new_v4();
        store.add_profile(org_id, "owner");
        store.add_profile(org_id, "admin");
        store.add_profile(org_id, "member");

        let notifier = AdminNotifier::new(store.clone());
        let sent = notifier
            .notify_admins(
                org_id,
                NotificationType::PaymentSuccess,
                "Payment received",
                "Thanks!",
            )
            .await;

        assert_eq!(sent, 2);
        assert_eq!(store.notifications().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        let store = Arc::new(MemoryStore::new());
        let org_id = Uuid::new_v4();
        store.add_profile(org_id, "admin");
        store.fail_writes("notifications");

        let notifier = AdminNotifier::new(store.clone());
        let sent = notifier
            .notify_admins(org_id, NotificationType::PaymentFailed, "t", "m")
            .await;

        assert_eq!(sent, 0);
    }
}
