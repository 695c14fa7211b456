//! Audit log entries
//!
//! Every state change made by the payment flows leaves one row in
//! `audit_logs`. Audit writes are part of the operation: unlike analytics
//! they are awaited and their failure is logged by the caller.

use serde::Serialize;
use uuid::Uuid;

/// Actions recorded in `audit_logs.action`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    PaymentSessionCreated,
    PaymentSessionAborted,
    PaymentCompleted,
    PaymentFailed,
    PaymentExpired,
    TrialExpired,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::PaymentSessionCreated => "payment_session_created",
            AuditAction::PaymentSessionAborted => "payment_session_aborted",
            AuditAction::PaymentCompleted => "payment_completed",
            AuditAction::PaymentFailed => "payment_failed",
            AuditAction::PaymentExpired => "payment_expired",
            AuditAction::TrialExpired => "trial_expired",
        }
    }
}

/// One `audit_logs` row
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub organization_id: Uuid,
    pub action: AuditAction,
    pub entity_type: &'static str,
    pub entity_id: Option<Uuid>,
    pub details: serde_json::Value,
}

impl AuditEntry {
    pub fn new(organization_id: Uuid, action: AuditAction) -> Self {
        Self {
            organization_id,
            action,
            entity_type: "organization",
            entity_id: Some(organization_id),
            details: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn invoice(mut self, invoice_id: Uuid) -> Self {
        self.entity_type = "invoice";
        self.entity_id = Some(invoice_id);
        self
    }

    pub fn transaction(mut self, transaction_id: Uuid) -> Self {
        self.entity_type = "payment_transaction";
        self.entity_id = Some(transaction_id);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_targets_last_entity() {
        let org_id = Uuid::new_v4();
        let invoice_id = Uuid::new_v4();
        let entry = AuditEntry::new(org_id, AuditAction::PaymentFailed)
            .invoice(invoice_id)
            .details(serde_json::json!({"reason": "expired"}));

        assert_eq!(entry.entity_type, "invoice");
        assert_eq!(entry.entity_id, Some(invoice_id));
        assert_eq!(entry.details["reason"], "expired");
    }

    #[test]
    fn test_action_strings_match_serde_names() {
        let action = AuditAction::PaymentSessionCreated;
        let json = serde_json::to_value(action).unwrap();
        assert_eq!(json, action.as_str());
    }
}
