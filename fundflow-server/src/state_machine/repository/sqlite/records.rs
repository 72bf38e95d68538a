//! Audit log and notification outbox tables.
//!
//! Both are append-only and keyed by deterministic ids, so a write that is
//! repeated after a crash or retry lands on the existing row and is ignored.

use rusqlite::params;

use fundflow_core::{AuditEntry, NotificationRequest, RequestId};

use super::{millis, query_data, sql_error, to_json, SqliteRepository};
use crate::state_machine::repository::RepositoryError;

impl SqliteRepository {
    pub(super) async fn append_audit_impl(
        &self,
        entry: &AuditEntry,
    ) -> Result<bool, RepositoryError> {
        let id = entry.id.to_string();
        let entity_id = entry.entity_id.clone();
        let action = entry.action.as_str();
        let data = to_json(entry, "serialize audit entry")?;
        let recorded_at = millis(entry.recorded_at);

        self.run("append audit", move |conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO audit_log (id, entity_id, action, data, recorded_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id, entity_id, action, data, recorded_at],
                )
                .map_err(sql_error("append audit"))?;
            Ok(inserted == 1)
        })
        .await
    }

    pub(super) async fn list_audit_impl(
        &self,
        entity_id: &str,
    ) -> Result<Vec<AuditEntry>, RepositoryError> {
        let entity_id = entity_id.to_string();
        self.run("list audit", move |conn| {
            query_data(
                conn,
                "SELECT data FROM audit_log WHERE entity_id = ?1 ORDER BY seq",
                params![entity_id],
                "list audit",
                "audit JSON",
            )
        })
        .await
    }

    pub(super) async fn enqueue_notification_impl(
        &self,
        notification: &NotificationRequest,
    ) -> Result<bool, RepositoryError> {
        let id = notification.id.to_string();
        let request_id = notification.request_id.to_string();
        let template = notification.template.as_str();
        let data = to_json(notification, "serialize notification")?;
        let created_at = millis(notification.created_at);

        self.run("enqueue notification", move |conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO notifications (id, request_id, template, data, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id, request_id, template, data, created_at],
                )
                .map_err(sql_error("enqueue notification"))?;
            Ok(inserted == 1)
        })
        .await
    }

    pub(super) async fn list_notifications_impl(
        &self,
        request_id: RequestId,
    ) -> Result<Vec<NotificationRequest>, RepositoryError> {
        self.run("list notifications", move |conn| {
            query_data(
                conn,
                "SELECT data FROM notifications WHERE request_id = ?1 ORDER BY seq",
                params![request_id.to_string()],
                "list notifications",
                "notification JSON",
            )
        })
        .await
    }
}
