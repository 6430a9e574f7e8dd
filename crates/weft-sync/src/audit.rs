use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use ulid::Ulid;
use weft_core::ActorId;

/// Append-only record of a privileged mutation. Written once, never updated
/// or deleted by this subsystem.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub audit_id: String,
    pub community_id: String,
    pub actor_id: ActorId,
    pub target_id: Option<ActorId>,
    pub action: String,
    pub detail: serde_json::Value,
    pub created_at_unix: i64,
}

impl AuditEntry {
    #[must_use]
    pub fn new(
        community_id: &str,
        actor_id: ActorId,
        target_id: Option<ActorId>,
        action: &str,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            audit_id: Ulid::new().to_string(),
            community_id: community_id.to_owned(),
            actor_id,
            target_id,
            action: action.to_owned(),
            detail,
            created_at_unix: now_unix(),
        }
    }
}

#[must_use]
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}
