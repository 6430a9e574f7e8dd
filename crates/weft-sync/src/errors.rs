/// Failures surfaced by the synchronization service. Only the refresh
/// deadline is a raised failure; subscription delivery faults are logged and
/// absorbed.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("a live subscription already exists for {key}")]
    AlreadySubscribed { key: String },
    #[error("no snapshot arrived within {waited_ms} ms")]
    RefreshTimeout { waited_ms: u64 },
}

/// Outcomes of administrative mutations. `Forbidden` covers both missing
/// capabilities and hierarchy gate failures.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AdminError {
    #[error("operation forbidden")]
    Forbidden,
    #[error("community not found")]
    CommunityNotFound,
    #[error("channel not found")]
    ChannelNotFound,
    #[error("role not found")]
    RoleNotFound,
    #[error("member not found")]
    MemberNotFound,
    #[error("name is invalid")]
    InvalidName,
    #[error("role is reserved")]
    ReservedRole,
    #[error("a capability appears in both allow and deny")]
    OverrideConflict,
}
