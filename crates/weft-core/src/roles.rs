use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::catalog::{
    all_server_capabilities, default_everyone_capabilities, ChannelCapabilitySet,
    ServerCapability, ServerCapabilitySet,
};
use crate::{ActorId, DomainError, RoleColor, RoleId, RoleName};

pub const EVERYONE_POSITION: i32 = 0;
pub const OWNER_POSITION: i32 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub role_id: RoleId,
    pub name: RoleName,
    pub color: RoleColor,
    pub capabilities: ServerCapabilitySet,
    pub position: i32,
    pub mentionable: bool,
    pub created_at_unix: i64,
}

impl Role {
    /// The synthetic role implicitly held by every member. It is stored in
    /// the catalog so its grants can be edited, but resolution materializes
    /// it even when storage lacks the record.
    #[must_use]
    pub fn everyone(created_at_unix: i64) -> Self {
        Self {
            role_id: RoleId::everyone(),
            name: RoleName(String::from("@everyone")),
            color: RoleColor::default(),
            capabilities: default_everyone_capabilities(),
            position: EVERYONE_POSITION,
            mentionable: true,
            created_at_unix,
        }
    }

    /// The synthetic role materialized for the community owner. Never
    /// deletable, never assignable, never removable from its holder.
    #[must_use]
    pub fn owner(created_at_unix: i64) -> Self {
        Self {
            role_id: RoleId::owner(),
            name: RoleName(String::from("owner")),
            color: RoleColor::default(),
            capabilities: all_server_capabilities(),
            position: OWNER_POSITION,
            mentionable: false,
            created_at_unix,
        }
    }

    #[must_use]
    pub fn grants(&self, capability: ServerCapability) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Per-actor role assignment within a community. The implicit `everyone`
/// role is never stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub community_id: String,
    pub actor_id: ActorId,
    pub role_ids: HashSet<RoleId>,
    pub joined_at_unix: i64,
}

/// Channel-scoped allow/deny exception for one role. The two sets are
/// disjoint; construction rejects overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelOverride {
    pub allow: ChannelCapabilitySet,
    pub deny: ChannelCapabilitySet,
}

impl ChannelOverride {
    pub fn new(
        allow: ChannelCapabilitySet,
        deny: ChannelCapabilitySet,
    ) -> Result<Self, DomainError> {
        if allow.bits() & deny.bits() != 0 {
            return Err(DomainError::ConflictingOverride);
        }
        Ok(Self { allow, deny })
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: String,
    pub name: crate::ChannelName,
    pub overrides: HashMap<RoleId, ChannelOverride>,
}

impl Channel {
    #[must_use]
    pub fn override_for(&self, role_id: &RoleId) -> Option<&ChannelOverride> {
        self.overrides.get(role_id)
    }
}

/// Highest hierarchy rank across held roles; `i32::MIN` for an empty set so
/// an actor with no resolved roles never clears a hierarchy gate.
#[must_use]
pub fn highest_position(roles: &[Role]) -> i32 {
    roles
        .iter()
        .map(|role| role.position)
        .max()
        .unwrap_or(i32::MIN)
}
