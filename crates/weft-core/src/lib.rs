#![forbid(unsafe_code)]

//! Domain model and pure authorization resolution for weft communities.
//!
//! Everything in this crate is synchronous computation over owned data:
//! identifier newtypes validated at the data-access boundary, the capability
//! catalog, and the resolver that decides what an actor may do in a community
//! or channel. Live state and subscriptions live in `weft-sync`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

mod catalog;
mod resolver;
mod roles;

pub use catalog::{
    all_server_capabilities, default_everyone_capabilities, known_channel_mask, known_server_mask,
    mask_channel_capabilities, mask_server_capabilities, server_equivalent, ChannelCapability,
    ChannelCapabilitySet, ServerCapability, ServerCapabilitySet,
};
pub use resolver::{
    can_access_community_settings, can_ban_member, can_kick_member, can_manage_message,
    can_timeout_member, check_channel_capability, effective_permissions, has_server_capability,
    visible_channels, ChannelDecision, DenyReason,
};
pub use roles::{
    highest_position, Channel, ChannelOverride, Membership, Role, EVERYONE_POSITION,
    OWNER_POSITION,
};

/// Reserved identifier of the synthetic role held by every member.
pub const ROLE_EVERYONE: &str = "everyone";
/// Reserved identifier of the synthetic role held by the community owner.
pub const ROLE_OWNER: &str = "owner";

const MAX_ROLE_NAME_CHARS: usize = 32;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("name is invalid")]
    InvalidName,
    #[error("actor id is invalid")]
    InvalidActorId,
    #[error("role id is invalid")]
    InvalidRoleId,
    #[error("role color is invalid")]
    InvalidRoleColor,
    #[error("a capability appears in both allow and deny")]
    ConflictingOverride,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(Ulid);

impl ActorId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<String> for ActorId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let parsed = Ulid::from_string(&value).map_err(|_| DomainError::InvalidActorId)?;
        Ok(Self(parsed))
    }
}

impl core::fmt::Display for ActorId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for ActorId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for ActorId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// Role identifier within a community: a ULID string, or one of the two
/// reserved identifiers `everyone` and `owner`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoleId(String);

impl RoleId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    #[must_use]
    pub fn everyone() -> Self {
        Self(String::from(ROLE_EVERYONE))
    }

    #[must_use]
    pub fn owner() -> Self {
        Self(String::from(ROLE_OWNER))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_everyone(&self) -> bool {
        self.0 == ROLE_EVERYONE
    }

    #[must_use]
    pub fn is_owner(&self) -> bool {
        self.0 == ROLE_OWNER
    }

    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.is_everyone() || self.is_owner()
    }
}

impl TryFrom<String> for RoleId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == ROLE_EVERYONE || value == ROLE_OWNER {
            return Ok(Self(value));
        }
        Ulid::from_string(&value).map_err(|_| DomainError::InvalidRoleId)?;
        Ok(Self(value))
    }
}

impl From<RoleId> for String {
    fn from(value: RoleId) -> Self {
        value.0
    }
}

impl core::fmt::Display for RoleId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoleName(String);

impl RoleName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoleName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_name(&value, 1, MAX_ROLE_NAME_CHARS)?;
        Ok(Self(value))
    }
}

impl From<RoleName> for String {
    fn from(value: RoleName) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommunityName(String);

impl CommunityName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CommunityName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_name(&value, 1, 64)?;
        Ok(Self(value))
    }
}

impl From<CommunityName> for String {
    fn from(value: CommunityName) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelName(String);

impl ChannelName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ChannelName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_name(&value, 1, 64)?;
        Ok(Self(value))
    }
}

impl From<ChannelName> for String {
    fn from(value: ChannelName) -> Self {
        value.0
    }
}

/// `#rrggbb` role color.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoleColor(String);

impl RoleColor {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RoleColor {
    fn default() -> Self {
        Self(String::from("#99aab5"))
    }
}

impl TryFrom<String> for RoleColor {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let Some(digits) = value.strip_prefix('#') else {
            return Err(DomainError::InvalidRoleColor);
        };
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidRoleColor);
        }
        Ok(Self(value.to_ascii_lowercase()))
    }
}

impl From<RoleColor> for String {
    fn from(value: RoleColor) -> Self {
        value.0
    }
}

fn validate_name(value: &str, min: usize, max: usize) -> Result<(), DomainError> {
    if !(min..=max).contains(&value.len()) {
        return Err(DomainError::InvalidName);
    }

    if value.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
        return Ok(());
    }

    Err(DomainError::InvalidName)
}
