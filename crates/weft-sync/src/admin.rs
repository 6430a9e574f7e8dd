//! Administrative mutations over the community directory.
//!
//! Every operation authorizes the acting actor through the resolver, applies
//! the change as a document write (which fans out to live subscriptions),
//! and appends an audit entry. Deleting a role cascades: assignments and
//! channel override entries referencing it are removed in the same pass.

use std::collections::{HashMap, HashSet};

use serde_json::json;
use tracing::{info, warn};
use ulid::Ulid;
use weft_core::{
    can_kick_member, has_server_capability, highest_position, mask_server_capabilities, ActorId,
    Channel, ChannelCapabilitySet, ChannelName, ChannelOverride, CommunityName, Membership, Role,
    RoleColor, RoleId, RoleName, ServerCapability, ServerCapabilitySet,
};

use crate::audit::{now_unix, AuditEntry};
use crate::directory::{CommunityDirectory, CommunityRecord};
use crate::errors::AdminError;
use crate::snapshot::resolve_member_roles;

#[derive(Debug, Clone)]
pub struct NewRole {
    pub name: String,
    pub color: RoleColor,
    pub capabilities: ServerCapabilitySet,
    pub position: i32,
    pub mentionable: bool,
}

/// Partial role edit; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct RoleEdit {
    pub name: Option<String>,
    pub color: Option<RoleColor>,
    pub capabilities: Option<ServerCapabilitySet>,
    pub position: Option<i32>,
    pub mentionable: Option<bool>,
}

struct ActorContext {
    community: CommunityRecord,
    roles: Vec<Role>,
    is_owner: bool,
}

async fn actor_context(
    directory: &CommunityDirectory,
    community_id: &str,
    actor_id: ActorId,
) -> Result<ActorContext, AdminError> {
    let community = directory
        .read_community(community_id)
        .await
        .ok_or(AdminError::CommunityNotFound)?;
    let membership = directory.read_membership(community_id, actor_id).await;
    let roles = resolve_member_roles(&community, membership.as_ref(), actor_id);
    let is_owner = community.owner_id == actor_id;
    Ok(ActorContext {
        community,
        roles,
        is_owner,
    })
}

/// Creates a community seeded with the reserved `everyone` and `owner`
/// roles and the owner's membership. Returns the new community id.
pub async fn create_community(
    directory: &CommunityDirectory,
    name: &str,
    owner_id: ActorId,
) -> Result<String, AdminError> {
    let name =
        CommunityName::try_from(name.to_owned()).map_err(|_| AdminError::InvalidName)?;
    let community_id = Ulid::new().to_string();
    let created_at_unix = now_unix();

    let everyone = Role::everyone(created_at_unix);
    let owner_role = Role::owner(created_at_unix);
    let roles = HashMap::from([
        (everyone.role_id.clone(), everyone),
        (owner_role.role_id.clone(), owner_role),
    ]);

    directory
        .put_community(CommunityRecord {
            community_id: community_id.clone(),
            name: name.as_str().to_owned(),
            owner_id,
            roles,
            channels: HashMap::new(),
            created_at_unix,
        })
        .await;
    directory
        .put_membership(Membership {
            community_id: community_id.clone(),
            actor_id: owner_id,
            role_ids: HashSet::new(),
            joined_at_unix: created_at_unix,
        })
        .await;

    directory
        .append_audit(AuditEntry::new(
            &community_id,
            owner_id,
            None,
            "community.create",
            json!({ "name": name.as_str() }),
        ))
        .await;
    Ok(community_id)
}

pub async fn create_channel(
    directory: &CommunityDirectory,
    community_id: &str,
    acting: ActorId,
    name: &str,
) -> Result<String, AdminError> {
    let name = ChannelName::try_from(name.to_owned()).map_err(|_| AdminError::InvalidName)?;
    let ctx = actor_context(directory, community_id, acting).await?;
    if !has_server_capability(&ctx.roles, ServerCapability::ManageChannels, ctx.is_owner) {
        return Err(AdminError::Forbidden);
    }

    let channel_id = Ulid::new().to_string();
    let channel = Channel {
        channel_id: channel_id.clone(),
        name: name.clone(),
        overrides: HashMap::new(),
    };
    if !directory
        .modify_community(community_id, |record| {
            record.channels.insert(channel_id.clone(), channel);
        })
        .await
    {
        return Err(AdminError::CommunityNotFound);
    }

    directory
        .append_audit(AuditEntry::new(
            community_id,
            acting,
            None,
            "channel.create",
            json!({ "channel_id": channel_id, "name": name.as_str() }),
        ))
        .await;
    Ok(channel_id)
}

/// Adds an actor to a community with no assigned roles. Idempotent.
pub async fn join_community(
    directory: &CommunityDirectory,
    community_id: &str,
    actor_id: ActorId,
) -> Result<(), AdminError> {
    if directory.read_community(community_id).await.is_none() {
        return Err(AdminError::CommunityNotFound);
    }
    if directory
        .read_membership(community_id, actor_id)
        .await
        .is_some()
    {
        return Ok(());
    }
    directory
        .put_membership(Membership {
            community_id: community_id.to_owned(),
            actor_id,
            role_ids: HashSet::new(),
            joined_at_unix: now_unix(),
        })
        .await;
    directory
        .append_audit(AuditEntry::new(
            community_id,
            actor_id,
            None,
            "member.join",
            json!({}),
        ))
        .await;
    Ok(())
}

pub async fn create_role(
    directory: &CommunityDirectory,
    community_id: &str,
    acting: ActorId,
    new_role: NewRole,
) -> Result<Role, AdminError> {
    let ctx = actor_context(directory, community_id, acting).await?;
    if !has_server_capability(&ctx.roles, ServerCapability::ManageRoles, ctx.is_owner) {
        return Err(AdminError::Forbidden);
    }
    if !ctx.is_owner && new_role.position >= highest_position(&ctx.roles) {
        return Err(AdminError::Forbidden);
    }

    let name = RoleName::try_from(new_role.name).map_err(|_| AdminError::InvalidName)?;
    let capabilities = masked_capabilities(new_role.capabilities, community_id, "role.create");
    let role = Role {
        role_id: RoleId::generate(),
        name,
        color: new_role.color,
        capabilities,
        position: new_role.position,
        mentionable: new_role.mentionable,
        created_at_unix: now_unix(),
    };

    let stored = role.clone();
    if !directory
        .modify_community(community_id, |record| {
            record.roles.insert(stored.role_id.clone(), stored);
        })
        .await
    {
        return Err(AdminError::CommunityNotFound);
    }

    directory
        .append_audit(AuditEntry::new(
            community_id,
            acting,
            None,
            "role.create",
            json!({
                "role_id": role.role_id.as_str(),
                "name": role.name.as_str(),
                "position": role.position,
            }),
        ))
        .await;
    Ok(role)
}

pub async fn update_role(
    directory: &CommunityDirectory,
    community_id: &str,
    acting: ActorId,
    role_id: &RoleId,
    edit: RoleEdit,
) -> Result<Role, AdminError> {
    let ctx = actor_context(directory, community_id, acting).await?;
    if !has_server_capability(&ctx.roles, ServerCapability::ManageRoles, ctx.is_owner) {
        return Err(AdminError::Forbidden);
    }
    let current = ctx
        .community
        .roles
        .get(role_id)
        .ok_or(AdminError::RoleNotFound)?;
    if role_id.is_owner() {
        return Err(AdminError::ReservedRole);
    }
    // `everyone` keeps its name and pinned position; its grants are editable.
    if role_id.is_everyone() && (edit.name.is_some() || edit.position.is_some()) {
        return Err(AdminError::ReservedRole);
    }
    let acting_highest = highest_position(&ctx.roles);
    if !ctx.is_owner
        && (current.position >= acting_highest
            || edit.position.is_some_and(|position| position >= acting_highest))
    {
        return Err(AdminError::Forbidden);
    }

    let name = match edit.name {
        Some(name) => Some(RoleName::try_from(name).map_err(|_| AdminError::InvalidName)?),
        None => None,
    };
    let capabilities = edit
        .capabilities
        .map(|set| masked_capabilities(set, community_id, "role.update"));

    let mut updated: Option<Role> = None;
    directory
        .modify_community(community_id, |record| {
            if let Some(role) = record.roles.get_mut(role_id) {
                if let Some(name) = name {
                    role.name = name;
                }
                if let Some(color) = edit.color {
                    role.color = color;
                }
                if let Some(capabilities) = capabilities {
                    role.capabilities = capabilities;
                }
                if let Some(position) = edit.position {
                    role.position = position;
                }
                if let Some(mentionable) = edit.mentionable {
                    role.mentionable = mentionable;
                }
                updated = Some(role.clone());
            }
        })
        .await;
    let updated = updated.ok_or(AdminError::RoleNotFound)?;

    directory
        .append_audit(AuditEntry::new(
            community_id,
            acting,
            None,
            "role.update",
            json!({
                "role_id": role_id.as_str(),
                "position": updated.position,
                "capability_bits": updated.capabilities.bits(),
            }),
        ))
        .await;
    Ok(updated)
}

/// Deletes a role and cascades the removal through every membership that
/// holds it and every channel override that references it.
pub async fn delete_role(
    directory: &CommunityDirectory,
    community_id: &str,
    acting: ActorId,
    role_id: &RoleId,
) -> Result<(), AdminError> {
    let ctx = actor_context(directory, community_id, acting).await?;
    if !has_server_capability(&ctx.roles, ServerCapability::ManageRoles, ctx.is_owner) {
        return Err(AdminError::Forbidden);
    }
    if role_id.is_reserved() {
        return Err(AdminError::ReservedRole);
    }
    let role = ctx
        .community
        .roles
        .get(role_id)
        .ok_or(AdminError::RoleNotFound)?;
    if !ctx.is_owner && role.position >= highest_position(&ctx.roles) {
        return Err(AdminError::Forbidden);
    }

    directory
        .modify_community(community_id, |record| {
            record.roles.remove(role_id);
            for channel in record.channels.values_mut() {
                channel.overrides.remove(role_id);
            }
        })
        .await;

    let mut cascaded_members = 0_usize;
    for membership in directory.memberships_in(community_id).await {
        if !membership.role_ids.contains(role_id) {
            continue;
        }
        let removed = directory
            .modify_membership(community_id, membership.actor_id, |record| {
                record.role_ids.remove(role_id);
            })
            .await;
        if removed {
            cascaded_members += 1;
        }
    }
    info!(
        event = "roles.delete.cascade",
        community_id,
        role_id = %role_id,
        cascaded_members,
        "removed deleted role from memberships and channel overrides"
    );

    directory
        .append_audit(AuditEntry::new(
            community_id,
            acting,
            None,
            "role.delete",
            json!({
                "role_id": role_id.as_str(),
                "cascaded_members": cascaded_members,
            }),
        ))
        .await;
    Ok(())
}

pub async fn assign_role(
    directory: &CommunityDirectory,
    community_id: &str,
    acting: ActorId,
    target: ActorId,
    role_id: &RoleId,
) -> Result<(), AdminError> {
    let ctx = actor_context(directory, community_id, acting).await?;
    if role_id.is_reserved() {
        return Err(AdminError::ReservedRole);
    }
    let role = ctx
        .community
        .roles
        .get(role_id)
        .ok_or(AdminError::RoleNotFound)?;
    if !can_grant_role(&ctx, role.position) {
        return Err(AdminError::Forbidden);
    }

    let granted = role_id.clone();
    if !directory
        .modify_membership(community_id, target, |membership| {
            membership.role_ids.insert(granted);
        })
        .await
    {
        return Err(AdminError::MemberNotFound);
    }

    directory
        .append_audit(AuditEntry::new(
            community_id,
            acting,
            Some(target),
            "role.assign",
            json!({ "role_id": role_id.as_str() }),
        ))
        .await;
    Ok(())
}

pub async fn remove_role(
    directory: &CommunityDirectory,
    community_id: &str,
    acting: ActorId,
    target: ActorId,
    role_id: &RoleId,
) -> Result<(), AdminError> {
    let ctx = actor_context(directory, community_id, acting).await?;
    if role_id.is_reserved() {
        // `owner` is never removable from its holder; `everyone` is implicit.
        return Err(AdminError::ReservedRole);
    }
    let role = ctx
        .community
        .roles
        .get(role_id)
        .ok_or(AdminError::RoleNotFound)?;
    if !can_grant_role(&ctx, role.position) {
        return Err(AdminError::Forbidden);
    }

    let mut removed = false;
    if !directory
        .modify_membership(community_id, target, |membership| {
            removed = membership.role_ids.remove(role_id);
        })
        .await
    {
        return Err(AdminError::MemberNotFound);
    }
    if removed {
        directory
            .append_audit(AuditEntry::new(
                community_id,
                acting,
                Some(target),
                "role.remove",
                json!({ "role_id": role_id.as_str() }),
            ))
            .await;
    }
    Ok(())
}

/// Replaces the allow/deny override one role carries in one channel. An
/// empty pair clears the entry so the role defers to community-level grants
/// again.
pub async fn set_channel_override(
    directory: &CommunityDirectory,
    community_id: &str,
    acting: ActorId,
    channel_id: &str,
    role_id: &RoleId,
    allow: ChannelCapabilitySet,
    deny: ChannelCapabilitySet,
) -> Result<(), AdminError> {
    let ctx = actor_context(directory, community_id, acting).await?;
    if !has_server_capability(&ctx.roles, ServerCapability::ManageChannels, ctx.is_owner) {
        return Err(AdminError::Forbidden);
    }
    if !ctx.community.roles.contains_key(role_id) {
        return Err(AdminError::RoleNotFound);
    }
    if !ctx.community.channels.contains_key(channel_id) {
        return Err(AdminError::ChannelNotFound);
    }
    let entry = ChannelOverride::new(allow, deny).map_err(|_| AdminError::OverrideConflict)?;

    let stored_role = role_id.clone();
    directory
        .modify_community(community_id, |record| {
            if let Some(channel) = record.channels.get_mut(channel_id) {
                if entry.is_empty() {
                    channel.overrides.remove(&stored_role);
                } else {
                    channel.overrides.insert(stored_role, entry);
                }
            }
        })
        .await;

    directory
        .append_audit(AuditEntry::new(
            community_id,
            acting,
            None,
            "channel.override.update",
            json!({
                "channel_id": channel_id,
                "role": role_id.as_str(),
                "allow_bits": allow.bits(),
                "deny_bits": deny.bits(),
            }),
        ))
        .await;
    Ok(())
}

/// Removes a member. Hierarchy-gated: requires `kick_members` and a strictly
/// higher role position than the target; the community owner is untouchable.
pub async fn kick_member(
    directory: &CommunityDirectory,
    community_id: &str,
    acting: ActorId,
    target: ActorId,
) -> Result<(), AdminError> {
    let ctx = actor_context(directory, community_id, acting).await?;
    if target == ctx.community.owner_id {
        return Err(AdminError::Forbidden);
    }
    let target_membership = directory
        .read_membership(community_id, target)
        .await
        .ok_or(AdminError::MemberNotFound)?;
    let target_roles = resolve_member_roles(&ctx.community, Some(&target_membership), target);
    if !can_kick_member(&ctx.roles, &target_roles, ctx.is_owner) {
        return Err(AdminError::Forbidden);
    }

    directory.delete_membership(community_id, target).await;
    directory
        .append_audit(AuditEntry::new(
            community_id,
            acting,
            Some(target),
            "member.kick",
            json!({}),
        ))
        .await;
    Ok(())
}

/// Gate for role (de)assignment: ownership bypasses; otherwise
/// `manage_roles` plus a strictly higher position than the granted role.
fn can_grant_role(ctx: &ActorContext, role_position: i32) -> bool {
    if ctx.is_owner {
        return true;
    }
    if !has_server_capability(&ctx.roles, ServerCapability::ManageRoles, false) {
        return false;
    }
    highest_position(&ctx.roles) > role_position
}

fn masked_capabilities(
    requested: ServerCapabilitySet,
    community_id: &str,
    surface: &'static str,
) -> ServerCapabilitySet {
    let (known, unknown_bits) = mask_server_capabilities(requested.bits());
    if unknown_bits != 0 {
        warn!(
            event = "roles.unknown_bits.masked",
            community_id,
            surface,
            unknown_bits = format_args!("{unknown_bits:#x}"),
        );
    }
    known
}
