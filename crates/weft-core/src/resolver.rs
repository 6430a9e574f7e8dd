//! Pure authorization decisions over an actor's resolved role list.
//!
//! Every function here is synchronous, reentrant, and infallible: absence of
//! data resolves to a denial, never an error. Channel decisions carry the
//! reason shown to the user when an action is refused.
//!
//! Channel override precedence is layered: explicit entries for held roles
//! other than `everyone` are consulted first (a deny from any of them beats
//! an allow from any other, regardless of role position), then the
//! `everyone` entry as the channel's baseline, then the community-level
//! grant through the capability mapping table.

use crate::catalog::{
    server_equivalent, ChannelCapability, ServerCapability, ServerCapabilitySet,
};
use crate::roles::{highest_position, Channel, ChannelOverride, Role};
use crate::ActorId;

/// Outcome of a channel capability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelDecision {
    Allowed,
    Denied(DenyReason),
}

impl ChannelDecision {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    #[must_use]
    pub const fn reason(&self) -> Option<&DenyReason> {
        match self {
            Self::Allowed => None,
            Self::Denied(reason) => Some(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DenyReason {
    #[error("cannot access channel")]
    CannotAccessChannel,
    #[error("channel is private")]
    ChannelPrivate,
    #[error("{} is explicitly denied in this channel", .0.as_str())]
    ExplicitlyDenied(ChannelCapability),
    #[error("no permission found for {}", .0.as_str())]
    NoGrant(ChannelCapability),
}

/// Community-wide capability check. Ownership and `administrator` bypass
/// everything; otherwise any held role granting the capability suffices.
#[must_use]
pub fn has_server_capability(
    roles: &[Role],
    capability: ServerCapability,
    is_owner: bool,
) -> bool {
    if is_owner || holds_administrator(roles) {
        return true;
    }
    roles.iter().any(|role| role.grants(capability))
}

/// Channel capability check, in strict precedence order. See the module
/// docs for the override layering.
#[must_use]
pub fn check_channel_capability(
    roles: &[Role],
    channel: &Channel,
    capability: ChannelCapability,
    is_owner: bool,
) -> ChannelDecision {
    if is_owner || holds_administrator(roles) {
        return ChannelDecision::Allowed;
    }

    if capability == ChannelCapability::ViewChannel {
        return check_view_channel(roles, channel);
    }

    // No finer-grained capability is reachable on an unviewable channel.
    if !check_view_channel(roles, channel).is_allowed() {
        return ChannelDecision::Denied(DenyReason::CannotAccessChannel);
    }

    match scan_role_overrides(roles, channel, capability) {
        OverrideVerdict::Deny => {
            return ChannelDecision::Denied(DenyReason::ExplicitlyDenied(capability));
        }
        OverrideVerdict::Allow => return ChannelDecision::Allowed,
        OverrideVerdict::Unset => {}
    }

    if let Some(entry) = channel.override_for(&crate::RoleId::everyone()) {
        if entry.deny.contains(capability) {
            return ChannelDecision::Denied(DenyReason::ExplicitlyDenied(capability));
        }
        if entry.allow.contains(capability) {
            return ChannelDecision::Allowed;
        }
    }

    let mapped = server_equivalent(capability);
    if roles.iter().any(|role| role.grants(mapped)) {
        return ChannelDecision::Allowed;
    }

    ChannelDecision::Denied(DenyReason::NoGrant(capability))
}

/// Channels the actor may see, in the order given.
#[must_use]
pub fn visible_channels<'a>(
    roles: &[Role],
    channels: &'a [Channel],
    is_owner: bool,
) -> Vec<&'a Channel> {
    channels
        .iter()
        .filter(|channel| {
            check_channel_capability(roles, channel, ChannelCapability::ViewChannel, is_owner)
                .is_allowed()
        })
        .collect()
}

/// Message moderation: the owner, the author, or any `manage_messages`
/// holder may edit or delete a message.
#[must_use]
pub fn can_manage_message(
    roles: &[Role],
    author_id: ActorId,
    caller_id: ActorId,
    is_owner: bool,
) -> bool {
    if is_owner || author_id == caller_id {
        return true;
    }
    has_server_capability(roles, ServerCapability::ManageMessages, false)
}

#[must_use]
pub fn can_kick_member(caller_roles: &[Role], target_roles: &[Role], caller_is_owner: bool) -> bool {
    can_moderate(
        caller_roles,
        target_roles,
        caller_is_owner,
        ServerCapability::KickMembers,
    )
}

#[must_use]
pub fn can_ban_member(caller_roles: &[Role], target_roles: &[Role], caller_is_owner: bool) -> bool {
    can_moderate(
        caller_roles,
        target_roles,
        caller_is_owner,
        ServerCapability::BanMembers,
    )
}

#[must_use]
pub fn can_timeout_member(
    caller_roles: &[Role],
    target_roles: &[Role],
    caller_is_owner: bool,
) -> bool {
    can_moderate(
        caller_roles,
        target_roles,
        caller_is_owner,
        ServerCapability::TimeoutMembers,
    )
}

/// Aggregate gate for the community settings surface: management of the
/// community itself, its roles, or its channels.
#[must_use]
pub fn can_access_community_settings(roles: &[Role], is_owner: bool) -> bool {
    [
        ServerCapability::ManageCommunity,
        ServerCapability::ManageRoles,
        ServerCapability::ManageChannels,
    ]
    .into_iter()
    .any(|capability| has_server_capability(roles, capability, is_owner))
}

/// Fully resolved capability set for settings surfaces. `administrator`
/// collapses the answer to the administrator-only set; otherwise role grants
/// are unioned, then channel allows are added and denies subtracted, in that
/// order.
#[must_use]
pub fn effective_permissions(roles: &[Role], channel: Option<&Channel>) -> ServerCapabilitySet {
    if holds_administrator(roles) {
        let mut set = ServerCapabilitySet::empty();
        set.insert(ServerCapability::Administrator);
        return set;
    }

    let mut bits = roles
        .iter()
        .fold(0_u64, |bits, role| bits | role.capabilities.bits());

    if let Some(channel) = channel {
        let mut allowed = ServerCapabilitySet::empty();
        let mut denied = ServerCapabilitySet::empty();
        for entry in held_overrides(roles, channel) {
            for capability in channel_capabilities_in(entry.allow) {
                allowed.insert(server_equivalent(capability));
            }
            for capability in channel_capabilities_in(entry.deny) {
                denied.insert(server_equivalent(capability));
            }
        }
        bits |= allowed.bits();
        bits &= !denied.bits();
    }

    ServerCapabilitySet::from_bits(bits)
}

fn holds_administrator(roles: &[Role]) -> bool {
    roles
        .iter()
        .any(|role| role.grants(ServerCapability::Administrator))
}

enum OverrideVerdict {
    Deny,
    Allow,
    Unset,
}

/// Scans override entries of held roles other than `everyone`. A deny from
/// any entry wins over an allow from any other.
fn scan_role_overrides(
    roles: &[Role],
    channel: &Channel,
    capability: ChannelCapability,
) -> OverrideVerdict {
    let mut allowed = false;
    for role in roles.iter().filter(|role| !role.role_id.is_everyone()) {
        if let Some(entry) = channel.override_for(&role.role_id) {
            if entry.deny.contains(capability) {
                return OverrideVerdict::Deny;
            }
            if entry.allow.contains(capability) {
                allowed = true;
            }
        }
    }
    if allowed {
        OverrideVerdict::Allow
    } else {
        OverrideVerdict::Unset
    }
}

fn check_view_channel(roles: &[Role], channel: &Channel) -> ChannelDecision {
    match scan_role_overrides(roles, channel, ChannelCapability::ViewChannel) {
        OverrideVerdict::Deny => {
            return ChannelDecision::Denied(DenyReason::ExplicitlyDenied(
                ChannelCapability::ViewChannel,
            ));
        }
        OverrideVerdict::Allow => return ChannelDecision::Allowed,
        OverrideVerdict::Unset => {}
    }

    // An `everyone` deny marks the channel private by default; without an
    // explicit allow from another held role (checked above) it stays hidden.
    let everyone_denies = channel
        .override_for(&crate::RoleId::everyone())
        .is_some_and(|entry| entry.deny.contains(ChannelCapability::ViewChannel));
    if everyone_denies {
        return ChannelDecision::Denied(DenyReason::ChannelPrivate);
    }

    ChannelDecision::Allowed
}

fn can_moderate(
    caller_roles: &[Role],
    target_roles: &[Role],
    caller_is_owner: bool,
    capability: ServerCapability,
) -> bool {
    if caller_is_owner {
        return true;
    }
    if !has_server_capability(caller_roles, capability, false) {
        return false;
    }
    highest_position(caller_roles) > highest_position(target_roles)
}

fn held_overrides<'a>(roles: &[Role], channel: &'a Channel) -> Vec<&'a ChannelOverride> {
    roles
        .iter()
        .filter_map(|role| channel.override_for(&role.role_id))
        .collect()
}

fn channel_capabilities_in(set: crate::ChannelCapabilitySet) -> Vec<ChannelCapability> {
    [
        ChannelCapability::ViewChannel,
        ChannelCapability::SendMessages,
        ChannelCapability::ManageMessages,
        ChannelCapability::AttachFiles,
        ChannelCapability::AddReactions,
        ChannelCapability::MentionEveryone,
        ChannelCapability::MuteMembers,
    ]
    .into_iter()
    .filter(|capability| set.contains(*capability))
    .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{
        can_ban_member, can_kick_member, can_manage_message, can_timeout_member,
        check_channel_capability, effective_permissions, has_server_capability, visible_channels,
        ChannelDecision, DenyReason,
    };
    use crate::catalog::{
        ChannelCapability, ChannelCapabilitySet, ServerCapability, ServerCapabilitySet,
    };
    use crate::roles::{Channel, ChannelOverride, Role};
    use crate::{ActorId, ChannelName, RoleColor, RoleId, RoleName};

    fn role(name: &str, position: i32, capabilities: &[ServerCapability]) -> Role {
        let mut set = ServerCapabilitySet::empty();
        for capability in capabilities {
            set.insert(*capability);
        }
        Role {
            role_id: RoleId::generate(),
            name: RoleName::try_from(name.to_owned()).unwrap(),
            color: RoleColor::default(),
            capabilities: set,
            position,
            mentionable: true,
            created_at_unix: 0,
        }
    }

    fn channel(name: &str, overrides: Vec<(RoleId, ChannelOverride)>) -> Channel {
        Channel {
            channel_id: String::from("chan-1"),
            name: ChannelName::try_from(name.to_owned()).unwrap(),
            overrides: overrides.into_iter().collect::<HashMap<_, _>>(),
        }
    }

    fn channel_set(capabilities: &[ChannelCapability]) -> ChannelCapabilitySet {
        let mut set = ChannelCapabilitySet::empty();
        for capability in capabilities {
            set.insert(*capability);
        }
        set
    }

    #[test]
    fn administrator_short_circuits_every_check() {
        let admin = vec![role("admins", 5, &[ServerCapability::Administrator])];
        let locked = channel(
            "locked",
            vec![(
                RoleId::everyone(),
                ChannelOverride::new(
                    ChannelCapabilitySet::empty(),
                    channel_set(&[ChannelCapability::ViewChannel, ChannelCapability::SendMessages]),
                )
                .unwrap(),
            )],
        );

        assert!(has_server_capability(
            &admin,
            ServerCapability::BanMembers,
            false
        ));
        for capability in [
            ChannelCapability::ViewChannel,
            ChannelCapability::SendMessages,
            ChannelCapability::ManageMessages,
        ] {
            assert!(check_channel_capability(&admin, &locked, capability, false).is_allowed());
        }
    }

    #[test]
    fn owner_bypasses_without_any_roles() {
        let locked = channel(
            "locked",
            vec![(
                RoleId::everyone(),
                ChannelOverride::new(
                    ChannelCapabilitySet::empty(),
                    channel_set(&[ChannelCapability::ViewChannel]),
                )
                .unwrap(),
            )],
        );
        assert!(has_server_capability(&[], ServerCapability::ManageRoles, true));
        assert!(
            check_channel_capability(&[], &locked, ChannelCapability::SendMessages, true)
                .is_allowed()
        );
    }

    #[test]
    fn deny_from_one_role_beats_allow_from_another() {
        let role_a = role("speakers", 3, &[]);
        let role_b = role("muted", 7, &[]);
        let chan = channel(
            "general",
            vec![
                (
                    role_a.role_id.clone(),
                    ChannelOverride::new(
                        channel_set(&[ChannelCapability::SendMessages]),
                        ChannelCapabilitySet::empty(),
                    )
                    .unwrap(),
                ),
                (
                    role_b.role_id.clone(),
                    ChannelOverride::new(
                        ChannelCapabilitySet::empty(),
                        channel_set(&[ChannelCapability::SendMessages]),
                    )
                    .unwrap(),
                ),
            ],
        );

        let held = vec![Role::everyone(0), role_a, role_b];
        let decision =
            check_channel_capability(&held, &chan, ChannelCapability::SendMessages, false);
        assert_eq!(
            decision.reason(),
            Some(&DenyReason::ExplicitlyDenied(ChannelCapability::SendMessages))
        );
    }

    #[test]
    fn view_gate_short_circuits_other_capabilities() {
        let mods = role("mods", 5, &[ServerCapability::ManageMessages]);
        let hidden = channel(
            "staff-only",
            vec![
                (
                    RoleId::everyone(),
                    ChannelOverride::new(
                        ChannelCapabilitySet::empty(),
                        channel_set(&[ChannelCapability::ViewChannel]),
                    )
                    .unwrap(),
                ),
                (
                    mods.role_id.clone(),
                    ChannelOverride::new(
                        channel_set(&[ChannelCapability::SendMessages]),
                        ChannelCapabilitySet::empty(),
                    )
                    .unwrap(),
                ),
            ],
        );

        // The explicit send allow is unreachable while the channel itself is.
        let held = vec![Role::everyone(0), mods];
        let decision =
            check_channel_capability(&held, &hidden, ChannelCapability::SendMessages, false);
        assert_eq!(decision.reason(), Some(&DenyReason::CannotAccessChannel));
    }

    #[test]
    fn private_channel_needs_an_explicit_allow_from_another_role() {
        let staff = role("staff", 5, &[]);
        let hidden = channel(
            "staff-only",
            vec![
                (
                    RoleId::everyone(),
                    ChannelOverride::new(
                        ChannelCapabilitySet::empty(),
                        channel_set(&[ChannelCapability::ViewChannel]),
                    )
                    .unwrap(),
                ),
                (
                    staff.role_id.clone(),
                    ChannelOverride::new(
                        channel_set(&[ChannelCapability::ViewChannel]),
                        ChannelCapabilitySet::empty(),
                    )
                    .unwrap(),
                ),
            ],
        );

        let outsider = vec![Role::everyone(0)];
        let decision =
            check_channel_capability(&outsider, &hidden, ChannelCapability::ViewChannel, false);
        assert_eq!(decision.reason(), Some(&DenyReason::ChannelPrivate));

        let insider = vec![Role::everyone(0), staff];
        assert!(
            check_channel_capability(&insider, &hidden, ChannelCapability::ViewChannel, false)
                .is_allowed()
        );
    }

    #[test]
    fn unoverridden_channel_falls_back_to_community_grants() {
        let chan = channel("general", vec![]);
        let held = vec![Role::everyone(0)];

        assert!(
            check_channel_capability(&held, &chan, ChannelCapability::SendMessages, false)
                .is_allowed()
        );
        let decision =
            check_channel_capability(&held, &chan, ChannelCapability::ManageMessages, false);
        assert_eq!(
            decision.reason(),
            Some(&DenyReason::NoGrant(ChannelCapability::ManageMessages))
        );
        assert_eq!(
            decision.reason().map(ToString::to_string).as_deref(),
            Some("no permission found for manage_messages")
        );
    }

    #[test]
    fn role_allow_overrides_everyone_deny() {
        let mods = role("mods", 5, &[]);
        let announcements = channel(
            "announcements",
            vec![
                (
                    RoleId::everyone(),
                    ChannelOverride::new(
                        ChannelCapabilitySet::empty(),
                        channel_set(&[ChannelCapability::SendMessages]),
                    )
                    .unwrap(),
                ),
                (
                    mods.role_id.clone(),
                    ChannelOverride::new(
                        channel_set(&[ChannelCapability::SendMessages]),
                        ChannelCapabilitySet::empty(),
                    )
                    .unwrap(),
                ),
            ],
        );

        let reader = vec![Role::everyone(0)];
        let decision = check_channel_capability(
            &reader,
            &announcements,
            ChannelCapability::SendMessages,
            false,
        );
        assert_eq!(
            decision.reason(),
            Some(&DenyReason::ExplicitlyDenied(ChannelCapability::SendMessages))
        );

        let publisher = vec![Role::everyone(0), mods];
        assert!(check_channel_capability(
            &publisher,
            &announcements,
            ChannelCapability::SendMessages,
            false
        )
        .is_allowed());
    }

    #[test]
    fn empty_role_list_denies_everything_but_default_visibility() {
        let chan = channel("general", vec![]);
        assert!(!has_server_capability(
            &[],
            ServerCapability::SendMessages,
            false
        ));
        assert!(
            check_channel_capability(&[], &chan, ChannelCapability::ViewChannel, false)
                .is_allowed()
        );
        assert!(
            !check_channel_capability(&[], &chan, ChannelCapability::SendMessages, false)
                .is_allowed()
        );
    }

    #[test]
    fn visible_channels_filters_private_ones() {
        let staff = role("staff", 5, &[]);
        let open = channel("general", vec![]);
        let mut hidden = channel(
            "staff-only",
            vec![
                (
                    RoleId::everyone(),
                    ChannelOverride::new(
                        ChannelCapabilitySet::empty(),
                        channel_set(&[ChannelCapability::ViewChannel]),
                    )
                    .unwrap(),
                ),
                (
                    staff.role_id.clone(),
                    ChannelOverride::new(
                        channel_set(&[ChannelCapability::ViewChannel]),
                        ChannelCapabilitySet::empty(),
                    )
                    .unwrap(),
                ),
            ],
        );
        hidden.channel_id = String::from("chan-2");
        let channels = vec![open, hidden];

        let outsider = vec![Role::everyone(0)];
        let visible = visible_channels(&outsider, &channels, false);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].channel_id, "chan-1");

        let insider = vec![Role::everyone(0), staff];
        assert_eq!(visible_channels(&insider, &channels, false).len(), 2);

        assert_eq!(visible_channels(&outsider, &channels, true).len(), 2);
    }

    #[test]
    fn message_management_requires_authorship_or_capability() {
        let author = ActorId::new();
        let moderator = ActorId::new();
        let mods = vec![
            Role::everyone(0),
            role("mods", 5, &[ServerCapability::ManageMessages]),
        ];
        let plain = vec![Role::everyone(0)];

        assert!(can_manage_message(&plain, author, author, false));
        assert!(!can_manage_message(&plain, author, moderator, false));
        assert!(can_manage_message(&mods, author, moderator, false));
        assert!(can_manage_message(&[], author, moderator, true));
    }

    #[test]
    fn hierarchy_gate_requires_strictly_greater_position() {
        let senior = vec![
            Role::everyone(0),
            role(
                "mods",
                10,
                &[
                    ServerCapability::KickMembers,
                    ServerCapability::BanMembers,
                    ServerCapability::TimeoutMembers,
                ],
            ),
        ];
        let peer = vec![
            Role::everyone(0),
            role("mods2", 10, &[ServerCapability::KickMembers]),
        ];
        let junior = vec![Role::everyone(0)];

        assert!(can_kick_member(&senior, &junior, false));
        assert!(can_ban_member(&senior, &junior, false));
        assert!(can_timeout_member(&senior, &junior, false));

        // Equal highest positions fail the gate even with the capability.
        assert!(!can_kick_member(&senior, &peer, false));
        assert!(!can_kick_member(&peer, &senior, false));

        // Capability missing fails regardless of position.
        assert!(!can_kick_member(&junior, &[], false));

        // Ownership bypasses both requirements.
        assert!(can_kick_member(&junior, &senior, true));
    }

    #[test]
    fn effective_permissions_is_pure_and_idempotent() {
        let mods = role(
            "mods",
            5,
            &[ServerCapability::ManageMessages, ServerCapability::MuteMembers],
        );
        let held = vec![Role::everyone(0), mods.clone()];
        let chan = channel(
            "general",
            vec![(
                mods.role_id.clone(),
                ChannelOverride::new(
                    channel_set(&[ChannelCapability::MentionEveryone]),
                    channel_set(&[ChannelCapability::SendMessages]),
                )
                .unwrap(),
            )],
        );

        let first = effective_permissions(&held, Some(&chan));
        let second = effective_permissions(&held, Some(&chan));
        assert_eq!(first, second);

        assert!(first.contains(ServerCapability::ManageMessages));
        assert!(first.contains(ServerCapability::MentionEveryone));
        assert!(!first.contains(ServerCapability::SendMessages));

        let server_wide = effective_permissions(&held, None);
        assert!(server_wide.contains(ServerCapability::SendMessages));
    }

    #[test]
    fn effective_permissions_collapses_for_administrators() {
        let held = vec![
            Role::everyone(0),
            role("admins", 9, &[ServerCapability::Administrator]),
        ];
        let set = effective_permissions(&held, None);
        assert!(set.contains(ServerCapability::Administrator));
        assert!(!set.contains(ServerCapability::SendMessages));
    }

    #[test]
    fn role_round_trip_restores_effective_permissions() {
        let mods = role("mods", 5, &[ServerCapability::ManageMessages]);
        let base = vec![Role::everyone(0)];
        let before = effective_permissions(&base, None);

        let mut held = base.clone();
        held.push(mods);
        assert_ne!(effective_permissions(&held, None), before);

        held.pop();
        assert_eq!(effective_permissions(&held, None), before);
    }

    #[test]
    fn settings_access_requires_a_management_grant() {
        use super::can_access_community_settings;

        let plain = vec![Role::everyone(0)];
        assert!(!can_access_community_settings(&plain, false));
        assert!(can_access_community_settings(&plain, true));

        let channel_manager = vec![
            Role::everyone(0),
            role("wardens", 5, &[ServerCapability::ManageChannels]),
        ];
        assert!(can_access_community_settings(&channel_manager, false));

        let admin = vec![role("admins", 9, &[ServerCapability::Administrator])];
        assert!(can_access_community_settings(&admin, false));
    }

    #[test]
    fn explicit_decision_reasons_render_for_users() {
        assert_eq!(
            DenyReason::CannotAccessChannel.to_string(),
            "cannot access channel"
        );
        assert_eq!(DenyReason::ChannelPrivate.to_string(), "channel is private");
        assert_eq!(
            DenyReason::ExplicitlyDenied(ChannelCapability::SendMessages).to_string(),
            "send_messages is explicitly denied in this channel"
        );
        assert!(matches!(
            ChannelDecision::Allowed.reason(),
            None
        ));
    }
}
