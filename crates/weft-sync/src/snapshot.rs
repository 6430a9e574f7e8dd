use std::collections::HashMap;

use weft_core::{ActorId, Membership, Role, RoleId};

use crate::directory::CommunityRecord;

/// Resolves the role list an actor effectively holds: assigned roles still
/// present in the catalog, always the implicit `everyone`, and the synthetic
/// `owner` for the community owner. Dangling assignments (role deleted but
/// not yet cascaded) are skipped. Most senior first.
pub(crate) fn resolve_member_roles(
    community: &CommunityRecord,
    membership: Option<&Membership>,
    actor_id: ActorId,
) -> Vec<Role> {
    let mut roles = vec![community
        .roles
        .get(&RoleId::everyone())
        .cloned()
        .unwrap_or_else(|| Role::everyone(community.created_at_unix))];

    if let Some(membership) = membership {
        for role_id in &membership.role_ids {
            if let Some(role) = community.roles.get(role_id) {
                roles.push(role.clone());
            }
        }
    }

    if community.owner_id == actor_id {
        roles.push(
            community
                .roles
                .get(&RoleId::owner())
                .cloned()
                .unwrap_or_else(|| Role::owner(community.created_at_unix)),
        );
    }

    sort_most_senior_first(&mut roles);
    roles
}

/// The community's role catalog, most senior first.
pub(crate) fn resolve_catalog(community: &CommunityRecord) -> Vec<Role> {
    let mut roles: Vec<Role> = community.roles.values().cloned().collect();
    sort_most_senior_first(&mut roles);
    roles
}

/// Effective roles of every current member.
pub(crate) fn resolve_member_map(
    community: &CommunityRecord,
    memberships: &[Membership],
) -> HashMap<ActorId, Vec<Role>> {
    memberships
        .iter()
        .map(|membership| {
            (
                membership.actor_id,
                resolve_member_roles(community, Some(membership), membership.actor_id),
            )
        })
        .collect()
}

fn sort_most_senior_first(roles: &mut [Role]) {
    roles.sort_by(|a, b| {
        b.position
            .cmp(&a.position)
            .then_with(|| a.role_id.cmp(&b.role_id))
    });
}
