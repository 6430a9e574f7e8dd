//! Live subscription behavior: delivery of committed role changes, the
//! force-refresh read-your-writes contract and its timeout, stream
//! termination on document deletion, and observer fan-out.

use std::time::Duration;

use tokio::time::timeout;
use weft_core::{ActorId, Role, RoleColor, RoleId, ServerCapability, ServerCapabilitySet};
use weft_sync::admin::{
    assign_role, create_community, create_role, delete_role, join_community, kick_member,
    remove_role, NewRole, RoleEdit,
};
use weft_sync::{CommunityDirectory, RoleStream, RoleSyncService, SyncConfig, SyncError};

const DELIVERY_DEADLINE: Duration = Duration::from_secs(2);

fn role_request(name: &str, position: i32, grants: &[ServerCapability]) -> NewRole {
    let mut capabilities = ServerCapabilitySet::empty();
    for grant in grants {
        capabilities.insert(*grant);
    }
    NewRole {
        name: name.to_owned(),
        color: RoleColor::default(),
        capabilities,
        position,
        mentionable: true,
    }
}

async fn await_roles_matching<F>(stream: &mut RoleStream, mut predicate: F) -> Vec<Role>
where
    F: FnMut(&[Role]) -> bool,
{
    for _ in 0..20 {
        let snapshot = timeout(DELIVERY_DEADLINE, stream.recv())
            .await
            .expect("snapshot should arrive before the deadline")
            .expect("stream should stay open");
        if predicate(&snapshot) {
            return snapshot;
        }
    }
    panic!("expected snapshot was never delivered");
}

async fn seeded_community(directory: &CommunityDirectory) -> (String, ActorId, ActorId) {
    let owner = ActorId::new();
    let member = ActorId::new();
    let community_id = create_community(directory, "Weft HQ", owner)
        .await
        .expect("community should be created");
    join_community(directory, &community_id, member)
        .await
        .expect("member should join");
    (community_id, owner, member)
}

fn holds(roles: &[Role], role_id: &RoleId) -> bool {
    roles.iter().any(|role| &role.role_id == role_id)
}

#[tokio::test]
async fn user_stream_tracks_assignment_and_removal() {
    let directory = CommunityDirectory::new();
    let service = RoleSyncService::new(directory.clone(), SyncConfig::default());
    let (community_id, owner, member) = seeded_community(&directory).await;

    let mut stream = service
        .subscribe_user_roles(&community_id, member)
        .await
        .expect("subscription should register");

    let initial = timeout(DELIVERY_DEADLINE, stream.recv())
        .await
        .expect("initial snapshot should arrive")
        .expect("stream should stay open");
    assert_eq!(initial.len(), 1);
    assert!(initial[0].role_id.is_everyone());

    let helpers = create_role(
        &directory,
        &community_id,
        owner,
        role_request("helpers", 10, &[ServerCapability::ManageMessages]),
    )
    .await
    .expect("role should be created");
    assign_role(&directory, &community_id, owner, member, &helpers.role_id)
        .await
        .expect("assignment should succeed");

    let with_role = await_roles_matching(&mut stream, |roles| holds(roles, &helpers.role_id)).await;
    assert_eq!(with_role[0].role_id, helpers.role_id);

    remove_role(&directory, &community_id, owner, member, &helpers.role_id)
        .await
        .expect("removal should succeed");
    let without_role =
        await_roles_matching(&mut stream, |roles| !holds(roles, &helpers.role_id)).await;
    assert_eq!(without_role.len(), 1);
}

#[tokio::test]
async fn user_stream_reresolves_when_the_catalog_changes() {
    let directory = CommunityDirectory::new();
    let service = RoleSyncService::new(directory.clone(), SyncConfig::default());
    let (community_id, owner, member) = seeded_community(&directory).await;
    let helpers = create_role(&directory, &community_id, owner, role_request("helpers", 10, &[]))
        .await
        .expect("role should be created");
    assign_role(&directory, &community_id, owner, member, &helpers.role_id)
        .await
        .expect("assignment should succeed");

    let mut stream = service
        .subscribe_user_roles(&community_id, member)
        .await
        .expect("subscription should register");
    await_roles_matching(&mut stream, |roles| holds(roles, &helpers.role_id)).await;

    // A catalog-side edit must reach subscribers with no membership change.
    weft_sync::admin::update_role(
        &directory,
        &community_id,
        owner,
        &helpers.role_id,
        RoleEdit {
            position: Some(42),
            ..RoleEdit::default()
        },
    )
    .await
    .expect("edit should succeed");

    let updated = await_roles_matching(&mut stream, |roles| {
        roles
            .iter()
            .any(|role| role.role_id == helpers.role_id && role.position == 42)
    })
    .await;
    assert_eq!(updated[0].position, 42);
}

#[tokio::test]
async fn force_refresh_observes_a_committed_edit() {
    let directory = CommunityDirectory::new();
    let service = RoleSyncService::new(directory.clone(), SyncConfig::default());
    let (community_id, owner, member) = seeded_community(&directory).await;

    let stewards = create_role(
        &directory,
        &community_id,
        owner,
        role_request("stewards", 20, &[ServerCapability::ManageRoles]),
    )
    .await
    .expect("role should be created");
    assign_role(&directory, &community_id, owner, member, &stewards.role_id)
        .await
        .expect("assignment should succeed");

    // The initiating client reads its own write without an ambient
    // subscription.
    let refreshed = service
        .force_refresh_user_roles(&community_id, member)
        .await
        .expect("refresh should resolve");
    assert!(holds(&refreshed, &stewards.role_id));

    delete_role(&directory, &community_id, owner, &stewards.role_id)
        .await
        .expect("deletion should cascade");
    let refreshed = service
        .force_refresh_user_roles(&community_id, member)
        .await
        .expect("refresh should resolve");
    assert!(!holds(&refreshed, &stewards.role_id));
}

#[tokio::test]
async fn force_refresh_times_out_when_no_snapshot_can_arrive() {
    let directory = CommunityDirectory::new();
    let service = RoleSyncService::new(
        directory,
        SyncConfig {
            refresh_timeout: Duration::from_millis(50),
            ..SyncConfig::default()
        },
    );

    let outcome = service
        .force_refresh_user_roles("never-created", ActorId::new())
        .await;
    assert_eq!(outcome, Err(SyncError::RefreshTimeout { waited_ms: 50 }));
}

#[tokio::test]
async fn catalog_stream_follows_role_lifecycle() {
    let directory = CommunityDirectory::new();
    let service = RoleSyncService::new(directory.clone(), SyncConfig::default());
    let (community_id, owner, _) = seeded_community(&directory).await;

    let mut catalog = service
        .subscribe_community_roles(&community_id)
        .await
        .expect("subscription should register");
    let initial = timeout(DELIVERY_DEADLINE, catalog.recv())
        .await
        .expect("initial catalog should arrive")
        .expect("stream should stay open");
    assert!(initial.iter().any(|role| role.role_id.is_everyone()));
    assert!(initial.iter().any(|role| role.role_id.is_owner()));
    assert!(initial[0].role_id.is_owner());

    let helpers = create_role(&directory, &community_id, owner, role_request("helpers", 10, &[]))
        .await
        .expect("role should be created");
    loop {
        let snapshot = timeout(DELIVERY_DEADLINE, catalog.recv())
            .await
            .expect("catalog update should arrive")
            .expect("stream should stay open");
        if snapshot.iter().any(|role| role.role_id == helpers.role_id) {
            break;
        }
    }

    delete_role(&directory, &community_id, owner, &helpers.role_id)
        .await
        .expect("deletion should succeed");
    loop {
        let snapshot = timeout(DELIVERY_DEADLINE, catalog.recv())
            .await
            .expect("catalog update should arrive")
            .expect("stream should stay open");
        if !snapshot.iter().any(|role| role.role_id == helpers.role_id) {
            break;
        }
    }
}

#[tokio::test]
async fn member_map_propagates_a_role_delete_to_every_holder() {
    let directory = CommunityDirectory::new();
    let service = RoleSyncService::new(directory.clone(), SyncConfig::default());
    let (community_id, owner, member) = seeded_community(&directory).await;
    let second = ActorId::new();
    join_community(&directory, &community_id, second)
        .await
        .expect("second member should join");

    let helpers = create_role(&directory, &community_id, owner, role_request("helpers", 10, &[]))
        .await
        .expect("role should be created");
    for target in [member, second] {
        assign_role(&directory, &community_id, owner, target, &helpers.role_id)
            .await
            .expect("assignment should succeed");
    }

    let mut members = service
        .subscribe_member_roles(&community_id)
        .await
        .expect("subscription should register");

    // Wait until the map shows both assignments, then delete and expect the
    // cascade to clear both in one recomputed map.
    loop {
        let map = timeout(DELIVERY_DEADLINE, members.recv())
            .await
            .expect("member map should arrive")
            .expect("stream should stay open");
        if [member, second]
            .iter()
            .all(|actor| map.get(actor).is_some_and(|roles| holds(roles, &helpers.role_id)))
        {
            break;
        }
    }

    delete_role(&directory, &community_id, owner, &helpers.role_id)
        .await
        .expect("deletion should cascade");

    loop {
        let map = timeout(DELIVERY_DEADLINE, members.recv())
            .await
            .expect("member map should arrive")
            .expect("stream should stay open");
        let cleared = [member, second]
            .iter()
            .all(|actor| map.get(actor).is_some_and(|roles| !holds(roles, &helpers.role_id)));
        if cleared {
            assert_eq!(map.len(), 3);
            break;
        }
    }
}

#[tokio::test]
async fn kick_ends_the_target_user_stream() {
    let directory = CommunityDirectory::new();
    let service = RoleSyncService::new(directory.clone(), SyncConfig::default());
    let (community_id, owner, member) = seeded_community(&directory).await;

    let mut stream = service
        .subscribe_user_roles(&community_id, member)
        .await
        .expect("subscription should register");
    assert!(timeout(DELIVERY_DEADLINE, stream.recv())
        .await
        .expect("initial snapshot should arrive")
        .is_some());

    kick_member(&directory, &community_id, owner, member)
        .await
        .expect("owner may kick");

    // The membership document is gone; the stream drains and then ends.
    loop {
        match timeout(DELIVERY_DEADLINE, stream.recv())
            .await
            .expect("stream should settle before the deadline")
        {
            Some(_) => {}
            None => break,
        }
    }
}

#[tokio::test]
async fn observers_hear_updates_from_any_producer() {
    let directory = CommunityDirectory::new();
    let service = RoleSyncService::new(directory.clone(), SyncConfig::default());
    let (community_id, _, member) = seeded_community(&directory).await;

    let mut observer = service.role_updates();
    let refreshed = service
        .force_refresh_user_roles(&community_id, member)
        .await
        .expect("refresh should resolve");

    let update = timeout(DELIVERY_DEADLINE, observer.recv())
        .await
        .expect("observer update should arrive")
        .expect("observer channel should stay open");
    assert_eq!(update.community_id, community_id);
    assert_eq!(update.actor_id, Some(member));
    assert_eq!(update.roles.len(), refreshed.len());
}
