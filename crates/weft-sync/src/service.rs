//! Live role synchronization over the community directory.
//!
//! Each subscription is a tokio task bridging the directory's document
//! watches to a bounded snapshot stream. Cancellation is cooperative: a
//! `watch`-based control channel closes tasks from the registry side, and
//! dropping a stream handle closes its task from the consumer side. The
//! registry allows at most one live subscription per key so a pair of
//! duplicate subscribers cannot double every update.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;
use weft_core::{ActorId, Membership, Role};

use crate::config::SyncConfig;
use crate::directory::{CommunityDirectory, CommunityRecord};
use crate::errors::SyncError;
use crate::snapshot::{resolve_catalog, resolve_member_map, resolve_member_roles};

/// Update delivered to process-wide observers on every resolved snapshot,
/// regardless of which subscription produced it.
#[derive(Debug, Clone)]
pub struct RoleUpdate {
    pub community_id: String,
    /// Actor whose roles resolved; `None` for catalog-wide updates.
    pub actor_id: Option<ActorId>,
    pub roles: Vec<Role>,
}

/// Stream of one actor's resolved role list, most senior first.
pub struct RoleStream {
    receiver: mpsc::Receiver<Vec<Role>>,
}

impl RoleStream {
    /// Next snapshot; `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<Vec<Role>> {
        self.receiver.recv().await
    }
}

/// Stream of a community's role catalog, most senior first.
pub struct CatalogStream {
    receiver: mpsc::Receiver<Vec<Role>>,
}

impl CatalogStream {
    pub async fn recv(&mut self) -> Option<Vec<Role>> {
        self.receiver.recv().await
    }
}

/// Stream of the full member-to-roles map of a community.
pub struct MemberMapStream {
    receiver: mpsc::Receiver<HashMap<ActorId, Vec<Role>>>,
}

impl MemberMapStream {
    pub async fn recv(&mut self) -> Option<HashMap<ActorId, Vec<Role>>> {
        self.receiver.recv().await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SubscriptionKey {
    UserRoles {
        community_id: String,
        actor_id: ActorId,
    },
    CommunityRoles {
        community_id: String,
    },
    MemberRoles {
        community_id: String,
    },
}

impl SubscriptionKey {
    fn community_id(&self) -> &str {
        match self {
            Self::UserRoles { community_id, .. }
            | Self::CommunityRoles { community_id }
            | Self::MemberRoles { community_id } => community_id,
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserRoles {
                community_id,
                actor_id,
            } => write!(f, "user-roles:{community_id}:{actor_id}"),
            Self::CommunityRoles { community_id } => {
                write!(f, "community-roles:{community_id}")
            }
            Self::MemberRoles { community_id } => write!(f, "member-roles:{community_id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionControl {
    Open,
    Close,
}

struct SubscriptionEntry {
    entry_id: Uuid,
    control: watch::Sender<SubscriptionControl>,
}

type Registry = Arc<Mutex<HashMap<SubscriptionKey, SubscriptionEntry>>>;

pub struct RoleSyncService {
    directory: CommunityDirectory,
    config: SyncConfig,
    registry: Registry,
    observers: broadcast::Sender<RoleUpdate>,
}

impl RoleSyncService {
    #[must_use]
    pub fn new(directory: CommunityDirectory, config: SyncConfig) -> Self {
        let (observers, _) = broadcast::channel(config.observer_capacity);
        Self {
            directory,
            config,
            registry: Arc::new(Mutex::new(HashMap::new())),
            observers,
        }
    }

    #[must_use]
    pub fn directory(&self) -> &CommunityDirectory {
        &self.directory
    }

    /// Live resolved role list for one actor. Re-resolves against the latest
    /// catalog on every membership or community change, so cross-document
    /// delivery order does not matter.
    pub async fn subscribe_user_roles(
        &self,
        community_id: &str,
        actor_id: ActorId,
    ) -> Result<RoleStream, SyncError> {
        let key = SubscriptionKey::UserRoles {
            community_id: community_id.to_owned(),
            actor_id,
        };
        let (entry_id, control_rx) = self.register(key.clone()).await?;
        let (updates_tx, updates_rx) = mpsc::channel(self.config.update_queue_depth);
        let community_rx = self.directory.watch_community(community_id).await;
        let membership_rx = self.directory.watch_membership(community_id, actor_id).await;
        tokio::spawn(run_user_roles(
            TaskContext {
                key,
                entry_id,
                registry: Arc::clone(&self.registry),
                observers: self.observers.clone(),
                control_rx,
            },
            community_rx,
            membership_rx,
            updates_tx,
            actor_id,
        ));
        Ok(RoleStream {
            receiver: updates_rx,
        })
    }

    /// Live role catalog of a community, independent of any actor.
    pub async fn subscribe_community_roles(
        &self,
        community_id: &str,
    ) -> Result<CatalogStream, SyncError> {
        let key = SubscriptionKey::CommunityRoles {
            community_id: community_id.to_owned(),
        };
        let (entry_id, control_rx) = self.register(key.clone()).await?;
        let (updates_tx, updates_rx) = mpsc::channel(self.config.update_queue_depth);
        let community_rx = self.directory.watch_community(community_id).await;
        tokio::spawn(run_community_roles(
            TaskContext {
                key,
                entry_id,
                registry: Arc::clone(&self.registry),
                observers: self.observers.clone(),
                control_rx,
            },
            community_rx,
            updates_tx,
        ));
        Ok(CatalogStream {
            receiver: updates_rx,
        })
    }

    /// Live map of every member's resolved roles; recomputed when any
    /// membership or the catalog changes. Used to propagate a role edit to
    /// all holders at once.
    pub async fn subscribe_member_roles(
        &self,
        community_id: &str,
    ) -> Result<MemberMapStream, SyncError> {
        let key = SubscriptionKey::MemberRoles {
            community_id: community_id.to_owned(),
        };
        let (entry_id, control_rx) = self.register(key.clone()).await?;
        let (updates_tx, updates_rx) = mpsc::channel(self.config.update_queue_depth);
        let community_rx = self.directory.watch_community(community_id).await;
        let members_rx = self.directory.watch_members(community_id).await;
        tokio::spawn(run_member_roles(
            TaskContext {
                key,
                entry_id,
                registry: Arc::clone(&self.registry),
                observers: self.observers.clone(),
                control_rx,
            },
            self.directory.clone(),
            community_rx,
            members_rx,
            updates_tx,
        ));
        Ok(MemberMapStream {
            receiver: updates_rx,
        })
    }

    /// One-shot resolve of the actor's current roles, used right after an
    /// administrative mutation so the initiating client observes the
    /// post-mutation state. Resolves on the first observable snapshot and
    /// fails with [`SyncError::RefreshTimeout`] when none arrives within the
    /// configured window; callers must treat that as unknown state, not as a
    /// denial. The deadline wraps the whole resolve future, so dropping the
    /// call mid-wait leaks nothing.
    pub async fn force_refresh_user_roles(
        &self,
        community_id: &str,
        actor_id: ActorId,
    ) -> Result<Vec<Role>, SyncError> {
        let deadline = self.config.refresh_timeout;
        let mut community_rx = self.directory.watch_community(community_id).await;
        let membership_rx = self.directory.watch_membership(community_id, actor_id).await;

        let resolve = async {
            loop {
                let community = community_rx.borrow_and_update().clone();
                if let Some(community) = community {
                    let membership = membership_rx.borrow().clone();
                    return resolve_member_roles(&community, membership.as_ref(), actor_id);
                }
                if community_rx.changed().await.is_err() {
                    // Directory gone; nothing will ever arrive.
                    std::future::pending::<()>().await;
                }
            }
        };

        let waited_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
        match timeout(deadline, resolve).await {
            Ok(roles) => {
                let _ = self.observers.send(RoleUpdate {
                    community_id: community_id.to_owned(),
                    actor_id: Some(actor_id),
                    roles: roles.clone(),
                });
                Ok(roles)
            }
            Err(_) => {
                warn!(
                    event = "sync.refresh.timeout",
                    community_id,
                    actor_id = %actor_id,
                    waited_ms,
                    "no snapshot arrived before the refresh deadline"
                );
                Err(SyncError::RefreshTimeout { waited_ms })
            }
        }
    }

    /// Process-wide observer feed of every resolved role update.
    #[must_use]
    pub fn role_updates(&self) -> broadcast::Receiver<RoleUpdate> {
        self.observers.subscribe()
    }

    /// Tears down every live subscription. Required at sign-out.
    pub async fn cleanup(&self) {
        let mut registry = self.registry.lock().await;
        for (key, entry) in registry.drain() {
            let _ = entry.control.send(SubscriptionControl::Close);
            debug!(event = "sync.subscription.closed", key = %key, "closed by cleanup");
        }
    }

    /// Tears down the user-roles subscription for one actor, if any.
    pub async fn cleanup_user(&self, community_id: &str, actor_id: ActorId) {
        let key = SubscriptionKey::UserRoles {
            community_id: community_id.to_owned(),
            actor_id,
        };
        let mut registry = self.registry.lock().await;
        if let Some(entry) = registry.remove(&key) {
            let _ = entry.control.send(SubscriptionControl::Close);
            debug!(event = "sync.subscription.closed", key = %key, "closed by user cleanup");
        }
    }

    /// Tears down every subscription scoped to a community. Required when
    /// leaving a community.
    pub async fn cleanup_community(&self, community_id: &str) {
        let mut registry = self.registry.lock().await;
        registry.retain(|key, entry| {
            if key.community_id() == community_id {
                let _ = entry.control.send(SubscriptionControl::Close);
                debug!(event = "sync.subscription.closed", key = %key, "closed by community cleanup");
                false
            } else {
                true
            }
        });
    }

    async fn register(
        &self,
        key: SubscriptionKey,
    ) -> Result<(Uuid, watch::Receiver<SubscriptionControl>), SyncError> {
        let mut registry = self.registry.lock().await;
        if registry.contains_key(&key) {
            return Err(SyncError::AlreadySubscribed {
                key: key.to_string(),
            });
        }
        let (control, control_rx) = watch::channel(SubscriptionControl::Open);
        let entry_id = Uuid::new_v4();
        registry.insert(key, SubscriptionEntry { entry_id, control });
        Ok((entry_id, control_rx))
    }
}

struct TaskContext {
    key: SubscriptionKey,
    entry_id: Uuid,
    registry: Registry,
    observers: broadcast::Sender<RoleUpdate>,
    control_rx: watch::Receiver<SubscriptionControl>,
}

async fn run_user_roles(
    mut ctx: TaskContext,
    mut community_rx: watch::Receiver<Option<CommunityRecord>>,
    mut membership_rx: watch::Receiver<Option<Membership>>,
    updates_tx: mpsc::Sender<Vec<Role>>,
    actor_id: ActorId,
) {
    let mut community_seen = false;
    let mut membership_seen = false;
    loop {
        let community = community_rx.borrow_and_update().clone();
        let membership = membership_rx.borrow_and_update().clone();
        match community {
            Some(community) => {
                community_seen = true;
                if membership.is_some() {
                    membership_seen = true;
                } else if membership_seen {
                    info!(
                        event = "sync.subscription.document_deleted",
                        key = %ctx.key,
                        "membership document removed; ending subscription"
                    );
                    break;
                }
                let roles = resolve_member_roles(&community, membership.as_ref(), actor_id);
                if updates_tx.send(roles.clone()).await.is_err() {
                    break;
                }
                let _ = ctx.observers.send(RoleUpdate {
                    community_id: community.community_id.clone(),
                    actor_id: Some(actor_id),
                    roles,
                });
            }
            None if community_seen => {
                info!(
                    event = "sync.subscription.document_deleted",
                    key = %ctx.key,
                    "community document removed; ending subscription"
                );
                break;
            }
            None => {}
        }

        if !wait_two(&mut ctx, &mut community_rx, &mut membership_rx, &updates_tx).await {
            break;
        }
    }
    deregister(&ctx.registry, &ctx.key, ctx.entry_id).await;
}

async fn run_community_roles(
    mut ctx: TaskContext,
    mut community_rx: watch::Receiver<Option<CommunityRecord>>,
    updates_tx: mpsc::Sender<Vec<Role>>,
) {
    let mut community_seen = false;
    loop {
        let community = community_rx.borrow_and_update().clone();
        match community {
            Some(community) => {
                community_seen = true;
                let roles = resolve_catalog(&community);
                if updates_tx.send(roles.clone()).await.is_err() {
                    break;
                }
                let _ = ctx.observers.send(RoleUpdate {
                    community_id: community.community_id.clone(),
                    actor_id: None,
                    roles,
                });
            }
            None if community_seen => {
                info!(
                    event = "sync.subscription.document_deleted",
                    key = %ctx.key,
                    "community document removed; ending subscription"
                );
                break;
            }
            None => {}
        }

        if !wait_one(&mut ctx, &mut community_rx, &updates_tx).await {
            break;
        }
    }
    deregister(&ctx.registry, &ctx.key, ctx.entry_id).await;
}

async fn run_member_roles(
    mut ctx: TaskContext,
    directory: CommunityDirectory,
    mut community_rx: watch::Receiver<Option<CommunityRecord>>,
    mut members_rx: watch::Receiver<u64>,
    updates_tx: mpsc::Sender<HashMap<ActorId, Vec<Role>>>,
) {
    let mut community_seen = false;
    loop {
        let community = community_rx.borrow_and_update().clone();
        let _ = members_rx.borrow_and_update();
        match community {
            Some(community) => {
                community_seen = true;
                let memberships = directory.memberships_in(&community.community_id).await;
                let map = resolve_member_map(&community, &memberships);
                if updates_tx.send(map.clone()).await.is_err() {
                    break;
                }
                for (actor_id, roles) in map {
                    let _ = ctx.observers.send(RoleUpdate {
                        community_id: community.community_id.clone(),
                        actor_id: Some(actor_id),
                        roles,
                    });
                }
            }
            None if community_seen => {
                info!(
                    event = "sync.subscription.document_deleted",
                    key = %ctx.key,
                    "community document removed; ending subscription"
                );
                break;
            }
            None => {}
        }

        if !wait_two(&mut ctx, &mut community_rx, &mut members_rx, &updates_tx).await {
            break;
        }
    }
    deregister(&ctx.registry, &ctx.key, ctx.entry_id).await;
}

/// Waits for the next document change, control close, or consumer drop.
/// Returns false when the task must end. Watch-side errors park the
/// subscription dormant instead of ending it: it stays registered but
/// silent, matching the no-reconnect contract.
async fn wait_two<A, B, T>(
    ctx: &mut TaskContext,
    first: &mut watch::Receiver<A>,
    second: &mut watch::Receiver<B>,
    updates_tx: &mpsc::Sender<T>,
) -> bool {
    tokio::select! {
        changed = first.changed() => handle_watch_outcome(changed, ctx, updates_tx).await,
        changed = second.changed() => handle_watch_outcome(changed, ctx, updates_tx).await,
        changed = ctx.control_rx.changed() => control_still_open(changed, &ctx.control_rx),
        () = updates_tx.closed() => false,
    }
}

async fn wait_one<A, T>(
    ctx: &mut TaskContext,
    only: &mut watch::Receiver<A>,
    updates_tx: &mpsc::Sender<T>,
) -> bool {
    tokio::select! {
        changed = only.changed() => handle_watch_outcome(changed, ctx, updates_tx).await,
        changed = ctx.control_rx.changed() => control_still_open(changed, &ctx.control_rx),
        () = updates_tx.closed() => false,
    }
}

async fn handle_watch_outcome<T>(
    changed: Result<(), watch::error::RecvError>,
    ctx: &mut TaskContext,
    updates_tx: &mpsc::Sender<T>,
) -> bool {
    match changed {
        Ok(()) => true,
        Err(_) => {
            warn!(
                event = "sync.subscription.transport_lost",
                key = %ctx.key,
                "document watch ended; subscription stays registered but dormant"
            );
            park_dormant(&mut ctx.control_rx, updates_tx).await;
            false
        }
    }
}

/// Holds a faulted subscription open, delivering nothing, until it is
/// explicitly torn down or its consumer goes away.
async fn park_dormant<T>(
    control_rx: &mut watch::Receiver<SubscriptionControl>,
    updates_tx: &mpsc::Sender<T>,
) {
    loop {
        tokio::select! {
            changed = control_rx.changed() => match changed {
                Ok(()) if *control_rx.borrow() == SubscriptionControl::Close => return,
                Ok(()) => {}
                Err(_) => return,
            },
            () = updates_tx.closed() => return,
        }
    }
}

fn control_still_open(
    changed: Result<(), watch::error::RecvError>,
    control_rx: &watch::Receiver<SubscriptionControl>,
) -> bool {
    match changed {
        Ok(()) => *control_rx.borrow() != SubscriptionControl::Close,
        Err(_) => false,
    }
}

async fn deregister(registry: &Registry, key: &SubscriptionKey, entry_id: Uuid) {
    let mut registry = registry.lock().await;
    if registry
        .get(key)
        .is_some_and(|entry| entry.entry_id == entry_id)
    {
        registry.remove(key);
    }
}
