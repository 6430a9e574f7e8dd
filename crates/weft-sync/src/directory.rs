//! In-memory community directory: the document store the synchronization
//! service subscribes to.
//!
//! Each community and each membership is a document behind a `watch`
//! channel: subscribers observe the current snapshot immediately and the
//! latest snapshot after every write, with `None` standing for a deleted or
//! not-yet-created document. A per-community member-index counter fans out
//! collection-level changes without per-row subscriptions.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use weft_core::{ActorId, Channel, Membership, Role, RoleId};

use crate::audit::AuditEntry;

/// Snapshot of one community document: identity, role catalog, channels.
#[derive(Debug, Clone)]
pub struct CommunityRecord {
    pub community_id: String,
    pub name: String,
    pub owner_id: ActorId,
    pub roles: HashMap<RoleId, Role>,
    pub channels: HashMap<String, Channel>,
    pub created_at_unix: i64,
}

#[derive(Clone, Default)]
pub struct CommunityDirectory {
    inner: Arc<DirectoryInner>,
}

#[derive(Default)]
struct DirectoryInner {
    communities: RwLock<HashMap<String, watch::Sender<Option<CommunityRecord>>>>,
    memberships: RwLock<HashMap<(String, ActorId), watch::Sender<Option<Membership>>>>,
    member_index: RwLock<HashMap<String, watch::Sender<u64>>>,
    audit_log: RwLock<Vec<AuditEntry>>,
}

impl CommunityDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Live subscription to a community document. Subscribing to an id that
    /// does not exist yet is valid; the receiver observes `None` until the
    /// document is created.
    pub async fn watch_community(&self, community_id: &str) -> watch::Receiver<Option<CommunityRecord>> {
        let mut communities = self.inner.communities.write().await;
        communities
            .entry(community_id.to_owned())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Live subscription to one actor's membership document.
    pub async fn watch_membership(
        &self,
        community_id: &str,
        actor_id: ActorId,
    ) -> watch::Receiver<Option<Membership>> {
        let mut memberships = self.inner.memberships.write().await;
        memberships
            .entry((community_id.to_owned(), actor_id))
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Change counter covering every membership document of a community.
    pub async fn watch_members(&self, community_id: &str) -> watch::Receiver<u64> {
        let mut index = self.inner.member_index.write().await;
        index
            .entry(community_id.to_owned())
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }

    pub async fn read_community(&self, community_id: &str) -> Option<CommunityRecord> {
        let communities = self.inner.communities.read().await;
        communities
            .get(community_id)
            .and_then(|doc| doc.borrow().clone())
    }

    pub async fn read_membership(
        &self,
        community_id: &str,
        actor_id: ActorId,
    ) -> Option<Membership> {
        let memberships = self.inner.memberships.read().await;
        memberships
            .get(&(community_id.to_owned(), actor_id))
            .and_then(|doc| doc.borrow().clone())
    }

    /// Equality-filtered collection query over membership documents.
    pub async fn memberships_in(&self, community_id: &str) -> Vec<Membership> {
        let memberships = self.inner.memberships.read().await;
        memberships
            .iter()
            .filter(|((community, _), _)| community == community_id)
            .filter_map(|(_, doc)| doc.borrow().clone())
            .collect()
    }

    pub async fn put_community(&self, record: CommunityRecord) {
        let mut communities = self.inner.communities.write().await;
        communities
            .entry(record.community_id.clone())
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(record));
    }

    /// Field-level update of an existing community document. Returns false
    /// without notifying subscribers when the document is absent.
    pub async fn modify_community<F>(&self, community_id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut CommunityRecord),
    {
        let communities = self.inner.communities.read().await;
        let Some(doc) = communities.get(community_id) else {
            return false;
        };
        doc.send_if_modified(|record| match record.as_mut() {
            Some(record) => {
                mutate(record);
                true
            }
            None => false,
        })
    }

    pub async fn delete_community(&self, community_id: &str) -> bool {
        let communities = self.inner.communities.read().await;
        let Some(doc) = communities.get(community_id) else {
            return false;
        };
        doc.send_if_modified(|record| record.take().is_some())
    }

    pub async fn put_membership(&self, membership: Membership) {
        let community_id = membership.community_id.clone();
        {
            let mut memberships = self.inner.memberships.write().await;
            memberships
                .entry((community_id.clone(), membership.actor_id))
                .or_insert_with(|| watch::channel(None).0)
                .send_replace(Some(membership));
        }
        self.bump_members(&community_id).await;
    }

    pub async fn modify_membership<F>(
        &self,
        community_id: &str,
        actor_id: ActorId,
        mutate: F,
    ) -> bool
    where
        F: FnOnce(&mut Membership),
    {
        let modified = {
            let memberships = self.inner.memberships.read().await;
            let Some(doc) = memberships.get(&(community_id.to_owned(), actor_id)) else {
                return false;
            };
            doc.send_if_modified(|record| match record.as_mut() {
                Some(record) => {
                    mutate(record);
                    true
                }
                None => false,
            })
        };
        if modified {
            self.bump_members(community_id).await;
        }
        modified
    }

    pub async fn delete_membership(&self, community_id: &str, actor_id: ActorId) -> bool {
        let deleted = {
            let memberships = self.inner.memberships.read().await;
            let Some(doc) = memberships.get(&(community_id.to_owned(), actor_id)) else {
                return false;
            };
            doc.send_if_modified(|record| record.take().is_some())
        };
        if deleted {
            self.bump_members(community_id).await;
        }
        deleted
    }

    pub async fn append_audit(&self, entry: AuditEntry) {
        self.inner.audit_log.write().await.push(entry);
    }

    pub async fn audit_entries(&self, community_id: &str) -> Vec<AuditEntry> {
        let audit_log = self.inner.audit_log.read().await;
        audit_log
            .iter()
            .filter(|entry| entry.community_id == community_id)
            .cloned()
            .collect()
    }

    async fn bump_members(&self, community_id: &str) {
        let mut index = self.inner.member_index.write().await;
        index
            .entry(community_id.to_owned())
            .or_insert_with(|| watch::channel(0).0)
            .send_modify(|version| *version += 1);
    }
}
