//! In-memory store backed by [`DashMap`], one locked table set per tenant.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tenantbus_core::{Notification, Post, Tenant, TenantId, User, UserId};

use super::{NewNotification, NewPost, NotificationStore, PostStore, UserStore};

#[derive(Debug, Default)]
struct TenantTables {
    users: HashMap<UserId, User>,
    posts: BTreeMap<u64, Post>,
    notifications: BTreeMap<u64, Notification>,
    last_post_number: u64,
}

/// In-memory backend.
///
/// Tenants never share a table: every operation first selects the tenant's
/// tables and then works under that tenant's lock, so a read-then-write
/// within one call is atomic.
#[derive(Debug)]
pub struct MemoryStore {
    tenants: DashMap<TenantId, Tenant>,
    tables: DashMap<TenantId, Arc<RwLock<TenantTables>>>,
    next_id: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tenants: DashMap::new(),
            tables: DashMap::new(),
            next_id: AtomicU64::new(1),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail, as a lost connection would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Overwrite a notification's `updated_at`, for aging data in tests and fixtures.
    ///
    /// # Errors
    ///
    /// Fails if the notification does not exist in `tenant`.
    pub fn set_notification_updated_at(
        &self,
        tenant: TenantId,
        id: u64,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let Some(tables) = self.tables(tenant)? else {
            bail!("notification {id} not found in tenant {tenant}");
        };
        let mut tables = tables.write();
        let Some(notification) = tables.notifications.get_mut(&id) else {
            bail!("notification {id} not found in tenant {tenant}");
        };
        notification.updated_at = at;
        Ok(())
    }

    fn ensure_available(&self) -> anyhow::Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("store unavailable");
        }
        Ok(())
    }

    /// The tenant's tables, created on first write.
    fn tables_for_insert(&self, tenant: TenantId) -> anyhow::Result<Arc<RwLock<TenantTables>>> {
        self.ensure_available()?;
        Ok(self.tables.entry(tenant).or_default().clone())
    }

    /// The tenant's tables, if anything was ever written for it.
    fn tables(&self, tenant: TenantId) -> anyhow::Result<Option<Arc<RwLock<TenantTables>>>> {
        self.ensure_available()?;
        Ok(self.tables.get(&tenant).map(|t| t.value().clone()))
    }

    /// Number of tenants with allocated tables.
    #[must_use]
    pub fn tenant_table_count(&self) -> usize {
        self.tables.len()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert_notification(
        &self,
        tenant: TenantId,
        new: NewNotification,
    ) -> anyhow::Result<Notification> {
        let Some(tables) = self.tables(tenant)? else {
            bail!("post {} does not exist in tenant {tenant}", new.post_id);
        };
        let mut tables = tables.write();
        if !tables.posts.contains_key(&new.post_id) {
            bail!("post {} does not exist in tenant {tenant}", new.post_id);
        }
        let notification = Notification {
            id: self.next_id(),
            tenant_id: tenant,
            user_id: new.user_id,
            author_id: new.author_id,
            post_id: new.post_id,
            title: new.title,
            link: new.link,
            read: false,
            created_at: new.created_at,
            updated_at: new.created_at,
        };
        tables
            .notifications
            .insert(notification.id, notification.clone());
        Ok(notification)
    }

    async fn notification(
        &self,
        tenant: TenantId,
        user: UserId,
        id: u64,
    ) -> anyhow::Result<Option<Notification>> {
        let Some(tables) = self.tables(tenant)? else {
            return Ok(None);
        };
        let tables = tables.read();
        Ok(tables
            .notifications
            .get(&id)
            .filter(|n| n.user_id == user)
            .cloned())
    }

    async fn count_unread(&self, tenant: TenantId, user: UserId) -> anyhow::Result<usize> {
        let Some(tables) = self.tables(tenant)? else {
            return Ok(0);
        };
        let tables = tables.read();
        Ok(tables
            .notifications
            .values()
            .filter(|n| n.user_id == user && !n.read)
            .count())
    }

    async fn active_notifications(
        &self,
        tenant: TenantId,
        user: UserId,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Notification>> {
        let Some(tables) = self.tables(tenant)? else {
            return Ok(Vec::new());
        };
        let tables = tables.read();
        let mut active: Vec<Notification> = tables
            .notifications
            .values()
            .filter(|n| n.user_id == user && n.is_active_since(cutoff))
            .cloned()
            .collect();
        active.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(active)
    }

    async fn mark_read(
        &self,
        tenant: TenantId,
        user: UserId,
        id: u64,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let Some(tables) = self.tables(tenant)? else {
            return Ok(false);
        };
        let mut tables = tables.write();
        match tables.notifications.get_mut(&id) {
            Some(n) if n.user_id == user => {
                if !n.read {
                    n.read = true;
                    n.updated_at = at;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_all_read(
        &self,
        tenant: TenantId,
        user: UserId,
        at: DateTime<Utc>,
    ) -> anyhow::Result<usize> {
        let Some(tables) = self.tables(tenant)? else {
            return Ok(0);
        };
        let mut tables = tables.write();
        let mut changed = 0;
        for n in tables
            .notifications
            .values_mut()
            .filter(|n| n.user_id == user && !n.read)
        {
            n.read = true;
            n.updated_at = at;
            changed += 1;
        }
        Ok(changed)
    }
}

#[async_trait]
impl PostStore for MemoryStore {
    async fn insert_post(&self, tenant: TenantId, new: NewPost) -> anyhow::Result<Post> {
        let tables = self.tables_for_insert(tenant)?;
        let mut tables = tables.write();
        tables.last_post_number += 1;
        let post = Post {
            id: self.next_id(),
            tenant_id: tenant,
            number: tables.last_post_number,
            title: new.title,
            description: new.description,
            author_id: new.author_id,
            created_at: new.created_at,
        };
        tables.posts.insert(post.id, post.clone());
        Ok(post)
    }

    async fn post(&self, tenant: TenantId, id: u64) -> anyhow::Result<Option<Post>> {
        let Some(tables) = self.tables(tenant)? else {
            return Ok(None);
        };
        let tables = tables.read();
        Ok(tables.posts.get(&id).cloned())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_tenant(&self, tenant: Tenant) -> anyhow::Result<()> {
        self.ensure_available()?;
        self.tenants.insert(tenant.id, tenant);
        Ok(())
    }

    async fn tenant(&self, id: TenantId) -> anyhow::Result<Option<Tenant>> {
        self.ensure_available()?;
        Ok(self.tenants.get(&id).map(|t| t.clone()))
    }

    async fn insert_user(&self, user: User) -> anyhow::Result<()> {
        let tables = self.tables_for_insert(user.tenant_id)?;
        tables.write().users.insert(user.id, user);
        Ok(())
    }

    async fn user(&self, tenant: TenantId, id: UserId) -> anyhow::Result<Option<User>> {
        let Some(tables) = self.tables(tenant)? else {
            return Ok(None);
        };
        let tables = tables.read();
        Ok(tables.users.get(&id).cloned())
    }
}
