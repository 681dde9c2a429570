//! Persistence collaborator used by the business handlers.
//!
//! Every read and write takes the [`TenantId`] it is scoped to; there is no
//! unscoped access path. Backends report failures as `anyhow::Error`, which
//! handlers surface as a persistence error. Each method is atomic with respect
//! to its tenant's data.
//!
//! [`MemoryStore`] is the in-process backend used by tests and development.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tenantbus_core::{Notification, Post, Tenant, TenantId, User, UserId};

pub use memory::MemoryStore;

/// Fields of a notification about to be stored.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: UserId,
    pub author_id: Option<UserId>,
    pub post_id: u64,
    pub title: String,
    pub link: String,
    pub created_at: DateTime<Utc>,
}

/// Fields of a post about to be stored.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub description: String,
    pub author_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert_notification(
        &self,
        tenant: TenantId,
        new: NewNotification,
    ) -> anyhow::Result<Notification>;

    /// A notification owned by `user`. `None` if missing or owned by someone else.
    async fn notification(
        &self,
        tenant: TenantId,
        user: UserId,
        id: u64,
    ) -> anyhow::Result<Option<Notification>>;

    async fn count_unread(&self, tenant: TenantId, user: UserId) -> anyhow::Result<usize>;

    /// Unread notifications plus read ones updated after `cutoff`, most
    /// recently updated first.
    async fn active_notifications(
        &self,
        tenant: TenantId,
        user: UserId,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Notification>>;

    /// Mark one of `user`'s notifications read. Returns `false` if there is
    /// no such notification for `user`.
    async fn mark_read(
        &self,
        tenant: TenantId,
        user: UserId,
        id: u64,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// Mark every unread notification of `user` read. Returns how many changed.
    async fn mark_all_read(
        &self,
        tenant: TenantId,
        user: UserId,
        at: DateTime<Utc>,
    ) -> anyhow::Result<usize>;
}

#[async_trait]
pub trait PostStore: Send + Sync {
    /// Store a post, assigning the next per-tenant number.
    async fn insert_post(&self, tenant: TenantId, new: NewPost) -> anyhow::Result<Post>;

    async fn post(&self, tenant: TenantId, id: u64) -> anyhow::Result<Option<Post>>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert_tenant(&self, tenant: Tenant) -> anyhow::Result<()>;

    async fn tenant(&self, id: TenantId) -> anyhow::Result<Option<Tenant>>;

    async fn insert_user(&self, user: User) -> anyhow::Result<()>;

    async fn user(&self, tenant: TenantId, id: UserId) -> anyhow::Result<Option<User>>;
}
