use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a tenant (one isolated customer site).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TenantId(pub u64);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a user. Unique across tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TenantStatus {
    Active,
    Pending,
    Locked,
}

/// A tenant: the isolation boundary for all persisted data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub subdomain: String,
    pub status: TenantStatus,
}

/// Role of a user within its tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Visitor,
    Collaborator,
    Administrator,
}

/// An authenticated user. Always belongs to exactly one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub tenant_id: TenantId,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl User {
    #[must_use]
    pub fn is_administrator(&self) -> bool {
        self.role == Role::Administrator
    }
}

/// Marker for the inbound request a context was created for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// Request identifier assigned by the HTTP layer.
    pub id: String,
    pub method: String,
    pub path: String,
}

/// A notification delivered to a single user.
///
/// `Unread -> Read` is the only state transition; `updated_at` moves when
/// the notification is marked read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub tenant_id: TenantId,
    /// Recipient.
    pub user_id: UserId,
    /// User whose action produced the notification.
    pub author_id: Option<UserId>,
    pub post_id: u64,
    pub title: String,
    pub link: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// Whether the notification belongs in the active list for `cutoff`
    /// (typically `now - window`). Unread ones always do; read ones only while
    /// `updated_at` is strictly after `cutoff`.
    #[must_use]
    pub fn is_active_since(&self, cutoff: DateTime<Utc>) -> bool {
        !self.read || self.updated_at > cutoff
    }
}

/// A post that notifications can reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    pub tenant_id: TenantId,
    /// Sequential per-tenant number shown to users.
    pub number: u64,
    pub title: String,
    pub description: String,
    pub author_id: UserId,
    pub created_at: DateTime<Utc>,
}
