//! `tenantbus` core: execution context, identity models, log properties, and the
//! tenant-scoped service bundle.

pub mod clock;
pub mod context;
pub mod error;
pub mod properties;
pub mod services;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{Context, ContextKey, ContextValue, Origin};
pub use error::{Error, ErrorKind, Result};
pub use properties::{new_context_id, Properties, PropertyKey, CONTEXT_ID_LEN};
pub use services::{Facilities, Services};
pub use types::{
    Notification, Post, RequestInfo, Role, Tenant, TenantId, TenantStatus, User, UserId,
};

pub use tokio_util::sync::CancellationToken;
