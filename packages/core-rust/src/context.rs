//! Execution context shared by request handling and background tasks.
//!
//! A [`Context`] answers "who is asking, in what tenant, as part of what trace".
//! It carries:
//!
//! - a cancellation signal ([`CancellationToken`]),
//! - an append-only chain of identity values ([`ContextValue`]),
//! - structured log [`Properties`],
//! - the worker id and task name when running inside a background worker,
//! - the tenant-scoped [`Services`] bundle once attached.
//!
//! Worker contexts are built from an [`Origin`], which holds exactly the identity
//! a request is allowed to hand across the boundary.

use std::sync::Arc;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::info_span;

use crate::error::{Error, Result};
use crate::properties::{new_context_id, Properties, PropertyKey};
use crate::services::Services;
use crate::types::{RequestInfo, Tenant, User};

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Keys of the identity values a context can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKey {
    Request,
    Tenant,
    User,
}

/// A typed identity value. The variant determines its [`ContextKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextValue {
    Request(Arc<RequestInfo>),
    Tenant(Arc<Tenant>),
    User(Arc<User>),
}

impl ContextValue {
    #[must_use]
    pub fn key(&self) -> ContextKey {
        match self {
            Self::Request(_) => ContextKey::Request,
            Self::Tenant(_) => ContextKey::Tenant,
            Self::User(_) => ContextKey::User,
        }
    }
}

impl From<RequestInfo> for ContextValue {
    fn from(request: RequestInfo) -> Self {
        Self::Request(Arc::new(request))
    }
}

impl From<Tenant> for ContextValue {
    fn from(tenant: Tenant) -> Self {
        Self::Tenant(Arc::new(tenant))
    }
}

impl From<User> for ContextValue {
    fn from(user: User) -> Self {
        Self::User(Arc::new(user))
    }
}

#[derive(Debug)]
struct Link {
    value: ContextValue,
    parent: Option<Arc<Link>>,
}

/// Persistent singly-linked chain. Appending allocates one link; earlier
/// chains are never modified, so clones are cheap and never observe later writes.
#[derive(Debug, Clone, Default)]
struct ValueChain {
    head: Option<Arc<Link>>,
}

impl ValueChain {
    fn push(&mut self, value: ContextValue) {
        self.head = Some(Arc::new(Link {
            value,
            parent: self.head.take(),
        }));
    }

    /// Most recent value for `key`.
    fn get(&self, key: ContextKey) -> Option<&ContextValue> {
        let mut cursor = self.head.as_deref();
        while let Some(link) = cursor {
            if link.value.key() == key {
                return Some(&link.value);
            }
            cursor = link.parent.as_deref();
        }
        None
    }

    fn len(&self) -> usize {
        let mut n = 0;
        let mut cursor = self.head.as_deref();
        while let Some(link) = cursor {
            n += 1;
            cursor = link.parent.as_deref();
        }
        n
    }
}

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

/// Identity a worker context inherits: the request marker, tenant and user,
/// plus the session/user/tenant log properties. Nothing else crosses over.
#[derive(Debug, Clone, Default)]
pub struct Origin {
    request: Option<Arc<RequestInfo>>,
    tenant: Option<Arc<Tenant>>,
    user: Option<Arc<User>>,
    properties: Properties,
}

impl Origin {
    #[must_use]
    pub fn tenant(&self) -> Option<&Arc<Tenant>> {
        self.tenant.as_ref()
    }

    #[must_use]
    pub fn user(&self) -> Option<&Arc<User>> {
        self.user.as_ref()
    }

    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Per-request or per-task execution context.
///
/// Not shared between concurrent logical operations; each request and each
/// worker task owns its own instance.
#[derive(Debug)]
pub struct Context {
    cancel: CancellationToken,
    values: ValueChain,
    properties: Properties,
    worker_id: String,
    task_name: String,
    services: Option<Services>,
}

impl Context {
    /// Anonymous context on the given cancellation signal, with a fresh context id.
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        let mut properties = Properties::new();
        properties.set(PropertyKey::ContextId, new_context_id());
        Self {
            cancel,
            values: ValueChain::default(),
            properties,
            worker_id: String::new(),
            task_name: String::new(),
            services: None,
        }
    }

    /// Anonymous context with its own cancellation root.
    #[must_use]
    pub fn background() -> Self {
        Self::new(CancellationToken::new())
    }

    /// Request-scoped context carrying the request marker.
    #[must_use]
    pub fn for_request(request: RequestInfo, cancel: CancellationToken) -> Self {
        let mut ctx = Self::new(cancel);
        ctx.set(request);
        ctx
    }

    /// Worker context derived from `origin` on a fresh cancellation root.
    #[must_use]
    pub fn derive(origin: Option<&Origin>, worker_id: &str, task_name: &str) -> Self {
        Self::derive_with(origin, worker_id, task_name, CancellationToken::new())
    }

    /// Worker context derived from `origin` on the given cancellation signal.
    ///
    /// The signal must not descend from the origin request's token: cancelling
    /// the request must leave the worker context running. Without an origin the
    /// result is an anonymous system context. A fresh context id is always
    /// generated.
    #[must_use]
    pub fn derive_with(
        origin: Option<&Origin>,
        worker_id: &str,
        task_name: &str,
        cancel: CancellationToken,
    ) -> Self {
        let mut ctx = Self::new(cancel);
        ctx.worker_id = worker_id.to_string();
        ctx.task_name = task_name.to_string();

        if let Some(origin) = origin {
            if let Some(request) = &origin.request {
                ctx.set(ContextValue::Request(request.clone()));
            }
            if let Some(tenant) = &origin.tenant {
                ctx.set(ContextValue::Tenant(tenant.clone()));
            }
            if let Some(user) = &origin.user {
                ctx.set(ContextValue::User(user.clone()));
            }
            for key in PropertyKey::INHERITED {
                if let Some(value) = origin.properties.get(key) {
                    ctx.properties.set(key, value);
                }
            }
        }
        ctx
    }

    /// Snapshot of the identity a derived worker context may inherit.
    #[must_use]
    pub fn origin(&self) -> Origin {
        let mut properties = Properties::new();
        for key in PropertyKey::INHERITED {
            if let Some(value) = self.properties.get(key) {
                properties.set(key, value);
            }
        }
        Origin {
            request: self.request(),
            tenant: self.current_tenant(),
            user: self.current_user(),
            properties,
        }
    }

    /// Append an identity value. Later values shadow earlier ones for the same key.
    pub fn set(&mut self, value: impl Into<ContextValue>) {
        self.values.push(value.into());
    }

    /// Builder form of [`Context::set`].
    #[must_use]
    pub fn with(mut self, value: impl Into<ContextValue>) -> Self {
        self.set(value);
        self
    }

    pub fn set_property(&mut self, key: PropertyKey, value: impl Into<String>) {
        self.properties.set(key, value);
    }

    /// Builder form of [`Context::set_property`].
    #[must_use]
    pub fn with_property(mut self, key: PropertyKey, value: impl Into<String>) -> Self {
        self.set_property(key, value);
        self
    }

    #[must_use]
    pub fn get(&self, key: ContextKey) -> Option<&ContextValue> {
        self.values.get(key)
    }

    #[must_use]
    pub fn request(&self) -> Option<Arc<RequestInfo>> {
        match self.get(ContextKey::Request) {
            Some(ContextValue::Request(request)) => Some(request.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn current_user(&self) -> Option<Arc<User>> {
        match self.get(ContextKey::User) {
            Some(ContextValue::User(user)) => Some(user.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn current_tenant(&self) -> Option<Arc<Tenant>> {
        match self.get(ContextKey::Tenant) {
            Some(ContextValue::Tenant(tenant)) => Some(tenant.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    #[must_use]
    pub fn context_id(&self) -> &str {
        self.properties.get_or_empty(PropertyKey::ContextId)
    }

    /// Empty for request contexts.
    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Empty for request contexts.
    #[must_use]
    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// Bind the service bundle and seed its scope from this context's identity.
    ///
    /// Attaching again replaces the bundle and re-seeds it.
    pub fn attach_services(&mut self, services: Services) {
        services.set_current_user(self.current_user());
        services.set_current_tenant(self.current_tenant());
        self.services = Some(services);
    }

    /// The attached service bundle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unscoped`] if no bundle has been attached.
    pub fn services(&self) -> Result<&Services> {
        self.services.as_ref().ok_or(Error::Unscoped)
    }

    #[must_use]
    pub fn has_services(&self) -> bool {
        self.services.is_some()
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the context is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] once the cancellation signal has fired.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Span tagged with this context's properties.
    #[must_use]
    pub fn span(&self) -> tracing::Span {
        info_span!(
            "context",
            context_id = self.context_id(),
            session_id = self.properties.get_or_empty(PropertyKey::SessionId),
            user_id = self.properties.get_or_empty(PropertyKey::UserId),
            tenant_id = self.properties.get_or_empty(PropertyKey::TenantId),
            worker_id = self.worker_id.as_str(),
            task = self.task_name.as_str(),
        )
    }

    /// Record `err` with the caller's location, log it with this context's
    /// properties, and hand it back for propagation.
    ///
    /// An error that already carries a location keeps it.
    #[track_caller]
    pub fn fail(&self, err: Error) -> Error {
        let err = err.traced();
        self.log_failure(&err);
        err
    }

    /// Log `err` with this context's properties without wrapping it.
    /// Cancellation goes out at debug, everything else at error.
    pub fn log_failure(&self, err: &Error) {
        let location = err
            .location()
            .map(ToString::to_string)
            .unwrap_or_default();
        let props = &self.properties;
        if err.is_cancelled() {
            tracing::debug!(
                context_id = props.get_or_empty(PropertyKey::ContextId),
                worker_id = self.worker_id.as_str(),
                task = self.task_name.as_str(),
                location = location.as_str(),
                "operation cancelled"
            );
        } else {
            tracing::error!(
                context_id = props.get_or_empty(PropertyKey::ContextId),
                session_id = props.get_or_empty(PropertyKey::SessionId),
                user_id = props.get_or_empty(PropertyKey::UserId),
                tenant_id = props.get_or_empty(PropertyKey::TenantId),
                worker_id = self.worker_id.as_str(),
                task = self.task_name.as_str(),
                location = location.as_str(),
                error = %err.root(),
                "operation failed"
            );
        }
    }

    #[cfg(test)]
    fn depth(&self) -> usize {
        self.values.len()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tracing_subscriber::fmt::MakeWriter;

    use super::*;
    use crate::services::Facilities;
    use crate::types::{Role, TenantId, TenantStatus, UserId};

    fn tenant(id: u64) -> Tenant {
        Tenant {
            id: TenantId(id),
            name: format!("Tenant {id}"),
            subdomain: format!("t{id}"),
            status: TenantStatus::Active,
        }
    }

    fn user(id: u64, tenant_id: u64) -> User {
        User {
            id: UserId(id),
            tenant_id: TenantId(tenant_id),
            name: format!("User {id}"),
            email: format!("user{id}@example.test"),
            role: Role::Visitor,
        }
    }

    fn request_ctx() -> Context {
        Context::for_request(
            RequestInfo {
                id: "req-1".to_string(),
                method: "POST".to_string(),
                path: "/api/v1/posts".to_string(),
            },
            CancellationToken::new(),
        )
        .with(tenant(1))
        .with(user(10, 1))
        .with_property(PropertyKey::SessionId, "sess-1")
        .with_property(PropertyKey::UserId, "10")
        .with_property(PropertyKey::TenantId, "1")
    }

    #[test]
    fn lookups_on_empty_context_are_absent() {
        let ctx = Context::background();
        assert!(ctx.current_user().is_none());
        assert!(ctx.current_tenant().is_none());
        assert!(ctx.request().is_none());
        assert_eq!(ctx.worker_id(), "");
        assert_eq!(ctx.task_name(), "");
        assert_eq!(ctx.context_id().len(), 32);
    }

    #[test]
    fn derive_copies_identity_and_inherited_properties() {
        let origin_ctx = request_ctx();
        let worker = Context::derive(Some(&origin_ctx.origin()), "worker-1", "send_mail");

        assert_eq!(worker.current_user(), origin_ctx.current_user());
        assert_eq!(worker.current_tenant(), origin_ctx.current_tenant());
        assert_eq!(worker.request(), origin_ctx.request());
        assert_eq!(worker.worker_id(), "worker-1");
        assert_eq!(worker.task_name(), "send_mail");
        assert_eq!(worker.properties().get(PropertyKey::SessionId), Some("sess-1"));
        assert_eq!(worker.properties().get(PropertyKey::UserId), Some("10"));
        assert_eq!(worker.properties().get(PropertyKey::TenantId), Some("1"));
        assert_ne!(worker.context_id(), origin_ctx.context_id());
        assert_eq!(worker.context_id().len(), 32);
    }

    #[test]
    fn derive_without_origin_is_anonymous() {
        let worker = Context::derive(None, "worker-1", "cleanup");
        assert!(worker.current_user().is_none());
        assert!(worker.current_tenant().is_none());
        assert_eq!(worker.properties().len(), 1);
    }

    #[test]
    fn derived_context_has_independent_cancellation() {
        let origin_ctx = request_ctx();
        let worker = Context::derive(Some(&origin_ctx.origin()), "w", "t");
        origin_ctx.cancel();
        assert!(origin_ctx.is_cancelled());
        assert!(!worker.is_cancelled());
    }

    #[test]
    fn origin_drops_shadowed_and_unlisted_state() {
        let mut ctx = request_ctx();
        ctx.set(user(11, 1));
        ctx.set_property(PropertyKey::ContextId, "original");
        let origin = ctx.origin();
        assert_eq!(origin.user().unwrap().id, UserId(11));
        assert!(origin.properties().get(PropertyKey::ContextId).is_none());
        assert_eq!(origin.properties().len(), 3);
    }

    #[test]
    fn attach_services_seeds_scope() {
        let mut ctx = request_ctx();
        ctx.attach_services(Services::new(Arc::new(Facilities::new())));
        let services = ctx.services().unwrap();
        assert_eq!(services.current_user().unwrap().id, UserId(10));
        assert_eq!(services.tenant_id().unwrap(), TenantId(1));

        // Re-attaching re-seeds a fresh bundle consistently.
        ctx.set(user(12, 1));
        ctx.attach_services(Services::new(Arc::new(Facilities::new())));
        assert_eq!(ctx.services().unwrap().current_user().unwrap().id, UserId(12));
    }

    #[test]
    fn services_absent_until_attached() {
        let ctx = Context::background();
        assert!(!ctx.has_services());
        assert!(matches!(ctx.services(), Err(Error::Unscoped)));
    }

    #[test]
    fn fail_wraps_once_and_keeps_meaning() {
        let ctx = request_ctx();
        let err = ctx.fail(Error::NotFound { entity: "post" });
        let location = err.location().unwrap();
        assert!(location.file().ends_with("context.rs"));
        let err = ctx.fail(err);
        assert_eq!(err.location().unwrap(), location);
        assert!(err.is_not_found());
    }

    /// In-memory sink for a scoped subscriber.
    #[derive(Clone, Default)]
    struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn captured_logs(f: impl FnOnce()) -> String {
        let sink = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(sink.clone())
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = sink.0.lock().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn fail_logs_error_with_context_properties() {
        let ctx = request_ctx();
        let logs = captured_logs(|| {
            let _ = ctx.fail(Error::NotFound { entity: "post" });
        });
        assert!(logs.contains("ERROR"), "{logs}");
        assert!(logs.contains("operation failed"), "{logs}");
        assert!(logs.contains(ctx.context_id()), "{logs}");
        assert!(logs.contains("session_id") && logs.contains("sess-1"), "{logs}");
        assert!(logs.contains("user_id") && logs.contains("10"), "{logs}");
        assert!(logs.contains("tenant_id"), "{logs}");
        assert!(logs.contains("post not found"), "{logs}");
        assert!(logs.contains("context.rs"), "{logs}");
    }

    #[test]
    fn fail_logs_cancellation_at_debug() {
        let ctx = request_ctx();
        let logs = captured_logs(|| {
            let _ = ctx.fail(Error::Cancelled);
        });
        assert!(logs.contains("DEBUG"), "{logs}");
        assert!(logs.contains("operation cancelled"), "{logs}");
        assert!(!logs.contains("ERROR"), "{logs}");
    }

    #[test]
    fn log_failure_leaves_error_unwrapped() {
        let ctx = request_ctx();
        let err = Error::Unauthenticated;
        let logs = captured_logs(|| ctx.log_failure(&err));
        assert!(err.location().is_none());
        assert!(logs.contains("operation requires an authenticated user"), "{logs}");
    }

    #[tokio::test]
    async fn cancelled_future_resolves() {
        let ctx = Context::background();
        let token = ctx.cancellation_token().clone();
        tokio::spawn(async move { token.cancel() });
        ctx.cancelled().await;
        assert!(matches!(ctx.check_cancelled(), Err(Error::Cancelled)));
    }

    proptest! {
        #[test]
        fn last_set_user_wins(ids in proptest::collection::vec(1_u64..1000, 1..20)) {
            let mut ctx = Context::background();
            for id in &ids {
                ctx.set(user(*id, 1));
            }
            prop_assert_eq!(ctx.depth(), ids.len());
            prop_assert_eq!(ctx.current_user().unwrap().id, UserId(*ids.last().unwrap()));
            prop_assert!(ctx.current_tenant().is_none());
        }
    }
}
