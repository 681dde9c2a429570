use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::types::{Tenant, TenantId, User};

// ---------------------------------------------------------------------------
// Facilities
// ---------------------------------------------------------------------------

/// Process-wide table of shared collaborators (store handles, clock), keyed by type.
///
/// Built once at startup and shared read-only by every [`Services`] bundle.
/// Lookups take no locks.
#[derive(Default)]
pub struct Facilities {
    by_type: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    /// Registration order, for diagnostics.
    names: Vec<&'static str>,
}

impl Facilities {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a facility. A later registration of the same type replaces the earlier one.
    pub fn insert<T: Any + Send + Sync>(&mut self, facility: T) -> &mut Self {
        if self
            .by_type
            .insert(TypeId::of::<T>(), Arc::new(facility))
            .is_none()
        {
            self.names.push(type_name::<T>());
        }
        self
    }

    /// Retrieve a facility by its type.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.downcast_ref::<T>())
    }

    #[must_use]
    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<T>())
    }

    /// Type names of registered facilities, in registration order.
    #[must_use]
    pub fn names(&self) -> &[&'static str] {
        &self.names
    }
}

impl std::fmt::Debug for Facilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Facilities").field("names", &self.names).finish()
    }
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
struct Scope {
    user: Option<Arc<User>>,
    tenant: Option<Arc<Tenant>>,
}

/// Tenant/user-scoped handle to persistence and cross-cutting facilities.
///
/// One bundle per [`Context`](crate::Context). The scope starts out seeded from
/// the context's identity and can be overridden by handlers that switch identity.
#[derive(Debug)]
pub struct Services {
    facilities: Arc<Facilities>,
    scope: RwLock<Scope>,
}

impl Services {
    #[must_use]
    pub fn new(facilities: Arc<Facilities>) -> Self {
        Self {
            facilities,
            scope: RwLock::new(Scope::default()),
        }
    }

    pub fn set_current_user(&self, user: Option<Arc<User>>) {
        self.scope.write().user = user;
    }

    pub fn set_current_tenant(&self, tenant: Option<Arc<Tenant>>) {
        self.scope.write().tenant = tenant;
    }

    #[must_use]
    pub fn current_user(&self) -> Option<Arc<User>> {
        self.scope.read().user.clone()
    }

    #[must_use]
    pub fn current_tenant(&self) -> Option<Arc<Tenant>> {
        self.scope.read().tenant.clone()
    }

    /// Tenant every persistence call must be scoped by.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unscoped`] when no tenant is bound.
    pub fn tenant_id(&self) -> Result<TenantId> {
        self.scope
            .read()
            .tenant
            .as_ref()
            .map(|t| t.id)
            .ok_or(Error::Unscoped)
    }

    /// The authenticated user the operation runs as.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthenticated`] when no user is bound.
    pub fn user(&self) -> Result<Arc<User>> {
        self.current_user().ok_or(Error::Unauthenticated)
    }

    /// Look up a shared facility.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FacilityNotRegistered`] naming the type.
    pub fn facility<T: Any + Send + Sync>(&self) -> Result<&T> {
        self.facilities
            .get::<T>()
            .ok_or(Error::FacilityNotRegistered {
                type_name: type_name::<T>(),
            })
    }

    #[must_use]
    pub fn facilities(&self) -> &Arc<Facilities> {
        &self.facilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{Role, TenantStatus, UserId};

    #[derive(Debug)]
    struct Store(&'static str);

    fn tenant() -> Arc<Tenant> {
        Arc::new(Tenant {
            id: TenantId(1),
            name: "Demonstration".to_string(),
            subdomain: "demo".to_string(),
            status: TenantStatus::Active,
        })
    }

    #[test]
    fn insert_and_get_by_type() {
        let mut facilities = Facilities::new();
        facilities.insert(Store("memory")).insert(42_u32);
        assert_eq!(facilities.get::<Store>().unwrap().0, "memory");
        assert_eq!(facilities.get::<u32>(), Some(&42));
        assert!(facilities.get::<String>().is_none());
        assert_eq!(facilities.names().len(), 2);
    }

    #[test]
    fn reinsert_replaces_without_duplicating_name() {
        let mut facilities = Facilities::new();
        facilities.insert(Store("a")).insert(Store("b"));
        assert_eq!(facilities.get::<Store>().unwrap().0, "b");
        assert_eq!(facilities.names().len(), 1);
    }

    #[test]
    fn unscoped_bundle_refuses_tenant_id() {
        let services = Services::new(Arc::new(Facilities::new()));
        assert!(matches!(services.tenant_id(), Err(Error::Unscoped)));
        assert!(matches!(services.user(), Err(Error::Unauthenticated)));

        services.set_current_tenant(Some(tenant()));
        assert_eq!(services.tenant_id().unwrap(), TenantId(1));
    }

    #[test]
    fn scope_can_be_overridden() {
        let services = Services::new(Arc::new(Facilities::new()));
        let user = Arc::new(User {
            id: UserId(9),
            tenant_id: TenantId(1),
            name: "Admin".to_string(),
            email: "admin@demo.test".to_string(),
            role: Role::Administrator,
        });
        services.set_current_user(Some(user.clone()));
        assert_eq!(services.current_user(), Some(user));
        services.set_current_user(None);
        assert!(services.current_user().is_none());
    }

    #[test]
    fn missing_facility_names_type() {
        let services = Services::new(Arc::new(Facilities::new()));
        let err = services.facility::<Store>().unwrap_err();
        assert!(err.to_string().contains("Store"));
        assert!(matches!(err, Error::FacilityNotRegistered { .. }));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
