use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use tenantbus_core::{Error, Result};

use super::handler::{Decorator, Handler};
use super::operation::{Operation, OperationKind};

// ---------------------------------------------------------------------------
// Route
// ---------------------------------------------------------------------------

/// Handlers bound to one concrete operation type.
pub(crate) struct Route<O: Operation> {
    pub(crate) handler: Option<Arc<dyn Handler<O>>>,
    pub(crate) decorators: Vec<Arc<dyn Decorator<O>>>,
}

impl<O: Operation> Default for Route<O> {
    fn default() -> Self {
        Self {
            handler: None,
            decorators: Vec::new(),
        }
    }
}

/// Type-erased route plus the metadata needed without knowing `O`.
struct Entry {
    type_name: &'static str,
    kind: OperationKind,
    /// Always a `Route<O>` for the `O` whose `TypeId` keys this entry.
    route: Box<dyn Any + Send + Sync>,
}

impl Entry {
    fn new<O: Operation>() -> Self {
        Self {
            type_name: O::name(),
            kind: O::KIND,
            route: Box::new(Route::<O>::default()),
        }
    }

    fn route<O: Operation>(&self) -> Option<&Route<O>> {
        self.route.downcast_ref::<Route<O>>()
    }

    fn route_mut<O: Operation>(&mut self) -> Option<&mut Route<O>> {
        self.route.downcast_mut::<Route<O>>()
    }
}

// ---------------------------------------------------------------------------
// RegistryBuilder
// ---------------------------------------------------------------------------

/// Collects handler registrations during startup.
///
/// Configuration errors (a second authoritative handler, a decorator on a
/// command) are returned from the registering call, so a bad wiring fails
/// before any dispatch happens.
#[derive(Default)]
pub struct RegistryBuilder {
    entries: HashMap<TypeId, Entry>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry<O: Operation>(&mut self) -> &mut Route<O> {
        self.entries
            .entry(TypeId::of::<O>())
            .or_insert_with(Entry::new::<O>)
            .route_mut::<O>()
            .expect("entry keyed by TypeId::of::<O>() always holds Route<O>")
    }

    /// Register the authoritative handler for `O`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateHandler`] if `O` already has one.
    pub fn handler<O, H>(&mut self, handler: H) -> Result<&mut Self>
    where
        O: Operation,
        H: Handler<O>,
    {
        let route = self.entry::<O>();
        if route.handler.is_some() {
            return Err(Error::DuplicateHandler {
                type_name: O::name(),
            });
        }
        route.handler = Some(Arc::new(handler));
        tracing::debug!(operation = O::name(), kind = %O::KIND, "handler registered");
        Ok(self)
    }

    /// Register a decorator for the query `O`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DecoratorOnCommand`] if `O` is a command.
    pub fn decorator<O, D>(&mut self, decorator: D) -> Result<&mut Self>
    where
        O: Operation,
        D: Decorator<O>,
    {
        if O::KIND == OperationKind::Command {
            return Err(Error::DecoratorOnCommand {
                type_name: O::name(),
            });
        }
        self.entry::<O>().decorators.push(Arc::new(decorator));
        tracing::debug!(operation = O::name(), "decorator registered");
        Ok(self)
    }

    /// Freeze the registrations.
    #[must_use]
    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            entries: self.entries,
        }
    }
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// Read-only table from operation type to its handlers.
///
/// Built once at startup and shared by every dispatch; lookups take no locks.
/// Resolution is by exact type: there is no fallback to related types.
pub struct HandlerRegistry {
    entries: HashMap<TypeId, Entry>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub(crate) fn route<O: Operation>(&self) -> Option<&Route<O>> {
        self.entries
            .get(&TypeId::of::<O>())
            .and_then(Entry::route::<O>)
    }

    /// Whether `O` has an authoritative handler.
    #[must_use]
    pub fn contains<O: Operation>(&self) -> bool {
        self.route::<O>().is_some_and(|r| r.handler.is_some())
    }

    #[must_use]
    pub fn decorator_count<O: Operation>(&self) -> usize {
        self.route::<O>().map_or(0, |r| r.decorators.len())
    }

    /// Registered operation type names with their kind, sorted by name.
    #[must_use]
    pub fn operations(&self) -> Vec<(&'static str, OperationKind)> {
        let mut ops: Vec<_> = self
            .entries
            .values()
            .map(|e| (e.type_name, e.kind))
            .collect();
        ops.sort_unstable_by_key(|(name, _)| *name);
        ops
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("operations", &self.operations())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
