//! Composition root: wires stores, clock, handlers and the bus together.

use std::sync::Arc;

use tenantbus_core::{Clock, Context, Facilities, Result, Services, SystemClock};
use tokio_util::sync::CancellationToken;

use crate::service::bus::Bus;
use crate::service::config::BusConfig;
use crate::service::domain;
use crate::service::registry::HandlerRegistry;
use crate::service::worker::{BackgroundWorker, TaskRunner};
use crate::storage::{MemoryStore, NotificationStore, PostStore, UserStore};

/// A background worker running [`Task`](crate::service::worker::Task)s.
pub type Worker = BackgroundWorker<TaskRunner>;

/// Builder for [`App`].
pub struct AppBuilder {
    config: BusConfig,
    facilities: Facilities,
    has_store: bool,
    clock: Option<Arc<dyn Clock>>,
}

impl AppBuilder {
    /// Backing store for all three store traits.
    #[must_use]
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where
        S: NotificationStore + PostStore + UserStore + 'static,
    {
        self.facilities
            .insert::<Arc<dyn NotificationStore>>(store.clone())
            .insert::<Arc<dyn PostStore>>(store.clone())
            .insert::<Arc<dyn UserStore>>(store);
        self.has_store = true;
        self
    }

    /// Time source for handlers. Defaults to [`SystemClock`].
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Any additional facility handlers may look up by type.
    #[must_use]
    pub fn facility<T: std::any::Any + Send + Sync>(mut self, facility: T) -> Self {
        self.facilities.insert(facility);
        self
    }

    /// Register the domain handlers and freeze the registry.
    ///
    /// Without an explicit store an empty [`MemoryStore`] is used.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if two handlers claim the same operation.
    pub fn build(mut self) -> Result<App> {
        if !self.has_store {
            self = self.store(Arc::new(MemoryStore::new()));
        }
        let clock = self.clock.take().unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        self.facilities.insert::<Arc<dyn Clock>>(clock);

        let mut builder = HandlerRegistry::builder();
        domain::register_all(&mut builder)?;
        let registry = Arc::new(builder.build());
        tracing::info!(operations = registry.len(), "handler registry built");

        let config = Arc::new(self.config);
        Ok(App {
            bus: Bus::new(registry, config.clone()),
            config,
            facilities: Arc::new(self.facilities),
        })
    }
}

/// A wired application: the bus plus the facilities every context is given.
#[derive(Clone)]
pub struct App {
    bus: Bus,
    config: Arc<BusConfig>,
    facilities: Arc<Facilities>,
}

impl App {
    #[must_use]
    pub fn builder(config: BusConfig) -> AppBuilder {
        AppBuilder {
            config,
            facilities: Facilities::new(),
            has_store: false,
            clock: None,
        }
    }

    #[must_use]
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    #[must_use]
    pub fn facilities(&self) -> &Arc<Facilities> {
        &self.facilities
    }

    /// Give `ctx` a fresh service bundle, scoped by its current user and tenant.
    pub fn attach(&self, ctx: &mut Context) {
        ctx.attach_services(Services::new(self.facilities.clone()));
    }

    /// Attach services and dispatch one operation.
    ///
    /// # Errors
    ///
    /// See [`Bus::dispatch`].
    pub async fn dispatch<O: crate::service::operation::Operation>(
        &self,
        ctx: &mut Context,
        op: O,
    ) -> Result<O::Output> {
        if !ctx.has_services() {
            self.attach(ctx);
        }
        self.bus.dispatch(ctx, op).await
    }

    /// Start a background worker whose tasks are cancelled by `shutdown`.
    #[must_use]
    pub fn spawn_worker(&self, worker_id: &str, shutdown: CancellationToken) -> Worker {
        let runner = TaskRunner::new(
            worker_id,
            self.bus.clone(),
            self.facilities.clone(),
            shutdown.clone(),
        );
        tracing::info!(worker_id, "starting worker");
        BackgroundWorker::start(
            runner,
            self.config.worker_tick_interval_ms,
            self.config.worker_queue_capacity,
            shutdown,
        )
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("registry", self.bus.registry())
            .field("facilities", &self.facilities.names())
            .finish_non_exhaustive()
    }
}
