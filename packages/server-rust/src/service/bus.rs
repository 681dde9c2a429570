//! Dispatch: resolves operations to their handlers and runs them against a context.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tenantbus_core::{Context, Error, Result};
use tracing::{info_span, Instrument};

use super::config::BusConfig;
use super::operation::Operation;
use super::registry::{HandlerRegistry, Route};

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// The command/query bus.
///
/// Cheap to clone; all clones share one read-only [`HandlerRegistry`].
/// Operations in a batch run strictly one after another in the order given,
/// and the first failure aborts the rest. Errors are returned exactly as the
/// handler produced them.
#[derive(Clone)]
pub struct Bus {
    registry: Arc<HandlerRegistry>,
    config: Arc<BusConfig>,
}

impl Bus {
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>, config: Arc<BusConfig>) -> Self {
        Self { registry, config }
    }

    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Dispatch a single operation and return its output.
    ///
    /// # Errors
    ///
    /// - [`Error::HandlerNotFound`] if `O` has no registered handler.
    /// - [`Error::Cancelled`] if `ctx` is cancelled before or while the handler runs.
    /// - Whatever the handler or a decorator returned.
    ///
    /// # Panics
    ///
    /// With [`BusConfig::strict_handlers`] set, an unregistered operation type panics.
    pub async fn dispatch<O: Operation>(&self, ctx: &Context, op: O) -> Result<O::Output> {
        self.run(ctx, &op).await
    }

    /// Dispatch operations of one type in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// The first error encountered; later operations are never invoked.
    ///
    /// # Panics
    ///
    /// See [`Bus::dispatch`].
    pub async fn dispatch_all<O: Operation>(
        &self,
        ctx: &Context,
        ops: Vec<O>,
    ) -> Result<Vec<O::Output>> {
        let mut outputs = Vec::with_capacity(ops.len());
        for (index, op) in ops.iter().enumerate() {
            outputs.push(self.step(ctx, op, index).await?);
        }
        Ok(outputs)
    }

    /// Dispatch a tuple of operations of mixed types in order, stopping at the
    /// first failure.
    ///
    /// ```ignore
    /// let (post, notification) = bus
    ///     .dispatch_batch(&ctx, (AddNewPost { .. }, AddNewNotification { .. }))
    ///     .await?;
    /// ```
    ///
    /// # Errors
    ///
    /// The first error encountered; later operations are never invoked.
    ///
    /// # Panics
    ///
    /// See [`Bus::dispatch`].
    pub async fn dispatch_batch<B: Batch>(&self, ctx: &Context, batch: B) -> Result<B::Outputs> {
        batch.run(self, ctx).await
    }

    /// One batch member; logs where the batch stopped.
    async fn step<O: Operation>(&self, ctx: &Context, op: &O, index: usize) -> Result<O::Output> {
        self.run(ctx, op).await.inspect_err(|err| {
            tracing::debug!(
                context_id = ctx.context_id(),
                operation = O::name(),
                index,
                error = %err,
                "batch aborted"
            );
        })
    }

    async fn run<O: Operation>(&self, ctx: &Context, op: &O) -> Result<O::Output> {
        ctx.check_cancelled()?;

        let Some(route) = self.registry.route::<O>().filter(|r| r.handler.is_some()) else {
            return Err(self.missing::<O>(ctx));
        };

        let span = info_span!(
            "dispatch",
            operation = O::name(),
            kind = O::KIND.as_str(),
            context_id = ctx.context_id(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async move {
            let start = Instant::now();
            let result = tokio::select! {
                biased;
                () = ctx.cancelled() => Err(Error::Cancelled),
                result = self.invoke(route, ctx, op) => result,
            };

            #[allow(clippy::cast_possible_truncation)]
            let duration_ms = start.elapsed().as_millis() as u64;
            let outcome = match &result {
                Ok(_) => "ok",
                Err(err) if err.is_cancelled() => "cancelled",
                Err(_) => "error",
            };
            tracing::Span::current().record("duration_ms", duration_ms);
            tracing::Span::current().record("outcome", outcome);
            tracing::trace!(duration_ms, outcome, "operation completed");

            result
        }
        .instrument(span)
        .await
    }

    async fn invoke<O: Operation>(
        &self,
        route: &Route<O>,
        ctx: &Context,
        op: &O,
    ) -> Result<O::Output> {
        let Some(handler) = &route.handler else {
            return Err(Error::HandlerNotFound {
                type_name: O::name(),
            });
        };
        let mut output = handler.handle(self, ctx, op).await?;
        for decorator in &route.decorators {
            decorator.decorate(self, ctx, op, &mut output).await?;
        }
        Ok(output)
    }

    fn missing<O: Operation>(&self, ctx: &Context) -> Error {
        tracing::error!(
            context_id = ctx.context_id(),
            operation = O::name(),
            "no handler registered for operation"
        );
        assert!(
            !self.config.strict_handlers,
            "no handler registered for operation `{}`",
            O::name()
        );
        Error::HandlerNotFound {
            type_name: O::name(),
        }
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// A tuple of operations dispatched in order by [`Bus::dispatch_batch`].
#[async_trait]
pub trait Batch: Send + Sync + 'static {
    type Outputs: Send;

    async fn run(self, bus: &Bus, ctx: &Context) -> Result<Self::Outputs>;
}

macro_rules! impl_batch {
    ($($op:ident . $idx:tt),+) => {
        #[async_trait]
        impl<$($op: Operation),+> Batch for ($($op,)+) {
            type Outputs = ($(<$op as Operation>::Output,)+);

            async fn run(self, bus: &Bus, ctx: &Context) -> Result<Self::Outputs> {
                // Tuple fields are evaluated left to right.
                Ok(($(bus.step(ctx, &self.$idx, $idx).await?,)+))
            }
        }
    };
}

impl_batch!(A.0);
impl_batch!(A.0, B.1);
impl_batch!(A.0, B.1, C.2);
impl_batch!(A.0, B.1, C.2, D.3);
impl_batch!(A.0, B.1, C.2, D.3, E.4);
impl_batch!(A.0, B.1, C.2, D.3, E.4, F.5);

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;
    use tenantbus_core::ErrorKind;

    use super::*;
    use crate::service::handler::{Decorator, Handler};

    type Log = Arc<Mutex<Vec<String>>>;

    /// Appends its label to the log; fails when `fail` is set.
    struct Step {
        label: &'static str,
        fail: bool,
    }
    crate::command!(Step => &'static str);

    struct Other(u32);
    crate::command!(Other => u32);

    struct Unregistered;
    crate::query!(Unregistered => ());

    /// Dispatches two `Step`s from inside a handler.
    struct Nested;
    crate::command!(Nested => Vec<&'static str>);

    struct Tags;
    crate::query!(Tags => Vec<String>);

    struct Sleep;
    crate::query!(Sleep => ());

    struct Recorder(Log);

    #[async_trait]
    impl Handler<Step> for Recorder {
        async fn handle(&self, _bus: &Bus, ctx: &Context, op: &Step) -> Result<&'static str> {
            self.0.lock().push(op.label.to_string());
            if op.fail {
                return Err(ctx.fail(Error::NotFound { entity: "step" }));
            }
            Ok(op.label)
        }
    }

    #[async_trait]
    impl Handler<Other> for Recorder {
        async fn handle(&self, _bus: &Bus, _ctx: &Context, op: &Other) -> Result<u32> {
            self.0.lock().push(format!("other:{}", op.0));
            Ok(op.0 * 2)
        }
    }

    #[async_trait]
    impl Handler<Nested> for Recorder {
        async fn handle(&self, bus: &Bus, ctx: &Context, _op: &Nested) -> Result<Vec<&'static str>> {
            bus.dispatch_all(
                ctx,
                vec![
                    Step { label: "inner-1", fail: false },
                    Step { label: "inner-2", fail: false },
                ],
            )
            .await
        }
    }

    #[async_trait]
    impl Handler<Tags> for Recorder {
        async fn handle(&self, _bus: &Bus, _ctx: &Context, _op: &Tags) -> Result<Vec<String>> {
            Ok(vec!["base".to_string()])
        }
    }

    struct Suffix(&'static str);

    #[async_trait]
    impl Decorator<Tags> for Suffix {
        async fn decorate(
            &self,
            _bus: &Bus,
            _ctx: &Context,
            _op: &Tags,
            output: &mut Vec<String>,
        ) -> Result<()> {
            output.push(self.0.to_string());
            Ok(())
        }
    }

    struct Sleeper;

    #[async_trait]
    impl Handler<Sleep> for Sleeper {
        async fn handle(&self, _bus: &Bus, _ctx: &Context, _op: &Sleep) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn make_bus(log: &Log, config: BusConfig) -> Bus {
        let mut builder = HandlerRegistry::builder();
        builder
            .handler::<Step, _>(Recorder(log.clone()))
            .unwrap()
            .handler::<Other, _>(Recorder(log.clone()))
            .unwrap()
            .handler::<Nested, _>(Recorder(log.clone()))
            .unwrap()
            .handler::<Tags, _>(Recorder(log.clone()))
            .unwrap()
            .decorator::<Tags, _>(Suffix("first"))
            .unwrap()
            .decorator::<Tags, _>(Suffix("second"))
            .unwrap()
            .handler::<Sleep, _>(Sleeper)
            .unwrap();
        Bus::new(Arc::new(builder.build()), Arc::new(config))
    }

    fn step(label: &'static str) -> Step {
        Step { label, fail: false }
    }

    #[tokio::test]
    async fn dispatch_returns_output() {
        let log = Log::default();
        let bus = make_bus(&log, BusConfig::default());
        let out = bus.dispatch(&Context::background(), step("a")).await.unwrap();
        assert_eq!(out, "a");
    }

    #[tokio::test]
    async fn dispatch_all_preserves_order() {
        let log = Log::default();
        let bus = make_bus(&log, BusConfig::default());
        let out = bus
            .dispatch_all(&Context::background(), vec![step("a"), step("b"), step("c")])
            .await
            .unwrap();
        assert_eq!(out, vec!["a", "b", "c"]);
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn failure_stops_remaining_operations() {
        let log = Log::default();
        let bus = make_bus(&log, BusConfig::default());
        let err = bus
            .dispatch_all(
                &Context::background(),
                vec![step("a"), Step { label: "b", fail: true }, step("c")],
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.location().is_some());
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn heterogeneous_batch_runs_in_order() {
        let log = Log::default();
        let bus = make_bus(&log, BusConfig::default());
        let (a, doubled, b) = bus
            .dispatch_batch(&Context::background(), (step("a"), Other(21), step("b")))
            .await
            .unwrap();
        assert_eq!((a, doubled, b), ("a", 42, "b"));
        assert_eq!(*log.lock(), vec!["a", "other:21", "b"]);
    }

    #[tokio::test]
    async fn heterogeneous_batch_is_fail_fast() {
        let log = Log::default();
        let bus = make_bus(&log, BusConfig::default());
        let result = bus
            .dispatch_batch(
                &Context::background(),
                (Step { label: "x", fail: true }, Other(1)),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(*log.lock(), vec!["x"]);
    }

    #[tokio::test]
    async fn unregistered_operation_names_type() {
        let log = Log::default();
        let bus = make_bus(&log, BusConfig::default());
        let err = bus
            .dispatch(&Context::background(), Unregistered)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(
            matches!(err, Error::HandlerNotFound { type_name } if type_name.ends_with("Unregistered"))
        );
    }

    #[tokio::test]
    #[should_panic(expected = "no handler registered")]
    async fn strict_mode_panics_on_unregistered_operation() {
        let log = Log::default();
        let config = BusConfig {
            strict_handlers: true,
            ..BusConfig::default()
        };
        let bus = make_bus(&log, config);
        let _ = bus.dispatch(&Context::background(), Unregistered).await;
    }

    #[tokio::test]
    async fn nested_dispatch_shares_context() {
        let log = Log::default();
        let bus = make_bus(&log, BusConfig::default());
        let out = bus.dispatch(&Context::background(), Nested).await.unwrap();
        assert_eq!(out, vec!["inner-1", "inner-2"]);
    }

    #[tokio::test]
    async fn decorators_run_after_handler_in_registration_order() {
        let log = Log::default();
        let bus = make_bus(&log, BusConfig::default());
        let out = bus.dispatch(&Context::background(), Tags).await.unwrap();
        assert_eq!(out, vec!["base", "first", "second"]);
    }

    #[tokio::test]
    async fn cancelled_context_skips_handlers() {
        let log = Log::default();
        let bus = make_bus(&log, BusConfig::default());
        let ctx = Context::background();
        ctx.cancel();
        let err = bus
            .dispatch_all(&ctx, vec![step("a"), step("b")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(log.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_running_handler() {
        let log = Log::default();
        let bus = make_bus(&log, BusConfig::default());
        let ctx = Context::background();
        let token = ctx.cancellation_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let err = bus.dispatch(&ctx, Sleep).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
