//! Handler traits implemented by business code.

use async_trait::async_trait;
use tenantbus_core::{Context, Result};

use super::bus::Bus;
use super::operation::Operation;

/// The authoritative handler for one operation type.
///
/// Handlers must observe `ctx`'s cancellation around any blocking work, scope
/// every persistence call by the bundle's current tenant, and funnel failures
/// through [`Context::fail`]. `bus` is the dispatcher the operation arrived
/// on; nested dispatch is a plain call on it with the same `ctx`.
#[async_trait]
pub trait Handler<O: Operation>: Send + Sync + 'static {
    async fn handle(&self, bus: &Bus, ctx: &Context, op: &O) -> Result<O::Output>;
}

/// Appends computed fields to a query's output after the authoritative handler ran.
///
/// Decorators run in registration order.
#[async_trait]
pub trait Decorator<O: Operation>: Send + Sync + 'static {
    async fn decorate(
        &self,
        bus: &Bus,
        ctx: &Context,
        op: &O,
        output: &mut O::Output,
    ) -> Result<()>;
}
