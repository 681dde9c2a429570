//! Business handlers consuming the bus.
//!
//! Handlers take their collaborators from the context's service bundle:
//! stores are registered as `Arc<dyn ...Store>` facilities and time as
//! `Arc<dyn Clock>`.

pub mod notifications;
pub mod posts;

use std::sync::Arc;

use tenantbus_core::{Clock, Context, Result, Services};

use crate::service::registry::RegistryBuilder;

pub use notifications::{
    AddNewNotification, CountUnreadNotifications, GetActiveNotifications, GetNotificationByID,
    MarkAllNotificationsAsRead, MarkNotificationAsRead, NotificationHandlers,
};
pub use posts::{AddNewPost, GetPostByID, PostHandlers};

/// Register every domain handler.
///
/// # Errors
///
/// Returns a configuration error if any operation is already registered.
pub fn register_all(builder: &mut RegistryBuilder) -> Result<()> {
    notifications::register(builder)?;
    posts::register(builder)?;
    Ok(())
}

/// The bundle, failing early if the context is already cancelled.
fn services(ctx: &Context) -> Result<&Services> {
    ctx.check_cancelled()?;
    ctx.services()
}

fn store<T: ?Sized + Send + Sync + 'static>(services: &Services) -> Result<&Arc<T>> {
    services.facility::<Arc<T>>()
}

fn clock(services: &Services) -> Result<&Arc<dyn Clock>> {
    services.facility::<Arc<dyn Clock>>()
}
