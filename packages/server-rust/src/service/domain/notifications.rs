//! Notification lifecycle: `Unread -> Read`, with read notifications dropping
//! out of the active list once their last update is older than the window.
//!
//! Addressing a notification the caller does not own reports `NotFound`,
//! exactly as if it did not exist.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tenantbus_core::{Context, Error, Notification, Result, UserId};

use super::{clock, services, store};
use crate::service::bus::Bus;
use crate::service::handler::Handler;
use crate::service::registry::RegistryBuilder;
use crate::storage::{NewNotification, NotificationStore, UserStore};
use crate::{command, query};

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Notify `user_id` about something that happened on a post. The author is
/// the context's current user, if any.
#[derive(Debug, Clone)]
pub struct AddNewNotification {
    pub user_id: UserId,
    pub title: String,
    pub link: String,
    pub post_id: u64,
}
command!(AddNewNotification => Notification);

#[derive(Debug, Clone, Copy)]
pub struct MarkNotificationAsRead {
    pub id: u64,
}
command!(MarkNotificationAsRead => ());

/// Returns how many notifications changed state.
#[derive(Debug, Clone, Copy)]
pub struct MarkAllNotificationsAsRead;
command!(MarkAllNotificationsAsRead => usize);

/// Unread notifications of the current user; 0 for anonymous contexts.
#[derive(Debug, Clone, Copy)]
pub struct CountUnreadNotifications;
query!(CountUnreadNotifications => usize);

#[derive(Debug, Clone, Copy)]
pub struct GetActiveNotifications;
query!(GetActiveNotifications => Vec<Notification>);

#[derive(Debug, Clone, Copy)]
pub struct GetNotificationByID {
    pub id: u64,
}
query!(GetNotificationByID => Notification);

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub struct NotificationHandlers;

pub(super) fn register(builder: &mut RegistryBuilder) -> Result<()> {
    builder
        .handler::<AddNewNotification, _>(NotificationHandlers)?
        .handler::<MarkNotificationAsRead, _>(NotificationHandlers)?
        .handler::<MarkAllNotificationsAsRead, _>(NotificationHandlers)?
        .handler::<CountUnreadNotifications, _>(NotificationHandlers)?
        .handler::<GetActiveNotifications, _>(NotificationHandlers)?
        .handler::<GetNotificationByID, _>(NotificationHandlers)?;
    Ok(())
}

/// Oldest `updated_at` (exclusive) at which a read notification is still active.
///
/// A window reaching past the earliest representable time saturates there.
#[must_use]
pub fn active_cutoff(now: DateTime<Utc>, window_days: u32) -> DateTime<Utc> {
    Duration::try_days(i64::from(window_days))
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl NotificationHandlers {
    async fn add(&self, ctx: &Context, op: &AddNewNotification) -> Result<Notification> {
        let services = services(ctx)?;
        let tenant = services.tenant_id()?;
        let users = store::<dyn UserStore>(services)?;
        if users.user(tenant, op.user_id).await?.is_none() {
            return Err(Error::NotFound { entity: "user" });
        }
        let new = NewNotification {
            user_id: op.user_id,
            author_id: services.current_user().map(|u| u.id),
            post_id: op.post_id,
            title: op.title.clone(),
            link: op.link.clone(),
            created_at: clock(services)?.now(),
        };
        let notifications = store::<dyn NotificationStore>(services)?;
        Ok(notifications.insert_notification(tenant, new).await?)
    }

    async fn mark_read(&self, ctx: &Context, id: u64) -> Result<()> {
        let services = services(ctx)?;
        let tenant = services.tenant_id()?;
        let user = services.user()?;
        let now = clock(services)?.now();
        let notifications = store::<dyn NotificationStore>(services)?;
        if notifications.mark_read(tenant, user.id, id, now).await? {
            Ok(())
        } else {
            Err(Error::NotFound {
                entity: "notification",
            })
        }
    }

    async fn mark_all_read(&self, ctx: &Context) -> Result<usize> {
        let services = services(ctx)?;
        let tenant = services.tenant_id()?;
        let user = services.user()?;
        let now = clock(services)?.now();
        let notifications = store::<dyn NotificationStore>(services)?;
        Ok(notifications.mark_all_read(tenant, user.id, now).await?)
    }

    async fn count_unread(&self, ctx: &Context) -> Result<usize> {
        let services = services(ctx)?;
        let Some(user) = services.current_user() else {
            return Ok(0);
        };
        let tenant = services.tenant_id()?;
        let notifications = store::<dyn NotificationStore>(services)?;
        Ok(notifications.count_unread(tenant, user.id).await?)
    }

    async fn active(&self, ctx: &Context, window_days: u32) -> Result<Vec<Notification>> {
        let services = services(ctx)?;
        let tenant = services.tenant_id()?;
        let user = services.user()?;
        let cutoff = active_cutoff(clock(services)?.now(), window_days);
        let notifications = store::<dyn NotificationStore>(services)?;
        Ok(notifications
            .active_notifications(tenant, user.id, cutoff)
            .await?)
    }

    async fn by_id(&self, ctx: &Context, id: u64) -> Result<Notification> {
        let services = services(ctx)?;
        let tenant = services.tenant_id()?;
        let user = services.user()?;
        let notifications = store::<dyn NotificationStore>(services)?;
        notifications
            .notification(tenant, user.id, id)
            .await?
            .ok_or(Error::NotFound {
                entity: "notification",
            })
    }
}

#[async_trait]
impl Handler<AddNewNotification> for NotificationHandlers {
    async fn handle(
        &self,
        _bus: &Bus,
        ctx: &Context,
        op: &AddNewNotification,
    ) -> Result<Notification> {
        self.add(ctx, op).await.map_err(|err| ctx.fail(err))
    }
}

#[async_trait]
impl Handler<MarkNotificationAsRead> for NotificationHandlers {
    async fn handle(&self, _bus: &Bus, ctx: &Context, op: &MarkNotificationAsRead) -> Result<()> {
        self.mark_read(ctx, op.id).await.map_err(|err| ctx.fail(err))
    }
}

#[async_trait]
impl Handler<MarkAllNotificationsAsRead> for NotificationHandlers {
    async fn handle(
        &self,
        _bus: &Bus,
        ctx: &Context,
        _op: &MarkAllNotificationsAsRead,
    ) -> Result<usize> {
        self.mark_all_read(ctx).await.map_err(|err| ctx.fail(err))
    }
}

#[async_trait]
impl Handler<CountUnreadNotifications> for NotificationHandlers {
    async fn handle(
        &self,
        _bus: &Bus,
        ctx: &Context,
        _op: &CountUnreadNotifications,
    ) -> Result<usize> {
        self.count_unread(ctx).await.map_err(|err| ctx.fail(err))
    }
}

#[async_trait]
impl Handler<GetActiveNotifications> for NotificationHandlers {
    async fn handle(
        &self,
        bus: &Bus,
        ctx: &Context,
        _op: &GetActiveNotifications,
    ) -> Result<Vec<Notification>> {
        self.active(ctx, bus.config().notification_window_days)
            .await
            .map_err(|err| ctx.fail(err))
    }
}

#[async_trait]
impl Handler<GetNotificationByID> for NotificationHandlers {
    async fn handle(
        &self,
        _bus: &Bus,
        ctx: &Context,
        op: &GetNotificationByID,
    ) -> Result<Notification> {
        self.by_id(ctx, op.id).await.map_err(|err| ctx.fail(err))
    }
}
