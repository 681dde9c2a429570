use async_trait::async_trait;
use tenantbus_core::{Context, Error, Post, Result};

use super::{clock, services, store};
use crate::service::bus::Bus;
use crate::service::handler::Handler;
use crate::service::registry::RegistryBuilder;
use crate::storage::{NewPost, PostStore};
use crate::{command, query};

/// Create a post authored by the current user.
#[derive(Debug, Clone)]
pub struct AddNewPost {
    pub title: String,
    pub description: String,
}
command!(AddNewPost => Post);

#[derive(Debug, Clone, Copy)]
pub struct GetPostByID {
    pub id: u64,
}
query!(GetPostByID => Post);

pub struct PostHandlers;

pub(super) fn register(builder: &mut RegistryBuilder) -> Result<()> {
    builder
        .handler::<AddNewPost, _>(PostHandlers)?
        .handler::<GetPostByID, _>(PostHandlers)?;
    Ok(())
}

impl PostHandlers {
    async fn add(&self, ctx: &Context, op: &AddNewPost) -> Result<Post> {
        let services = services(ctx)?;
        let tenant = services.tenant_id()?;
        let author = services.user()?;
        let new = NewPost {
            title: op.title.trim().to_string(),
            description: op.description.trim().to_string(),
            author_id: author.id,
            created_at: clock(services)?.now(),
        };
        let posts = store::<dyn PostStore>(services)?;
        Ok(posts.insert_post(tenant, new).await?)
    }

    async fn by_id(&self, ctx: &Context, id: u64) -> Result<Post> {
        let services = services(ctx)?;
        let tenant = services.tenant_id()?;
        let posts = store::<dyn PostStore>(services)?;
        posts
            .post(tenant, id)
            .await?
            .ok_or(Error::NotFound { entity: "post" })
    }
}

#[async_trait]
impl Handler<AddNewPost> for PostHandlers {
    async fn handle(&self, _bus: &Bus, ctx: &Context, op: &AddNewPost) -> Result<Post> {
        self.add(ctx, op).await.map_err(|err| ctx.fail(err))
    }
}

#[async_trait]
impl Handler<GetPostByID> for PostHandlers {
    async fn handle(&self, _bus: &Bus, ctx: &Context, op: &GetPostByID) -> Result<Post> {
        self.by_id(ctx, op.id).await.map_err(|err| ctx.fail(err))
    }
}
