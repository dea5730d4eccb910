//! A replication node: routes each request to one child and keeps the
//! other children in step.

use crate::catalog::Catalog;
use crate::common::{Error, ReplConfig, Result, ResultExt};
use crate::ops::{rebalance, RebalanceReport};
use crate::repl::{FanoutReplicator, OperationKind, OperationTracker, VoteRouter};
use crate::resource::{
    ChildMap, ChildOp, ChildResource, DirEntry, FileStat, HierarchyPath, ObjectRef, OpOutput,
    RequestContext, RouteOperation, Session, Vote, Whence, HIERARCHY_DELIMITER,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

pub struct ReplResource {
    name: String,
    config: ReplConfig,
    router: VoteRouter,
    tracker: OperationTracker,
    replicator: FanoutReplicator,
    catalog: Arc<dyn Catalog>,
}

impl ReplResource {
    pub fn new(
        name: impl Into<String>,
        children: ChildMap,
        catalog: Arc<dyn Catalog>,
        config: ReplConfig,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.contains(HIERARCHY_DELIMITER) {
            return Err(Error::InvalidConfig(format!("invalid resource name {:?}", name)));
        }
        if children.is_empty() {
            return Err(Error::InvalidConfig(format!("{} has no children", name)));
        }

        Ok(Self {
            router: VoteRouter::new(name.clone(), children, &config),
            tracker: OperationTracker::new(name.clone()),
            replicator: FanoutReplicator::new(catalog.clone(), config.probe_concurrency),
            catalog,
            config,
            name,
        })
    }

    pub fn children(&self) -> &ChildMap {
        self.router.children()
    }

    pub fn router(&self) -> &VoteRouter {
        &self.router
    }

    pub fn tracker(&self) -> &OperationTracker {
        &self.tracker
    }

    pub fn config(&self) -> &ReplConfig {
        &self.config
    }

    /// Run `op` against the child the object's hierarchy names below this
    /// node. Errors carry this node's name and the operation.
    pub async fn handle(&self, ctx: &RequestContext, op: ChildOp) -> Result<OpOutput> {
        let label = format!("{} {}", self.name, op.name());
        self.dispatch(ctx, op).await.context(label)
    }

    async fn dispatch(&self, ctx: &RequestContext, op: ChildOp) -> Result<OpOutput> {
        check_variant(&op, &ctx.object)?;

        match op {
            ChildOp::Create => self.forward_tracked(ctx, op, OperationKind::Create).await,
            ChildOp::Write { .. } => self.forward_tracked(ctx, op, OperationKind::Write).await,
            ChildOp::Unlink => self.forward_tracked(ctx, op, OperationKind::Unlink).await,
            ChildOp::Modified => {
                let out = self.forward(ctx, op).await?;
                if !ctx.object.is_maintenance() {
                    if let Err(e) = self.fan_out(ctx).await {
                        tracing::warn!(
                            node = %self.name,
                            object = %ctx.object.logical_path(),
                            error = %e,
                            "Fan-out failed; returning the primary result"
                        );
                    }
                }
                Ok(out)
            }
            other => self.forward(ctx, other).await,
        }
    }

    async fn forward(&self, ctx: &RequestContext, op: ChildOp) -> Result<OpOutput> {
        let next = ctx.object.hierarchy().next(&self.name)?;
        let child = self.children().resolve(next)?;
        child.call(ctx, op).await
    }

    async fn forward_tracked(
        &self,
        ctx: &RequestContext,
        op: ChildOp,
        kind: OperationKind,
    ) -> Result<OpOutput> {
        let out = self.forward(ctx, op).await?;
        if !ctx.object.is_maintenance() {
            self.tracker.record(&ctx.session, ctx.object.as_file()?, kind)?;
        }
        Ok(out)
    }

    /// Push this object's tracked create/write to the sibling list stored
    /// when the request was routed.
    async fn fan_out(&self, ctx: &RequestContext) -> Result<()> {
        let object = ctx.object.logical_path();
        let pending: Vec<_> = self
            .tracker
            .queue(&ctx.session)?
            .into_iter()
            .filter(|op| op.object == object)
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let Some(siblings) = self.router.sibling_list(&ctx.session)? else {
            tracing::debug!(node = %self.name, object, "No sibling list; nothing to fan out");
            return Ok(());
        };

        self.replicator
            .replicate_all(&pending, ctx.object.hierarchy(), &siblings)
            .await
    }

    pub async fn create(&self, ctx: &RequestContext) -> Result<i64> {
        self.handle(ctx, ChildOp::Create).await.map(|o| o.code())
    }

    pub async fn open(&self, ctx: &RequestContext) -> Result<i64> {
        self.handle(ctx, ChildOp::Open).await.map(|o| o.code())
    }

    pub async fn read(&self, ctx: &RequestContext, len: usize) -> Result<Bytes> {
        self.handle(ctx, ChildOp::Read { len }).await?.into_data()
    }

    pub async fn write(&self, ctx: &RequestContext, data: Bytes) -> Result<i64> {
        self.handle(ctx, ChildOp::Write { data }).await.map(|o| o.code())
    }

    pub async fn close(&self, ctx: &RequestContext) -> Result<i64> {
        self.handle(ctx, ChildOp::Close).await.map(|o| o.code())
    }

    pub async fn unlink(&self, ctx: &RequestContext) -> Result<i64> {
        self.handle(ctx, ChildOp::Unlink).await.map(|o| o.code())
    }

    pub async fn stat(&self, ctx: &RequestContext) -> Result<FileStat> {
        self.handle(ctx, ChildOp::Stat).await?.into_stat()
    }

    pub async fn lseek(&self, ctx: &RequestContext, offset: i64, whence: Whence) -> Result<i64> {
        self.handle(ctx, ChildOp::Lseek { offset, whence })
            .await
            .map(|o| o.code())
    }

    pub async fn mkdir(&self, ctx: &RequestContext) -> Result<i64> {
        self.handle(ctx, ChildOp::Mkdir).await.map(|o| o.code())
    }

    pub async fn rmdir(&self, ctx: &RequestContext) -> Result<i64> {
        self.handle(ctx, ChildOp::Rmdir).await.map(|o| o.code())
    }

    pub async fn opendir(&self, ctx: &RequestContext) -> Result<i64> {
        self.handle(ctx, ChildOp::Opendir).await.map(|o| o.code())
    }

    pub async fn closedir(&self, ctx: &RequestContext) -> Result<i64> {
        self.handle(ctx, ChildOp::Closedir).await.map(|o| o.code())
    }

    pub async fn readdir(&self, ctx: &RequestContext) -> Result<Option<DirEntry>> {
        self.handle(ctx, ChildOp::Readdir).await?.into_entry()
    }

    pub async fn rename(&self, ctx: &RequestContext, new_path: impl Into<String>) -> Result<i64> {
        self.handle(ctx, ChildOp::Rename { new_path: new_path.into() })
            .await
            .map(|o| o.code())
    }

    pub async fn free_space(&self, ctx: &RequestContext) -> Result<i64> {
        self.handle(ctx, ChildOp::FreeSpace).await.map(|o| o.code())
    }

    pub async fn stage_to_cache(&self, ctx: &RequestContext, cache_path: impl Into<String>) -> Result<i64> {
        self.handle(ctx, ChildOp::StageToCache { cache_path: cache_path.into() })
            .await
            .map(|o| o.code())
    }

    pub async fn sync_to_archive(&self, ctx: &RequestContext, cache_path: impl Into<String>) -> Result<i64> {
        self.handle(ctx, ChildOp::SyncToArchive { cache_path: cache_path.into() })
            .await
            .map(|o| o.code())
    }

    pub async fn registered(&self, ctx: &RequestContext) -> Result<i64> {
        self.handle(ctx, ChildOp::Registered).await.map(|o| o.code())
    }

    pub async fn unregistered(&self, ctx: &RequestContext) -> Result<i64> {
        self.handle(ctx, ChildOp::Unregistered).await.map(|o| o.code())
    }

    /// Forward the notification, then fan out the object's tracked
    /// create/write. A fan-out failure is logged and never changes the
    /// returned result.
    pub async fn modified(&self, ctx: &RequestContext) -> Result<i64> {
        self.handle(ctx, ChildOp::Modified).await.map(|o| o.code())
    }

    /// Rebalance with the configured page limit.
    pub async fn rebalance(&self) -> Result<RebalanceReport> {
        self.rebalance_with_limit(self.config.rebalance_limit).await
    }

    pub async fn rebalance_with_limit(&self, limit: usize) -> Result<RebalanceReport> {
        rebalance(&self.name, self.children(), self.catalog.as_ref(), limit)
            .await
            .context(format!("{} rebalance", self.name))
    }

    /// Sibling hierarchies stored for `session`, if this node has routed in it.
    pub fn sibling_list(&self, session: &Session) -> Result<Option<Vec<HierarchyPath>>> {
        self.router.sibling_list(session)
    }
}

/// Directory operations take collections; stat, rename and free-space take
/// anything but a collection (free-space takes anything); the rest take files.
fn check_variant(op: &ChildOp, object: &ObjectRef) -> Result<()> {
    match op {
        ChildOp::Mkdir | ChildOp::Rmdir | ChildOp::Opendir | ChildOp::Closedir | ChildOp::Readdir => {
            object.as_collection().map(|_| ())
        }
        ChildOp::FreeSpace => Ok(()),
        ChildOp::Stat | ChildOp::Rename { .. } => match object {
            ObjectRef::Collection(_) => Err(ObjectRef::unsupported("file or data", object)),
            _ => Ok(()),
        },
        _ => object.as_file().map(|_| ()),
    }
}

#[async_trait]
impl ChildResource for ReplResource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: &RequestContext, op: ChildOp) -> Result<OpOutput> {
        self.handle(ctx, op).await
    }

    async fn resolve_hierarchy(
        &self,
        ctx: &RequestContext,
        operation: RouteOperation,
        host: &str,
        hierarchy: HierarchyPath,
    ) -> Result<Vote> {
        self.router
            .route(ctx, operation, host, hierarchy)
            .await
            .context(format!("{} resolve_hierarchy", self.name))
    }
}
