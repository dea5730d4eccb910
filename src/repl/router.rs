//! Vote-based routing
//!
//! Every child is asked to vote on a request; the highest vote wins and the
//! remaining children become the sibling list the write must later reach.
//! Ties go to the child registered first.

use crate::common::props::{SELECTED_HIERARCHY, SIBLING_LIST};
use crate::common::{Error, ReplConfig, Result};
use crate::resource::{
    ChildMap, ChildResource, HierarchyPath, ObjectRef, RequestContext, RouteOperation, Session, Vote,
    REPL_API_KEYWORD,
};
use futures_util::future::FutureExt;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;

/// One child's vote, tagged with the child that cast it
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub child: String,
    pub vote: Vote,
}

pub struct VoteRouter {
    node: String,
    children: ChildMap,
    reject_replica_requests: bool,
    probe_concurrency: usize,
}

impl VoteRouter {
    pub fn new(node: impl Into<String>, children: ChildMap, config: &ReplConfig) -> Self {
        Self {
            node: node.into(),
            children,
            reject_replica_requests: config.reject_replica_requests,
            probe_concurrency: config.probe_concurrency,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn children(&self) -> &ChildMap {
        &self.children
    }

    /// Resolve the hierarchy `ctx.object` should use below this node.
    ///
    /// On success the selected hierarchy is stored in this node's property
    /// store and, the first time within a session, so is the sibling list.
    pub async fn route(
        &self,
        ctx: &RequestContext,
        operation: RouteOperation,
        host: &str,
        incoming: HierarchyPath,
    ) -> Result<Vote> {
        let object = &ctx.object;
        self.validate(object)?;

        let mut hierarchy = incoming;
        hierarchy.add_child(self.node.as_str())?;

        let candidates = self
            .probe_children(ctx, operation, host, &hierarchy)
            .await?;

        let Some(index) = select_best(&candidates) else {
            return Err(Error::NoViableChild(object.logical_path().to_string()));
        };
        let selected = candidates[index].vote.clone();

        tracing::debug!(
            node = %self.node,
            object = %object.logical_path(),
            %operation,
            child = %candidates[index].child,
            vote = selected.score,
            "Selected child"
        );

        ctx.session.with_props(&self.node, |props| {
            if props.get::<Vec<HierarchyPath>>(SIBLING_LIST)?.is_none() {
                let siblings: Vec<HierarchyPath> = candidates
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != index)
                    .map(|(_, c)| c.vote.hierarchy.clone())
                    .collect();
                props.set(SIBLING_LIST, siblings);
            }
            props.set(SELECTED_HIERARCHY, selected.hierarchy.clone());
            Ok::<_, Error>(())
        })?;

        Ok(selected)
    }

    /// The router owns replica placement, so requests that pick a replica
    /// themselves are refused when configured to do so.
    fn validate(&self, object: &ObjectRef) -> Result<()> {
        let file = object.as_file()?;
        if self.reject_replica_requests {
            if let Some(replica) = file.replica_requested {
                return Err(Error::InvalidOperation(format!(
                    "{} requests replica {} directly",
                    file.logical_path, replica
                )));
            }
            if file.keywords.contains_key(REPL_API_KEYWORD) {
                return Err(Error::InvalidOperation(format!(
                    "{} carries replica management keyword {}",
                    file.logical_path, REPL_API_KEYWORD
                )));
            }
        }
        Ok(())
    }

    /// Ask every child for a vote. Results come back in registration order;
    /// the first failure drops the probes still in flight.
    async fn probe_children(
        &self,
        ctx: &RequestContext,
        operation: RouteOperation,
        host: &str,
        hierarchy: &HierarchyPath,
    ) -> Result<Vec<Candidate>> {
        let limit = match self.probe_concurrency {
            0 => self.children.len().max(1),
            n => n,
        };

        let probes: Vec<_> = self
            .children
            .iter()
            .cloned()
            .map(|child: Arc<dyn ChildResource>| {
                let hierarchy = hierarchy.clone();
                async move {
                    let name = child.name().to_string();
                    child
                        .resolve_hierarchy(ctx, operation, host, hierarchy)
                        .await
                        .map(|vote| Candidate {
                            child: name.clone(),
                            vote,
                        })
                        .map_err(|e| Error::ChildProbe {
                            child: name,
                            reason: e.to_string(),
                        })
                }
                .boxed()
            })
            .collect();

        stream::iter(probes).buffered(limit).try_collect().await
    }

    pub fn sibling_list(&self, session: &Session) -> Result<Option<Vec<HierarchyPath>>> {
        session.with_props(&self.node, |props| props.get(SIBLING_LIST))
    }

    pub fn selected_hierarchy(&self, session: &Session) -> Result<Option<HierarchyPath>> {
        session.with_props(&self.node, |props| props.get(SELECTED_HIERARCHY))
    }
}

/// Index of the highest viable vote; the earliest candidate wins a tie.
pub fn select_best(candidates: &[Candidate]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        let score = candidate.vote.score;
        if !candidate.vote.is_viable() {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}
