//! Pending create/write/unlink state per object
//!
//! Each object touched during a request has at most one tracked record.
//! Follow-up operations mutate that record when they are compatible with it:
//!
//! | current  | create   | write    | unlink   |
//! |----------|----------|----------|----------|
//! | absent   | Created  | Written  | Unlinked |
//! | Created  | mismatch | Written  | mismatch |
//! | Written  | mismatch | Written  | mismatch |
//! | Unlinked | mismatch | mismatch | Unlinked |

use crate::common::props::OPERATION_QUEUE;
use crate::common::{Error, Result};
use crate::resource::{FileObject, HierarchyPath, Session};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Write,
    Unlink,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Write => write!(f, "write"),
            OperationKind::Unlink => write!(f, "unlink"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackedState {
    Created,
    Written,
    Unlinked,
}

impl TrackedState {
    /// State after `incoming` is applied, or `None` when the two conflict.
    pub fn transition(current: Option<TrackedState>, incoming: OperationKind) -> Option<TrackedState> {
        use OperationKind::*;
        use TrackedState::*;
        match (current, incoming) {
            (None, Create) => Some(Created),
            (None, Write) | (Some(Created), Write) | (Some(Written), Write) => Some(Written),
            (None, Unlink) | (Some(Unlinked), Unlink) => Some(Unlinked),
            _ => None,
        }
    }

    /// Does a sibling need a copy of the object in this state?
    pub fn needs_fanout(&self) -> bool {
        matches!(self, TrackedState::Created | TrackedState::Written)
    }
}

impl fmt::Display for TrackedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackedState::Created => write!(f, "created"),
            TrackedState::Written => write!(f, "written"),
            TrackedState::Unlinked => write!(f, "unlinked"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedOperation {
    pub object: String,
    pub hierarchy: HierarchyPath,
    pub mode: u32,
    pub state: TrackedState,
}

pub struct OperationTracker {
    node: String,
}

impl OperationTracker {
    pub fn new(node: impl Into<String>) -> Self {
        Self { node: node.into() }
    }

    /// Record `kind` against `file`, creating or advancing its tracked
    /// record. The queue is written back after every successful transition.
    pub fn record(
        &self,
        session: &Session,
        file: &FileObject,
        kind: OperationKind,
    ) -> Result<TrackedOperation> {
        session.with_props(&self.node, |props| {
            let mut queue = props
                .get::<Vec<TrackedOperation>>(OPERATION_QUEUE)?
                .unwrap_or_default();

            let existing = queue.iter().position(|op| op.object == file.identity());
            let current = existing.map(|i| queue[i].state);

            let next = TrackedState::transition(current, kind).ok_or_else(|| {
                Error::MismatchedOperation {
                    object: file.identity().to_string(),
                    existing: current.map(|s| s.to_string()).unwrap_or_default(),
                    incoming: kind.to_string(),
                }
            })?;

            let tracked = match existing {
                Some(i) => {
                    let op = &mut queue[i];
                    op.state = next;
                    op.clone()
                }
                None => {
                    let op = TrackedOperation {
                        object: file.identity().to_string(),
                        hierarchy: file.hierarchy.clone(),
                        mode: file.mode,
                        state: next,
                    };
                    queue.push(op.clone());
                    op
                }
            };

            tracing::debug!(
                node = %self.node,
                object = %tracked.object,
                operation = %kind,
                state = %tracked.state,
                "Tracked operation"
            );

            props.set(OPERATION_QUEUE, queue);
            Ok(tracked)
        })
    }

    /// Tracked operations in the order they were first recorded.
    pub fn queue(&self, session: &Session) -> Result<Vec<TrackedOperation>> {
        session.with_props(&self.node, |props| {
            Ok(props
                .get::<Vec<TrackedOperation>>(OPERATION_QUEUE)?
                .unwrap_or_default())
        })
    }

    pub fn get(&self, session: &Session, object: &str) -> Result<Option<TrackedOperation>> {
        Ok(self.queue(session)?.into_iter().find(|op| op.object == object))
    }
}
