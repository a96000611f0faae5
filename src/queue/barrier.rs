//! Queued Barriers
//!
//! Barriers recorded by the planner name resources symbolically (a
//! transient index or a category identifier) because the physical
//! resources behind them are recreated every frame. Materialization
//! resolves the symbols against the live frame (transients through the
//! blackboard, categories expanded through the registry) just before the
//! owning job executes.

use crate::errors::{QuarryError, Result};
use crate::gpu::{BarrierDesc, ResourceState};

use super::job::ResourceContext;
use crate::frame::{CategoryId, TransientResourceIndex};

/// Symbolic name of a queue-tracked resource.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum QueuedResourceId {
    Transient(TransientResourceIndex),
    Category(CategoryId),
}

/// A barrier recorded against symbolic resources.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum QueuedBarrier {
    Transition {
        id: QueuedResourceId,
        before: ResourceState,
        after: ResourceState,
    },
    Aliasing {
        before: QueuedResourceId,
        after: QueuedResourceId,
    },
    Uav {
        id: QueuedResourceId,
    },
}

impl QueuedBarrier {
    #[must_use]
    pub fn transition(id: QueuedResourceId, before: ResourceState, after: ResourceState) -> Self {
        QueuedBarrier::Transition { id, before, after }
    }

    /// Merge an additional read state into a transition's after-state.
    /// Only transitions merge; write states never reach this path.
    pub fn merge_after_state(&mut self, state: ResourceState) {
        if let QueuedBarrier::Transition { after, .. } = self {
            *after |= state;
        }
    }

    /// Resolve this barrier against the live frame and append the
    /// device-level barriers it expands to.
    ///
    /// Category aliasing and category UAV barriers are reported as
    /// [`QuarryError::Unsupported`]; categories expand to one transition
    /// per underlying resource instead.
    pub fn materialize(
        &self,
        context: &mut ResourceContext<'_>,
        out: &mut Vec<BarrierDesc>,
    ) -> Result<()> {
        match self {
            QueuedBarrier::Transition { id, before, after } => match id {
                QueuedResourceId::Transient(index) => {
                    out.push(BarrierDesc::Transition {
                        resource: context.transient_resource(*index)?,
                        before: *before,
                        after: *after,
                    });
                    Ok(())
                }
                QueuedResourceId::Category(category) => {
                    context.transition_category(*category, out, *before, *after)
                }
            },
            QueuedBarrier::Aliasing { before, after } => {
                let (QueuedResourceId::Transient(before), QueuedResourceId::Transient(after)) =
                    (before, after)
                else {
                    return Err(QuarryError::Unsupported(
                        "category aliasing barriers".into(),
                    ));
                };
                out.push(BarrierDesc::Aliasing {
                    before: Some(context.transient_resource(*before)?),
                    after: context.transient_resource(*after)?,
                });
                Ok(())
            }
            QueuedBarrier::Uav { id } => {
                let QueuedResourceId::Transient(index) = id else {
                    return Err(QuarryError::Unsupported("category UAV barriers".into()));
                };
                out.push(BarrierDesc::Uav {
                    resource: context.transient_resource(*index)?,
                });
                Ok(())
            }
        }
    }
}
