//! Reconciliation of queued local and remote deltas
//!
//! [`Reconciliation::compute`] does all the delta algebra of a flush up front
//! and performs no side effects, so a failure leaves the queues and the
//! surface exactly as they were. The engine then applies the result.

use crate::composition::Pending;
use crate::delta::Delta;
use crate::error::{DeltaError, Result};
use crate::events::{SubmitHook, TextChange};
use tracing::trace;

/// Tie-break for inserts at the same index: remote content goes first
pub const UPSTREAM_PRIORITY: bool = true;

/// Outcome of merging one flush cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Remote deltas composed, applying to the base document
    pub upstream: Delta,
    /// Local deltas composed, applying to the base document
    pub local: Delta,
    /// Local deltas rebased after `upstream`, as amended by submit hooks
    pub submit: Delta,
    /// Document-space correction for the current document, if it needs one
    pub patch: Option<Delta>,
    /// Everything that changed since the base document
    pub editor_change: TextChange,
    /// The remote change as seen from the current local document
    pub upstream_change: TextChange,
}

impl Reconciliation {
    pub fn compute(pending: &Pending, hook: &mut SubmitHook) -> Result<Self> {
        let base = &pending.base;
        let base_len = base.output_len();

        let upstream = Delta::compose_all(base_len, &pending.upstream)?;
        let local = Delta::compose_all(base_len, &pending.submit)?;

        let rebased = upstream.transform(&local, UPSTREAM_PRIORITY)?;
        let mut submit = rebased.clone();
        hook.run(&mut submit);

        let before = (rebased.input_len(), rebased.output_len());
        let after = (submit.input_len(), submit.output_len());
        if before != after {
            return Err(DeltaError::LengthsChanged { before, after }.into());
        }

        let local_document = local.apply_to(base)?;
        let upstream_rebased = local.transform(&upstream, !UPSTREAM_PRIORITY)?;

        // Corrections sit on top of the local chain on the surface and are
        // carried over the remote change without being submitted.
        let fixing = pending.fixing.as_ref();
        let on_surface = match fixing {
            Some(fixing) => local.compose(fixing)?,
            None => local.clone(),
        };
        let mut target = upstream.compose(&submit)?;
        if let Some(fixing) = fixing {
            target = target.compose(&upstream_rebased.transform(fixing, UPSTREAM_PRIORITY)?)?;
        }

        // The surface already shows the raw local edits: take them back out,
        // apply the remote change, then put the rebased edits back.
        let amended = submit != rebased;
        let patch = if !upstream.is_identity() || amended {
            Some(on_surface.invert(base)?.compose(&target)?)
        } else {
            None
        };

        trace!(?upstream, ?local, ?submit, ?patch, "reconciled");

        Ok(Self {
            editor_change: TextChange {
                delta: target,
                old_delta: base.clone(),
            },
            upstream_change: TextChange {
                delta: upstream_rebased,
                old_delta: match fixing {
                    Some(fixing) => fixing.apply_to(&local_document)?,
                    None => local_document,
                },
            },
            upstream,
            local,
            submit,
            patch,
        })
    }

    pub fn has_upstream(&self) -> bool {
        !self.upstream.is_identity()
    }

    pub fn has_submit(&self) -> bool {
        !self.submit.is_identity()
    }
}
