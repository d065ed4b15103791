//! Local-only overlay
//!
//! Edits applied to the presentation surface that are never submitted
//! upstream, such as an image placeholder shown while an upload is pending.
//!
//! Two coordinate spaces are involved:
//! - **document space**: the document as the synchronization channel sees it
//! - **surface space**: the document plus every overlay step
//!
//! The overlay keeps an ordered list of steps, each with a `change` (forward)
//! and a `revert` (backward) delta, and the composed totals
//! `change = step0 ∘ step1 ∘ …` (document → surface) and
//! `revert = …∘ revert1 ∘ revert0` (surface → document).
//!
//! Every mutation returns a fresh [`Overlay`] rebuilt from immutable step
//! snapshots instead of patching the old one in place. The deltas that come
//! out of a mutation are only committed by the caller once everything that
//! could fail has succeeded.

use crate::delta::Delta;
use crate::error::{DeltaError, Result, SyncError};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

/// Overlay content keeps its place when something is inserted at the same index
const OVERLAY_FIRST: bool = true;

/// Opaque identifier of an overlay step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(Uuid);

impl StepId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One overlay step, translated into surface space
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayStep {
    pub id: StepId,
    /// Surface before this step → surface after it
    pub change: Delta,
    /// Inverse of `change`
    pub revert: Delta,
    original_change: Delta,
    original_revert: Delta,
}

/// The change/revert pair a step was created with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedStep {
    pub id: StepId,
    pub change: Delta,
    pub revert: Delta,
}

/// Outcome of an overlay mutation
#[derive(Debug, Clone)]
pub struct Projected {
    /// Delta for the caller to apply (surface or document space, per method)
    pub delta: Delta,
    /// Overlay state to keep once `delta` has been applied
    pub overlay: Overlay,
}

#[derive(Debug, Clone, PartialEq)]
struct Totals {
    change: Delta,
    revert: Delta,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overlay {
    steps: Vec<OverlayStep>,
    totals: Option<Totals>,
}

impl Overlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn contains(&self, id: StepId) -> bool {
        self.steps.iter().any(|step| step.id == id)
    }

    pub fn steps(&self) -> &[OverlayStep] {
        &self.steps
    }

    /// Composed document → surface delta (`None` when there are no steps)
    pub fn change(&self) -> Option<&Delta> {
        self.totals.as_ref().map(|t| &t.change)
    }

    /// Composed surface → document delta (`None` when there are no steps)
    pub fn revert(&self) -> Option<&Delta> {
        self.totals.as_ref().map(|t| &t.revert)
    }

    /// The document the channel sees, given the current surface contents
    pub fn to_document(&self, surface: &Delta) -> Result<Delta> {
        match &self.totals {
            None => Ok(surface.clone()),
            Some(totals) => Ok(totals.revert.apply_to(surface)?),
        }
    }

    /// Map a document index into surface space
    pub fn project_index(&self, index: usize) -> usize {
        match &self.totals {
            None => index,
            Some(totals) => totals.change.transform_position(index, false),
        }
    }

    /// Add a step given in document space
    ///
    /// The change is translated through the existing overlay and the returned
    /// delta is what the surface must apply.
    pub fn add(&self, change: Delta, revert: Delta, surface: &Delta) -> Result<(StepId, Projected)> {
        if change.output_len() != revert.input_len() || change.input_len() != revert.output_len() {
            return Err(DeltaError::BaseLengthMismatch {
                expected: change.output_len(),
                actual: revert.input_len(),
            }
            .into());
        }

        let document = self.to_document(surface)?;
        if change.input_len() != document.output_len() {
            return Err(DeltaError::BaseLengthMismatch {
                expected: document.output_len(),
                actual: change.input_len(),
            }
            .into());
        }

        let translated = match &self.totals {
            None => change.clone(),
            Some(totals) => totals.change.transform(&change, OVERLAY_FIRST)?,
        };

        let id = StepId::new();
        let mut steps = self.steps.clone();
        steps.push(OverlayStep {
            id,
            change: translated.clone(),
            revert: Delta::new(),
            original_change: change,
            original_revert: revert,
        });

        let overlay = Self::with_changes(steps, &document)?;
        debug!(%id, steps = overlay.len(), "overlay step added");
        trace!(?translated, "overlay step surface delta");

        Ok((
            id,
            Projected {
                delta: translated,
                overlay,
            },
        ))
    }

    /// Remove a step; the returned delta undoes it on the surface
    pub fn remove(&self, id: StepId, surface: &Delta) -> Result<(RemovedStep, Projected)> {
        let Some(index) = self.steps.iter().position(|step| step.id == id) else {
            return Err(SyncError::UnknownOverlayStep(id));
        };

        let document = self.to_document(surface)?;
        let mut steps = self.steps.clone();
        let removed = steps.remove(index);

        // Carry the revert forward through every later step, rebasing them
        // over it on the way.
        let mut undo = removed.revert.clone();
        for step in steps[index..].iter_mut() {
            let rebased = undo.transform(&step.change, true)?;
            undo = step.change.transform(&undo, false)?;
            step.change = rebased;
        }

        let overlay = Self::with_changes(steps, &document)?;
        debug!(%id, steps = overlay.len(), "overlay step removed");

        Ok((
            RemovedStep {
                id,
                change: removed.original_change,
                revert: removed.original_revert,
            },
            Projected {
                delta: undo,
                overlay,
            },
        ))
    }

    /// Translate a document-space delta into the surface delta to apply
    pub fn project(&self, delta: &Delta, surface: &Delta) -> Result<Projected> {
        if self.is_empty() {
            return Ok(Projected {
                delta: delta.clone(),
                overlay: self.clone(),
            });
        }

        let document = delta.apply_to(&self.to_document(surface)?)?;
        let mut incoming = delta.clone();
        let mut steps = self.steps.clone();

        for step in steps.iter_mut() {
            let rebased = incoming.transform(&step.change, !OVERLAY_FIRST)?;
            incoming = step.change.transform(&incoming, OVERLAY_FIRST)?;
            step.change = rebased;
        }

        Ok(Projected {
            delta: incoming,
            overlay: Self::with_changes(steps, &document)?,
        })
    }

    /// Translate a surface edit into the document-space delta to submit
    ///
    /// `before` is the surface contents the edit was applied to.
    pub fn unproject(&self, edit: &Delta, before: &Delta) -> Result<Projected> {
        if self.is_empty() {
            return Ok(Projected {
                delta: edit.clone(),
                overlay: self.clone(),
            });
        }

        let after = edit.apply_to(before)?;
        let mut outgoing = edit.clone();
        let mut steps = self.steps.clone();

        for step in steps.iter_mut().rev() {
            let rebased = outgoing.transform(&step.revert, true)?;
            outgoing = step.revert.transform(&outgoing, false)?;
            step.revert = rebased;
        }

        Ok(Projected {
            delta: outgoing,
            overlay: Self::with_reverts(steps, &after)?,
        })
    }

    /// Rebuild from authoritative changes, deriving reverts forward from `document`
    fn with_changes(mut steps: Vec<OverlayStep>, document: &Delta) -> Result<Self> {
        let mut snapshot = document.clone();
        for step in steps.iter_mut() {
            step.revert = step.change.invert(&snapshot)?;
            snapshot = step.change.apply_to(&snapshot)?;
        }
        Self::from_steps(steps)
    }

    /// Rebuild from authoritative reverts, deriving changes backward from `surface`
    fn with_reverts(mut steps: Vec<OverlayStep>, surface: &Delta) -> Result<Self> {
        let mut snapshot = surface.clone();
        for step in steps.iter_mut().rev() {
            step.change = step.revert.invert(&snapshot)?;
            snapshot = step.revert.apply_to(&snapshot)?;
        }
        Self::from_steps(steps)
    }

    fn from_steps(steps: Vec<OverlayStep>) -> Result<Self> {
        let Some(first) = steps.first() else {
            return Ok(Self::default());
        };

        let mut change = first.change.clone();
        for step in &steps[1..] {
            change = change.compose(&step.change)?;
        }

        let mut reverts = steps.iter().rev().map(|step| &step.revert);
        let mut revert = reverts.next().cloned().unwrap_or_default();
        for step_revert in reverts {
            revert = revert.compose(step_revert)?;
        }

        Ok(Self {
            steps,
            totals: Some(Totals { change, revert }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::Attributes;
    use proptest::prelude::*;
    use serde_json::json;

    fn placeholder(doc_len: usize, index: usize, id: u32) -> (Delta, Delta) {
        let change = Delta::new()
            .retain(index)
            .insert_embed(json!({ "placeholder": id }), Attributes::new())
            .retain(doc_len - index);
        let revert = Delta::new().retain(index).delete(1).retain(doc_len - index);
        (change, revert)
    }

    /// Apply a projection's surface delta and return the new surface
    fn commit(surface: &Delta, projected: &Projected) -> Delta {
        projected.delta.apply_to(surface).unwrap()
    }

    #[test]
    fn test_add_then_remove_is_transparent() {
        let surface = Delta::new().insert("hello world");
        let overlay = Overlay::new();

        let (change, revert) = placeholder(11, 5, 1);
        let (id, added) = overlay.add(change.clone(), revert.clone(), &surface).unwrap();
        let with_step = commit(&surface, &added);
        assert_eq!(with_step.output_len(), 12);
        assert_eq!(added.overlay.to_document(&with_step).unwrap(), surface);

        let (removed, undone) = added.overlay.remove(id, &with_step).unwrap();
        assert_eq!(commit(&with_step, &undone), surface);
        assert!(undone.overlay.is_empty());
        assert_eq!(removed.change, change);
        assert_eq!(removed.revert, revert);
    }

    #[test]
    fn test_unknown_step() {
        let overlay = Overlay::new();
        let err = overlay.remove(StepId::new(), &Delta::new()).unwrap_err();
        assert!(matches!(err, SyncError::UnknownOverlayStep(_)));
    }

    #[test]
    fn test_second_step_translated_through_first() {
        let document = Delta::new().insert("abcdef");
        let (change_a, revert_a) = placeholder(6, 2, 1);
        let (id_a, added) = Overlay::new().add(change_a, revert_a, &document).unwrap();
        let surface = commit(&document, &added);

        let (change_b, revert_b) = placeholder(6, 4, 2);
        let (_, added_b) = added.overlay.add(change_b, revert_b, &surface).unwrap();
        assert_eq!(
            added_b.delta,
            Delta::new()
                .retain(5)
                .insert_embed(json!({"placeholder": 2}), Attributes::new())
                .retain(2)
        );
        let surface = commit(&surface, &added_b);
        assert_eq!(added_b.overlay.to_document(&surface).unwrap(), document);

        // removing the first step leaves the second one in place
        let (_, removed) = added_b.overlay.remove(id_a, &surface).unwrap();
        let surface = commit(&surface, &removed);
        assert_eq!(surface.to_text(), "abcdef");
        assert_eq!(surface.ops()[1].len(), 1);
        assert_eq!(removed.overlay.len(), 1);
        assert_eq!(removed.overlay.to_document(&surface).unwrap(), document);
    }

    #[test]
    fn test_local_edit_before_placeholder() {
        // placeholder at 5, user types three chars at 2, placeholder removed
        let document = Delta::new().insert("0123456789");
        let (change, revert) = placeholder(10, 5, 1);
        let (id, added) = Overlay::new().add(change, revert, &document).unwrap();
        let surface = commit(&document, &added);

        let edit = Delta::new().retain(2).insert("abc").retain(9);
        let unprojected = added.overlay.unproject(&edit, &surface).unwrap();
        assert_eq!(
            unprojected.delta,
            Delta::new().retain(2).insert("abc").retain(8)
        );
        let surface = edit.apply_to(&surface).unwrap();

        let (_, removed) = unprojected.overlay.remove(id, &surface).unwrap();
        let surface = commit(&surface, &removed);
        assert_eq!(surface.output_len(), 13);
        assert_eq!(surface.to_text(), "01abc23456789");
    }

    #[test]
    fn test_typing_right_after_placeholder() {
        let document = Delta::new().insert("ab");
        let (change, revert) = placeholder(2, 1, 1);
        let (id, added) = Overlay::new().add(change, revert, &document).unwrap();
        let surface = commit(&document, &added);

        // surface is a[P]b, the user types x after the placeholder
        let edit = Delta::new().retain(2).insert("x").retain(1);
        let unprojected = added.overlay.unproject(&edit, &surface).unwrap();
        assert_eq!(unprojected.delta, Delta::new().retain(1).insert("x").retain(1));

        let surface = edit.apply_to(&surface).unwrap();
        let overlay = unprojected.overlay;
        assert_eq!(overlay.to_document(&surface).unwrap().to_text(), "axb");

        let (_, removed) = overlay.remove(id, &surface).unwrap();
        assert_eq!(commit(&surface, &removed), Delta::new().insert("axb"));
    }

    #[test]
    fn test_project_remote_insert() {
        let document = Delta::new().insert("abcd");
        let (change, revert) = placeholder(4, 2, 1);
        let (id, added) = Overlay::new().add(change, revert, &document).unwrap();
        let surface = commit(&document, &added);

        let remote = Delta::new().insert("XY").retain(4);
        let projected = added.overlay.project(&remote, &surface).unwrap();
        assert_eq!(projected.delta, Delta::new().insert("XY").retain(5));
        let surface = commit(&surface, &projected);
        assert_eq!(projected.overlay.project_index(4), 5);

        let (_, removed) = projected.overlay.remove(id, &surface).unwrap();
        assert_eq!(commit(&surface, &removed), Delta::new().insert("XYabcd"));
    }

    #[test]
    fn test_user_deletes_placeholder() {
        let document = Delta::new().insert("ab");
        let (change, revert) = placeholder(2, 1, 1);
        let (id, added) = Overlay::new().add(change, revert, &document).unwrap();
        let surface = commit(&document, &added);

        let edit = Delta::new().retain(1).delete(1).retain(1);
        let unprojected = added.overlay.unproject(&edit, &surface).unwrap();
        assert!(unprojected.delta.is_identity());
        let surface = edit.apply_to(&surface).unwrap();

        let (_, removed) = unprojected.overlay.remove(id, &surface).unwrap();
        assert!(removed.delta.is_identity());
        assert_eq!(commit(&surface, &removed), document);
    }

    #[test]
    fn test_add_rejects_mismatched_lengths() {
        let surface = Delta::new().insert("abc");
        let (change, revert) = placeholder(2, 1, 1);
        assert!(matches!(
            Overlay::new().add(change, revert, &surface),
            Err(SyncError::InvalidOperation(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_overlay_transparency(
            text in "[a-z]{0,12}",
            prior in prop::collection::vec(0usize..13, 0..4),
            index in 0usize..13,
        ) {
            let document = Delta::new().insert(text.clone());
            let len = document.output_len();

            let mut overlay = Overlay::new();
            let mut surface = document.clone();
            for (n, at) in prior.iter().enumerate() {
                let (change, revert) = placeholder(len, (*at).min(len), n as u32);
                let (_, added) = overlay.add(change, revert, &surface).unwrap();
                surface = commit(&surface, &added);
                overlay = added.overlay;
            }

            let (change, revert) = placeholder(len, index.min(len), 99);
            let (id, added) = overlay.add(change, revert, &surface).unwrap();
            let with_step = commit(&surface, &added);

            let (_, removed) = added.overlay.remove(id, &with_step).unwrap();
            prop_assert_eq!(commit(&with_step, &removed), surface.clone());
            prop_assert_eq!(removed.overlay.to_document(&surface).unwrap(), document);
        }
    }
}
