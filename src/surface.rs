//! Presentation surface seam
//!
//! The editable surface (DOM, terminal, ...) is external. The engine pushes
//! deltas into it and reads its contents back as a document. User edits and
//! batch signals flow the other way through the engine's `handle_*` methods.

use crate::delta::Delta;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Who caused a change applied to the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Typed by the local user
    User,
    /// Engine bookkeeping; must not be reported back as a user edit
    Silent,
}

pub trait Surface {
    /// Apply `delta` to the current contents
    fn apply(&mut self, delta: &Delta, source: Source) -> Result<()>;

    /// Current contents as a document
    fn contents(&self) -> Delta;

    /// Move the caret
    fn set_selection(&mut self, _index: usize) {}
}

impl<S: Surface + ?Sized> Surface for Box<S> {
    fn apply(&mut self, delta: &Delta, source: Source) -> Result<()> {
        (**self).apply(delta, source)
    }

    fn contents(&self) -> Delta {
        (**self).contents()
    }

    fn set_selection(&mut self, index: usize) {
        (**self).set_selection(index)
    }
}

/// In-memory surface holding its document as a delta
#[derive(Debug, Default, Clone)]
pub struct MemorySurface {
    document: Delta,
    selection: Option<usize>,
    applied: Vec<(Delta, Source)>,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(document: Delta) -> Self {
        Self {
            document,
            ..Self::default()
        }
    }

    /// Simulate the user typing `delta`
    ///
    /// Returns the contents before the edit, which is what the engine's
    /// `handle_user_edit` expects alongside the delta.
    pub fn edit(&mut self, delta: &Delta) -> Result<Delta> {
        let old = self.document.clone();
        self.document = delta.apply_to(&self.document)?;
        Ok(old)
    }

    pub fn text(&self) -> String {
        self.document.to_text()
    }

    pub fn selection(&self) -> Option<usize> {
        self.selection
    }

    /// Every delta applied through [`Surface::apply`], in order
    pub fn applied(&self) -> &[(Delta, Source)] {
        &self.applied
    }

    pub fn clear_applied(&mut self) {
        self.applied.clear();
    }
}

impl Surface for MemorySurface {
    fn apply(&mut self, delta: &Delta, source: Source) -> Result<()> {
        self.document = delta.apply_to(&self.document)?;
        self.applied.push((delta.clone(), source));
        Ok(())
    }

    fn contents(&self) -> Delta {
        self.document.clone()
    }

    fn set_selection(&mut self, index: usize) {
        self.selection = Some(index);
    }
}
