//! Undo/redo history
//!
//! Entries are kept in document space. Every remote change that reaches the
//! document is folded into both stacks with [`History::rebase`] so the stored
//! deltas keep applying to the current document.

use crate::config::HistoryConfig;
use crate::delta::{Content, Delta, Op};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, trace};

/// Remote changes keep their place against stored history
const REMOTE_FIRST: bool = true;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub redo: Delta,
    pub undo: Delta,
}

/// Which stack an undo/redo step pops from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackKind {
    Undo,
    Redo,
}

impl StackKind {
    fn opposite(self) -> Self {
        match self {
            StackKind::Undo => StackKind::Redo,
            StackKind::Redo => StackKind::Undo,
        }
    }
}

#[derive(Debug, Clone)]
pub struct History {
    config: HistoryConfig,
    undo: Vec<HistoryEntry>,
    redo: Vec<HistoryEntry>,
    last_recorded: Option<Instant>,
}

impl History {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            undo: Vec::new(),
            redo: Vec::new(),
            last_recorded: None,
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    /// The next recorded change starts a new entry
    pub fn cutoff(&mut self) {
        self.last_recorded = None;
    }

    /// Record a local change applied to `old` (document space)
    pub fn record(&mut self, change: &Delta, old: &Delta, now: Instant) -> Result<()> {
        if change.is_identity() {
            return Ok(());
        }

        let mut undo = change.invert(old)?;
        let mut redo = change.clone();

        let coalesce = !self.undo.is_empty()
            && self
                .last_recorded
                .is_some_and(|at| at + self.config.delay() > now);

        if coalesce {
            if let Some(top) = self.undo.last() {
                undo = undo.compose(&top.undo)?;
                redo = top.redo.compose(&redo)?;
            }
            self.undo.pop();
        } else {
            self.last_recorded = Some(now);
        }

        self.redo.clear();
        self.undo.push(HistoryEntry { redo, undo });
        if self.undo.len() > self.config.max_stack {
            self.undo.remove(0);
        }
        trace!(undo = self.undo.len(), coalesce, "history recorded");
        Ok(())
    }

    /// The delta the next undo/redo would apply, without popping it
    pub fn peek(&self, kind: StackKind) -> Option<&Delta> {
        match kind {
            StackKind::Undo => self.undo.last().map(|entry| &entry.undo),
            StackKind::Redo => self.redo.last().map(|entry| &entry.redo),
        }
    }

    /// Move the top entry of `kind` to the opposite stack
    ///
    /// Returns the delta to apply to the document.
    pub fn pop(&mut self, kind: StackKind) -> Option<Delta> {
        let entry = self.stack_mut(kind).pop()?;
        let delta = match kind {
            StackKind::Undo => entry.undo.clone(),
            StackKind::Redo => entry.redo.clone(),
        };
        self.stack_mut(kind.opposite()).push(entry);
        self.last_recorded = None;
        Some(delta)
    }

    /// Fold a remote change (applying to the current document) into both stacks
    ///
    /// On error the stacks are left untouched.
    pub fn rebase(&mut self, remote: &Delta) -> Result<()> {
        if remote.is_identity() {
            return Ok(());
        }

        let undo = rebase_stack(&self.undo, remote, StackKind::Undo)?;
        let redo = rebase_stack(&self.redo, remote, StackKind::Redo)?;
        self.undo = undo;
        self.redo = redo;
        debug!(undo = self.undo.len(), redo = self.redo.len(), "history rebased");
        Ok(())
    }

    fn stack_mut(&mut self, kind: StackKind) -> &mut Vec<HistoryEntry> {
        match kind {
            StackKind::Undo => &mut self.undo,
            StackKind::Redo => &mut self.redo,
        }
    }

    /// Index right after the last change in `delta`
    ///
    /// A change ending with an inserted newline puts the index before it.
    pub fn last_change_index(delta: &Delta) -> usize {
        let ops = match delta.ops() {
            [rest @ .., Op::Retain { attributes, .. }] if attributes.is_empty() => rest,
            ops => ops,
        };

        let index = ops
            .iter()
            .filter(|op| !matches!(op, Op::Delete(_)))
            .map(Op::len)
            .sum::<usize>();

        let ends_with_newline = matches!(
            ops.last(),
            Some(Op::Insert { content: Content::Text(text), .. }) if text.ends_with('\n')
        );

        if ends_with_newline {
            index.saturating_sub(1)
        } else {
            index
        }
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

/// Walk a stack from its top, carrying `remote` down through each entry
///
/// The top entry's applied side (`undo` on the undo stack, `redo` on the redo
/// stack) addresses the current document; its other side addresses the
/// document after that delta, which is where the next entry down starts.
fn rebase_stack(
    stack: &[HistoryEntry],
    remote: &Delta,
    kind: StackKind,
) -> Result<Vec<HistoryEntry>> {
    let mut rebased = Vec::with_capacity(stack.len());
    let mut carried = remote.clone();

    for entry in stack.iter().rev() {
        let (applied, other) = match kind {
            StackKind::Undo => (&entry.undo, &entry.redo),
            StackKind::Redo => (&entry.redo, &entry.undo),
        };

        let applied_rebased = carried.transform(applied, REMOTE_FIRST)?;
        let next = applied.transform(&carried, !REMOTE_FIRST)?;
        let other_rebased = next.transform(other, REMOTE_FIRST)?;
        carried = next;

        rebased.push(match kind {
            StackKind::Undo => HistoryEntry {
                undo: applied_rebased,
                redo: other_rebased,
            },
            StackKind::Redo => HistoryEntry {
                redo: applied_rebased,
                undo: other_rebased,
            },
        });
    }

    rebased.reverse();
    Ok(rebased)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn history() -> History {
        History::new(HistoryConfig {
            delay_ms: 1000,
            max_stack: 3,
            user_only: true,
        })
    }

    fn apply(doc: &Delta, delta: &Delta) -> Delta {
        delta.apply_to(doc).unwrap()
    }

    #[test]
    fn test_record_and_undo() {
        let now = Instant::now();
        let mut history = history();
        let doc = Delta::new().insert("abc");
        let change = Delta::new().retain(3).insert("d");
        history.record(&change, &doc, now).unwrap();

        let current = apply(&doc, &change);
        let undo = history.pop(StackKind::Undo).unwrap();
        assert_eq!(apply(&current, &undo), doc);
        assert!(history.can_redo());

        let redo = history.pop(StackKind::Redo).unwrap();
        assert_eq!(apply(&doc, &redo), current);
    }

    #[test]
    fn test_coalesce_within_delay() {
        let now = Instant::now();
        let mut history = history();
        let doc = Delta::new();
        let first = Delta::new().insert("a");
        let second = Delta::new().retain(1).insert("b");

        history.record(&first, &doc, now).unwrap();
        history
            .record(&second, &apply(&doc, &first), now + Duration::from_millis(500))
            .unwrap();
        assert_eq!(history.undo_len(), 1);

        let current = apply(&apply(&doc, &first), &second);
        let undo = history.pop(StackKind::Undo).unwrap();
        assert!(apply(&current, &undo).is_empty());
    }

    #[test]
    fn test_no_coalesce_after_delay_or_cutoff() {
        let now = Instant::now();
        let mut history = history();
        let mut doc = Delta::new();

        for (i, at) in [0u64, 1500, 1600].iter().enumerate() {
            if i == 2 {
                history.cutoff();
            }
            let change = Delta::new().retain(i).insert("x");
            history
                .record(&change, &doc, now + Duration::from_millis(*at))
                .unwrap();
            doc = apply(&doc, &change);
        }
        assert_eq!(history.undo_len(), 3);
    }

    #[test]
    fn test_max_stack_evicts_oldest() {
        let now = Instant::now();
        let mut history = history();
        let mut doc = Delta::new();
        for i in 0..5u64 {
            let change = Delta::new().retain(i as usize).insert("x");
            history
                .record(&change, &doc, now + Duration::from_secs(2 * i))
                .unwrap();
            doc = apply(&doc, &change);
        }
        assert_eq!(history.undo_len(), 3);
    }

    #[test]
    fn test_record_clears_redo() {
        let now = Instant::now();
        let mut history = history();
        let doc = Delta::new();
        history.record(&Delta::new().insert("a"), &doc, now).unwrap();
        history.pop(StackKind::Undo).unwrap();
        assert!(history.can_redo());

        history
            .record(&Delta::new().insert("b"), &doc, now + Duration::from_secs(5))
            .unwrap();
        assert!(!history.can_redo());
    }

    #[test]
    fn test_rebase_keeps_undo_valid() {
        let now = Instant::now();
        let mut history = history();

        // local "hello" typed at the end of "ab"
        let doc = Delta::new().insert("ab");
        let change = Delta::new().retain(2).insert("hello");
        history.record(&change, &doc, now).unwrap();
        let current = apply(&doc, &change);

        // remote inserts at the front
        let remote = Delta::new().insert("XY").retain(7);
        history.rebase(&remote).unwrap();
        let current = apply(&current, &remote);

        let undo = history.pop(StackKind::Undo).unwrap();
        let undone = apply(&current, &undo);
        assert_eq!(undone.to_text(), "XYab");

        let redo = history.pop(StackKind::Redo).unwrap();
        assert_eq!(apply(&undone, &redo), current);
    }

    #[test]
    fn test_rebase_redo_stack() {
        let now = Instant::now();
        let mut history = history();
        let doc = Delta::new().insert("ab");
        let first = Delta::new().insert("1").retain(2);
        history.record(&first, &doc, now).unwrap();
        let doc = apply(&doc, &first);
        let second = Delta::new().retain(3).insert("2");
        history
            .record(&second, &doc, now + Duration::from_secs(5))
            .unwrap();
        let mut current = apply(&doc, &second);

        // undo both, then a remote edit lands
        for _ in 0..2 {
            let undo = history.pop(StackKind::Undo).unwrap();
            current = apply(&current, &undo);
        }
        assert_eq!(current.to_text(), "ab");

        let remote = Delta::new().retain(1).insert("R").retain(1);
        history.rebase(&remote).unwrap();
        current = apply(&current, &remote);

        for _ in 0..2 {
            let redo = history.pop(StackKind::Redo).unwrap();
            current = apply(&current, &redo);
        }
        assert_eq!(current.to_text(), "1aRb2");
    }

    #[test]
    fn test_rebase_error_leaves_stacks() {
        let now = Instant::now();
        let mut history = history();
        history
            .record(&Delta::new().insert("a"), &Delta::new(), now)
            .unwrap();
        let before = history.peek(StackKind::Undo).cloned();

        assert!(history.rebase(&Delta::new().retain(5).insert("x")).is_err());
        assert_eq!(history.peek(StackKind::Undo).cloned(), before);
    }

    #[test]
    fn test_last_change_index() {
        let delta = Delta::new().retain(3).insert("ab").retain(10);
        assert_eq!(History::last_change_index(&delta), 5);

        let delta = Delta::new().retain(3).delete(2).retain(4);
        assert_eq!(History::last_change_index(&delta), 3);

        let delta = Delta::new().retain(1).insert("x\n");
        assert_eq!(History::last_change_index(&delta), 2);
    }
}
