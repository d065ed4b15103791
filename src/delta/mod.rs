//! Delta algebra: compose, transform, invert and diff over operation sequences
//!
//! A [`Delta`] is an ordered, normalised sequence of [`Op`]s describing the
//! change from one document state to another. A document itself is a delta
//! made only of inserts.
//!
//! Lengths are strict: a delta consumes exactly `input_len()` units of the
//! document it applies to and produces exactly `output_len()` units, so every
//! operation can check that its arguments line up.
//!
//! # Properties
//!
//! - **Convergence:** `a.compose(&a.transform(&b, true)) == b.compose(&b.transform(&a, false))`
//! - **Associativity:** `a.compose(&b).compose(&c) == a.compose(&b.compose(&c))`
//! - **Invertibility:** `base.compose(&a).compose(&a.invert(&base)) == base`
//!
//! # Example
//!
//! ```
//! use synckit_compose::Delta;
//!
//! let base = Delta::new().insert("hello");
//! let local = Delta::new().retain(5).insert("!");
//! let remote = Delta::new().insert(">").retain(5);
//!
//! let local_rebased = remote.transform(&local, true).unwrap();
//! let remote_rebased = local.transform(&remote, false).unwrap();
//!
//! let left = base.compose(&remote).unwrap().compose(&local_rebased).unwrap();
//! let right = base.compose(&local).unwrap().compose(&remote_rebased).unwrap();
//! assert_eq!(left, right);
//! assert_eq!(left.to_text(), ">hello!");
//! ```

pub mod attributes;
mod diff;
mod iter;
mod op;

pub use attributes::Attributes;
pub use op::{Content, Op, OpKind};

use crate::error::DeltaError;
use iter::OpIter;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered, minimal sequence of operations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Delta {
    ops: Vec<Op>,
}

impl Delta {
    /// Create an empty delta (the identity over an empty document)
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Identity over a document of `len` units
    pub fn identity(len: usize) -> Self {
        Self::new().retain(len)
    }

    /// Build a delta from raw ops, normalising as it goes
    pub fn from_ops(ops: impl IntoIterator<Item = Op>) -> Self {
        let mut delta = Self::new();
        for op in ops {
            delta.push(op);
        }
        delta
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<Op> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    // Builder operations: retain/insert/delete.

    pub fn retain(mut self, len: usize) -> Self {
        self.push(Op::retain(len));
        self
    }

    pub fn retain_with(mut self, len: usize, attributes: Attributes) -> Self {
        self.push(Op::Retain { len, attributes });
        self
    }

    pub fn insert(mut self, text: impl Into<String>) -> Self {
        self.push(Op::insert(text.into()));
        self
    }

    pub fn insert_with(mut self, text: impl Into<String>, attributes: Attributes) -> Self {
        self.push(Op::Insert {
            content: Content::Text(text.into()),
            attributes,
        });
        self
    }

    pub fn insert_embed(mut self, embed: Value, attributes: Attributes) -> Self {
        self.push(Op::Insert {
            content: Content::Embed(embed),
            attributes,
        });
        self
    }

    pub fn delete(mut self, len: usize) -> Self {
        self.push(Op::Delete(len));
        self
    }

    /// Append an op, keeping the delta minimal
    ///
    /// Zero-length ops are dropped, mergeable neighbours are merged and an
    /// insert never follows a delete directly.
    pub fn push(&mut self, op: Op) {
        if op.is_empty() {
            return;
        }

        let mut index = self.ops.len();
        if op.kind() == OpKind::Insert && matches!(self.ops.last(), Some(Op::Delete(_))) {
            index -= 1;
        }

        if index > 0 && merge_into(&mut self.ops[index - 1], &op) {
            return;
        }

        self.ops.insert(index, op);
    }

    /// Units consumed from the document this delta applies to
    pub fn input_len(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| op.kind() != OpKind::Insert)
            .map(Op::len)
            .sum()
    }

    /// Units in the document this delta produces
    pub fn output_len(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| op.kind() != OpKind::Delete)
            .map(Op::len)
            .sum()
    }

    /// Sum of all op lengths
    pub fn length(&self) -> usize {
        self.ops.iter().map(Op::len).sum()
    }

    /// Whether applying this delta leaves any document unchanged
    pub fn is_identity(&self) -> bool {
        self.ops.iter().all(|op| match op {
            Op::Retain { attributes, .. } => attributes.is_empty(),
            _ => false,
        })
    }

    /// Whether this delta is a document (inserts only)
    pub fn is_document(&self) -> bool {
        self.ops.iter().all(|op| op.kind() == OpKind::Insert)
    }

    /// Concatenated text of all inserts (embeds are skipped)
    pub fn to_text(&self) -> String {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::Insert { content, .. } => content.as_text(),
                _ => None,
            })
            .collect()
    }

    /// Ops covering units `start..end` of this delta
    pub fn slice(&self, start: usize, end: usize) -> Delta {
        let mut iter = OpIter::new(&self.ops);
        let mut out = Delta::new();
        let mut index = 0;

        while index < end {
            let Some(len) = iter.peek_len() else {
                break;
            };

            if index < start {
                let skip = (start - index).min(len);
                iter.next_len(skip);
                index += skip;
            } else {
                let take = (end - index).min(len);
                if let Some(op) = iter.next_len(take) {
                    out.push(op);
                }
                index += take;
            }
        }

        out
    }

    /// The delta equivalent to applying `self` then `other`
    pub fn compose(&self, other: &Delta) -> Result<Delta, DeltaError> {
        if self.output_len() != other.input_len() {
            return Err(DeltaError::ComposeLengthMismatch {
                left_output: self.output_len(),
                right_input: other.input_len(),
            });
        }

        let mut a = OpIter::new(&self.ops);
        let mut b = OpIter::new(&other.ops);
        let mut out = Delta::new();

        while a.has_next() || b.has_next() {
            if b.peek_kind() == Some(OpKind::Insert) {
                if let Some(op) = b.next_op() {
                    out.push(op);
                }
                continue;
            }

            if a.peek_kind() == Some(OpKind::Delete) {
                if let Some(op) = a.next_op() {
                    out.push(op);
                }
                continue;
            }

            let (Some(a_len), Some(b_len)) = (a.peek_len(), b.peek_len()) else {
                return Err(DeltaError::ComposeLengthMismatch {
                    left_output: self.output_len(),
                    right_input: other.input_len(),
                });
            };
            let len = a_len.min(b_len);
            let (Some(a_op), Some(b_op)) = (a.next_len(len), b.next_len(len)) else {
                break;
            };

            match (a_op, b_op) {
                (
                    Op::Retain {
                        attributes: left, ..
                    },
                    Op::Retain {
                        attributes: right, ..
                    },
                ) => out.push(Op::Retain {
                    len,
                    attributes: attributes::compose(&left, &right, true),
                }),
                (
                    Op::Insert {
                        content,
                        attributes: left,
                    },
                    Op::Retain {
                        attributes: right, ..
                    },
                ) => out.push(Op::Insert {
                    content,
                    attributes: attributes::compose(&left, &right, false),
                }),
                (Op::Retain { .. }, Op::Delete(n)) => out.push(Op::Delete(n)),
                // inserted by `self`, deleted by `other`
                _ => {}
            }
        }

        Ok(out)
    }

    /// Fold a sequence of deltas over a document of `base_len` units
    pub fn compose_all<'a>(
        base_len: usize,
        deltas: impl IntoIterator<Item = &'a Delta>,
    ) -> Result<Delta, DeltaError> {
        deltas
            .into_iter()
            .try_fold(Delta::identity(base_len), |acc, delta| acc.compose(delta))
    }

    /// Rebase `other` so it applies after `self`
    ///
    /// Both deltas must start from the same document. When `priority` is
    /// true `self` is treated as having happened first, so its inserts stay
    /// in front of `other`'s inserts at the same index.
    pub fn transform(&self, other: &Delta, priority: bool) -> Result<Delta, DeltaError> {
        if self.input_len() != other.input_len() {
            return Err(DeltaError::TransformLengthMismatch {
                left_input: self.input_len(),
                right_input: other.input_len(),
            });
        }

        let mut a = OpIter::new(&self.ops);
        let mut b = OpIter::new(&other.ops);
        let mut out = Delta::new();

        while a.has_next() || b.has_next() {
            if a.peek_kind() == Some(OpKind::Insert)
                && (priority || b.peek_kind() != Some(OpKind::Insert))
            {
                let len = a.next_op().map_or(0, |op| op.len());
                out.push(Op::retain(len));
                continue;
            }

            if b.peek_kind() == Some(OpKind::Insert) {
                if let Some(op) = b.next_op() {
                    out.push(op);
                }
                continue;
            }

            let (Some(a_len), Some(b_len)) = (a.peek_len(), b.peek_len()) else {
                return Err(DeltaError::TransformLengthMismatch {
                    left_input: self.input_len(),
                    right_input: other.input_len(),
                });
            };
            let len = a_len.min(b_len);
            let (Some(a_op), Some(b_op)) = (a.next_len(len), b.next_len(len)) else {
                break;
            };

            match (a_op, b_op) {
                // already deleted by `self`
                (Op::Delete(_), _) => {}
                (_, Op::Delete(n)) => out.push(Op::Delete(n)),
                (a_op, b_op) => {
                    let empty = Attributes::new();
                    out.push(Op::Retain {
                        len,
                        attributes: attributes::transform(
                            a_op.attributes().unwrap_or(&empty),
                            b_op.attributes().unwrap_or(&empty),
                            priority,
                        ),
                    });
                }
            }
        }

        Ok(out)
    }

    /// Map a position through this delta
    ///
    /// With `priority`, an insert exactly at `index` does not push it forward.
    pub fn transform_position(&self, index: usize, priority: bool) -> usize {
        let mut index = index;
        let mut offset = 0;

        for op in &self.ops {
            if offset > index {
                break;
            }

            let len = op.len();
            match op.kind() {
                OpKind::Delete => {
                    index -= len.min(index - offset);
                    continue;
                }
                OpKind::Insert if offset < index || !priority => index += len,
                _ => {}
            }
            offset += len;
        }

        index
    }

    /// The delta that undoes `self` once applied on top of `base`
    ///
    /// `base` is the document `self` was applied to.
    pub fn invert(&self, base: &Delta) -> Result<Delta, DeltaError> {
        if !base.is_document() {
            return Err(DeltaError::NotADocument);
        }
        if base.output_len() != self.input_len() {
            return Err(DeltaError::BaseLengthMismatch {
                expected: self.input_len(),
                actual: base.output_len(),
            });
        }

        let mut out = Delta::new();
        let mut base_index = 0;

        for op in &self.ops {
            match op {
                Op::Insert { .. } => out.push(Op::Delete(op.len())),
                Op::Retain { len, attributes } if attributes.is_empty() => {
                    out.push(Op::retain(*len));
                    base_index += len;
                }
                Op::Retain { len, attributes } => {
                    let empty = Attributes::new();
                    for base_op in base.slice(base_index, base_index + len).ops {
                        out.push(Op::Retain {
                            len: base_op.len(),
                            attributes: attributes::invert(
                                attributes,
                                base_op.attributes().unwrap_or(&empty),
                            ),
                        });
                    }
                    base_index += len;
                }
                Op::Delete(len) => {
                    for base_op in base.slice(base_index, base_index + len).ops {
                        out.push(base_op);
                    }
                    base_index += len;
                }
            }
        }

        Ok(out)
    }

    /// Apply this delta to a document
    pub fn apply_to(&self, document: &Delta) -> Result<Delta, DeltaError> {
        if !document.is_document() {
            return Err(DeltaError::NotADocument);
        }
        document.compose(self)
    }
}

fn merge_into(prev: &mut Op, next: &Op) -> bool {
    match (prev, next) {
        (Op::Delete(a), Op::Delete(b)) => {
            *a += b;
            true
        }
        (
            Op::Retain {
                len: a,
                attributes: prev_attrs,
            },
            Op::Retain {
                len: b,
                attributes: next_attrs,
            },
        ) if *prev_attrs == *next_attrs => {
            *a += b;
            true
        }
        (
            Op::Insert {
                content: Content::Text(a),
                attributes: prev_attrs,
            },
            Op::Insert {
                content: Content::Text(b),
                attributes: next_attrs,
            },
        ) if *prev_attrs == *next_attrs => {
            a.push_str(b);
            true
        }
        _ => false,
    }
}
