//! Minimal delta between two documents

use super::iter::OpIter;
use super::{attributes, Attributes, Content, Delta, Op};
use crate::error::DeltaError;
use imara_diff::{Algorithm, Diff, Hunk, InternedInput};

/// One document unit as seen by the diff (attributes are compared separately)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Unit {
    Char(char),
    Embed(String),
}

impl Default for Unit {
    fn default() -> Self {
        Unit::Char('\0')
    }
}

fn units(document: &Delta) -> Vec<Unit> {
    let mut out = Vec::with_capacity(document.output_len());
    for op in document.ops() {
        if let Op::Insert { content, .. } = op {
            match content {
                Content::Text(text) => out.extend(text.chars().map(Unit::Char)),
                Content::Embed(value) => out.push(Unit::Embed(value.to_string())),
            }
        }
    }
    out
}

impl Delta {
    /// The delta turning document `self` into document `other`
    ///
    /// Content is diffed with Myers over single units; attribute changes on
    /// unchanged content become formatting retains.
    pub fn diff(&self, other: &Delta) -> Result<Delta, DeltaError> {
        if !self.is_document() || !other.is_document() {
            return Err(DeltaError::NotADocument);
        }

        let mut input = InternedInput::default();
        input.update_before(units(self).into_iter());
        input.update_after(units(other).into_iter());

        let mut diff = Diff::default();
        diff.compute_with(
            Algorithm::Myers,
            &input.before,
            &input.after,
            input.interner.num_tokens(),
        );

        let mut before = OpIter::new(self.ops());
        let mut after = OpIter::new(other.ops());
        let mut out = Delta::new();
        let mut pos = 0;

        for Hunk { before: removed, after: added } in diff.hunks() {
            retain_common(&mut out, &mut before, &mut after, (removed.start - pos) as usize);

            let removed_len = removed.len();
            skip(&mut before, removed_len);
            out.push(Op::Delete(removed_len));

            let mut added_len = added.len();
            while added_len > 0 {
                let Some(op) = after.next_len(added_len) else {
                    break;
                };
                added_len -= op.len();
                out.push(op);
            }

            pos = removed.end;
        }

        retain_common(
            &mut out,
            &mut before,
            &mut after,
            input.before.len() - pos as usize,
        );

        Ok(out)
    }
}

fn skip(iter: &mut OpIter<'_>, mut len: usize) {
    while len > 0 {
        let Some(op) = iter.next_len(len) else {
            break;
        };
        len -= op.len();
    }
}

/// Retain `len` units present in both documents, diffing their attributes
fn retain_common(out: &mut Delta, before: &mut OpIter<'_>, after: &mut OpIter<'_>, mut len: usize) {
    let empty = Attributes::new();

    while len > 0 {
        let (Some(before_len), Some(after_len)) = (before.peek_len(), after.peek_len()) else {
            break;
        };
        let step = len.min(before_len).min(after_len);

        let (Some(old), Some(new)) = (before.next_len(step), after.next_len(step)) else {
            break;
        };
        out.push(Op::Retain {
            len: step,
            attributes: attributes::diff(
                old.attributes().unwrap_or(&empty),
                new.attributes().unwrap_or(&empty),
            ),
        });
        len -= step;
    }
}
