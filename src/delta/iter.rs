//! Cursor over a delta's operations that can hand out partial ops

use super::op::{Op, OpKind};

pub(crate) struct OpIter<'a> {
    ops: &'a [Op],
    index: usize,
    offset: usize,
}

impl<'a> OpIter<'a> {
    pub(crate) fn new(ops: &'a [Op]) -> Self {
        Self {
            ops,
            index: 0,
            offset: 0,
        }
    }

    pub(crate) fn has_next(&self) -> bool {
        self.index < self.ops.len()
    }

    pub(crate) fn peek_kind(&self) -> Option<OpKind> {
        self.ops.get(self.index).map(Op::kind)
    }

    /// Remaining length of the current op
    pub(crate) fn peek_len(&self) -> Option<usize> {
        self.ops.get(self.index).map(|op| op.len() - self.offset)
    }

    /// Take up to `len` units of the current op
    pub(crate) fn next_len(&mut self, len: usize) -> Option<Op> {
        let op = self.ops.get(self.index)?;
        let remaining = op.len() - self.offset;

        let piece = if self.offset == 0 && len >= remaining {
            op.clone()
        } else {
            op.slice(self.offset, len)
        };

        if len >= remaining {
            self.index += 1;
            self.offset = 0;
        } else {
            self.offset += len;
        }

        Some(piece)
    }

    /// Take the rest of the current op
    pub(crate) fn next_op(&mut self) -> Option<Op> {
        let len = self.peek_len()?;
        self.next_len(len)
    }
}
