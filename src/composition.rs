//! Composition buffer
//!
//! Tracks whether the input surface is in the middle of an atomic input batch
//! (IME composition and the like), holds the deltas that must not be
//! reconciled yet, and owns the single pending flush slot.
//!
//! Flush scheduling is a deadline rather than a timer: the host calls
//! `Engine::poll(now)` and the buffer reports whether the scheduled flush is
//! due. Every schedule draws a fresh ticket from a monotonically increasing
//! clock, so a host driving real timers can tell a superseded callback apart
//! from the live one with [`CompositionBuffer::is_current`].

use crate::delta::Delta;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BatchState {
    #[default]
    Idle,
    Composing,
}

/// Identity of one scheduled flush
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ticket(u64);

/// Monotonically increasing ticket source
#[derive(Debug, Clone, Default)]
struct TicketClock {
    value: u64,
}

impl TicketClock {
    /// Increment and return the new value
    fn increment(&mut self) -> Ticket {
        self.value += 1;
        Ticket(self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Scheduled {
    ticket: Ticket,
    deadline: Instant,
}

/// Everything queued since the last flush
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pending {
    /// Document-space state before the first queued delta
    pub base: Delta,
    /// Remote deltas, in arrival order
    pub upstream: Vec<Delta>,
    /// Local deltas in document space, in edit order
    pub submit: Vec<Delta>,
    /// Length-preserving local corrections, composed and addressing the
    /// document after every queued local delta
    pub fixing: Option<Delta>,
}

#[derive(Debug, Clone, Default)]
pub struct CompositionBuffer {
    state: BatchState,
    clock: TicketClock,
    scheduled: Option<Scheduled>,
    pending: Option<Pending>,
}

impl CompositionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn is_composing(&self) -> bool {
        self.state == BatchState::Composing
    }

    /// Enter a batch; any scheduled flush is cancelled
    pub fn begin_batch(&mut self) {
        if let Some(scheduled) = self.scheduled.take() {
            debug!(ticket = scheduled.ticket.0, "batch started, scheduled flush cancelled");
        }
        self.state = BatchState::Composing;
    }

    /// Leave a batch and schedule a flush after `delay`
    pub fn end_batch(&mut self, now: Instant, delay: Duration) -> Ticket {
        self.state = BatchState::Idle;
        self.schedule(now + delay)
    }

    /// Schedule a flush for edits that arrive outside any batch
    ///
    /// Does nothing while composing or when a flush is already scheduled.
    pub fn schedule_if_idle(&mut self, now: Instant, delay: Duration) -> Option<Ticket> {
        if self.is_composing() || self.scheduled.is_some() {
            return None;
        }
        Some(self.schedule(now + delay))
    }

    /// Replace the pending slot; the previous ticket is no longer current
    fn schedule(&mut self, deadline: Instant) -> Ticket {
        let ticket = self.clock.increment();
        self.scheduled = Some(Scheduled { ticket, deadline });
        debug!(ticket = ticket.0, "flush scheduled");
        ticket
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        !self.is_composing() && self.scheduled.is_some_and(|s| s.ticket == ticket)
    }

    /// When the scheduled flush becomes due, if one is scheduled
    pub fn deadline(&self) -> Option<Instant> {
        self.scheduled.map(|s| s.deadline)
    }

    /// The scheduled ticket, if it is due at `now`
    pub fn due(&self, now: Instant) -> Option<Ticket> {
        if self.is_composing() {
            return None;
        }
        self.scheduled
            .filter(|s| s.deadline <= now)
            .map(|s| s.ticket)
    }

    pub fn cancel(&mut self) {
        self.scheduled = None;
    }

    /// Queue a remote delta
    ///
    /// `base` is only evaluated when this is the first delta of the cycle.
    pub fn push_upstream(&mut self, delta: Delta, base: impl FnOnce() -> Result<Delta>) -> Result<()> {
        trace!(?delta, "upstream delta queued");
        self.pending_or_init(base)?.upstream.push(delta);
        Ok(())
    }

    /// Queue a local delta (document space)
    pub fn push_submit(&mut self, delta: Delta, base: impl FnOnce() -> Result<Delta>) -> Result<()> {
        trace!(?delta, "local delta queued");
        let pending = self.pending_or_init(base)?;
        // corrections keep addressing the end of the local chain
        let fixing = pending
            .fixing
            .as_ref()
            .map(|fixing| delta.transform(fixing, false))
            .transpose()?;
        pending.fixing = fixing;
        pending.submit.push(delta);
        Ok(())
    }

    /// Record a correction already applied on top of the queued local deltas
    ///
    /// Outside a cycle there is nothing to reconcile it against and it is not kept.
    pub fn push_fixing(&mut self, delta: &Delta) -> Result<()> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(());
        };
        let fixing = match &pending.fixing {
            Some(fixing) => fixing.compose(delta)?,
            None => delta.clone(),
        };
        trace!(?fixing, "local correction queued");
        pending.fixing = Some(fixing);
        Ok(())
    }

    /// Input length the next remote delta must have, while a cycle is open
    pub fn upstream_len(&self) -> Option<usize> {
        self.pending.as_ref().map(|pending| {
            pending
                .upstream
                .last()
                .map_or(pending.base.output_len(), Delta::output_len)
        })
    }

    fn pending_or_init(&mut self, base: impl FnOnce() -> Result<Delta>) -> Result<&mut Pending> {
        if self.pending.is_none() {
            self.pending = Some(Pending {
                base: base()?,
                ..Pending::default()
            });
        }
        Ok(self.pending.get_or_insert_with(Pending::default))
    }

    pub fn pending(&self) -> Option<&Pending> {
        self.pending.as_ref()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop both queues at once
    pub fn clear_pending(&mut self) {
        self.pending = None;
    }

    /// Drop queues, the scheduled flush and the batch state
    pub fn reset(&mut self) {
        self.state = BatchState::Idle;
        self.scheduled = None;
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Result<Delta> {
        Ok(Delta::new().insert("abc"))
    }

    #[test]
    fn test_ticket_clock_increments() {
        let mut clock = TicketClock::default();
        assert_eq!(clock.increment(), Ticket(1));
        assert_eq!(clock.increment(), Ticket(2));
    }

    #[test]
    fn test_no_flush_while_composing() {
        let now = Instant::now();
        let mut buffer = CompositionBuffer::new();

        buffer.begin_batch();
        assert!(buffer.schedule_if_idle(now, Duration::ZERO).is_none());
        assert!(buffer.due(now + Duration::from_secs(10)).is_none());

        let ticket = buffer.end_batch(now, Duration::from_millis(400));
        assert!(buffer.due(now + Duration::from_millis(399)).is_none());
        assert_eq!(buffer.due(now + Duration::from_millis(400)), Some(ticket));
    }

    #[test]
    fn test_batch_start_supersedes_scheduled_flush() {
        let now = Instant::now();
        let mut buffer = CompositionBuffer::new();

        buffer.begin_batch();
        let first = buffer.end_batch(now, Duration::from_millis(400));
        buffer.begin_batch();
        assert!(!buffer.is_current(first));
        assert!(buffer.due(now + Duration::from_secs(1)).is_none());

        let second = buffer.end_batch(now + Duration::from_millis(50), Duration::from_millis(400));
        assert!(second > first);
        assert!(!buffer.is_current(first));
        assert!(buffer.is_current(second));
        assert!(buffer.due(now + Duration::from_millis(420)).is_none());
        assert_eq!(buffer.due(now + Duration::from_millis(450)), Some(second));
    }

    #[test]
    fn test_idle_schedule_keeps_existing_slot() {
        let now = Instant::now();
        let mut buffer = CompositionBuffer::new();
        let ticket = buffer.schedule_if_idle(now, Duration::ZERO).unwrap();
        assert!(buffer.schedule_if_idle(now, Duration::ZERO).is_none());
        assert_eq!(buffer.due(now), Some(ticket));

        buffer.cancel();
        assert!(buffer.deadline().is_none());
    }

    #[test]
    fn test_base_captured_once() {
        let mut buffer = CompositionBuffer::new();
        buffer
            .push_submit(Delta::new().retain(3).insert("d"), base)
            .unwrap();
        buffer
            .push_upstream(Delta::new().insert("x").retain(3), || {
                panic!("base must not be recomputed")
            })
            .unwrap();

        let pending = buffer.pending().unwrap();
        assert_eq!(pending.base.to_text(), "abc");
        assert_eq!(pending.submit.len(), 1);
        assert_eq!(pending.upstream.len(), 1);

        buffer.clear_pending();
        assert!(!buffer.has_pending());
    }

    #[test]
    fn test_upstream_len_follows_chain() {
        let mut buffer = CompositionBuffer::new();
        assert_eq!(buffer.upstream_len(), None);

        buffer.push_submit(Delta::new().retain(3).insert("d"), base).unwrap();
        assert_eq!(buffer.upstream_len(), Some(3));

        buffer
            .push_upstream(Delta::new().insert("xy").retain(3), base)
            .unwrap();
        assert_eq!(buffer.upstream_len(), Some(5));
    }

    #[test]
    fn test_fixing_carried_past_later_edits() {
        let mut buffer = CompositionBuffer::new();
        let mut bold = crate::delta::Attributes::new();
        bold.insert("bold".to_string(), serde_json::json!(true));

        // correction outside a cycle is not kept
        buffer.push_fixing(&Delta::new().retain_with(3, bold.clone())).unwrap();
        assert!(buffer.pending().is_none());

        buffer.push_submit(Delta::new().retain(3).insert("d"), base).unwrap();
        buffer
            .push_fixing(&Delta::new().retain(3).retain_with(1, bold.clone()))
            .unwrap();
        buffer.push_submit(Delta::new().insert("z").retain(4), base).unwrap();

        assert_eq!(
            buffer.pending().unwrap().fixing,
            Some(Delta::new().retain(4).retain_with(1, bold))
        );
    }

    #[test]
    fn test_reset() {
        let now = Instant::now();
        let mut buffer = CompositionBuffer::new();
        buffer.begin_batch();
        buffer.push_submit(Delta::new().insert("a"), || Ok(Delta::new())).unwrap();
        buffer.end_batch(now, Duration::ZERO);

        buffer.reset();
        assert_eq!(buffer.state(), BatchState::Idle);
        assert!(buffer.due(now).is_none());
        assert!(buffer.pending().is_none());
    }
}
