//! The composition engine
//!
//! Wires the composition buffer, the local-only overlay, reconciliation and
//! history to the two external collaborators: the presentation [`Surface`]
//! and the synchronization [`Channel`].
//!
//! The engine never sleeps or spawns. Time comes in through the `now`
//! arguments and a scheduled flush runs when the host calls [`Engine::poll`]
//! (or [`Engine::fire`] with the ticket it was handed).
//!
//! # Example
//!
//! ```
//! use std::time::{Duration, Instant};
//! use synckit_compose::{Delta, Engine, EngineConfig, MemoryChannel, MemorySurface};
//!
//! let mut engine = Engine::new(MemorySurface::new(), MemoryChannel::new(), EngineConfig::default()).unwrap();
//! let now = Instant::now();
//!
//! let edit = Delta::new().insert("ab");
//! let old = engine.surface_mut().edit(&edit).unwrap();
//! engine.handle_user_edit(&edit, &old, now).unwrap();
//! engine.handle_remote_operation(Delta::new().insert("X"), now).unwrap();
//!
//! engine.poll(now + Duration::from_millis(1)).unwrap();
//! assert_eq!(engine.surface().text(), "Xab");
//! assert_eq!(engine.channel().submitted(), &[Delta::new().retain(1).insert("ab")]);
//! ```

use crate::channel::{Channel, ChannelError};
use crate::composition::{CompositionBuffer, Ticket};
use crate::config::EngineConfig;
use crate::delta::Delta;
use crate::error::{DeltaError, Result, SyncError};
use crate::events::{EngineEvents, TextChange};
use crate::history::{History, StackKind};
use crate::overlay::{Overlay, Projected, RemovedStep, StepId};
use crate::reconcile::Reconciliation;
use crate::surface::{Source, Surface};
use std::time::Instant;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    /// The remote document was deleted
    Closed,
}

pub struct Engine<S: Surface, C: Channel> {
    surface: S,
    channel: C,
    config: EngineConfig,
    state: SessionState,
    composition: CompositionBuffer,
    overlay: Overlay,
    history: History,
    events: EngineEvents,
}

impl<S: Surface, C: Channel> Engine<S, C> {
    pub fn new(surface: S, channel: C, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            surface,
            channel,
            history: History::new(config.history.clone()),
            config,
            state: SessionState::Open,
            composition: CompositionBuffer::new(),
            overlay: Overlay::new(),
            events: EngineEvents::default(),
        })
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Direct access for the host's own input handling
    ///
    /// Changes made here must be reported through `handle_user_edit`.
    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn composition(&self) -> &CompositionBuffer {
        &self.composition
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    /// Event subscriptions
    pub fn events(&mut self) -> &mut EngineEvents {
        &mut self.events
    }

    /// The document as the channel sees it (surface minus overlay)
    pub fn document(&self) -> Result<Delta> {
        self.overlay.to_document(&self.surface.contents())
    }

    /// When the scheduled flush becomes due, for hosts driving a timer
    pub fn next_deadline(&self) -> Option<Instant> {
        self.composition.deadline()
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            SessionState::Open => Ok(()),
            SessionState::Closed => Err(SyncError::SessionTerminated),
        }
    }

    /// Replace the surface contents with a snapshot from the channel
    ///
    /// Queues, overlay and history are discarded and a closed session reopens.
    pub fn load(&mut self, document: Delta) -> Result<()> {
        if !document.is_document() {
            return Err(DeltaError::NotADocument.into());
        }

        let delta = self.surface.contents().diff(&document)?;
        self.events.before_sync.emit(&document);
        if !delta.is_identity() {
            self.surface.apply(&delta, Source::Silent)?;
        }

        self.composition.reset();
        self.overlay = Overlay::new();
        self.history.clear();
        self.history.cutoff();
        self.state = SessionState::Open;

        debug!(len = document.output_len(), "document loaded");
        self.events.document_loaded.emit(&document);
        Ok(())
    }

    /// A local edit the surface has already applied
    ///
    /// `delta` and `old_contents` are in surface space.
    pub fn handle_user_edit(&mut self, delta: &Delta, old_contents: &Delta, now: Instant) -> Result<()> {
        self.ensure_open()?;
        if delta.is_identity() {
            return Ok(());
        }

        let old_document = self.overlay.to_document(old_contents)?;
        let Projected { delta: change, overlay } = self.overlay.unproject(delta, old_contents)?;

        if !change.is_identity() {
            self.history.record(&change, &old_document, now)?;
            self.composition
                .push_submit(change.clone(), || Ok(old_document.clone()))?;
        }
        self.overlay = overlay;

        if change.is_identity() {
            return Ok(());
        }

        self.events.user_text_changed.emit(&TextChange {
            delta: change,
            old_delta: old_document,
        });
        self.composition
            .schedule_if_idle(now, self.config.idle_flush());
        Ok(())
    }

    /// A local edit reported only as "contents changed"
    pub fn handle_user_contents(&mut self, old_contents: &Delta, now: Instant) -> Result<()> {
        self.ensure_open()?;
        let delta = old_contents.diff(&self.surface.contents())?;
        self.handle_user_edit(&delta, old_contents, now)
    }

    pub fn handle_batch_start(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.composition.begin_batch();
        Ok(())
    }

    /// Returns the ticket of the flush scheduled after the quiescence delay
    pub fn handle_batch_end(&mut self, now: Instant) -> Result<Ticket> {
        self.ensure_open()?;
        Ok(self.composition.end_batch(now, self.config.quiescence()))
    }

    /// Queue a remote delta; it reaches the surface on the next flush
    pub fn handle_remote_operation(&mut self, delta: Delta, now: Instant) -> Result<()> {
        self.ensure_open()?;

        // must continue the queued remote chain, or the document when none is queued
        let expected = match self.composition.upstream_len() {
            Some(len) => len,
            None => self.document()?.output_len(),
        };
        if delta.input_len() != expected {
            let err = DeltaError::ComposeLengthMismatch {
                left_output: expected,
                right_input: delta.input_len(),
            };
            error!(%err, "remote delta rejected");
            return Err(err.into());
        }
        if delta.is_identity() {
            return Ok(());
        }

        let overlay = &self.overlay;
        let surface = &self.surface;
        self.composition
            .push_upstream(delta, || overlay.to_document(&surface.contents()))?;
        self.composition
            .schedule_if_idle(now, self.config.idle_flush());
        Ok(())
    }

    /// The remote document was deleted
    pub fn handle_deleted(&mut self) {
        if let Some(pending) = self.composition.pending() {
            warn!(
                upstream = pending.upstream.len(),
                submit = pending.submit.len(),
                "document deleted, discarding queued deltas"
            );
        }
        self.composition.reset();
        self.overlay = Overlay::new();
        self.state = SessionState::Closed;
        self.events.document_deleted.emit(&());
    }

    pub fn handle_error(&mut self, err: ChannelError) {
        warn!(%err, "synchronization error");
        self.events.synchronization_error.emit(&err);
    }

    /// Run the scheduled flush if it is due
    pub fn poll(&mut self, now: Instant) -> Result<Option<Reconciliation>> {
        if self.state == SessionState::Closed || self.composition.due(now).is_none() {
            return Ok(None);
        }
        self.composition.cancel();
        self.flush()
    }

    /// Run the flush scheduled under `ticket`, unless it was superseded
    pub fn fire(&mut self, ticket: Ticket) -> Result<Option<Reconciliation>> {
        if self.state == SessionState::Closed || !self.composition.is_current(ticket) {
            debug!(?ticket, "stale flush ticket ignored");
            return Ok(None);
        }
        self.composition.cancel();
        self.flush()
    }

    /// Merge everything queued since the last flush
    ///
    /// Returns `None` when nothing is queued or a batch is in progress. On
    /// error nothing has been applied and the queues are kept.
    pub fn flush(&mut self) -> Result<Option<Reconciliation>> {
        self.ensure_open()?;
        if self.composition.is_composing() {
            debug!("flush skipped while composing");
            return Ok(None);
        }
        let Some(pending) = self.composition.pending() else {
            return Ok(None);
        };

        let surface = self.surface.contents();
        let prepared = Reconciliation::compute(pending, &mut self.events.before_submit_to_upstream)
            .and_then(|result| {
                let projected = match &result.patch {
                    Some(patch) => Some(self.overlay.project(patch, &surface)?),
                    None => None,
                };
                Ok((result, projected))
            });
        let (result, projected) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                error!(%err, "flush aborted, queues kept");
                return Err(err);
            }
        };

        if let Some(Projected { delta, overlay }) = projected {
            self.surface.apply(&delta, Source::Silent)?;
            self.overlay = overlay;
        }

        if result.has_submit() {
            if let Err(err) = self.channel.submit(&result.submit) {
                warn!(%err, "submit failed");
                self.events.synchronization_error.emit(&err);
            }
        }

        if result.has_upstream() {
            self.events.upstream_text_changed.emit(&result.upstream_change);
            if let Err(err) = self.history.rebase(&result.upstream_change.delta) {
                warn!(%err, "history rebase failed, clearing history");
                self.history.clear();
            }
        }

        self.composition.clear_pending();
        self.composition.cancel();

        debug!(
            upstream = result.has_upstream(),
            submit = result.has_submit(),
            patched = result.patch.is_some(),
            "flushed"
        );
        self.events.editor_text_changed.emit(&result.editor_change);
        Ok(Some(result))
    }

    /// Apply a change to the surface that is never submitted upstream
    ///
    /// `change` and `revert` are in document space.
    pub fn add_local_only_delta(&mut self, change: Delta, revert: Delta) -> Result<StepId> {
        self.ensure_open()?;
        let (id, projected) = self.overlay.add(change, revert, &self.surface.contents())?;
        self.surface.apply(&projected.delta, Source::Silent)?;
        self.overlay = projected.overlay;
        Ok(id)
    }

    /// Take a local-only change back off the surface
    ///
    /// Unknown ids (already removed, or dropped by a reload or a deletion)
    /// yield `None`, also once the session is closed.
    pub fn remove_local_only_delta(&mut self, id: StepId) -> Result<Option<RemovedStep>> {
        if self.state == SessionState::Closed {
            debug!(%id, "overlay step removal after session closed");
            return Ok(None);
        }
        match self.overlay.remove(id, &self.surface.contents()) {
            Ok((removed, projected)) => {
                self.surface.apply(&projected.delta, Source::Silent)?;
                self.overlay = projected.overlay;
                Ok(Some(removed))
            }
            Err(SyncError::UnknownOverlayStep(id)) => {
                warn!(%id, "removing unknown overlay step");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Apply a length-preserving correction (document space) without submitting it
    pub fn submit_local_fixing_delta(&mut self, delta: &Delta, now: Instant) -> Result<()> {
        self.ensure_open()?;
        if delta.input_len() != delta.output_len() {
            return Err(DeltaError::LengthsChanged {
                before: (delta.input_len(), delta.input_len()),
                after: (delta.input_len(), delta.output_len()),
            }
            .into());
        }

        let surface = self.surface.contents();
        let document = self.overlay.to_document(&surface)?;
        if delta.input_len() != document.output_len() {
            return Err(DeltaError::BaseLengthMismatch {
                expected: document.output_len(),
                actual: delta.input_len(),
            }
            .into());
        }

        let projected = self.overlay.project(delta, &surface)?;
        self.surface.apply(&projected.delta, Source::Silent)?;
        self.overlay = projected.overlay;
        self.composition.push_fixing(delta)?;

        if !self.config.history.user_only {
            self.history.record(delta, &document, now)?;
        }
        Ok(())
    }

    pub fn undo(&mut self, now: Instant) -> Result<Option<TextChange>> {
        self.step_history(StackKind::Undo, now)
    }

    pub fn redo(&mut self, now: Instant) -> Result<Option<TextChange>> {
        self.step_history(StackKind::Redo, now)
    }

    /// Apply the top of a history stack through the submission path
    fn step_history(&mut self, kind: StackKind, now: Instant) -> Result<Option<TextChange>> {
        self.ensure_open()?;
        let Some(delta) = self.history.peek(kind).cloned() else {
            return Ok(None);
        };

        let surface = self.surface.contents();
        let old_document = self.overlay.to_document(&surface)?;
        let projected = self.overlay.project(&delta, &surface)?;
        self.surface.apply(&projected.delta, Source::Silent)?;
        self.overlay = projected.overlay;

        self.composition
            .push_submit(delta.clone(), || Ok(old_document.clone()))?;
        self.history.pop(kind);
        self.composition
            .schedule_if_idle(now, self.config.idle_flush());

        let index = self.overlay.project_index(History::last_change_index(&delta));
        self.surface.set_selection(index);

        let change = TextChange {
            delta,
            old_delta: old_document,
        };
        match kind {
            StackKind::Undo => self.events.undo.emit(&change),
            StackKind::Redo => self.events.redo.emit(&change),
        }
        Ok(Some(change))
    }
}

impl<S: Surface, C: Channel> std::fmt::Debug for Engine<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("composition", &self.composition)
            .field("overlay_steps", &self.overlay.len())
            .field("undo", &self.history.undo_len())
            .field("redo", &self.history.redo_len())
            .finish()
    }
}
