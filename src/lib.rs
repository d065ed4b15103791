//! SyncKit Compose - Composition and delta reconciliation engine
//!
//! Keeps a rich-text document consistent while it is edited at the same time
//! by a local user, through an input surface that may batch keystrokes into
//! atomic compositions, and by remote collaborators whose operational-transform
//! deltas arrive at any moment.
//! It implements:
//! - Delta algebra (compose, transform, invert, diff) with strict lengths
//! - A composition buffer that holds reconciliation back during input batches
//! - Reconciliation of queued local and remote deltas with a fixed tie-break
//! - A local-only overlay for content that must never be submitted upstream
//! - Undo/redo history that stays valid across remote edits
//!
//! # Examples
//!
//! ```rust
//! use std::time::Instant;
//! use synckit_compose::{Delta, Engine, EngineConfig, MemoryChannel, MemorySurface};
//!
//! let surface = MemorySurface::with_contents(Delta::new().insert("hello"));
//! let mut engine = Engine::new(surface, MemoryChannel::new(), EngineConfig::default()).unwrap();
//!
//! let now = Instant::now();
//! engine.handle_batch_start().unwrap();
//! let edit = Delta::new().retain(5).insert(" world");
//! let old = engine.surface_mut().edit(&edit).unwrap();
//! engine.handle_user_edit(&edit, &old, now).unwrap();
//! engine.handle_remote_operation(Delta::new().insert(">").retain(5), now).unwrap();
//!
//! let ticket = engine.handle_batch_end(now).unwrap();
//! engine.fire(ticket).unwrap();
//! assert_eq!(engine.surface().text(), ">hello world");
//! ```

pub mod channel;
pub mod composition;
pub mod config;
pub mod delta;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod overlay;
pub mod reconcile;
pub mod surface;

// Re-exports for convenience
pub use channel::{Channel, ChannelError, MemoryChannel};
pub use composition::{BatchState, Ticket};
pub use config::{EngineConfig, HistoryConfig};
pub use delta::{Attributes, Content, Delta, Op};
pub use engine::{Engine, SessionState};
pub use error::{DeltaError, Result, SyncError};
pub use events::{EngineEvents, Signal, Subscription, TextChange};
pub use overlay::{RemovedStep, StepId};
pub use reconcile::{Reconciliation, UPSTREAM_PRIORITY};
pub use surface::{MemorySurface, Source, Surface};
