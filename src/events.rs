//! Typed publish/subscribe for engine events
//!
//! Each event kind has its own [`Signal`]. Subscribing returns a
//! [`Subscription`] handle that is the only way to unsubscribe.

use crate::channel::ChannelError;
use crate::delta::Delta;
use serde::{Deserialize, Serialize};

/// Handle returned by `subscribe`, used to cancel the subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

/// A change together with the document it was applied to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChange {
    pub delta: Delta,
    pub old_delta: Delta,
}

/// Listeners for one event kind
pub struct Signal<T> {
    next_id: u64,
    handlers: Vec<(Subscription, Box<dyn FnMut(&T)>)>,
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            handlers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, handler: impl FnMut(&T) + 'static) -> Subscription {
        self.next_id += 1;
        let subscription = Subscription(self.next_id);
        self.handlers.push((subscription, Box::new(handler)));
        subscription
    }

    /// Returns false if the subscription was already cancelled
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(id, _)| *id != subscription);
        self.handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn emit(&mut self, payload: &T) {
        for (_, handler) in &mut self.handlers {
            handler(payload);
        }
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Mutation hook run on every delta right before it is submitted upstream
///
/// Hooks may amend attributes but must keep the delta's lengths.
pub struct SubmitHook {
    next_id: u64,
    hooks: Vec<(Subscription, Box<dyn FnMut(&mut Delta)>)>,
}

impl SubmitHook {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            hooks: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, hook: impl FnMut(&mut Delta) + 'static) -> Subscription {
        self.next_id += 1;
        let subscription = Subscription(self.next_id);
        self.hooks.push((subscription, Box::new(hook)));
        subscription
    }

    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        let before = self.hooks.len();
        self.hooks.retain(|(id, _)| *id != subscription);
        self.hooks.len() != before
    }

    pub(crate) fn run(&mut self, delta: &mut Delta) {
        for (_, hook) in &mut self.hooks {
            hook(delta);
        }
    }
}

impl Default for SubmitHook {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SubmitHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmitHook")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// All events produced by the engine
#[derive(Debug, Default)]
pub struct EngineEvents {
    /// One per flush: everything that changed in document space
    pub editor_text_changed: Signal<TextChange>,
    /// One per local edit, in document space
    pub user_text_changed: Signal<TextChange>,
    /// Remote changes as applied on top of the local state
    pub upstream_text_changed: Signal<TextChange>,
    pub before_submit_to_upstream: SubmitHook,
    pub undo: Signal<TextChange>,
    pub redo: Signal<TextChange>,
    /// A loaded snapshot, before it replaces the surface contents
    pub before_sync: Signal<Delta>,
    pub document_loaded: Signal<Delta>,
    pub document_deleted: Signal<()>,
    pub synchronization_error: Signal<ChannelError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_subscribe_and_emit() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut signal = Signal::new();

        let sink = seen.clone();
        let sub = signal.subscribe(move |value: &u32| sink.borrow_mut().push(*value));

        signal.emit(&1);
        signal.emit(&2);
        assert_eq!(*seen.borrow(), vec![1, 2]);

        assert!(signal.unsubscribe(sub));
        assert!(!signal.unsubscribe(sub));
        signal.emit(&3);
        assert_eq!(*seen.borrow(), vec![1, 2]);
        assert!(signal.is_empty());
    }

    #[test]
    fn test_subscriptions_are_distinct() {
        let mut signal: Signal<()> = Signal::new();
        let a = signal.subscribe(|_| {});
        let b = signal.subscribe(|_| {});
        assert_ne!(a, b);
        assert_eq!(signal.len(), 2);
    }

    #[test]
    fn test_submit_hook_amends() {
        let mut hook = SubmitHook::new();
        hook.subscribe(|delta| {
            let amended = Delta::from_ops(delta.ops().iter().cloned().map(|op| match op {
                crate::delta::Op::Insert { content, .. } => {
                    let mut attributes = crate::delta::Attributes::new();
                    attributes.insert("author".to_string(), serde_json::json!("me"));
                    crate::delta::Op::Insert {
                        content,
                        attributes,
                    }
                }
                other => other,
            }));
            *delta = amended;
        });

        let mut delta = Delta::new().retain(1).insert("a");
        hook.run(&mut delta);
        assert_eq!(
            delta.ops()[1].attributes().unwrap().get("author"),
            Some(&serde_json::json!("me"))
        );
    }
}
