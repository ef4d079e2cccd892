use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::{EffectId, GridDimensions, GridPosition, SpatialError};

type Callback<E> = Box<dyn Fn(&E) + Send + Sync>;

/// Observer list used in place of GUI signals.
///
/// Consumers either register a callback or take a channel receiver. Publishing
/// never blocks; receivers that have been dropped are forgotten.
pub struct EventBus<E> {
    callbacks: Vec<Callback<E>>,
    channels: Vec<Sender<E>>,
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self {
            callbacks: Vec::new(),
            channels: Vec::new(),
        }
    }

    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    pub fn channel(&mut self) -> Receiver<E> {
        let (tx, rx) = unbounded();
        self.channels.push(tx);
        rx
    }

    pub fn publish(&mut self, event: E) {
        for callback in &self.callbacks {
            callback(&event);
        }
        self.channels.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn has_observers(&self) -> bool {
        !self.callbacks.is_empty() || !self.channels.is_empty()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("callbacks", &self.callbacks.len())
            .field("channels", &self.channels.len())
            .finish()
    }
}

/// Notifications published by [`SpatialGrid`](crate::SpatialGrid).
#[derive(Debug, Clone)]
pub enum GridEvent {
    DimensionsChanged(GridDimensions),
    /// Assignments dropped because a resize left their position out of range.
    AssignmentsPruned { removed: usize },
    UserPositionChanged(Option<GridPosition>),
    Rejected(Arc<SpatialError>),
}

/// Notifications published by [`EffectManager`](crate::EffectManager).
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Registered(EffectId),
    Unregistered(EffectId),
    Started(EffectId),
    Stopped(EffectId),
    /// A self-terminating effect ran to completion and was stopped.
    Finished(EffectId),
    BindingsInvalidated { id: EffectId, dropped: usize },
    Fault { id: EffectId, reason: String },
    Rejected(Arc<SpatialError>),
}

impl EngineEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Fault { .. } | Self::Rejected(_))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn delivers_to_callbacks_and_channels() {
        let mut bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        bus.subscribe(move |_: &GridEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let rx = bus.channel();

        bus.publish(GridEvent::AssignmentsPruned { removed: 2 });

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(matches!(
            rx.try_recv(),
            Ok(GridEvent::AssignmentsPruned { removed: 2 })
        ));
    }

    #[test]
    fn forgets_dropped_receivers() {
        let mut bus: EventBus<GridEvent> = EventBus::new();
        drop(bus.channel());
        bus.publish(GridEvent::UserPositionChanged(None));
        assert!(!bus.has_observers());
    }
}
