//! `ChannelMessageBus`: a native, non-browser `MessageBus` used for
//! integration tests and for embedding the engine outside a worker. Built on
//! `async-channel`, already a crate dependency, mirroring how
//! `auth::persistence::InMemoryPersistence` stands in for the browser
//! persistence backend in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{Event, EventHandler, MessageBus, Subscription};

#[derive(Default)]
pub struct ChannelMessageBus {
    next_id: AtomicUsize,
    subscribers: Arc<Mutex<Vec<(usize, EventHandler)>>>,
}

impl ChannelMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience for tests: subscribes and returns an `async_channel`
    /// receiver fed by the handler, so a test can `.recv().await` events in
    /// arrival order instead of installing a closure.
    pub fn connect(&self) -> (async_channel::Receiver<Event>, Subscription) {
        let (tx, rx) = async_channel::unbounded();
        let subscription = self.subscribe(std::sync::Arc::new(move |event: &Event| {
            let _ = tx.try_send(event.clone());
        }));
        (rx, subscription)
    }
}

impl MessageBus for ChannelMessageBus {
    fn broadcast(&self, event: Event) {
        let subscribers = self.subscribers.lock().unwrap();
        for (_, handler) in subscribers.iter() {
            handler(&event);
        }
    }

    fn subscribe(&self, handler: EventHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().unwrap().push((id, handler));

        let subscribers = Arc::clone(&self.subscribers);
        Subscription::new(move || {
            subscribers.lock().unwrap().retain(|(existing_id, _)| *existing_id != id);
        })
    }
}
