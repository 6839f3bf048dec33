//! `BroadcastChannelMessageBus`: the production `MessageBus`, wrapping
//! `web_sys::BroadcastChannel` the same way
//! `auth::persistence::WebStoragePersistence` uses it for cross-tab
//! notification — `broadcast` posts a JSON-serialized `Event` onto the
//! channel, and every attached tab's `onmessage` listener decodes it and
//! invokes the locally-registered handlers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use wasm_bindgen::closure::Closure;
use wasm_bindgen::JsCast;
use wasm_bindgen::JsValue;
use web_sys::{BroadcastChannel, MessageEvent};

use super::{Event, EventHandler, MessageBus, Subscription};
use crate::logger::Logger;

const DEFAULT_CHANNEL_NAME: &str = "upload-worker-engine";

pub struct BroadcastChannelMessageBus {
    channel_name: String,
    subscribers: Arc<Mutex<Vec<(usize, EventHandler)>>>,
    next_id: AtomicUsize,
    // Keeps the `onmessage` closure (and the channel it is bound to) alive
    // for as long as this bus exists.
    _listener_channel: BroadcastChannel,
    _onmessage: Closure<dyn FnMut(MessageEvent)>,
}

impl BroadcastChannelMessageBus {
    pub fn new() -> Result<Self, JsValue> {
        Self::with_channel_name(DEFAULT_CHANNEL_NAME)
    }

    pub fn with_channel_name(channel_name: impl Into<String>) -> Result<Self, JsValue> {
        let channel_name = channel_name.into();
        let subscribers: Arc<Mutex<Vec<(usize, EventHandler)>>> = Arc::new(Mutex::new(Vec::new()));
        let logger = Logger::new("upload-engine:bus");

        let listener_channel = BroadcastChannel::new(&channel_name)?;
        let handler_subscribers = Arc::clone(&subscribers);
        let onmessage = Closure::wrap(Box::new(move |event: MessageEvent| {
            let Some(text) = event.data().as_string() else {
                logger.warn("dropped a broadcast message whose payload was not a string");
                return;
            };
            match serde_json::from_str::<Event>(&text) {
                Ok(decoded) => {
                    for (_, handler) in handler_subscribers.lock().unwrap().iter() {
                        handler(&decoded);
                    }
                }
                Err(err) => {
                    logger.error(format!("dropped a malformed broadcast event: {err}"));
                }
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        listener_channel.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));

        Ok(Self {
            channel_name,
            subscribers,
            next_id: AtomicUsize::new(0),
            _listener_channel: listener_channel,
            _onmessage: onmessage,
        })
    }
}

impl MessageBus for BroadcastChannelMessageBus {
    fn broadcast(&self, event: Event) {
        let logger = Logger::new("upload-engine:bus");
        let serialized = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(err) => {
                logger.error(format!("failed to serialize outbound event: {err}"));
                return;
            }
        };

        // Local subscribers (handlers registered directly against this
        // instance, e.g. the worker's own lifecycle glue) receive the event
        // immediately; `BroadcastChannel` does not deliver a tab's own
        // postMessage back to itself, so broadcasting to other tabs and
        // notifying local handlers are two separate steps.
        for (_, handler) in self.subscribers.lock().unwrap().iter() {
            handler(&event);
        }

        if let Ok(channel) = BroadcastChannel::new(&self.channel_name) {
            let _ = channel.post_message(&JsValue::from_str(&serialized));
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
