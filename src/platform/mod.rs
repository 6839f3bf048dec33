//! Cross-target primitives shared by every component: a cooperative async
//! runtime seam (native tokio vs. wasm microtasks), environment detection,
//! and the browser bindings (`BroadcastChannel`, IndexedDB) used once the
//! `wasm-web` feature is enabled.

pub mod browser;
pub mod environment;
pub mod runtime;
