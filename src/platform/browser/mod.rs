//! Browser-only bindings, gated behind the `wasm-web` feature.

pub mod indexed_db;
