//! Runtime environment detection.
//!
//! The upload engine runs the same code on a native executor (for embedding
//! and tests) and inside a browser Service/Shared Worker. These helpers let
//! the rest of the crate branch on "am I actually inside a worker" without
//! sprinkling `cfg` attributes everywhere.

/// Returns `true` if the runtime looks like a browser window context (as
/// opposed to a worker or a native process).
pub fn is_browser() -> bool {
    #[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
    {
        use wasm_bindgen::JsCast;
        js_sys::global().dyn_into::<web_sys::Window>().is_ok()
    }

    #[cfg(not(all(target_arch = "wasm32", feature = "wasm-web")))]
    {
        false
    }
}

/// Returns `true` if the runtime appears to be a Web Worker (the engine's
/// home in production).
pub fn is_web_worker() -> bool {
    #[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
    {
        use wasm_bindgen::JsCast;
        js_sys::global()
            .dyn_into::<web_sys::WorkerGlobalScope>()
            .is_ok()
    }

    #[cfg(not(all(target_arch = "wasm32", feature = "wasm-web")))]
    {
        false
    }
}
