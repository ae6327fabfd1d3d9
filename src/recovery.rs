//! Panic isolation for extension-supplied callbacks.
//!
//! Deployment listeners, disposal listeners, and artifact builders are
//! supplied by operators and extensions. A panic inside one of them must
//! be captured, logged, and converted to an error instead of unwinding
//! through the lifecycle engine.

use crate::types::{Error, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Execute a callback with panic recovery.
///
/// If the callback panics, the panic is captured, logged, and converted
/// to an error. The callback's own `Err` results pass through unchanged.
pub fn isolate<F, T>(callback: F, callback_name: &str) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(result) => result,
        Err(panic_payload) => {
            let panic_msg = extract_panic_message(&panic_payload);
            tracing::error!(
                "panic_recovered: callback={}, panic={}",
                callback_name,
                panic_msg
            );

            Err(Error::listener(format!(
                "panic in {}: {}",
                callback_name, panic_msg
            )))
        }
    }
}

/// Extract panic message from panic payload.
fn extract_panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic (no message)".to_string()
    }
}
