//! Panic recovery utilities.
//!
//! Listener callbacks, language execution and controller calls run user or
//! vendor code on shared threads. A panic in one of them is captured here,
//! logged, and converted into an error so the bus loop keeps running.

use crate::types::{Error, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Execute a function with panic recovery.
///
/// If the function panics, the panic is captured, logged, and converted
/// to an error.
///
/// # Example
/// ```
/// use exen_core::recovery::with_recovery;
///
/// let result = with_recovery(|| Ok(2 + 2), "add");
/// assert_eq!(result.unwrap(), 4);
/// ```
pub fn with_recovery<F, T>(operation: F, operation_name: &str) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match catch_unwind(AssertUnwindSafe(operation)) {
        Ok(result) => result,
        Err(panic_payload) => {
            let panic_msg = extract_panic_message(&panic_payload);
            tracing::error!(
                operation = operation_name,
                panic = %panic_msg,
                "panic_recovered"
            );

            Err(Error::internal(format!(
                "Panic in {}: {}",
                operation_name, panic_msg
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
        "Unknown panic (no message)".to_string()
    }
}
