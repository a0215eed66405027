//! The interface every migratable object implements.

use std::any::Any;

use crate::error::InvokeError;

/// An object whose methods can be called through a [`Handle`](crate::Handle)
/// from any node and whose canonical copy can move between nodes.
///
/// Calls are addressed by a selector string with opaque encoded arguments;
/// the encoding belongs to the object. Objects are shared between threads
/// and mutate through interior mutability.
///
/// Prefer `#[remote_methods]` over implementing this by hand.
///
/// ```ignore
/// use std::sync::atomic::{AtomicI64, Ordering};
/// use roving::{remote_methods, InvokeError};
///
/// struct Counter {
///     value: AtomicI64,
/// }
///
/// #[remote_methods]
/// impl Counter {
///     pub fn increment(&self, _args: &[u8]) -> Result<Vec<u8>, InvokeError> {
///         let value = self.value.fetch_add(1, Ordering::SeqCst) + 1;
///         Ok(value.to_le_bytes().to_vec())
///     }
/// }
/// ```
pub trait Remotable: Any + Send + Sync {
    /// Runs the method named by `selector`.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::UnknownSelector`] for unknown selectors, or
    /// whatever the method itself reports.
    fn invoke(&self, selector: &str, args: &[u8]) -> Result<Vec<u8>, InvokeError>;

    /// Upcast used to recover the concrete type on the hosting node.
    fn as_any(&self) -> &dyn Any;
}
