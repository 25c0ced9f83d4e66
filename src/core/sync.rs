//! Synchronisation helpers
//!
//! Lock poisoning means a thread panicked while holding a guard. Library code
//! never unwraps a lock result: it converts the poison into the caller's own
//! error type so the failure reaches whoever asked for the operation.

use std::sync::LockResult;

/// Convert a poisoned lock result into an application error
///
/// # Examples
/// ```
/// use std::sync::Mutex;
/// use workline::core::sync::handle_mutex_poison;
/// use workline::queue::StoreError;
///
/// let mutex = Mutex::new(42);
/// let guard = handle_mutex_poison(mutex.lock(), |message| StoreError::Poisoned { message })
///     .unwrap();
/// assert_eq!(*guard, 42);
/// ```
pub fn handle_mutex_poison<T, E>(
    result: LockResult<T>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<T, E> {
    result.map_err(|poison_err| {
        error_constructor(format!(
            "lock poisoned by a panicking holder: {}",
            poison_err
        ))
    })
}
