use std::sync::{Mutex, MutexGuard};

/// Take a mutex even if a writer panicked while holding it. A poisoned relay
/// lock would otherwise wedge every event emitter in the process.
pub(crate) fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            crate::log_debug(&format!("mutex poisoned in {context}; recovering"));
            poisoned.into_inner()
        }
    }
}
