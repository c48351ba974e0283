use std::sync::{Mutex, MutexGuard};

/// Lock a node-state mutex. State is plain data that stays consistent between
/// statements, so a poisoned lock is recovered rather than propagated.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
