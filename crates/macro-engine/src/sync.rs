//! Lock helpers
//!
//! Every guarded value stays consistent between statements, so a poisoned
//! lock is recovered rather than propagated.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
