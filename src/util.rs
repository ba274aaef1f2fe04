use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// Locks `mutex`, recovering the data if another thread panicked while
/// holding it.
///
/// Every critical section in this crate is a single structural mutation
/// that cannot be observed half-done, so the data is consistent even when
/// the lock is poisoned.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Formats a duration as `m:ss`, or `h:mm:ss` from one hour on.
///
/// # Examples
///
/// ```rust
/// assert_eq!(clock(Duration::from_secs(75)), "1:15");
/// assert_eq!(clock(Duration::from_secs(3725)), "1:02:05");
/// ```
#[must_use]
pub fn clock(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, secs / 60 % 60, secs % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_formats() {
        assert_eq!(clock(Duration::ZERO), "0:00");
        assert_eq!(clock(Duration::from_secs(75)), "1:15");
        assert_eq!(clock(Duration::from_millis(59_999)), "0:59");
        assert_eq!(clock(Duration::from_secs(3725)), "1:02:05");
    }
}
