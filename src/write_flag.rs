//! Best-effort detection of concurrent or re-entrant writers.
//!
//! Each table carries a `WriteFlag`. Mutating entry points hold a
//! [`WriteGuard`] for the duration of the write; readers and iterators only
//! check the flag. The flag is a relaxed atomic: it provides no ordering and
//! no exclusion, it only makes a second writer fail fast with high
//! probability. Real concurrent access needs an external lock around the
//! whole table.

use core::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub(crate) struct WriteFlag {
    writing: AtomicBool,
}

impl WriteFlag {
    pub(crate) const fn new() -> Self {
        Self {
            writing: AtomicBool::new(false),
        }
    }

    /// Enter a write section. Panics if another write is in progress.
    #[inline]
    pub(crate) fn enter(&self) -> WriteGuard<'_> {
        if self.writing.swap(true, Ordering::Relaxed) {
            panic!("concurrent map writes");
        }
        WriteGuard { owner: self }
    }

    /// Panic with `what` if a write is in progress.
    #[inline]
    pub(crate) fn check(&self, what: &'static str) {
        if self.writing.load(Ordering::Relaxed) {
            panic!("{}", what);
        }
    }
}

/// RAII guard returned by `WriteFlag::enter`.
pub(crate) struct WriteGuard<'a> {
    owner: &'a WriteFlag,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.owner.writing.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::WriteFlag;

    #[test]
    fn enter_and_exit_is_ok() {
        let f = WriteFlag::new();
        {
            let _g = f.enter();
        }
        let _g = f.enter();
    }

    #[test]
    fn nested_write_panics() {
        let f = WriteFlag::new();
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _g1 = f.enter();
            let _g2 = f.enter();
        }));
        assert!(res.is_err(), "expected a second writer to panic");
        // The outer guard was released during unwinding.
        let _g = f.enter();
    }

    #[test]
    fn check_panics_only_while_writing() {
        let f = WriteFlag::new();
        f.check("concurrent map read and map write");
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _g = f.enter();
            f.check("concurrent map read and map write");
        }));
        assert!(res.is_err());
    }
}
