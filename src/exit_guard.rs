//! [`ExitGuard`] runs a deferred closure at the end of the scope.

/// Invokes the closure when dropped, including during unwinding; the bucket traversal
/// routines rely on it to balance use-counter increments even when a user-supplied closure
/// panics, and the reservoir uses it to clear its reentry marker.
pub(crate) struct ExitGuard<F: FnOnce()> {
    on_exit: Option<F>,
}

impl<F: FnOnce()> ExitGuard<F> {
    #[inline]
    pub(crate) fn new(on_exit: F) -> Self {
        Self {
            on_exit: Some(on_exit),
        }
    }
}

impl<F: FnOnce()> Drop for ExitGuard<F> {
    #[inline]
    fn drop(&mut self) {
        if let Some(on_exit) = self.on_exit.take() {
            on_exit();
        }
    }
}

#[cfg(test)]
mod test {
    use super::ExitGuard;
    use std::cell::Cell;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn runs_on_scope_exit() {
        let invoked = Cell::new(false);
        {
            let _exit_guard = ExitGuard::new(|| invoked.set(true));
            assert!(!invoked.get());
        }
        assert!(invoked.get());
    }

    #[test]
    fn runs_during_unwinding() {
        let invoked = Cell::new(false);
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _exit_guard = ExitGuard::new(|| invoked.set(true));
            panic!("deliberate");
        }));
        assert!(result.is_err());
        assert!(invoked.get());
    }
}
