//! Thread affinity checks for models.
//!
//! Models and proxies are driven from a single logical control thread. A
//! [`ThreadAffinity`] records the thread an object was created on and lets
//! mutating entry points verify they are still being called from it.
//!
//! ```
//! use graft_core::thread_check::ThreadAffinity;
//!
//! struct Counter {
//!     affinity: ThreadAffinity,
//!     value: std::sync::atomic::AtomicI32,
//! }
//!
//! impl Counter {
//!     fn bump(&self) {
//!         self.affinity.debug_assert_same_thread();
//!         self.value.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::ThreadId;

use crate::error::{GraftError, Result};

/// Flag to enable/disable runtime thread checks globally.
static THREAD_CHECKS_ENABLED: AtomicBool = AtomicBool::new(cfg!(debug_assertions));

/// Enable or disable runtime thread checks.
///
/// By default, thread checks are enabled in debug builds and disabled in
/// release builds.
pub fn set_thread_checks_enabled(enabled: bool) {
    THREAD_CHECKS_ENABLED.store(enabled, Ordering::SeqCst);
}

/// Check if runtime thread checks are currently enabled.
#[inline]
pub fn are_thread_checks_enabled() -> bool {
    THREAD_CHECKS_ENABLED.load(Ordering::Relaxed)
}

/// Thread affinity tracker.
#[derive(Debug, Clone, Copy)]
pub struct ThreadAffinity {
    thread_id: ThreadId,
}

impl Default for ThreadAffinity {
    fn default() -> Self {
        Self::current()
    }
}

impl ThreadAffinity {
    /// Create a new thread affinity tracker for the current thread.
    #[inline]
    pub fn current() -> Self {
        Self {
            thread_id: std::thread::current().id(),
        }
    }

    /// Get the thread ID this affinity is bound to.
    #[inline]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Check if the current thread matches this affinity.
    #[inline]
    pub fn is_same_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Return an error naming both threads if called from the wrong thread.
    pub fn check(&self) -> Result<()> {
        if self.is_same_thread() {
            return Ok(());
        }
        let current = std::thread::current();
        Err(GraftError::WrongThread(format!(
            "bound to {:?}, called from \"{}\" ({:?})",
            self.thread_id,
            current.name().unwrap_or("<unnamed>"),
            current.id()
        )))
    }

    /// Assert that we are on the same thread as the affinity.
    ///
    /// # Panics
    ///
    /// Panics if called from a different thread.
    #[inline]
    pub fn assert_same_thread(&self) {
        self.assert_same_thread_with_msg("model accessed from wrong thread")
    }

    /// Assert that we are on the same thread, with a custom message.
    ///
    /// # Panics
    ///
    /// Panics if called from a different thread.
    pub fn assert_same_thread_with_msg(&self, msg: &str) {
        if let Err(err) = self.check() {
            panic_wrong_thread(msg, &err);
        }
    }

    /// Debug-only assertion that we are on the same thread.
    ///
    /// This is a no-op in release builds, or when checks have been disabled
    /// with [`set_thread_checks_enabled`].
    #[inline]
    pub fn debug_assert_same_thread(&self) {
        #[cfg(debug_assertions)]
        if are_thread_checks_enabled() {
            self.assert_same_thread();
        }
    }
}

#[cold]
#[inline(never)]
fn panic_wrong_thread(msg: &str, err: &GraftError) -> ! {
    panic!(
        "\n\
        THREAD AFFINITY VIOLATION\n\
        \n\
        {msg}\n\
        {err}\n\
        \n\
        Models and the proxies built on them must be driven from the thread\n\
        that created them. Emit source notifications and call mount, unmount\n\
        and sort from that thread."
    )
}
