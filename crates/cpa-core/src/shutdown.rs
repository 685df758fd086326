//! Cooperative shutdown and shared signals between analyses
//!
//! Long running loops poll a [`ShutdownNotifier`] at safe points and turn a
//! pending request into [`CpaError::Interrupted`]. Nothing is ever stopped
//! preemptively.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use log::info;

use crate::error::{CpaError, InterruptReason};

#[derive(Debug)]
struct ShutdownInner {
    requested: AtomicBool,
    reason: Mutex<Option<InterruptReason>>,
    deadline: Option<Instant>,
    parent: Option<ShutdownNotifier>,
}

/// Shared handle to request and observe a shutdown
///
/// Clones share the same request. A [`ShutdownNotifier::child`] observes the
/// requests of its parent, while its own requests do not propagate upwards.
#[derive(Debug, Clone)]
pub struct ShutdownNotifier {
    inner: Arc<ShutdownInner>,
}

impl Default for ShutdownNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownNotifier {
    /// Notifier without deadline
    pub fn new() -> Self {
        Self::with_deadline(None, None)
    }

    /// Notifier that requests shutdown once `timeout` has passed
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now().checked_add(timeout), None)
    }

    fn with_deadline(deadline: Option<Instant>, parent: Option<ShutdownNotifier>) -> Self {
        Self {
            inner: Arc::new(ShutdownInner {
                requested: AtomicBool::new(false),
                reason: Mutex::new(None),
                deadline,
                parent,
            }),
        }
    }

    /// Notifier that shuts down with this one but can also be shut down on
    /// its own
    pub fn child(&self) -> Self {
        Self::with_deadline(None, Some(self.clone()))
    }

    /// Child notifier that additionally shuts down once `timeout` has passed
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        Self::with_deadline(Instant::now().checked_add(timeout), Some(self.clone()))
    }

    /// Request shutdown of every component polling this notifier
    ///
    /// Only the first reason is kept.
    pub fn request_shutdown(&self, reason: impl ToString) {
        self.set_reason(InterruptReason::Requested(reason.to_string()));
    }

    fn set_reason(&self, reason: InterruptReason) {
        let mut guard = self
            .inner
            .reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_none() {
            info!("Shutdown requested: {reason}");
            *guard = Some(reason);
        }
        self.inner.requested.store(true, Ordering::SeqCst);
    }

    /// Check whether shutdown was requested or the deadline has passed
    pub fn should_shutdown(&self) -> bool {
        self.reason().is_some()
    }

    /// Reason of a pending shutdown
    pub fn reason(&self) -> Option<InterruptReason> {
        if self.inner.requested.load(Ordering::SeqCst) {
            let guard = self
                .inner
                .reason
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            return guard.clone();
        }
        if self.inner.deadline.is_some_and(|d| Instant::now() >= d) {
            self.set_reason(InterruptReason::Timeout);
            return Some(InterruptReason::Timeout);
        }
        self.inner.parent.as_ref().and_then(|p| p.reason())
    }

    /// Return [`CpaError::Interrupted`] if shutdown is pending
    pub fn shutdown_if_necessary(&self) -> Result<(), CpaError> {
        match self.reason() {
            Some(reason) => Err(CpaError::Interrupted(reason)),
            None => Ok(()),
        }
    }
}

/// Flag set once some component has proven the program safe
///
/// The flag is only ever set, never cleared.
#[derive(Debug, Clone, Default)]
pub struct ProgramSafeSignal(Arc<AtomicBool>);

impl ProgramSafeSignal {
    /// Unset signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the program is safe
    pub fn set_safe(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check whether the program was proven safe
    pub fn is_safe(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_keeps_first_reason() {
        let notifier = ShutdownNotifier::new();
        assert!(notifier.shutdown_if_necessary().is_ok());

        notifier.request_shutdown("first");
        notifier.request_shutdown("second");
        assert!(notifier.should_shutdown());
        assert_eq!(
            notifier.reason(),
            Some(InterruptReason::Requested("first".into()))
        );
        assert!(matches!(
            notifier.shutdown_if_necessary(),
            Err(CpaError::Interrupted(InterruptReason::Requested(_)))
        ));
    }

    #[test]
    fn test_child_observes_parent_only() {
        let parent = ShutdownNotifier::new();
        let child = parent.child();

        child.request_shutdown("child only");
        assert!(child.should_shutdown());
        assert!(!parent.should_shutdown());

        let other_child = parent.child();
        parent.request_shutdown("all");
        assert!(other_child.should_shutdown());
    }

    #[test]
    fn test_timeout() {
        let notifier = ShutdownNotifier::with_timeout(Duration::ZERO);
        assert_eq!(notifier.reason(), Some(InterruptReason::Timeout));

        let notifier = ShutdownNotifier::with_timeout(Duration::from_secs(3600));
        assert!(!notifier.should_shutdown());

        let child = notifier.child_with_timeout(Duration::ZERO);
        assert_eq!(child.reason(), Some(InterruptReason::Timeout));
        assert!(!notifier.should_shutdown());
    }

    #[test]
    fn test_safe_signal_shared() {
        let signal = ProgramSafeSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_safe());
        signal.set_safe();
        assert!(clone.is_safe());
    }
}
