//! Execution context and monitoring session lifetimes.
//!
//! Background platforms meter execution: a wake lock, a foreground
//! service, a scheduled job slot. [`ExecutionContext`] models whichever
//! primitive the host provides as a bounded, renewable grant, and an
//! [`ExecutionSession`] ties one "monitoring is running" lifetime to one
//! held grant. Sessions release their grant on every exit path,
//! including unwind, via `Drop`.

use std::time::{Duration, Instant};

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::LifecycleError;

/// A held execution grant, bounded in time and renewable.
pub trait ContextGrant: Send {
    /// Extend the grant for another `duration` from now.
    ///
    /// # Errors
    /// Fails if the platform refuses the renewal; the grant stays held
    /// until its original expiry.
    fn renew(&mut self, duration: Duration) -> Result<(), LifecycleError>;

    /// Release the grant. Idempotent.
    fn release(&mut self);
}

/// Source of execution grants.
pub trait ExecutionContext: Send + Sync {
    /// Acquire a grant valid for `duration`.
    ///
    /// # Errors
    /// Fails if the platform refuses execution; monitoring must not
    /// start without a grant.
    fn acquire(&self, duration: Duration) -> Result<Box<dyn ContextGrant>, LifecycleError>;
}

/// No-op [`ExecutionContext`] whose grants always succeed.
///
/// The stand-in for hosts where the process itself is the execution
/// guarantee (tests, embedded use, desktop).
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessContext;

struct ProcessGrant;

impl ContextGrant for ProcessGrant {
    fn renew(&mut self, _duration: Duration) -> Result<(), LifecycleError> {
        Ok(())
    }

    fn release(&mut self) {}
}

impl ExecutionContext for ProcessContext {
    fn acquire(&self, _duration: Duration) -> Result<Box<dyn ContextGrant>, LifecycleError> {
        Ok(Box::new(ProcessGrant))
    }
}

/// One monitoring lifetime: a held grant plus a session identity.
pub struct ExecutionSession {
    id: Uuid,
    grant: Box<dyn ContextGrant>,
    grant_duration: Duration,
    renewed_at: Instant,
}

impl ExecutionSession {
    /// Acquire a grant from `context` and open a session around it.
    ///
    /// # Errors
    /// Propagates the acquisition failure; no session exists on error.
    pub fn begin(
        context: &dyn ExecutionContext,
        grant_duration: Duration,
    ) -> Result<Self, LifecycleError> {
        let grant = context.acquire(grant_duration)?;
        let id = Uuid::new_v4();
        info!(session_id = %id, "execution session opened");
        Ok(Self {
            id,
            grant,
            grant_duration,
            renewed_at: Instant::now(),
        })
    }

    /// Stable identity of this session.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the grant has passed the renewal point (half its
    /// duration).
    #[must_use]
    pub fn renewal_due(&self) -> bool {
        self.renewed_at.elapsed() >= self.grant_duration / 2
    }

    /// Renew the grant for another full duration.
    ///
    /// # Errors
    /// Propagates the platform refusal; the session stays open on its
    /// existing grant and renewal can be retried.
    pub fn renew(&mut self) -> Result<(), LifecycleError> {
        self.grant.renew(self.grant_duration)?;
        self.renewed_at = Instant::now();
        debug!(session_id = %self.id, "execution grant renewed");
        Ok(())
    }
}

impl Drop for ExecutionSession {
    fn drop(&mut self) {
        self.grant.release();
        info!(session_id = %self.id, "execution session released");
    }
}

impl std::fmt::Debug for ExecutionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionSession")
            .field("id", &self.id)
            .field("grant_duration", &self.grant_duration)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::ScriptedContext;
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_process_context_always_grants() {
        let session = ExecutionSession::begin(&ProcessContext, Duration::from_secs(600)).unwrap();
        assert!(!session.renewal_due());
    }

    #[test]
    fn test_session_ids_are_distinct() {
        let a = ExecutionSession::begin(&ProcessContext, Duration::from_secs(600)).unwrap();
        let b = ExecutionSession::begin(&ProcessContext, Duration::from_secs(600)).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_refused_acquisition_surfaces() {
        let ctx = ScriptedContext::default();
        ctx.refuse_acquire.store(true, Ordering::SeqCst);
        let err = ExecutionSession::begin(&ctx, Duration::from_secs(600)).unwrap_err();
        assert!(matches!(err, LifecycleError::ContextAcquisition { .. }));
        assert_eq!(ctx.releases.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_releases_grant_exactly_once() {
        let ctx = ScriptedContext::default();
        let session = ExecutionSession::begin(&ctx, Duration::from_secs(600)).unwrap();
        drop(session);
        assert_eq!(ctx.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_renewal_due_after_half_duration() {
        let ctx = ScriptedContext::default();
        let mut session = ExecutionSession::begin(&ctx, Duration::from_millis(20)).unwrap();
        assert!(!session.renewal_due());
        std::thread::sleep(Duration::from_millis(15));
        assert!(session.renewal_due());

        session.renew().unwrap();
        assert!(!session.renewal_due());
        assert_eq!(ctx.renewals.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_refused_renewal_keeps_session_open() {
        let ctx = ScriptedContext::default();
        let mut session = ExecutionSession::begin(&ctx, Duration::from_secs(600)).unwrap();
        ctx.refuse_renew.store(true, Ordering::SeqCst);
        assert!(session.renew().is_err());
        // Still held; released only on drop.
        assert_eq!(ctx.releases.load(Ordering::SeqCst), 0);
        drop(session);
        assert_eq!(ctx.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_on_unwind() {
        let ctx = ScriptedContext::default();
        let session = ExecutionSession::begin(&ctx, Duration::from_secs(600)).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _held = session;
            panic!("worker died");
        }));
        assert!(result.is_err());
        assert_eq!(ctx.releases.load(Ordering::SeqCst), 1);
    }
}
