use tokio::sync::{Mutex, MutexGuard};

/// Cooperative page-auth lock.
///
/// Serializes adapter-initiated re-authentication (navigation handlers)
/// against the foreground task's input. Non-reentrant; the guard releases on
/// every exit path. Held across at most one critical section at a time.
#[derive(Debug, Default)]
pub struct AuthGate {
    inner: Mutex<()>,
}

pub struct AuthGuard<'a>(#[allow(dead_code)] MutexGuard<'a, ()>);

impl AuthGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the gate is clear.
    pub async fn lock(&self) -> AuthGuard<'_> {
        AuthGuard(self.inner.lock().await)
    }

    pub fn try_lock(&self) -> Option<AuthGuard<'_>> {
        self.inner.try_lock().ok().map(AuthGuard)
    }

    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn gate_is_exclusive() {
        let gate = Arc::new(AuthGate::new());
        let guard = gate.lock().await;
        assert!(gate.try_lock().is_none());
        assert!(gate.is_held());
        drop(guard);
        assert!(gate.try_lock().is_some());
    }

    #[tokio::test]
    async fn waiter_proceeds_after_release() {
        let gate = Arc::new(AuthGate::new());
        let guard = gate.lock().await;

        let contender = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                let _guard = gate.lock().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!contender.is_finished());
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("contender finished")
            .expect("contender did not panic");
    }
}
