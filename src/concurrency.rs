//! Concurrency limits for the worker pools.
//!
//! `PoolLimiter` is a `tokio::sync::Semaphore` whose size can change while
//! permits are held. Growing adds permits straight away. Shrinking forgets
//! idle permits and records the rest as debt, which is paid by forgetting
//! permits as they are returned, so running work is never interrupted.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct PoolLimiter {
    semaphore: Arc<Semaphore>,
    size: Mutex<usize>,
    debt: AtomicUsize,
}

impl PoolLimiter {
    pub fn new(size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size: Mutex::new(size),
            debt: AtomicUsize::new(0),
        }
    }

    /// Configured maximum concurrency.
    pub fn size(&self) -> usize {
        *self.size.lock()
    }

    /// Permits free right now, ignoring unpaid debt.
    pub fn available(&self) -> usize {
        self.semaphore
            .available_permits()
            .saturating_sub(self.debt.load(Ordering::SeqCst))
    }

    /// Waits for a slot. Returns `None` once the limiter is closed.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        loop {
            let permit = self.semaphore.clone().acquire_owned().await.ok()?;
            let paid = self
                .debt
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1))
                .is_ok();
            if !paid {
                return Some(permit);
            }
            permit.forget();
        }
    }

    pub fn resize(&self, new_size: usize) {
        let mut size = self.size.lock();
        let old = *size;
        if new_size > old {
            let mut grow = new_size - old;
            while grow > 0
                && self
                    .debt
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1))
                    .is_ok()
            {
                grow -= 1;
            }
            self.semaphore.add_permits(grow);
        } else {
            for _ in new_size..old {
                match self.semaphore.try_acquire() {
                    Ok(permit) => permit.forget(),
                    Err(_) => {
                        self.debt.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }
        *size = new_size;
    }

    pub fn close(&self) {
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn grows_and_shrinks_idle_permits() {
        let limiter = PoolLimiter::new(2);
        assert_eq!(limiter.available(), 2);
        limiter.resize(5);
        assert_eq!(limiter.size(), 5);
        assert_eq!(limiter.available(), 5);
        limiter.resize(1);
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn shrinking_while_busy_waits_for_release() {
        let limiter = Arc::new(PoolLimiter::new(2));
        let a = limiter.acquire().await.unwrap();
        let b = limiter.acquire().await.unwrap();
        limiter.resize(1);
        drop(a);
        // The returned permit paid the debt, so nothing is free yet.
        assert!(
            tokio::time::timeout(Duration::from_millis(20), limiter.acquire())
                .await
                .is_err()
        );
        drop(b);
        let c = tokio::time::timeout(Duration::from_millis(100), limiter.acquire())
            .await
            .unwrap();
        assert!(c.is_some());
    }

    #[tokio::test]
    async fn closed_limiter_yields_none() {
        let limiter = PoolLimiter::new(1);
        limiter.close();
        assert!(limiter.acquire().await.is_none());
    }
}
