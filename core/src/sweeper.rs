//! Timeout sweeper: cancels unpaid orders older than a deadline.
//!
//! Each order is canceled in its own transaction through
//! [`OrderEngine::cancel`], so stock is restored exactly as for a manual
//! cancellation and one failure never rolls back another order.

use crate::error::{BookstoreError, Result};
use crate::order::OrderEngine;
use std::future::Future;
use std::time::Duration;

/// Batch canceler for stale unpaid orders.
#[derive(Clone, Debug)]
pub struct TimeoutSweeper {
    engine: OrderEngine,
}

impl TimeoutSweeper {
    /// Creates a sweeper that cancels through `engine`
    #[must_use]
    pub const fn new(engine: OrderEngine) -> Self {
        Self { engine }
    }

    /// Cancel every unpaid order created more than `timeout` ago and return
    /// how many were canceled.
    ///
    /// Orders that stopped being unpaid between selection and cancellation
    /// (paid or canceled concurrently) are skipped. Other failures are logged
    /// and skipped too.
    ///
    /// # Errors
    ///
    /// Only a failure of the initial selection query.
    pub async fn sweep(&self, timeout: Duration) -> Result<usize> {
        let env = self.engine.environment();
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        let cutoff = env
            .clock
            .now()
            .checked_sub_signed(timeout)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);

        let stale = env.datastore.unpaid_orders_before(cutoff).await?;
        let mut canceled = 0;
        for (buyer, order_id) in stale {
            match self.engine.cancel(&buyer, &order_id).await {
                Ok(()) => canceled += 1,
                Err(BookstoreError::InvalidState { status, .. }) => {
                    tracing::debug!(
                        order_id = %order_id,
                        status = %status,
                        terminal = status.is_terminal(),
                        "Order no longer unpaid, skipping"
                    );
                }
                Err(error) => {
                    tracing::warn!(order_id = %order_id, error = %error, "Timeout cancellation failed");
                }
            }
        }

        metrics::counter!("bookstore.sweeper.canceled").increment(canceled as u64);
        tracing::info!(canceled, cutoff = %cutoff, "Sweep finished");
        Ok(canceled)
    }

    /// Run [`Self::sweep`] every `interval` until `shutdown` resolves.
    ///
    /// The first pass runs immediately. Returns the total number of orders
    /// canceled over all passes; a failed pass is logged and does not stop
    /// the loop.
    pub async fn run<F>(&self, interval: Duration, timeout: Duration, shutdown: F) -> usize
    where
        F: Future<Output = ()> + Send,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut total = 0;
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!(total, "Sweeper stopping");
                    return total;
                }
                _ = ticker.tick() => {
                    match self.sweep(timeout).await {
                        Ok(canceled) => total += canceled,
                        Err(error) => tracing::warn!(error = %error, "Sweep failed"),
                    }
                }
            }
        }
    }
}
