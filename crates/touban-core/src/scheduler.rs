//! Per-process scheduler loop.
//!
//! One loop per engine process; ticks never overlap. Each tick attempts to
//! lease every enabled job type and runs acquired jobs synchronously within
//! the tick. Across processes the only coordination is the lease row per
//! job type in the shared store.

use futures::{FutureExt as _, StreamExt as _};

use crate::catalog::JobCatalog;
use crate::config::{ConfigError, SchedulerConfig};
use crate::executor::run_job;
use crate::store::{JobStore, LeaseHolder};
use crate::utils::Ticker;

/// The engine: configuration + store + catalog + this process's holder token.
///
/// Owns its own lifecycle; dropping the returned future (or completing the
/// shutdown signal) stops the loop after the in-flight tick finishes. No job
/// is interrupted mid-batch.
pub struct Scheduler<S> {
    config: SchedulerConfig,
    store: S,
    catalog: JobCatalog,
    holder: LeaseHolder,
}

impl<S: std::fmt::Debug> std::fmt::Debug for Scheduler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("holder", &self.holder)
            .finish_non_exhaustive()
    }
}

impl<S> Scheduler<S>
where
    S: JobStore,
{
    /// Wire up an engine. Every enabled job definition and every declared
    /// custom job must resolve in `catalog`; an unresolved identifier is a
    /// fatal configuration error, not a runtime surprise.
    pub fn new(config: SchedulerConfig, store: S, catalog: JobCatalog) -> Result<Self, ConfigError> {
        for job_type in config.custom_jobs() {
            if !catalog.contains(job_type) {
                return Err(ConfigError::UnresolvedJob {
                    job_type: job_type.clone(),
                });
            }
        }
        for def in config.jobs() {
            if def.enabled && !catalog.contains(&def.job_type) {
                return Err(ConfigError::UnresolvedJob {
                    job_type: def.job_type.clone(),
                });
            }
        }

        Ok(Self {
            config,
            store,
            catalog,
            holder: LeaseHolder::generate(),
        })
    }

    /// This process's lease holder token.
    pub fn lease_holder(&self) -> LeaseHolder {
        self.holder
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Attach a shutdown signal; the loop exits once `signal` resolves and
    /// the in-flight tick has finished.
    pub fn with_graceful_shutdown<Signal>(
        self,
        signal: Signal,
    ) -> SchedulerWithGracefulShutdown<S, Signal>
    where
        Signal: Future<Output = ()>,
    {
        SchedulerWithGracefulShutdown {
            scheduler: self,
            signal,
        }
    }

    /// Run until the process shuts down.
    pub async fn run(self) {
        self.run_until(std::future::pending::<()>()).await
    }

    async fn run_until<Signal>(self, signal: Signal)
    where
        Signal: Future,
    {
        if !self.config.enabled() {
            tracing::info!("job scheduler disabled; loop not started");
            return;
        }

        // Rows are created lazily here and never deleted; disabled types are
        // left untouched so toggling them later picks up a fresh first_run.
        for def in self.config.jobs() {
            if !def.enabled {
                continue;
            }
            if let Err(error) = self
                .store
                .ensure_registered(&def.job_type, def.first_run)
                .await
            {
                tracing::error!(error = %error, job_type = %def.job_type, "failed to register job row");
            }
        }

        tracing::info!(
            holder = %self.holder,
            tick_period = ?self.config.tick_period(),
            initial_start_delay = ?self.config.initial_start_delay(),
            "job scheduler started"
        );

        let tick = Ticker::with_initial_delay(
            self.config.initial_start_delay(),
            self.config.tick_period(),
        )
        .fuse();
        futures::pin_mut!(tick);
        let signal = signal.fuse();
        futures::pin_mut!(signal);

        loop {
            futures::select! {
                tick_val = tick.next() => {
                    if tick_val.is_none() {
                        break;
                    }
                    self.run_due_jobs().await;
                }
                _ = signal => {
                    tracing::debug!("received shutdown signal; stopping scheduler loop");
                    break;
                }
            }
        }

        tracing::info!(holder = %self.holder, "job scheduler stopped");
    }

    /// One tick: attempt every enabled job type, run what we win.
    ///
    /// Dueness and leasing are a single conditional update in the store, so
    /// there is no list-then-acquire window; a failed acquisition means
    /// another process won or the job simply is not due.
    async fn run_due_jobs(&self) {
        for def in self.config.jobs() {
            if !def.enabled {
                continue;
            }
            let acquired = match self
                .store
                .try_acquire(
                    &def.job_type,
                    self.holder,
                    self.config.lock_expiration_for(def),
                )
                .await
            {
                Ok(acquired) => acquired,
                Err(error) => {
                    tracing::error!(error = %error, job_type = %def.job_type, "lease acquisition failed");
                    continue;
                }
            };
            if !acquired {
                tracing::trace!(job_type = %def.job_type, "job not due or leased elsewhere");
                continue;
            }

            // Resolution is checked in `new`; a miss here releases and skips.
            let Some(job) = self.catalog.get(&def.job_type) else {
                if let Err(error) = self.store.release(&def.job_type, self.holder).await {
                    tracing::error!(error = %error, job_type = %def.job_type, "failed to release lease");
                }
                continue;
            };

            tracing::debug!(job_type = %def.job_type, "job acquired");
            let outcome = run_job(
                &self.store,
                &def.job_type,
                self.holder,
                job.as_ref(),
                def,
                self.config.batch_size_for(def),
                self.config.max_job_retries(),
            )
            .await;
            tracing::trace!(job_type = %def.job_type, outcome = ?outcome, "job run finished");
        }
    }
}

/// Scheduler bound to a shutdown signal.
pub struct SchedulerWithGracefulShutdown<S, Signal> {
    scheduler: Scheduler<S>,
    signal: Signal,
}

impl<S, Signal> SchedulerWithGracefulShutdown<S, Signal>
where
    S: JobStore,
    Signal: Future<Output = ()>,
{
    /// Run until shutdown; the in-flight tick drains before returning.
    pub async fn run(self) {
        self.scheduler.run_until(self.signal).await
    }
}
