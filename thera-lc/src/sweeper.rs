//! Overdue sweeper
//!
//! Promotes `scheduled` assignments whose planned start has passed to
//! `overdue`. Each bounded batch is one short transaction holding the bulk
//! update plus one `status_changed` event per promoted assignment, so user
//! transitions are never blocked for long and consumers see every id.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::time::Duration;
use thera_common::time;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::assignment::{self, AssignmentStatus};
use crate::db::retry_on_lock;
use crate::error::Result;

/// Actor recorded on events emitted by the sweep
pub const SWEEPER_ACTOR: &str = "system:overdue-sweeper";

/// Outcome of one sweep run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Assignments promoted to overdue
    pub promoted: usize,
    /// Transactions committed
    pub batches: usize,
}

#[derive(Clone)]
pub struct OverdueSweeper {
    db: SqlitePool,
    batch_size: u32,
    max_lock_wait_ms: u64,
}

impl OverdueSweeper {
    pub fn new(db: SqlitePool, batch_size: u32, max_lock_wait_ms: u64) -> Self {
        Self {
            db,
            batch_size: batch_size.max(1),
            max_lock_wait_ms,
        }
    }

    pub async fn run_once(&self) -> Result<SweepReport> {
        self.run_at(time::now()).await
    }

    /// Sweep everything planned before `now`
    ///
    /// Idempotent: a second run in the same window finds no scheduled rows
    /// left to promote and emits nothing.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        loop {
            let promoted = retry_on_lock("sweeper.batch", self.max_lock_wait_ms, || {
                self.sweep_batch(now)
            })
            .await?;

            if promoted == 0 {
                break;
            }
            report.promoted += promoted;
            report.batches += 1;
            debug!(promoted, batch = report.batches, "Overdue batch committed");

            if promoted < self.batch_size as usize {
                break;
            }
        }

        info!(
            promoted = report.promoted,
            batches = report.batches,
            "Overdue sweep finished"
        );
        Ok(report)
    }

    async fn sweep_batch(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut tx = self.db.begin().await?;

        let promoted = assignment::store::promote_overdue_batch(&mut tx, now, self.batch_size).await?;
        for a in &promoted {
            assignment::publish_status_changed(
                &mut tx,
                a,
                AssignmentStatus::Scheduled,
                SWEEPER_ACTOR,
                None,
                now,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(promoted.len())
    }

    /// Run the sweep every `every` until `shutdown` flips to true
    pub fn spawn(self, every: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        info!(interval_secs = every.as_secs(), batch_size = self.batch_size, "Starting overdue sweeper");

        tokio::spawn(async move {
            let mut timer = interval(every);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        if let Err(e) = self.run_once().await {
                            error!(error = %e, "Overdue sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Overdue sweeper stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}
