//! Job status events for live subscribers.
//!
//! The broadcast channel is only a wake-up: every emission re-reads the job
//! store, so a subscriber sees the same authoritative snapshots whether the
//! worker runs in this process (and publishes) or in another one (in which
//! case the poll interval bounds the staleness).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::Stream;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::db::queries::{self, StoreError};
use crate::models::job::AnalysisJob;

const CHANNEL_CAPACITY: usize = 16;

type ChannelMap = Mutex<HashMap<Uuid, broadcast::Sender<AnalysisJob>>>;

pub struct EventPublisher {
    pool: SqlitePool,
    poll_interval: Duration,
    channels: Arc<ChannelMap>,
}

struct SubscribeState {
    pool: SqlitePool,
    channels: Arc<ChannelMap>,
    rx: Option<broadcast::Receiver<AnalysisJob>>,
    first: bool,
    done: bool,
}

/// Drop a receiver and retire the job's channel once nothing listens on it.
/// Without this, worker-in-another-process deployments (where `publish` never
/// runs) would accumulate one sender per subscribed job forever.
fn release_channel(
    channels: &ChannelMap,
    job_id: Uuid,
    rx: Option<broadcast::Receiver<AnalysisJob>>,
) {
    drop(rx);
    let mut channels = channels.lock().unwrap_or_else(PoisonError::into_inner);
    if channels.get(&job_id).is_some_and(|tx| tx.receiver_count() == 0) {
        channels.remove(&job_id);
    }
}

impl EventPublisher {
    pub fn new(pool: SqlitePool, poll_interval: Duration) -> Self {
        Self { pool, poll_interval, channels: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Wake subscribers of a job after a store write. Terminal statuses also
    /// retire the channel; late subscribers still get the snapshot from the
    /// store on their first read.
    pub fn publish(&self, job: &AnalysisJob) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = channels.get(&job.id) {
            let _ = tx.send(job.clone());
        }
        if job.status.is_terminal() {
            channels.remove(&job.id);
        }
    }

    /// Stream of job snapshots: one immediately, then one per wake-up or poll
    /// tick, ending with the first terminal snapshot (or a store error).
    pub fn subscribe(
        &self,
        job_id: Uuid,
    ) -> impl Stream<Item = Result<AnalysisJob, StoreError>> + Send {
        let rx = {
            let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
            channels
                .entry(job_id)
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe()
        };
        let poll_interval = self.poll_interval;
        let state = SubscribeState {
            pool: self.pool.clone(),
            channels: self.channels.clone(),
            rx: Some(rx),
            first: true,
            done: false,
        };

        futures::stream::unfold(state, move |mut st| async move {
            if st.done {
                return None;
            }
            if !st.first {
                // A lagged or closed receiver is fine; the store read below
                // is authoritative either way.
                match st.rx.as_mut() {
                    Some(rx) => {
                        tokio::select! {
                            _ = rx.recv() => {}
                            _ = tokio::time::sleep(poll_interval) => {}
                        }
                    }
                    None => tokio::time::sleep(poll_interval).await,
                }
            }
            st.first = false;

            match queries::get_job(&st.pool, job_id).await {
                Ok(job) => {
                    if job.status.is_terminal() {
                        st.done = true;
                        release_channel(&st.channels, job_id, st.rx.take());
                    }
                    Some((Ok(job), st))
                }
                Err(e) => {
                    st.done = true;
                    release_channel(&st.channels, job_id, st.rx.take());
                    Some((Err(e), st))
                }
            }
        })
    }
}
