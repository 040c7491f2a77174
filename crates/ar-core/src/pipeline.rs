//! Per-job wiring of dispatcher, flush barrier and renormalizer.
//!
//! A job owns one ingestion thread reading its results stream and one
//! renormalization worker. Jobs share nothing but the store.

use std::io::Read;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ar_common::{Error, FlushId, JobId, Result};
use ar_config::{validate_pipeline, PipelineConfig};
use tracing::{error, info, warn};

use crate::alerts::{AlertObserver, ObserverId, ObserverRegistry};
use crate::flush::FlushBarrier;
use crate::logging::event_names;
use crate::normalizer::ScoreNormalizer;
use crate::renormalize::Renormalizer;
use crate::results::{DispatchStats, ResultDispatcher};
use crate::store::ResultStore;

/// A running results pipeline for one job.
pub struct JobPipeline {
    job_id: JobId,
    flush: Arc<FlushBarrier>,
    observers: Arc<ObserverRegistry>,
    renormalizer: Arc<Renormalizer>,
    ingest: JoinHandle<Result<DispatchStats>>,
}

impl JobPipeline {
    /// Validate `config`, start the renormalization worker and begin
    /// ingesting `reader` on a dedicated thread.
    pub fn start<R>(
        job_id: JobId,
        reader: R,
        store: Arc<dyn ResultStore>,
        normalizer: Arc<dyn ScoreNormalizer>,
        config: &PipelineConfig,
    ) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        validate_pipeline(config)?;

        let flush = Arc::new(FlushBarrier::new());
        let observers = Arc::new(ObserverRegistry::new());
        let renormalizer = Arc::new(Renormalizer::start(
            job_id.clone(),
            store.clone(),
            normalizer,
            config,
        )?);
        let dispatcher = ResultDispatcher::new(
            job_id.clone(),
            store,
            renormalizer.clone(),
            flush.clone(),
            observers.clone(),
        );

        info!(target: event_names::JOB_STARTED, job_id = %job_id, "job pipeline started");
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());
        let spawned = thread::Builder::new()
            .name(format!("ar-ingest-{}", job_id))
            .spawn(move || {
                tracing::dispatcher::with_default(&dispatch, || dispatcher.process_stream(reader))
            });
        let ingest = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                renormalizer.shutdown();
                return Err(e.into());
            }
        };

        Ok(Self {
            job_id,
            flush,
            observers,
            renormalizer,
            ingest,
        })
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Block until `flush_id` has been acknowledged on the stream (true) or
    /// the stream ended without it (false).
    pub fn wait_for_flush(&self, flush_id: &FlushId) -> bool {
        self.flush.wait_for(flush_id)
    }

    pub fn wait_for_flush_timeout(&self, flush_id: &FlushId, timeout: Duration) -> bool {
        self.flush.wait_for_timeout(flush_id, timeout)
    }

    /// Block until every quantile update seen so far has been applied.
    pub fn wait_until_renormalized(&self) -> bool {
        self.renormalizer.wait_until_idle()
    }

    pub fn add_observer(&self, observer: Box<dyn AlertObserver>) -> ObserverId {
        self.observers.add(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Wait for the stream to end, let renormalization settle, stop the
    /// worker, and return the stream result.
    pub fn finish(self) -> Result<DispatchStats> {
        let result = match self.ingest.join() {
            Ok(result) => result,
            Err(_) => {
                error!(job_id = %self.job_id, "ingestion thread panicked");
                // nobody else will finish the barrier
                self.flush.mark_finished();
                Err(Error::Internal("ingestion thread panicked".to_string()))
            }
        };

        self.renormalizer.wait_until_idle();
        if !self.renormalizer.shutdown() {
            warn!(job_id = %self.job_id, "renormalizer did not shut down cleanly");
        }

        info!(
            target: event_names::JOB_FINISHED,
            job_id = %self.job_id,
            success = result.is_ok(),
            "job pipeline finished"
        );
        result
    }
}
