//! Pipeline orchestration.
//!
//! One run loads the catalog, fetches every batch, parses the responses,
//! reconciles them against the catalog and writes the workbook. Stages run
//! strictly in order. The first fatal error halts the run and is reported
//! together with the stage it happened in and the last stage that completed.
//!
//! Cancellation is cooperative: the flag is checked before each stage is
//! entered, so an in-flight fetch runs to completion (or its own timeout).

pub mod state;

use chrono::Local;
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use fdpsync_core::parse::{self, ParseError, ParsedResponse};
use fdpsync_core::reconcile::{BatchFailure, FailureStage, RunMetadata, RunWarning};
use fdpsync_core::remote::{
    plan_batches, BatchResponse, FetchError, HttpTransport, RemoteClient, Transport,
    MODE_SHARECLASS,
};
use fdpsync_core::{Catalog, CatalogError, Isin, Reconciler, RunReport};

use crate::archive::ResponseArchive;
use crate::config::{ConfigError, SyncConfig};
use crate::reporting::{write_report, ReportWriteError};
pub use state::{PipelineState, Stage, TransitionError};

// ── Errors ──────────────────────────────────────────────────────────

/// The cause behind a failed stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("batch {batch} could not be fetched")]
    BatchFetch {
        batch: usize,
        #[source]
        source: FetchError,
    },

    #[error("batch {batch} could not be parsed")]
    BatchParse {
        batch: usize,
        #[source]
        source: ParseError,
    },

    #[error(transparent)]
    Write(#[from] ReportWriteError),

    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// A run that did not reach `Done`.
#[derive(Debug, Error)]
#[error("pipeline failed while {stage}")]
pub struct PipelineFailure {
    pub stage: Stage,
    pub last_completed: Option<Stage>,
    #[source]
    pub source: StageError,
    /// Present when reconciliation finished before the failure.
    pub report: Option<RunReport>,
}

impl PipelineFailure {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, StageError::Cancelled)
    }

    fn with_report(mut self, report: RunReport) -> Self {
        self.report = Some(report);
        self
    }
}

/// Errors building a pipeline, before any stage runs.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot build the remote client")]
    Client(#[source] FetchError),
}

// ── Observer ────────────────────────────────────────────────────────

/// Receives progress from a running pipeline.
///
/// Hooks are called from the pipeline thread, except `on_batch_fetched`,
/// which is called from fetch workers as batches complete.
pub trait PipelineObserver: Send + Sync {
    fn on_transition(&self, _from: PipelineState, _to: PipelineState) {}

    fn on_batch_fetched(&self, _response: &BatchResponse, _completed: usize, _total: usize) {}

    fn on_warning(&self, _warning: &RunWarning) {}

    fn on_failed(&self, _failure: &PipelineFailure) {}
}

/// Forwards pipeline progress to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl PipelineObserver for LogObserver {
    fn on_transition(&self, _from: PipelineState, to: PipelineState) {
        match to {
            PipelineState::Done => info!(event = "stage.done", "run complete"),
            PipelineState::Idle | PipelineState::Failed { .. } => {}
            running => {
                if let Some(stage) = running.stage() {
                    info!(event = stage.event_name(), "{stage}");
                }
            }
        }
    }

    fn on_batch_fetched(&self, response: &BatchResponse, completed: usize, total: usize) {
        match &response.result {
            Ok(body) => info!(
                event = "batch.fetched",
                batch = response.batch_index,
                bytes = body.len(),
                "batch {completed}/{total} fetched"
            ),
            Err(e) => warn!(
                event = "batch.failed",
                batch = response.batch_index,
                error = %e,
                "batch {completed}/{total} failed"
            ),
        }
    }

    fn on_warning(&self, warning: &RunWarning) {
        match warning {
            // The parser has already logged these.
            RunWarning::Parse { .. } => debug!(event = "run.warning", %warning),
            _ => warn!(event = "run.warning", %warning),
        }
    }

    fn on_failed(&self, failure: &PipelineFailure) {
        error!(
            event = "stage.failed",
            stage = %failure.stage,
            last_completed = ?failure.last_completed,
            error = %failure.source,
            "run failed"
        );
    }
}

// ── Pipeline ────────────────────────────────────────────────────────

/// What a successful run leaves behind.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub output: PathBuf,
    pub archived: Vec<PathBuf>,
}

/// One configured sync: catalog, remote client, observer.
///
/// [`Pipeline::run`] can be called more than once; every run reloads the
/// catalog and starts with a closed circuit breaker.
pub struct Pipeline<T: Transport = HttpTransport> {
    config: SyncConfig,
    client: RemoteClient<T>,
    observer: Box<dyn PipelineObserver>,
}

impl Pipeline<HttpTransport> {
    /// Validate the configuration and build the HTTP client.
    pub fn new(config: SyncConfig) -> Result<Self, SetupError> {
        config.validate()?;
        let client = RemoteClient::connect(config.client_settings(), &config.transport_settings())
            .map_err(SetupError::Client)?;
        Ok(Self::assemble(config, client))
    }
}

impl<T: Transport> Pipeline<T> {
    /// Pipeline over a caller-supplied transport.
    pub fn with_transport(config: SyncConfig, transport: T) -> Result<Self, SetupError> {
        config.validate()?;
        let client = RemoteClient::with_transport(transport, config.client_settings());
        Ok(Self::assemble(config, client))
    }

    fn assemble(config: SyncConfig, client: RemoteClient<T>) -> Self {
        Self {
            config,
            client,
            observer: Box::new(LogObserver),
        }
    }

    pub fn with_observer(mut self, observer: impl PipelineObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Execute one run.
    pub fn run(&self, cancel: &AtomicBool) -> Result<RunOutcome, PipelineFailure> {
        let mut run = Run {
            state: PipelineState::Idle,
            observer: self.observer.as_ref(),
            cancel,
        };

        let catalog = run.stage(Stage::LoadingCatalog, || {
            Ok(Catalog::load(&self.config.catalog.path)?)
        })?;
        info!(identifiers = catalog.len(), digest = catalog.digest(), "catalog loaded");

        let fetched = run.stage(Stage::Fetching, || self.fetch(&catalog))?;
        let parsed = run.stage(Stage::Parsing, || self.parse(fetched.batches))?;
        let report = run.stage(Stage::Reconciling, || {
            Ok(self.reconcile(&catalog, parsed, fetched.warnings))
        })?;
        for warning in &report.warnings {
            self.observer.on_warning(warning);
        }

        let output = self.config.output.path.clone();
        if let Err(failure) = run.stage(Stage::Writing, || Ok(write_report(&report, &output)?)) {
            return Err(failure.with_report(report));
        }
        run.advance(PipelineState::Done)
            .map_err(|source| run.fail(source))?;

        Ok(RunOutcome {
            report,
            output,
            archived: fetched.archived,
        })
    }

    fn fetch(&self, catalog: &Catalog) -> Result<Fetched, StageError> {
        let remote = &self.config.remote;
        let requests = plan_batches(
            catalog.isins(),
            remote.request_block_size,
            &self.config.request_template(),
        );
        let total = requests.len();
        let completed = AtomicUsize::new(0);
        let responses =
            self.client
                .fetch_batches(&requests, remote.max_concurrent_requests, |response| {
                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    self.observer.on_batch_fetched(response, done, total);
                });

        let archive = self.config.output.backup_dir.as_ref().map(|dir| {
            ResponseArchive::new(
                dir,
                remote.environment,
                &remote.data_supplier,
                Local::now().naive_local(),
            )
        });

        let mut fetched = Fetched::default();
        for response in responses {
            let batch = response.batch_index;
            let body = match response.result {
                Ok(body) => body,
                Err(source) if !self.config.output.allow_partial => {
                    return Err(StageError::BatchFetch { batch, source });
                }
                Err(source) => {
                    fetched.batches.push(FetchedBatch {
                        batch,
                        body: Err(BatchFailure {
                            batch,
                            stage: FailureStage::Fetch,
                            isins: response.isins,
                            reason: source.to_string(),
                        }),
                    });
                    continue;
                }
            };
            if let Some(archive) = &archive {
                match archive.save(MODE_SHARECLASS, batch, &body) {
                    Ok(path) => fetched.archived.push(path),
                    Err(e) => fetched.warnings.push(RunWarning::Archive {
                        batch,
                        message: e.to_string(),
                    }),
                }
            }
            fetched.batches.push(FetchedBatch {
                batch,
                body: Ok((response.isins, body)),
            });
        }
        Ok(fetched)
    }

    fn parse(&self, batches: Vec<FetchedBatch>) -> Result<Vec<ParsedBatch>, StageError> {
        let decoded: Vec<_> = batches
            .into_par_iter()
            .map(|fetched| {
                let outcome = fetched.body.map(|(isins, body)| {
                    let parsed = parse::parse(&body).and_then(|records| records.collect_all());
                    (isins, parsed)
                });
                (fetched.batch, outcome)
            })
            .collect();

        let mut parsed = Vec::with_capacity(decoded.len());
        for (batch, outcome) in decoded {
            let outcome = match outcome {
                Err(failure) => Err(failure),
                Ok((_, Ok(response))) => Ok(response),
                Ok((_, Err(source))) if !self.config.output.allow_partial => {
                    return Err(StageError::BatchParse { batch, source });
                }
                Ok((isins, Err(source))) => Err(BatchFailure {
                    batch,
                    stage: FailureStage::Parse,
                    isins,
                    reason: source.to_string(),
                }),
            };
            parsed.push(ParsedBatch { batch, outcome });
        }
        Ok(parsed)
    }

    fn reconcile(
        &self,
        catalog: &Catalog,
        parsed: Vec<ParsedBatch>,
        warnings: Vec<RunWarning>,
    ) -> RunReport {
        let mut metadata = RunMetadata::new(catalog.digest(), self.config.remote.content_date);
        let mut reconciler = Reconciler::new(catalog);
        for warning in warnings {
            reconciler.warn(warning);
        }

        for ParsedBatch { batch, outcome } in parsed {
            match outcome {
                Ok(response) => {
                    if metadata.reported_content_date.is_none() {
                        metadata.reported_content_date = response.content_date;
                    }
                    for warning in response.warnings {
                        reconciler.warn(RunWarning::Parse { batch, warning });
                    }
                    reconciler.absorb(batch, response.records);
                }
                Err(failure) => {
                    warn!(event = "batch.skipped", %failure);
                    reconciler.fail_batch(failure);
                }
            }
        }
        reconciler.finish(metadata)
    }
}

// ── Run bookkeeping ─────────────────────────────────────────────────

#[derive(Default)]
struct Fetched {
    batches: Vec<FetchedBatch>,
    archived: Vec<PathBuf>,
    warnings: Vec<RunWarning>,
}

struct FetchedBatch {
    batch: usize,
    body: Result<(Vec<Isin>, Vec<u8>), BatchFailure>,
}

struct ParsedBatch {
    batch: usize,
    outcome: Result<ParsedResponse, BatchFailure>,
}

/// State of one in-progress run.
struct Run<'a> {
    state: PipelineState,
    observer: &'a dyn PipelineObserver,
    cancel: &'a AtomicBool,
}

impl Run<'_> {
    /// Enter `stage`, honour a pending cancellation, then do the work.
    fn stage<R>(
        &mut self,
        stage: Stage,
        work: impl FnOnce() -> Result<R, StageError>,
    ) -> Result<R, PipelineFailure> {
        self.advance(PipelineState::running(stage))
            .map_err(|source| self.fail(source))?;
        if self.cancel.load(Ordering::Relaxed) {
            return Err(self.fail(StageError::Cancelled));
        }
        work().map_err(|source| self.fail(source))
    }

    fn advance(&mut self, to: PipelineState) -> Result<(), StageError> {
        let next = self.state.transition(to)?;
        self.observer.on_transition(self.state, next);
        self.state = next;
        Ok(())
    }

    fn fail(&mut self, source: StageError) -> PipelineFailure {
        let stage = self.state.stage().unwrap_or(Stage::LoadingCatalog);
        if let Some(failed) = self.state.failure() {
            self.observer.on_transition(self.state, failed);
            self.state = failed;
        }
        let failure = PipelineFailure {
            stage,
            last_completed: stage.previous(),
            source,
            report: None,
        };
        self.observer.on_failed(&failure);
        failure
    }
}
