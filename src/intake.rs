//! Intake controller: one upload in flight at a time.
//!
//! ```text
//! submit ─▶ validate ─┬─ fail ─▶ Failed
//!                     └─ pass ─▶ Reading ─▶ Decoding ─▶ Analyzing ─┬─▶ Ready
//!                                   │           │                  └─▶ AnalysisFailed
//!                                   └───────────┴─ fail ─▶ Failed
//! ```
//!
//! Each submission gets a new generation number. Work left over from an older
//! generation is aborted, and any result it still manages to report is
//! dropped because its generation no longer matches. `Failed` discards
//! everything about the candidate; `AnalysisFailed` keeps the file details
//! and preview.
//!
//! The state lives behind a mutex that is never held across an `.await`.
//! Every change is published on a `watch` channel as an [`IntakeSnapshot`].

use std::fmt;
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::analysis::{AnalysisError, ImageDescriber};
use crate::encode::{read_data_uri, DataUri};
use crate::error::IntakeError;
use crate::metadata::{probe_dimensions, FileDetails};
use crate::validate::UploadLimits;

pub const DEFAULT_ANALYSIS_TIMEOUT: Duration = Duration::from_secs(60);

/// A file handed over by the picker or a drop, before it is accepted.
pub struct UploadCandidate {
    pub name: String,
    pub mime: String,
    pub declared_len: u64,
    source: Box<dyn AsyncRead + Send + Unpin>,
}

impl UploadCandidate {
    pub fn new(
        name: impl Into<String>,
        mime: impl Into<String>,
        declared_len: u64,
        source: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            declared_len,
            source: Box::new(source),
        }
    }

    /// Candidate over bytes already in memory.
    pub fn from_bytes(name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        let len = bytes.len() as u64;
        Self::new(name, mime, len, Cursor::new(bytes))
    }
}

impl fmt::Debug for UploadCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadCandidate")
            .field("name", &self.name)
            .field("mime", &self.mime)
            .field("declared_len", &self.declared_len)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IntakeState {
    Idle,
    /// Validation, read or decode failed. Nothing about the file is kept.
    Failed { message: String },
    Reading { name: String, mime: String, size: u64 },
    Decoding { name: String, mime: String, size: u64, preview: DataUri },
    Analyzing { details: FileDetails, preview: DataUri },
    Ready { details: FileDetails, preview: DataUri, analysis: String },
    AnalysisFailed { details: FileDetails, preview: DataUri, message: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Failed,
    Reading,
    Decoding,
    Analyzing,
    Ready,
    ReadyWithError,
}

impl IntakeState {
    pub fn phase(&self) -> Phase {
        match self {
            IntakeState::Idle => Phase::Idle,
            IntakeState::Failed { .. } => Phase::Failed,
            IntakeState::Reading { .. } => Phase::Reading,
            IntakeState::Decoding { .. } => Phase::Decoding,
            IntakeState::Analyzing { .. } => Phase::Analyzing,
            IntakeState::Ready { .. } => Phase::Ready,
            IntakeState::AnalysisFailed { .. } => Phase::ReadyWithError,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            IntakeState::Reading { .. } | IntakeState::Decoding { .. } | IntakeState::Analyzing { .. }
        )
    }

    fn snapshot(&self, generation: u64) -> IntakeSnapshot {
        let mut snap = IntakeSnapshot {
            generation,
            phase: self.phase(),
            is_processing: self.is_in_flight(),
            ..IntakeSnapshot::default()
        };
        match self {
            IntakeState::Idle | IntakeState::Reading { .. } => {}
            IntakeState::Failed { message } => snap.error = Some(message.clone()),
            IntakeState::Decoding { preview, .. } => snap.preview = Some(preview.clone()),
            IntakeState::Analyzing { details, preview } => {
                snap.file_details = Some(details.clone());
                snap.preview = Some(preview.clone());
                snap.is_analyzing = true;
            }
            IntakeState::Ready {
                details,
                preview,
                analysis,
            } => {
                snap.file_details = Some(details.clone());
                snap.preview = Some(preview.clone());
                snap.analysis = Some(analysis.clone());
            }
            IntakeState::AnalysisFailed {
                details,
                preview,
                message,
            } => {
                snap.file_details = Some(details.clone());
                snap.preview = Some(preview.clone());
                snap.error = Some(message.clone());
            }
        }
        snap
    }
}

/// What the presentation layer sees. The preview is not serialized; HTTP
/// clients fetch it separately.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntakeSnapshot {
    pub generation: u64,
    pub phase: Phase,
    pub file_details: Option<FileDetails>,
    pub analysis: Option<String>,
    pub error: Option<String>,
    pub is_processing: bool,
    pub is_analyzing: bool,
    #[serde(skip)]
    pub preview: Option<DataUri>,
}

#[derive(Debug, Clone)]
pub struct IntakeSettings {
    pub limits: UploadLimits,
    /// `None` waits on the model indefinitely.
    pub analysis_timeout: Option<Duration>,
}

impl Default for IntakeSettings {
    fn default() -> Self {
        Self {
            limits: UploadLimits::default(),
            analysis_timeout: Some(DEFAULT_ANALYSIS_TIMEOUT),
        }
    }
}

/// Handle on one accepted or rejected upload.
#[derive(Debug)]
pub struct Submission {
    pub generation: u64,
    task: Option<JoinHandle<()>>,
}

impl Submission {
    /// True when validation rejected the candidate outright.
    pub fn is_rejected(&self) -> bool {
        self.task.is_none()
    }

    /// Wait until this candidate's work has finished or been superseded.
    pub async fn settled(self) {
        let Some(task) = self.task else { return };
        if let Err(err) = task.await {
            if err.is_panic() {
                error!(generation = self.generation, "intake task panicked");
            }
        }
    }
}

#[derive(Clone)]
pub struct IntakeController {
    shared: Arc<Shared>,
}

struct Shared {
    describer: Arc<dyn ImageDescriber>,
    settings: IntakeSettings,
    inner: Mutex<Inner>,
    events: watch::Sender<IntakeSnapshot>,
}

struct Inner {
    generation: u64,
    state: IntakeState,
    task: Option<AbortHandle>,
}

impl IntakeController {
    pub fn new(describer: Arc<dyn ImageDescriber>, settings: IntakeSettings) -> Self {
        let (events, _) = watch::channel(IntakeSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                describer,
                settings,
                inner: Mutex::new(Inner {
                    generation: 0,
                    state: IntakeState::Idle,
                    task: None,
                }),
                events,
            }),
        }
    }

    pub fn settings(&self) -> &IntakeSettings {
        &self.shared.settings
    }

    pub fn model_name(&self) -> &str {
        self.shared.describer.model_name()
    }

    /// Make `candidate` the current upload, superseding whatever came before.
    ///
    /// Validation happens before this returns, so a rejection is already
    /// visible in [`snapshot`](Self::snapshot). Accepted candidates continue
    /// on a spawned task; must be called from within a tokio runtime.
    pub fn submit(&self, candidate: UploadCandidate) -> Submission {
        let mut inner = self.shared.lock();
        let generation = inner.supersede();
        info!(
            generation,
            name = %candidate.name,
            mime = %candidate.mime,
            bytes = candidate.declared_len,
            "upload received"
        );

        if let Err(err) = self
            .shared
            .settings
            .limits
            .check(&candidate.mime, candidate.declared_len)
        {
            warn!(generation, error = %err, "upload rejected");
            self.shared.publish(
                &mut inner,
                IntakeState::Failed {
                    message: err.user_message(),
                },
            );
            return Submission {
                generation,
                task: None,
            };
        }

        self.shared.publish(
            &mut inner,
            IntakeState::Reading {
                name: candidate.name.clone(),
                mime: candidate.mime.clone(),
                size: candidate.declared_len,
            },
        );
        let task = tokio::spawn(process(Arc::clone(&self.shared), generation, candidate));
        inner.task = Some(task.abort_handle());

        Submission {
            generation,
            task: Some(task),
        }
    }

    /// Clear everything and go back to idle. Work still in flight is dropped.
    pub fn reset(&self) {
        let mut inner = self.shared.lock();
        let generation = inner.supersede();
        info!(generation, "intake reset");
        self.shared.publish(&mut inner, IntakeState::Idle);
    }

    pub fn state(&self) -> IntakeState {
        self.shared.lock().state.clone()
    }

    pub fn snapshot(&self) -> IntakeSnapshot {
        self.shared.events.borrow().clone()
    }

    /// Receiver that sees every published snapshot, starting with the current one.
    pub fn subscribe(&self) -> watch::Receiver<IntakeSnapshot> {
        self.shared.events.subscribe()
    }
}

impl Inner {
    /// Start a new generation and abort the previous one's task.
    fn supersede(&mut self) -> u64 {
        self.generation += 1;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &mut Inner, state: IntakeState) {
        inner.state = state;
        self.events
            .send_replace(inner.state.snapshot(inner.generation));
    }

    /// Move `generation` to `next`. Returns false, changing nothing, when a
    /// newer submission has taken over.
    fn advance(&self, generation: u64, next: IntakeState) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            debug!(
                generation,
                current = inner.generation,
                phase = ?next.phase(),
                "dropping superseded result"
            );
            return false;
        }
        self.publish(&mut inner, next);
        true
    }

    /// Record the first failure for `generation`. Analysis failures keep the
    /// file details; earlier failures drop everything.
    fn fail(&self, generation: u64, err: IntakeError) {
        let mut inner = self.lock();
        if inner.generation != generation {
            debug!(generation, current = inner.generation, error = %err, "dropping superseded failure");
            return;
        }
        if !inner.state.is_in_flight() {
            return;
        }

        let message = err.user_message();
        let next = match &inner.state {
            IntakeState::Analyzing { details, preview } if err.is_analysis() => {
                IntakeState::AnalysisFailed {
                    details: details.clone(),
                    preview: preview.clone(),
                    message,
                }
            }
            _ => IntakeState::Failed { message },
        };
        self.publish(&mut inner, next);
    }

    async fn describe(&self, preview: &DataUri) -> Result<String, AnalysisError> {
        let call = self.describer.describe(preview);
        let text = match self.settings.analysis_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| AnalysisError::Timeout(limit))??,
            None => call.await?,
        };
        if text.trim().is_empty() {
            return Err(AnalysisError::Empty);
        }
        Ok(text)
    }
}

/// Reading, decoding and analysis for one accepted candidate.
async fn process(shared: Arc<Shared>, generation: u64, candidate: UploadCandidate) {
    let UploadCandidate {
        name,
        mime,
        declared_len,
        source,
    } = candidate;

    let preview = match read_data_uri(source, &mime, declared_len).await {
        Ok(preview) => preview,
        Err(err) => {
            warn!(generation, error = %err, "could not read upload");
            return shared.fail(generation, err);
        }
    };
    let decoding = IntakeState::Decoding {
        name: name.clone(),
        mime: mime.clone(),
        size: declared_len,
        preview: preview.clone(),
    };
    if !shared.advance(generation, decoding) {
        return;
    }

    let dimensions = match probe_dimensions(&preview).await {
        Ok(dimensions) => dimensions,
        Err(err) => {
            warn!(generation, error = %err, "could not decode upload");
            return shared.fail(generation, err);
        }
    };
    let details = FileDetails::new(&name, declared_len, &mime, dimensions);
    debug!(generation, dimensions = %details.dimensions, size = %details.size, "file details ready");
    let analyzing = IntakeState::Analyzing {
        details: details.clone(),
        preview: preview.clone(),
    };
    if !shared.advance(generation, analyzing) {
        return;
    }

    match shared.describe(&preview).await {
        Ok(analysis) => {
            info!(generation, chars = analysis.len(), "analysis complete");
            shared.advance(
                generation,
                IntakeState::Ready {
                    details,
                    preview,
                    analysis,
                },
            );
        }
        Err(err) => {
            warn!(generation, error = %err, "analysis failed");
            shared.fail(generation, err.into());
        }
    }
}
