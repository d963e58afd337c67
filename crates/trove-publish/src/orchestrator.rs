//! The capture → model → upload → publish pipeline driver.
//!
//! [`PublishingOrchestrator`] owns one seller-facing publishing session at a
//! time. Callers await [`PublishingOrchestrator::start`] (and the stage-scoped
//! retry entry points) while observing live session snapshots through
//! [`PublishingOrchestrator::updates`]. Cancellation is generation-based: the
//! user-facing `cancel`/`reset` calls bump a generation counter, the in-flight
//! stage future observes the bump and stops, and any straggling session writes
//! from the old generation are dropped.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::{info, warn};
use trove_api::{
    idempotency_key, ApiClient, FileRole, ImageKind, ProductPublishRequest, ProductResponse,
    RequestOptions,
};

use crate::engine::{CapturedInput, EngineError, ReconstructedModel, ReconstructionEngine};
use crate::error::{PublishError, Result};
use crate::session::{
    modeling_caption, overall_from_modeling, overall_from_upload, PublishSession, Stage,
    MODELING_SPAN,
};
use crate::upload::{
    FileDescriptor, ImageDescriptor, UploadEvent, UploadOrchestrator, UploadPlan, UploadState,
};

// ============================================================================
// Listing Draft
// ============================================================================

/// The seller-entered listing details, held outside the pipeline session so
/// a cancelled capture does not wipe the form.
#[derive(Debug, Clone)]
pub struct ListingDraft {
    /// Listing title.
    pub title: String,
    /// Optional listing description.
    pub description: Option<String>,
    /// Asking price in cents.
    pub price_cents: i64,
    /// Optional pre-rendered thumbnail to upload alongside the model.
    pub thumbnail_path: Option<PathBuf>,
}

/// Snapshot broadcast to observers after every session mutation.
#[derive(Debug, Clone)]
pub struct SessionUpdate {
    /// Stage at the time of the update.
    pub stage: Stage,
    /// Overall progress in `[0, 1]`.
    pub progress: f64,
    /// Caption for the current activity.
    pub status_text: String,
}

impl From<&PublishSession> for SessionUpdate {
    fn from(session: &PublishSession) -> Self {
        Self {
            stage: session.stage,
            progress: session.progress,
            status_text: session.status_text.clone(),
        }
    }
}

// ============================================================================
// Publishing Orchestrator
// ============================================================================

/// Drives one publishing session through its stages.
pub struct PublishingOrchestrator {
    api: Arc<ApiClient>,
    engine: Arc<dyn ReconstructionEngine>,
    uploader: UploadOrchestrator,
    session: Mutex<PublishSession>,
    upload_state: Mutex<UploadState>,
    listing: Mutex<Option<ListingDraft>>,
    /// Idempotency key for the publish call, minted on first use and replayed
    /// by every retried publish of this session.
    publish_key: Mutex<Option<String>>,
    /// Session generation. Bumped by `cancel`/`reset`; stage futures carry
    /// the generation they started under and stop mutating once it moves.
    cancel_tx: watch::Sender<u64>,
    updates_tx: broadcast::Sender<SessionUpdate>,
}

impl PublishingOrchestrator {
    /// Creates an orchestrator over the given executor and engine.
    #[must_use]
    pub fn new(api: Arc<ApiClient>, engine: Arc<dyn ReconstructionEngine>) -> Self {
        let (cancel_tx, _) = watch::channel(0);
        let (updates_tx, _) = broadcast::channel(64);
        Self {
            uploader: UploadOrchestrator::new(Arc::clone(&api)),
            api,
            engine,
            session: Mutex::new(PublishSession::new()),
            upload_state: Mutex::default(),
            listing: Mutex::new(None),
            publish_key: Mutex::new(None),
            cancel_tx,
            updates_tx,
        }
    }

    /// Stores the listing details the eventual publish call will use.
    pub async fn set_listing(&self, listing: ListingDraft) {
        *self.listing.lock().await = Some(listing);
    }

    /// Current session snapshot.
    pub async fn session(&self) -> PublishSession {
        self.session.lock().await.clone()
    }

    /// Subscribes to session updates.
    #[must_use]
    pub fn updates(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates_tx.subscribe()
    }

    // ========================================================================
    // Entry Points
    // ========================================================================

    /// Runs a full publishing session: capture, then modeling, then the
    /// upload/publish leg. Resolves when the listing is published, a stage
    /// lands in its errored sub-state, or the session is cancelled.
    pub async fn start(&self) -> Result<()> {
        let generation = *self.cancel_tx.borrow();
        {
            let session = self.session.lock().await;
            if !matches!(session.stage, Stage::Draft { published: false }) {
                return Err(PublishError::InvalidTransition {
                    stage: session.stage.name(),
                    action: "start capture",
                });
            }
        }

        self.with_session(generation, |s| {
            s.enter_stage(Stage::Capturing);
            s.status_text = "Capturing object".to_string();
            s.last_error = None;
        })
        .await;

        let input = match self.run_capture().await {
            Ok(input) => input,
            Err(PublishError::Cancelled) => return Err(PublishError::Cancelled),
            Err(err) => {
                warn!(error = %err, "capture failed");
                self.with_session(generation, |s| {
                    s.enter_stage(Stage::Draft { published: false });
                    s.status_text = err.to_string();
                    s.last_error = Some(err.clone());
                })
                .await;
                return Err(err);
            }
        };
        self.with_session(generation, |s| s.captured_input = Some(input.clone()))
            .await;

        self.run_modeling_chain(generation, input).await
    }

    /// Re-runs reconstruction over the already-captured input. Only legal
    /// from the modeling errored sub-state.
    pub async fn retry_modeling(&self) -> Result<()> {
        let generation = *self.cancel_tx.borrow();
        let input = {
            let session = self.session.lock().await;
            if !matches!(session.stage, Stage::Modeling { errored: true }) {
                return Err(PublishError::InvalidTransition {
                    stage: session.stage.name(),
                    action: "retry modeling",
                });
            }
            session.captured_input.clone()
        };
        let Some(input) = input else {
            return Err(PublishError::InvalidTransition {
                stage: "modeling (errored)",
                action: "retry modeling without captured input",
            });
        };
        self.run_modeling_chain(generation, input).await
    }

    /// Re-runs the upload/publish leg over the already-built model, resuming
    /// the upload transaction where the failed attempt left off. Only legal
    /// from the uploading errored sub-state.
    pub async fn retry_upload(&self) -> Result<()> {
        let generation = *self.cancel_tx.borrow();
        let model = {
            let session = self.session.lock().await;
            if !matches!(session.stage, Stage::Uploading { errored: true }) {
                return Err(PublishError::InvalidTransition {
                    stage: session.stage.name(),
                    action: "retry upload",
                });
            }
            session.model.clone()
        };
        let Some(model) = model else {
            return Err(PublishError::InvalidTransition {
                stage: "uploading (errored)",
                action: "retry upload without a model",
            });
        };
        self.run_upload_chain(generation, model).await
    }

    /// Discards the session mid-capture or mid-modeling. The in-flight stage
    /// future resolves with [`PublishError::Cancelled`].
    pub async fn cancel(&self) -> Result<()> {
        let stage = self.session.lock().await.stage;
        if !stage.can_cancel() {
            return Err(PublishError::InvalidTransition {
                stage: stage.name(),
                action: "cancel",
            });
        }
        info!(stage = stage.name(), "publishing session cancelled");
        self.discard().await;
        Ok(())
    }

    /// Returns the session to a fresh draft. Rejected while an upload attempt
    /// is actively running; the attempt must reach success or the errored
    /// sub-state first.
    pub async fn reset(&self) -> Result<()> {
        let stage = self.session.lock().await.stage;
        if matches!(stage, Stage::Uploading { errored: false }) {
            return Err(PublishError::InvalidTransition {
                stage: stage.name(),
                action: "reset",
            });
        }
        self.discard().await;
        Ok(())
    }

    // ========================================================================
    // Stage Drivers
    // ========================================================================

    async fn run_capture(&self) -> Result<CapturedInput> {
        let mut cancel_rx = self.cancel_tx.subscribe();
        let capture = self.engine.capture();
        tokio::pin!(capture);
        tokio::select! {
            result = &mut capture => result.map_err(engine_failure),
            _ = cancel_rx.changed() => Err(PublishError::Cancelled),
        }
    }

    async fn run_modeling_chain(&self, generation: u64, input: CapturedInput) -> Result<()> {
        self.ensure_current(generation)?;
        self.with_session(generation, |s| {
            s.enter_stage(Stage::Modeling { errored: false });
            s.status_text = modeling_caption(0.0).to_string();
            s.last_error = None;
        })
        .await;

        let model = match self.run_reconstruction(generation, &input).await {
            Ok(model) => model,
            Err(PublishError::Cancelled) => return Err(PublishError::Cancelled),
            Err(err) => {
                warn!(error = %err, "modeling failed");
                self.with_session(generation, |s| s.fail(err.clone())).await;
                return Err(err);
            }
        };
        info!(model = %model.model_path.display(), "reconstruction complete");
        self.with_session(generation, |s| {
            s.model = Some(model.clone());
            s.advance_progress(MODELING_SPAN);
            s.status_text = "Model ready".to_string();
        })
        .await;

        self.run_upload_chain(generation, model).await
    }

    async fn run_reconstruction(
        &self,
        generation: u64,
        input: &CapturedInput,
    ) -> Result<ReconstructedModel> {
        let (progress_tx, mut progress_rx) = mpsc::channel(16);
        let mut cancel_rx = self.cancel_tx.subscribe();
        let reconstruct = self.engine.reconstruct(input, progress_tx);
        tokio::pin!(reconstruct);
        loop {
            tokio::select! {
                result = &mut reconstruct => return result.map_err(engine_failure),
                Some(fraction) = progress_rx.recv() => {
                    self.with_session(generation, |s| {
                        s.advance_progress(overall_from_modeling(fraction));
                        s.status_text = modeling_caption(fraction).to_string();
                    })
                    .await;
                }
                _ = cancel_rx.changed() => return Err(PublishError::Cancelled),
            }
        }
    }

    async fn run_upload_chain(&self, generation: u64, model: ReconstructedModel) -> Result<()> {
        self.ensure_current(generation)?;
        self.with_session(generation, |s| {
            s.enter_stage(Stage::Uploading { errored: false });
            s.status_text = "Preparing upload".to_string();
            s.last_error = None;
        })
        .await;

        let listing = self.listing.lock().await.clone();
        let Some(listing) = listing else {
            let err = PublishError::ValidationFailure("listing details missing".to_string());
            self.with_session(generation, |s| s.fail(err.clone())).await;
            return Err(err);
        };

        let plan = match self.build_plan(&model, &listing).await {
            Ok(plan) => plan,
            Err(err) => {
                self.with_session(generation, |s| s.fail(err.clone())).await;
                return Err(err);
            }
        };

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let sink = move |event: UploadEvent| {
            let _ = event_tx.send(event);
        };

        self.ensure_current(generation)?;
        let result = {
            let mut state = self.upload_state.lock().await;
            let upload = self.uploader.run(&plan, &mut state, &sink);
            tokio::pin!(upload);
            loop {
                tokio::select! {
                    result = &mut upload => break result,
                    Some(event) = event_rx.recv() => self.apply_upload_event(generation, event).await,
                }
            }
        };
        // Apply events the attempt emitted after its last await point.
        while let Ok(event) = event_rx.try_recv() {
            self.apply_upload_event(generation, event).await;
        }

        let asset_id = match result {
            Ok(asset_id) => asset_id,
            Err(err) => {
                warn!(error = %err, "upload attempt failed");
                self.with_session(generation, |s| s.fail(err.clone())).await;
                return Err(err);
            }
        };

        self.publish(generation, &asset_id, &listing).await
    }

    async fn publish(&self, generation: u64, asset_id: &str, listing: &ListingDraft) -> Result<()> {
        self.ensure_current(generation)?;
        self.with_session(generation, |s| {
            s.status_text = "Publishing listing".to_string();
        })
        .await;

        let key = {
            let mut slot = self.publish_key.lock().await;
            slot.get_or_insert_with(idempotency_key).clone()
        };
        let request = ProductPublishRequest {
            asset_id: asset_id.to_string(),
            title: listing.title.clone(),
            description: listing.description.clone(),
            price_cents: listing.price_cents,
        };
        match self
            .api
            .post::<_, ProductResponse>("/products/publish", &request, RequestOptions::idempotent(key))
            .await
        {
            Ok(product) => {
                info!(product_id = %product.id, "listing published");
                self.with_session(generation, |s| {
                    s.stage = Stage::Draft { published: true };
                    s.progress = 1.0;
                    s.status_text = "Listing published".to_string();
                })
                .await;
                Ok(())
            }
            Err(err) => {
                let err = PublishError::from(err);
                warn!(error = %err, "publish failed");
                self.with_session(generation, |s| s.fail(err.clone())).await;
                Err(err)
            }
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn build_plan(
        &self,
        model: &ReconstructedModel,
        listing: &ListingDraft,
    ) -> Result<UploadPlan> {
        let file = FileDescriptor::from_path(FileRole::ModelUsdz, &model.model_path).await?;
        let mut images = Vec::new();
        if let Some(path) = &listing.thumbnail_path {
            images.push(ImageDescriptor::from_path(ImageKind::Thumbnail, 0, path).await?);
        }
        let dims_source = if model.dimensions.is_some() {
            "reconstruction"
        } else {
            "unknown"
        };
        Ok(UploadPlan {
            dims_source: dims_source.to_string(),
            dimensions: model.dimensions,
            files: vec![file],
            images,
        })
    }

    async fn apply_upload_event(&self, generation: u64, event: UploadEvent) {
        match event {
            UploadEvent::AssetAllocated { asset_id } => {
                self.with_session(generation, |s| s.uploaded_asset_id = Some(asset_id))
                    .await;
            }
            UploadEvent::Progress { fraction, status } => {
                self.with_session(generation, |s| {
                    s.advance_progress(overall_from_upload(fraction));
                    s.status_text = status.to_string();
                })
                .await;
            }
        }
    }

    /// Errors with [`PublishError::Cancelled`] if the session generation has
    /// moved on since `generation` was taken. Stage drivers call this at every
    /// boundary so a cancel that lands between stages stops the flow instead
    /// of only muting its snapshot writes.
    fn ensure_current(&self, generation: u64) -> Result<()> {
        if *self.cancel_tx.borrow() == generation {
            Ok(())
        } else {
            Err(PublishError::Cancelled)
        }
    }

    /// Mutates the session and broadcasts the new snapshot, unless the
    /// session generation has moved on since `generation` was taken.
    ///
    /// The generation is checked *under* the session lock: `discard` bumps
    /// the generation before it takes the lock to reset the session, so a
    /// writer that raced past an earlier check still observes the bump here
    /// and drops its stale mutation.
    async fn with_session(&self, generation: u64, apply: impl FnOnce(&mut PublishSession)) {
        let mut session = self.session.lock().await;
        if *self.cancel_tx.borrow() != generation {
            return;
        }
        apply(&mut session);
        let _ = self.updates_tx.send(SessionUpdate::from(&*session));
    }

    /// Invalidates the running generation, then replaces all session state
    /// with a fresh draft.
    async fn discard(&self) {
        self.cancel_tx.send_modify(|generation| *generation += 1);
        *self.upload_state.lock().await = UploadState::default();
        *self.publish_key.lock().await = None;
        let mut session = self.session.lock().await;
        *session = PublishSession::new();
        let _ = self.updates_tx.send(SessionUpdate::from(&*session));
    }
}

impl std::fmt::Debug for PublishingOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishingOrchestrator")
            .field("api", &self.api)
            .finish_non_exhaustive()
    }
}

fn engine_failure(err: EngineError) -> PublishError {
    match err {
        EngineError::InputNotFound(detail) | EngineError::SessionFailed(detail) => {
            PublishError::ValidationFailure(detail)
        }
        err @ EngineError::InsufficientFrames { .. } => {
            PublishError::ValidationFailure(err.to_string())
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
