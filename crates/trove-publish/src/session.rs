//! Publishing session state: the stage machine, overall-progress mapping,
//! and status captions shown while a stage runs.

use crate::engine::{CapturedInput, ReconstructedModel};
use crate::error::PublishError;

// ============================================================================
// Stage Machine
// ============================================================================

/// The stage a publishing session is in.
///
/// A session starts in `Draft { published: false }`, walks through
/// `Capturing`, `Modeling`, and `Uploading`, and on success lands back in
/// `Draft { published: true }`. Modeling and uploading carry an errored
/// sub-state so a failed attempt can be retried in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Idle. `published` distinguishes a fresh session from a finished one.
    Draft {
        /// Whether this session already published a listing.
        published: bool,
    },
    /// The interactive capture flow is running.
    Capturing,
    /// Reconstruction is running (or failed, when `errored`).
    Modeling {
        /// A reconstruction attempt ended in error.
        errored: bool,
    },
    /// The upload/publish leg is running (or failed, when `errored`).
    Uploading {
        /// An upload or publish attempt ended in error.
        errored: bool,
    },
}

impl Stage {
    /// Short name for error messages and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Draft { published: false } => "draft",
            Self::Draft { published: true } => "published",
            Self::Capturing => "capturing",
            Self::Modeling { errored: false } => "modeling",
            Self::Modeling { errored: true } => "modeling (errored)",
            Self::Uploading { errored: false } => "uploading",
            Self::Uploading { errored: true } => "uploading (errored)",
        }
    }

    /// Whether this stage is in an errored sub-state.
    #[must_use]
    pub const fn is_errored(self) -> bool {
        matches!(
            self,
            Self::Modeling { errored: true } | Self::Uploading { errored: true }
        )
    }

    /// Whether the user may cancel and discard the session from this stage.
    ///
    /// Uploading is deliberately excluded: discarding mid-transfer would
    /// orphan a partially verified asset server-side, so an upload attempt
    /// must first reach success or an errored sub-state.
    #[must_use]
    pub const fn can_cancel(self) -> bool {
        matches!(self, Self::Capturing | Self::Modeling { .. })
    }

    /// The overall-progress floor for this stage. Progress resets here when
    /// the stage is entered or retried.
    #[must_use]
    pub const fn progress_floor(self) -> f64 {
        match self {
            Self::Uploading { .. } => MODELING_SPAN,
            Self::Draft { .. } | Self::Capturing | Self::Modeling { .. } => 0.0,
        }
    }
}

// ============================================================================
// Progress Mapping
// ============================================================================

/// Fraction of overall progress occupied by the modeling stage. The upload
/// leg maps into the remainder.
pub const MODELING_SPAN: f64 = 0.7;

/// Maps a modeling-stage fraction into overall session progress.
#[must_use]
pub fn overall_from_modeling(fraction: f64) -> f64 {
    fraction.clamp(0.0, 1.0) * MODELING_SPAN
}

/// Maps an upload-stage fraction into overall session progress.
#[must_use]
pub fn overall_from_upload(fraction: f64) -> f64 {
    MODELING_SPAN + fraction.clamp(0.0, 1.0) * (1.0 - MODELING_SPAN)
}

/// Status caption for a modeling-stage fraction.
#[must_use]
pub fn modeling_caption(fraction: f64) -> &'static str {
    if fraction < 0.4 {
        "Analyzing object features"
    } else if fraction < 0.7 {
        "Shaping geometry"
    } else {
        "Applying textures"
    }
}

// ============================================================================
// Session Snapshot
// ============================================================================

/// Observable state of one publishing session.
///
/// Overall progress is monotonic within a stage: updates only ever raise it,
/// and entering (or retrying) a stage resets it to that stage's floor.
#[derive(Debug, Clone)]
pub struct PublishSession {
    /// Current stage.
    pub stage: Stage,
    /// Overall progress in `[0, 1]`.
    pub progress: f64,
    /// Human-readable caption for the current activity.
    pub status_text: String,
    /// Capture output, kept so modeling can be retried without re-capturing.
    pub captured_input: Option<CapturedInput>,
    /// Reconstruction output, kept so uploading can be retried.
    pub model: Option<ReconstructedModel>,
    /// Server asset id, set as soon as phase 1 of the upload allocates one.
    pub uploaded_asset_id: Option<String>,
    /// The error that put the session into an errored sub-state, if any.
    pub last_error: Option<PublishError>,
}

impl PublishSession {
    /// Fresh, idle session.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stage: Stage::Draft { published: false },
            progress: 0.0,
            status_text: "Ready".to_string(),
            captured_input: None,
            model: None,
            uploaded_asset_id: None,
            last_error: None,
        }
    }

    /// Enters a stage, resetting progress to the stage's floor.
    pub fn enter_stage(&mut self, stage: Stage) {
        self.stage = stage;
        self.progress = stage.progress_floor();
    }

    /// Raises overall progress. Values below the current progress (or above
    /// 1.0) are ignored, keeping the bar monotonic within a stage.
    pub fn advance_progress(&mut self, overall: f64) {
        self.progress = self.progress.max(overall.min(1.0));
    }

    /// Records a stage failure: stores the error, moves modeling or
    /// uploading into its errored sub-state, and surfaces the error text.
    pub fn fail(&mut self, err: PublishError) {
        self.stage = match self.stage {
            Stage::Modeling { .. } => Stage::Modeling { errored: true },
            Stage::Uploading { .. } => Stage::Uploading { errored: true },
            other => other,
        };
        self.status_text = err.to_string();
        self.last_error = Some(err);
    }
}

impl Default for PublishSession {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
