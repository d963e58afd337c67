//! Object-capture and 3D reconstruction abstraction.
//!
//! The pipeline never talks to camera or photogrammetry APIs directly; it
//! drives a [`ReconstructionEngine`]. Production builds plug in a platform
//! engine, while [`MockEngine`] provides a deterministic stand-in for
//! development and tests.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

// ============================================================================
// Types
// ============================================================================

/// Handle to a finalized set of captured frames, produced by a capture flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedInput {
    /// Directory holding the captured frames.
    pub frames_dir: PathBuf,
    /// Number of usable frames the capture produced.
    pub frame_count: usize,
}

/// Physical dimensions of the reconstructed object, in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelDimensions {
    /// Width in meters.
    pub width_m: f64,
    /// Height in meters.
    pub height_m: f64,
    /// Depth in meters.
    pub depth_m: f64,
}

/// Output of a successful reconstruction run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructedModel {
    /// Path to the generated model file on local disk.
    pub model_path: PathBuf,
    /// Measured dimensions, when the engine could derive them. Absence is
    /// not an error; the listing simply publishes without dimensions.
    pub dimensions: Option<ModelDimensions>,
}

/// Failures an engine can report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The captured input directory no longer exists.
    #[error("captured input not found: {0}")]
    InputNotFound(String),

    /// The capture did not produce enough usable frames to reconstruct.
    #[error("not enough usable frames ({found} of {minimum} required)")]
    InsufficientFrames {
        /// Frames actually present.
        found: usize,
        /// Frames the engine requires.
        minimum: usize,
    },

    /// The reconstruction session itself failed.
    #[error("reconstruction failed: {0}")]
    SessionFailed(String),
}

// ============================================================================
// Engine Trait
// ============================================================================

/// Platform seam for capture and reconstruction.
#[async_trait]
pub trait ReconstructionEngine: Send + Sync {
    /// Runs the interactive capture flow to completion and returns the
    /// finalized input. Resolves only once the user has finished capturing.
    async fn capture(&self) -> std::result::Result<CapturedInput, EngineError>;

    /// Reconstructs a model from captured input.
    ///
    /// Progress fractions in `[0, 1)` are reported on `progress` as the run
    /// advances. The final fraction is implied by the method resolving.
    async fn reconstruct(
        &self,
        input: &CapturedInput,
        progress: mpsc::Sender<f64>,
    ) -> std::result::Result<ReconstructedModel, EngineError>;
}

// ============================================================================
// Mock Engine
// ============================================================================

/// Staged progress fractions the mock reports during reconstruction.
const MOCK_PROGRESS_STEPS: [f64; 4] = [0.15, 0.35, 0.60, 0.85];

/// Size of the placeholder model file the mock writes.
const MOCK_MODEL_BYTES: usize = 4096;

/// Deterministic engine for development and tests.
///
/// `capture` resolves after one step delay with a synthetic input;
/// `reconstruct` walks the staged progress fractions and writes a small
/// placeholder model file.
#[derive(Debug, Clone)]
pub struct MockEngine {
    /// Frames the synthetic capture reports.
    pub frame_count: usize,
    /// Minimum frames reconstruction requires.
    pub minimum_frames: usize,
    /// Pause between staged progress reports. Set to zero in tests.
    pub step_delay: Duration,
    /// Directory the placeholder model file is written to.
    pub output_dir: PathBuf,
    /// Whether the mock reports measured dimensions.
    pub emit_dimensions: bool,
}

impl MockEngine {
    /// Creates a mock with comfortable interactive defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frame_count: 32,
            minimum_frames: 20,
            step_delay: Duration::from_millis(400),
            output_dir: std::env::temp_dir().join("trove-mock-engine"),
            emit_dimensions: true,
        }
    }

    /// Mock tuned for tests: no delays, writes under the given directory.
    #[must_use]
    pub fn instant(output_dir: PathBuf) -> Self {
        Self {
            step_delay: Duration::ZERO,
            output_dir,
            ..Self::new()
        }
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReconstructionEngine for MockEngine {
    async fn capture(&self) -> std::result::Result<CapturedInput, EngineError> {
        tokio::time::sleep(self.step_delay).await;
        Ok(CapturedInput {
            frames_dir: self.output_dir.join("frames"),
            frame_count: self.frame_count,
        })
    }

    async fn reconstruct(
        &self,
        input: &CapturedInput,
        progress: mpsc::Sender<f64>,
    ) -> std::result::Result<ReconstructedModel, EngineError> {
        if input.frame_count < self.minimum_frames {
            return Err(EngineError::InsufficientFrames {
                found: input.frame_count,
                minimum: self.minimum_frames,
            });
        }

        for fraction in MOCK_PROGRESS_STEPS {
            tokio::time::sleep(self.step_delay).await;
            let _ = progress.send(fraction).await;
        }

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| EngineError::SessionFailed(e.to_string()))?;
        let model_path = self.output_dir.join("model.usdz");
        tokio::fs::write(&model_path, vec![0u8; MOCK_MODEL_BYTES])
            .await
            .map_err(|e| EngineError::SessionFailed(e.to_string()))?;

        let dimensions = self.emit_dimensions.then_some(ModelDimensions {
            width_m: 0.32,
            height_m: 0.18,
            depth_m: 0.12,
        });

        Ok(ReconstructedModel {
            model_path,
            dimensions,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
