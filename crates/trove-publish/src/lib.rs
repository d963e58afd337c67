//! Trove publishing pipeline
//!
//! Drives a seller's object from capture through 3D reconstruction, the
//! three-phase transactional asset upload, and the final listing publish.

pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod session;
pub mod upload;

pub use engine::{
    CapturedInput, EngineError, MockEngine, ModelDimensions, ReconstructedModel,
    ReconstructionEngine,
};
pub use error::{PublishError, Result};
pub use orchestrator::{ListingDraft, PublishingOrchestrator, SessionUpdate};
pub use session::{
    modeling_caption, overall_from_modeling, overall_from_upload, PublishSession, Stage,
    MODELING_SPAN,
};
pub use upload::{
    FileDescriptor, ImageDescriptor, UploadEvent, UploadEventSink, UploadOrchestrator, UploadPlan,
    UploadState, UploadTransaction,
};
