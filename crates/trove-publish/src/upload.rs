//! Three-phase transactional asset upload.
//!
//! Phase 1 (`init`) declares every file and image and receives an asset id
//! plus presigned transfer targets. Phase 2 transfers raw bytes directly to
//! storage, one target at a time, tracking which transfers stuck. Phase 3
//! (`complete`) submits client-computed checksums under an idempotency key;
//! the attempt only succeeds once the server has verified every artifact.
//!
//! The transaction survives failed attempts: a retry re-drives only what is
//! missing (expired targets trigger a fresh init, already-transferred roles
//! are skipped, the same completion key is replayed).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use trove_api::{
    idempotency_key, ApiClient, ClientError, FileInit, FileRole, FileVerify, ImageInit, ImageKind,
    ImageVerify, PresignedImageUpload, PresignedUpload, RequestOptions, UploadCompleteRequest,
    UploadCompleteResponse, UploadInitRequest, UploadInitResponse,
};

use crate::engine::ModelDimensions;
use crate::error::{PublishError, Result};

// ============================================================================
// Upload Plan
// ============================================================================

/// One local model file to upload, with its checksum fixed at plan time.
///
/// Size and checksum are computed once when the descriptor is built and are
/// the values declared in phase 3; the file must not change underneath an
/// in-flight transaction.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    /// Role the file plays within the asset.
    pub role: FileRole,
    /// Location on local disk.
    pub local_path: PathBuf,
    /// Size in bytes at plan time.
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 at plan time.
    pub checksum_sha256: String,
}

impl FileDescriptor {
    /// Builds a descriptor by reading and hashing the file.
    pub async fn from_path(role: FileRole, path: impl Into<PathBuf>) -> Result<Self> {
        let local_path = path.into();
        let bytes = read_local(&local_path).await?;
        Ok(Self {
            role,
            size_bytes: bytes.len() as u64,
            checksum_sha256: hex_sha256(&bytes),
            local_path,
        })
    }
}

/// One local image artifact to upload.
#[derive(Debug, Clone)]
pub struct ImageDescriptor {
    /// Kind of image.
    pub kind: ImageKind,
    /// Position among images of the same kind.
    pub sort_order: u32,
    /// Location on local disk.
    pub local_path: PathBuf,
    /// Size in bytes at plan time.
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 at plan time.
    pub checksum_sha256: String,
}

impl ImageDescriptor {
    /// Builds a descriptor by reading and hashing the image.
    pub async fn from_path(
        kind: ImageKind,
        sort_order: u32,
        path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let local_path = path.into();
        let bytes = read_local(&local_path).await?;
        Ok(Self {
            kind,
            sort_order,
            size_bytes: bytes.len() as u64,
            checksum_sha256: hex_sha256(&bytes),
            local_path,
        })
    }
}

async fn read_local(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| PublishError::ValidationFailure(format!("cannot read {}: {e}", path.display())))
}

fn hex_sha256(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Everything one upload run declares: dimensions, files, images.
#[derive(Debug, Clone)]
pub struct UploadPlan {
    /// Where the declared dimensions came from.
    pub dims_source: String,
    /// Measured object dimensions, when available.
    pub dimensions: Option<ModelDimensions>,
    /// Model files to upload. Must not be empty.
    pub files: Vec<FileDescriptor>,
    /// Image artifacts to upload.
    pub images: Vec<ImageDescriptor>,
}

// ============================================================================
// Upload Transaction
// ============================================================================

/// Key identifying one image target within a transaction.
type ImageSlot = (ImageKind, u32);

/// Server-side transaction state carried across upload attempts.
///
/// Created by phase 1 and kept until the upload either completes or the
/// session is discarded. Holds the asset id, the presigned targets, the set
/// of transfers that already stuck, and the one completion idempotency key
/// replayed on every phase 3 attempt.
#[derive(Debug)]
pub struct UploadTransaction {
    /// Server-allocated asset id.
    pub asset_id: String,
    completion_key: String,
    file_targets: HashMap<FileRole, PresignedUpload>,
    image_targets: HashMap<ImageSlot, PresignedImageUpload>,
    transferred_files: HashSet<FileRole>,
    transferred_images: HashSet<ImageSlot>,
}

impl UploadTransaction {
    /// Builds a transaction from an init response, checking that every
    /// declared artifact received a transfer target.
    fn from_init(plan: &UploadPlan, response: UploadInitResponse) -> Result<Self> {
        let file_targets: HashMap<FileRole, PresignedUpload> = response
            .presigned_uploads
            .into_iter()
            .map(|t| (t.role, t))
            .collect();
        let image_targets: HashMap<ImageSlot, PresignedImageUpload> = response
            .presigned_image_uploads
            .into_iter()
            .map(|t| ((t.image_type, t.sort_order), t))
            .collect();

        for file in &plan.files {
            if !file_targets.contains_key(&file.role) {
                return Err(PublishError::ServerRejected {
                    status: 0,
                    reason: format!("no transfer target for {}", file.role.as_str()),
                });
            }
        }
        for image in &plan.images {
            if !image_targets.contains_key(&(image.kind, image.sort_order)) {
                return Err(PublishError::ServerRejected {
                    status: 0,
                    reason: format!(
                        "no transfer target for {} #{}",
                        image.kind.as_str(),
                        image.sort_order
                    ),
                });
            }
        }

        Ok(Self {
            asset_id: response.asset_id,
            completion_key: idempotency_key(),
            file_targets,
            image_targets,
            transferred_files: HashSet::new(),
            transferred_images: HashSet::new(),
        })
    }

    /// Whether any still-pending transfer target has passed its expiry.
    /// Expired pending targets make the whole transaction unusable; the next
    /// attempt must re-init (new asset id, new targets, new completion key).
    fn has_expired_pending_target(&self, plan: &UploadPlan, now: DateTime<Utc>) -> bool {
        let file_expired = plan.files.iter().any(|f| {
            !self.transferred_files.contains(&f.role)
                && self
                    .file_targets
                    .get(&f.role)
                    .is_some_and(|t| t.expires_at <= now)
        });
        let image_expired = plan.images.iter().any(|i| {
            let slot = (i.kind, i.sort_order);
            !self.transferred_images.contains(&slot)
                && self
                    .image_targets
                    .get(&slot)
                    .is_some_and(|t| t.expires_at <= now)
        });
        file_expired || image_expired
    }
}

/// Transaction slot owned by the session. Empty until the first successful
/// init; cleared when the session is discarded.
#[derive(Debug, Default)]
pub struct UploadState {
    transaction: Option<UploadTransaction>,
}

impl UploadState {
    /// Asset id of the current transaction, if one exists.
    #[must_use]
    pub fn asset_id(&self) -> Option<&str> {
        self.transaction.as_ref().map(|t| t.asset_id.as_str())
    }
}

// ============================================================================
// Upload Events
// ============================================================================

/// Notifications emitted while an upload attempt runs.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// Phase 1 allocated (or an attempt is reusing) a server-side asset.
    AssetAllocated {
        /// The asset id now associated with the session.
        asset_id: String,
    },
    /// Attempt progress, as a fraction of the upload leg in `[0, 1]`.
    Progress {
        /// Fraction of the upload leg completed.
        fraction: f64,
        /// Caption describing the current activity.
        status: &'static str,
    },
}

/// Callback receiving [`UploadEvent`]s during a run.
pub type UploadEventSink<'a> = &'a (dyn Fn(UploadEvent) + Send + Sync);

// Progress checkpoints within one upload attempt.
const PROGRESS_INIT_START: f64 = 0.05;
const PROGRESS_INIT_DONE: f64 = 0.15;
const PROGRESS_TRANSFER_DONE: f64 = 0.75;
const PROGRESS_VERIFY_START: f64 = 0.85;

// ============================================================================
// Upload Orchestrator
// ============================================================================

/// Drives the three-phase upload protocol against the control plane and the
/// storage plane.
#[derive(Debug)]
pub struct UploadOrchestrator {
    api: Arc<ApiClient>,
    /// Data-plane client for raw `PUT`s to presigned URLs. Separate from the
    /// executor: transfers carry no bearer token and no JSON envelope.
    transfer: reqwest::Client,
}

impl UploadOrchestrator {
    /// Creates an orchestrator that uploads through the given executor.
    #[must_use]
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self {
            api,
            transfer: reqwest::Client::new(),
        }
    }

    /// Runs one upload attempt to completion, resuming `state` where the
    /// previous attempt left off. Returns the verified asset id.
    pub async fn run(
        &self,
        plan: &UploadPlan,
        state: &mut UploadState,
        events: UploadEventSink<'_>,
    ) -> Result<String> {
        if plan.files.is_empty() {
            return Err(PublishError::ValidationFailure(
                "upload plan declares no files".to_string(),
            ));
        }

        // Phase 1: init, unless a usable transaction already exists.
        let needs_init = match &state.transaction {
            None => true,
            Some(txn) => {
                let expired = txn.has_expired_pending_target(plan, Utc::now());
                if expired {
                    warn!(asset_id = %txn.asset_id, "pending transfer targets expired, re-initializing");
                }
                expired
            }
        };
        if needs_init {
            events(UploadEvent::Progress {
                fraction: PROGRESS_INIT_START,
                status: "Preparing upload",
            });
            let response = self.init(plan).await?;
            info!(asset_id = %response.asset_id, "upload transaction initialized");
            state.transaction = Some(UploadTransaction::from_init(plan, response)?);
        }
        let Some(txn) = state.transaction.as_mut() else {
            return Err(PublishError::ValidationFailure(
                "upload transaction missing after init".to_string(),
            ));
        };
        events(UploadEvent::AssetAllocated {
            asset_id: txn.asset_id.clone(),
        });
        events(UploadEvent::Progress {
            fraction: PROGRESS_INIT_DONE,
            status: "Transferring model",
        });

        // Phase 2: transfer whatever has not stuck yet, one artifact at a
        // time. Each success is recorded immediately so a mid-attempt failure
        // loses only the artifact that failed.
        let total = plan.files.len() + plan.images.len();
        let mut done = txn.transferred_files.len() + txn.transferred_images.len();
        for file in &plan.files {
            if txn.transferred_files.contains(&file.role) {
                continue;
            }
            let Some(target) = txn.file_targets.get(&file.role) else {
                return Err(PublishError::ServerRejected {
                    status: 0,
                    reason: format!("no transfer target for {}", file.role.as_str()),
                });
            };
            self.put_artifact(&target.url, &file.local_path, file.size_bytes)
                .await?;
            txn.transferred_files.insert(file.role);
            done += 1;
            events(transfer_progress(done, total));
        }
        for image in &plan.images {
            let slot = (image.kind, image.sort_order);
            if txn.transferred_images.contains(&slot) {
                continue;
            }
            let Some(target) = txn.image_targets.get(&slot) else {
                return Err(PublishError::ServerRejected {
                    status: 0,
                    reason: format!("no transfer target for {} #{}", image.kind.as_str(), slot.1),
                });
            };
            self.put_artifact(&target.url, &image.local_path, image.size_bytes)
                .await?;
            txn.transferred_images.insert(slot);
            done += 1;
            events(transfer_progress(done, total));
        }

        // Phase 3: complete. Only reachable once every declared artifact has
        // transferred. The same key is replayed on every retry of this
        // transaction so the server deduplicates resent completions.
        events(UploadEvent::Progress {
            fraction: PROGRESS_VERIFY_START,
            status: "Verifying upload",
        });
        let request = UploadCompleteRequest {
            asset_id: txn.asset_id.clone(),
            files: plan
                .files
                .iter()
                .map(|f| FileVerify {
                    role: f.role,
                    size_bytes: f.size_bytes,
                    checksum_sha256: f.checksum_sha256.clone(),
                })
                .collect(),
            images: plan
                .images
                .iter()
                .map(|i| ImageVerify {
                    image_type: i.kind,
                    sort_order: i.sort_order,
                    size_bytes: i.size_bytes,
                    checksum_sha256: i.checksum_sha256.clone(),
                })
                .collect(),
        };
        let response: UploadCompleteResponse = match self
            .api
            .post(
                "/model-assets/uploads/complete",
                &request,
                RequestOptions::idempotent(txn.completion_key.clone()),
            )
            .await
        {
            Ok(response) => response,
            Err(ClientError::Http { status: 409 }) => {
                // The server found a size or checksum disagreement before
                // producing verdicts; every artifact must go again. This
                // completion is decided, so the next attempt gets a new key
                // rather than replaying the failed one.
                txn.transferred_files.clear();
                txn.transferred_images.clear();
                txn.completion_key = idempotency_key();
                return Err(PublishError::IntegrityMismatch {
                    roles: declared_roles(plan),
                });
            }
            Err(err) => return Err(err.into()),
        };

        let mut failed_roles = Vec::new();
        for verdict in &response.files {
            if !verdict.verified {
                txn.transferred_files.remove(&verdict.role);
                failed_roles.push(verdict.role.as_str().to_string());
            }
        }
        for verdict in &response.image_results {
            if !verdict.verified {
                txn.transferred_images
                    .remove(&(verdict.image_type, verdict.sort_order));
                failed_roles.push(format!("{} #{}", verdict.image_type.as_str(), verdict.sort_order));
            }
        }
        if !failed_roles.is_empty() {
            warn!(?failed_roles, "server-side verification failed");
            // Same reasoning as the 409 arm: this completion reached a
            // verdict, so re-verification after re-transfer is a new
            // operation with its own key.
            txn.completion_key = idempotency_key();
            return Err(PublishError::IntegrityMismatch {
                roles: failed_roles,
            });
        }

        events(UploadEvent::Progress {
            fraction: 1.0,
            status: "Upload complete",
        });
        info!(asset_id = %response.asset_id, status = %response.status, "upload verified");
        Ok(response.asset_id)
    }

    /// Phase 1 call. Not idempotency-keyed: a lost response simply leaves an
    /// orphaned `UPLOADING` asset server-side, and re-driving init allocates
    /// a fresh one.
    async fn init(&self, plan: &UploadPlan) -> Result<UploadInitResponse> {
        let request = UploadInitRequest {
            dims_source: plan.dims_source.clone(),
            dims_width: plan.dimensions.map(|d| d.width_m),
            dims_height: plan.dimensions.map(|d| d.height_m),
            dims_depth: plan.dimensions.map(|d| d.depth_m),
            files: plan
                .files
                .iter()
                .map(|f| FileInit {
                    role: f.role,
                    size_bytes: f.size_bytes,
                })
                .collect(),
            images: plan
                .images
                .iter()
                .map(|i| ImageInit {
                    image_type: i.kind,
                    sort_order: i.sort_order,
                    size_bytes: i.size_bytes,
                })
                .collect(),
        };
        self.api
            .post("/model-assets/uploads/init", &request, RequestOptions::authed())
            .await
            .map_err(PublishError::from)
    }

    /// Phase 2 raw transfer: `PUT` the file bytes to the presigned URL.
    async fn put_artifact(&self, url: &str, path: &Path, declared_size: u64) -> Result<()> {
        let bytes = read_local(path).await?;
        if bytes.len() as u64 != declared_size {
            // The file changed since the descriptor was built; the declared
            // checksum can no longer match what we would send.
            return Err(PublishError::ValidationFailure(format!(
                "{} changed on disk during upload",
                path.display()
            )));
        }

        debug!(url, size = bytes.len(), "transferring artifact");
        let response = self
            .transfer
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|e| PublishError::TransientNetwork(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::ServerRejected {
                status: status.as_u16(),
                reason: format!("storage rejected transfer to {url}"),
            });
        }
        Ok(())
    }
}

fn transfer_progress(done: usize, total: usize) -> UploadEvent {
    let span = PROGRESS_TRANSFER_DONE - PROGRESS_INIT_DONE;
    #[allow(clippy::cast_precision_loss)]
    let fraction = PROGRESS_INIT_DONE + span * (done as f64 / total.max(1) as f64);
    UploadEvent::Progress {
        fraction,
        status: "Transferring model",
    }
}

fn declared_roles(plan: &UploadPlan) -> Vec<String> {
    plan.files
        .iter()
        .map(|f| f.role.as_str().to_string())
        .chain(
            plan.images
                .iter()
                .map(|i| format!("{} #{}", i.kind.as_str(), i.sort_order)),
        )
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
