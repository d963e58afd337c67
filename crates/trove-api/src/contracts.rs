//! Wire types for the Trove control plane.
//!
//! Request and response bodies are plain serde structs whose field names match
//! the server's JSON exactly. Only the endpoints the client core actually
//! drives are modelled: token refresh/logout, the three-phase asset upload,
//! product publish, and the REST side of chat.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Auth
// ============================================================================

/// Body for `POST /auth/token/refresh`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRefreshRequest {
    /// The long-lived token being exchanged.
    pub refresh_token: String,
}

/// Response from `POST /auth/token/refresh`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRefreshResponse {
    /// The new access token.
    pub access_token: String,
    /// Always `"bearer"`.
    pub token_type: String,
    /// A rotated refresh token, when the server chooses to rotate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Body for `POST /auth/logout`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutRequest {
    /// The refresh token to revoke server-side.
    pub refresh_token: String,
}

// ============================================================================
// Upload — roles and phase 1 (init)
// ============================================================================

/// Role of an uploadable model file within an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileRole {
    /// Primary USDZ model file.
    ModelUsdz,
    /// Optional GLB variant.
    ModelGlb,
}

impl FileRole {
    /// The wire name of this role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ModelUsdz => "MODEL_USDZ",
            Self::ModelGlb => "MODEL_GLB",
        }
    }
}

/// Kind of an uploadable image artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageKind {
    /// Listing thumbnail.
    Thumbnail,
    /// Additional display image.
    Display,
}

impl ImageKind {
    /// The wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Thumbnail => "THUMBNAIL",
            Self::Display => "DISPLAY",
        }
    }
}

/// One file declaration inside an init request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInit {
    /// Role of the file being declared.
    pub role: FileRole,
    /// Size of the file in bytes.
    pub size_bytes: u64,
}

/// One image declaration inside an init request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInit {
    /// Kind of the image being declared.
    pub image_type: ImageKind,
    /// Position among images of the same kind.
    pub sort_order: u32,
    /// Size of the image in bytes.
    pub size_bytes: u64,
}

/// Body for `POST /model-assets/uploads/init`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadInitRequest {
    /// Where the declared dimensions came from (e.g. `"ios_lidar"`).
    pub dims_source: String,
    /// Object width in meters, if measured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dims_width: Option<f64>,
    /// Object height in meters, if measured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dims_height: Option<f64>,
    /// Object depth in meters, if measured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dims_depth: Option<f64>,
    /// Model files to be uploaded.
    pub files: Vec<FileInit>,
    /// Image artifacts to be uploaded (may be empty).
    pub images: Vec<ImageInit>,
}

/// A pre-authorized transfer target for one declared file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresignedUpload {
    /// Role the target was allocated for.
    pub role: FileRole,
    /// Direct-to-storage URL accepting a raw `PUT`.
    pub url: String,
    /// Moment after which the target must not be used.
    pub expires_at: DateTime<Utc>,
}

/// A pre-authorized transfer target for one declared image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresignedImageUpload {
    /// Kind the target was allocated for.
    pub image_type: ImageKind,
    /// Position among images of the same kind.
    pub sort_order: u32,
    /// Direct-to-storage URL accepting a raw `PUT`.
    pub url: String,
    /// Moment after which the target must not be used.
    pub expires_at: DateTime<Utc>,
}

/// Response from `POST /model-assets/uploads/init`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadInitResponse {
    /// Server-allocated asset identifier.
    pub asset_id: String,
    /// Asset status after init; `"UPLOADING"` on success.
    pub status: String,
    /// One transfer target per declared file.
    pub presigned_uploads: Vec<PresignedUpload>,
    /// One transfer target per declared image.
    #[serde(default)]
    pub presigned_image_uploads: Vec<PresignedImageUpload>,
}

// ============================================================================
// Upload — phase 3 (complete)
// ============================================================================

/// Client-side verification record for one transferred file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileVerify {
    /// Role of the transferred file.
    pub role: FileRole,
    /// Size the client sent, in bytes.
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the bytes the client sent.
    pub checksum_sha256: String,
}

/// Client-side verification record for one transferred image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageVerify {
    /// Kind of the transferred image.
    pub image_type: ImageKind,
    /// Position among images of the same kind.
    pub sort_order: u32,
    /// Size the client sent, in bytes.
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the bytes the client sent.
    pub checksum_sha256: String,
}

/// Body for `POST /model-assets/uploads/complete` (idempotency-keyed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadCompleteRequest {
    /// Asset being completed.
    pub asset_id: String,
    /// Every declared file, with client-computed checksums.
    pub files: Vec<FileVerify>,
    /// Every declared image, with client-computed checksums.
    pub images: Vec<ImageVerify>,
}

/// Server verdict for one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileVerifyResult {
    /// Role the verdict applies to.
    pub role: FileRole,
    /// Whether the stored bytes matched the declared size and checksum.
    pub verified: bool,
}

/// Server verdict for one image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageVerifyResult {
    /// Kind the verdict applies to.
    pub image_type: ImageKind,
    /// Position among images of the same kind.
    pub sort_order: u32,
    /// Whether the stored bytes matched the declared size and checksum.
    pub verified: bool,
}

/// Response from `POST /model-assets/uploads/complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadCompleteResponse {
    /// Asset the verdicts apply to.
    pub asset_id: String,
    /// Asset status after completion; `"READY"` when every file verified.
    pub status: String,
    /// Per-file verdicts.
    pub files: Vec<FileVerifyResult>,
    /// Per-image verdicts.
    #[serde(default)]
    pub image_results: Vec<ImageVerifyResult>,
}

// ============================================================================
// Publish
// ============================================================================

/// Body for `POST /products/publish` (idempotency-keyed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductPublishRequest {
    /// The verified asset to list.
    pub asset_id: String,
    /// Listing title.
    pub title: String,
    /// Optional listing description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Asking price in cents.
    pub price_cents: i64,
}

/// Response from `POST /products/publish`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductResponse {
    /// Product identifier.
    pub id: String,
    /// Backing asset, if the listing still carries one.
    #[serde(default)]
    pub asset_id: Option<String>,
    /// Listing title.
    pub title: String,
    /// Listing description.
    #[serde(default)]
    pub description: Option<String>,
    /// Asking price in cents.
    pub price_cents: i64,
    /// Seller identifier.
    pub seller_id: String,
    /// Product status (e.g. `"PUBLISHED"`).
    pub status: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Chat (REST fallback for the realtime channel)
// ============================================================================

/// One persisted chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageResponse {
    /// Server-assigned message identifier.
    pub id: String,
    /// Room the message belongs to.
    pub room_id: String,
    /// Author of the message.
    pub sender_id: String,
    /// Message text.
    pub body: String,
    /// Persistence timestamp.
    pub created_at: DateTime<Utc>,
}

/// Response from `GET /chat-rooms/{room_id}/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageListResponse {
    /// Messages, oldest first.
    pub messages: Vec<ChatMessageResponse>,
}

/// Body for `POST /chat-rooms/{room_id}/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Message text.
    pub body: String,
}
