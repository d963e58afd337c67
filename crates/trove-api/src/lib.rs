//! Trove API client
//!
//! Authenticated HTTP executor with single-flight token refresh, the token
//! store seam, the session event bus, and the control-plane wire contracts.

pub mod client;
pub mod contracts;
pub mod error;
pub mod events;
pub mod token;

pub use client::{idempotency_key, ApiClient, RequestOptions};
pub use contracts::{
    ChatMessageListResponse, ChatMessageResponse, FileInit, FileRole, FileVerify,
    FileVerifyResult, ImageInit, ImageKind, ImageVerify, ImageVerifyResult, LogoutRequest,
    PresignedImageUpload, PresignedUpload, ProductPublishRequest, ProductResponse,
    SendMessageRequest, TokenRefreshRequest, TokenRefreshResponse, UploadCompleteRequest,
    UploadCompleteResponse, UploadInitRequest, UploadInitResponse,
};
pub use error::{ClientError, Result};
pub use events::{SessionEvent, SessionEvents};
pub use token::{MemoryTokenStore, TokenPair, TokenStore};
