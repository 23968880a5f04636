use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreResult;

/// One encoded frame handed back by the platform capture capability.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub captured_at: DateTime<Utc>,
}

/// Seam to the external frame-capture capability. Implementations live in
/// the platform shell; the core only schedules calls and persists results.
///
/// Returns `PermissionDenied` when the screen-recording permission has not
/// been granted, so the shell can walk the user through enabling it.
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    async fn capture(&self) -> CoreResult<CapturedFrame>;
}

/// Capture support is resolved once at startup rather than branched on the
/// platform at every call site.
#[derive(Clone)]
pub enum CaptureCapability {
    Available(Arc<dyn CaptureProvider>),
    Unsupported { reason: String },
}

impl CaptureCapability {
    pub fn provider(&self) -> Option<Arc<dyn CaptureProvider>> {
        match self {
            CaptureCapability::Available(provider) => Some(Arc::clone(provider)),
            CaptureCapability::Unsupported { .. } => None,
        }
    }
}
