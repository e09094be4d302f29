//! Central error types for camrec.
//!
//! Every failure in the pipeline is fatal to the current preview/recording
//! session except where noted; callers are expected to tear down and
//! re-initialize rather than retry.

use thiserror::Error;

/// Main error type for camrec operations.
#[derive(Error, Debug)]
pub enum CamrecError {
    /// No compatible GPU adapter/device could be created.
    #[error("Graphics context init failed: {0}")]
    ContextInit(String),

    /// A render surface could not be created or configured.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Shader source failed to compile.
    #[error("Shader compile failed ({stage}): {log}")]
    ShaderCompile { stage: &'static str, log: String },

    /// Render pipeline creation (the link step) failed.
    #[error("Shader link failed: {log}")]
    ShaderLink { log: String },

    /// No encoder accepts the requested format.
    #[error("No usable video encoder: {0}")]
    EncoderUnavailable(String),

    /// The container could not be finalized. Distinct from a crash; the
    /// caller decides user messaging.
    #[error("Container finalization failed: {0}")]
    Finalization(String),

    /// A bounded wait on another thread expired.
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// MP4 container error.
    #[error("Mux error: {0}")]
    Mux(#[from] mp4::Error),

    /// Storage operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

impl From<String> for CamrecError {
    fn from(msg: String) -> Self {
        CamrecError::Other(msg)
    }
}

impl From<&str> for CamrecError {
    fn from(msg: &str) -> Self {
        CamrecError::Other(msg.to_string())
    }
}

/// Type alias for Results using CamrecError.
pub type CamrecResult<T> = Result<T, CamrecError>;
