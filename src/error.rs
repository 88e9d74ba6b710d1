// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 错误类型
//!
//! 只有 SourceUnavailable 与 TransportFailure 会作为会话终止错误向上传播,
//! ReadExhausted 在会话内部被吸收为正常结束.

use std::time::Duration;

use thiserror::Error;

/// 视频采集错误
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open {url}: {reason}")]
    Open { url: String, reason: String },

    #[error("{url} produced no stream within {timeout:?}")]
    OpenTimeout { url: String, timeout: Duration },

    #[error("capture worker exited before reporting")]
    WorkerGone,
}

/// 输出传输错误
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("consumer disconnected")]
    Disconnected,

    #[error("byte stream pipe broken")]
    BrokenPipe,

    #[error("frame encoding failed: {0}")]
    Encode(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// 会话级错误
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(#[from] CaptureError),

    #[error("no frame after {attempts} consecutive reads")]
    ReadExhausted { attempts: u32 },

    #[error("transport failure: {0}")]
    TransportFailure(#[from] SinkError),
}
