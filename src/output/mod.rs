// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 输出传输 (Output transport)
///
/// - message:     WebSocket JSON 消息 (base64 JPEG + 指标)
/// - byte_stream: ffmpeg 子进程 stdin 原始 RGB24 帧 → RTMP
///
/// 尽力而为, 每帧至多发送一次; 失败即结束会话, 不重试.
use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::detection::FrameMetrics;
use crate::error::SinkError;

pub mod byte_stream;
pub mod message;

pub use byte_stream::FfmpegPipeSink;
pub use message::WebSocketSink;

/// 帧输出接口
pub trait FrameSink: Send {
    fn send(&mut self, frame: &RgbImage, metrics: &FrameMetrics) -> Result<(), SinkError>;

    /// 释放传输资源, 可重复调用
    fn close(&mut self);
}

/// RGB 帧 → JPEG 字节
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>, SinkError> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    frame
        .write_with_encoder(encoder)
        .map_err(|e| SinkError::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}

/// 丢弃输出 (离线计数只关心最终人数)
#[derive(Debug, Default)]
pub struct DiscardSink {
    frames: u64,
}

impl DiscardSink {
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl FrameSink for DiscardSink {
    fn send(&mut self, _frame: &RgbImage, _metrics: &FrameMetrics) -> Result<(), SinkError> {
        self.frames += 1;
        Ok(())
    }

    fn close(&mut self) {}
}
