// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 视频输入系统 (Video Input System)
///
/// 独立解码线程, 负责视频流解码与缩放
/// - SourceSpec:    文件 / 摄像头 / 网络流
/// - FfmpegCapture: ez-ffmpeg 采集句柄
/// - DecodeFilter:  帧过滤 (RGB24 → 有界队列)
use std::time::Duration;

use image::RgbImage;

pub mod decode_filter;
pub mod decoder;
pub mod source;

pub use decode_filter::DecodeFilter;
pub use decoder::FfmpegCapture;
pub use source::SourceSpec;

/// 单次读帧结果
#[derive(Debug)]
pub enum FrameRead {
    Frame(RgbImage),
    /// 等待超时, 流可能仍然存活
    Timeout,
    /// 流结束或解码线程退出
    Ended,
}

/// 帧来源接口
pub trait FrameSource: Send {
    fn read(&mut self, timeout: Duration) -> FrameRead;

    /// 目标帧率
    fn fps(&self) -> f64;

    fn is_live(&self) -> bool;

    fn describe(&self) -> String;
}
