// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 解码端帧过滤器: ez-ffmpeg 输出的 RGB24 帧拷贝成 `RgbImage` 后送入有界队列
use std::time::Instant;

use crossbeam_channel::{Sender, TrySendError};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame};
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::stop::StopSignal;

const CONSUMER_GONE: &str = "frame consumer gone";

/// 文件源阻塞发送 (不丢帧, 由处理端反压); 实时源队列满时丢弃新帧.
pub struct DecodeFilter {
    tx: Sender<RgbImage>,
    live: bool,
    stop: StopSignal,
    decoded: u64,
    rejected: u64,
    skipped: u64,
    window_start: Instant,
    window_frames: u64,
}

impl DecodeFilter {
    pub fn new(tx: Sender<RgbImage>, live: bool, stop: StopSignal) -> Self {
        Self {
            tx,
            live,
            stop,
            decoded: 0,
            rejected: 0,
            skipped: 0,
            window_start: Instant::now(),
            window_frames: 0,
        }
    }

    fn deliver(&mut self, image: RgbImage) -> Result<(), String> {
        if !self.live {
            return self.tx.send(image).map_err(|_| CONSUMER_GONE.to_string());
        }
        match self.tx.try_send(image) {
            Err(TrySendError::Full(_)) => {
                // 处理端跟不上: 丢弃这一新帧, 已排队的帧保持原顺序
                self.skipped += 1;
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(CONSUMER_GONE.to_string()),
            Ok(()) => Ok(()),
        }
    }

    fn report_window(&mut self) {
        let secs = self.window_start.elapsed().as_secs_f64();
        if secs < 1.0 {
            return;
        }
        debug!(
            "📺 解码: {:.1}fps | 累计{}帧 | 坏帧{} | 队列满丢弃{}",
            self.window_frames as f64 / secs,
            self.decoded,
            self.rejected,
            self.skipped
        );
        self.window_start = Instant::now();
        self.window_frames = 0;
    }
}

/// 按行拷贝单平面 RGB24 (data[0], linesize[0]), 去掉行尾对齐填充
fn copy_rgb24(frame: &Frame) -> Result<RgbImage, &'static str> {
    // SAFETY: AVFrame 在本次回调期间有效, 先判空再解引用
    let raw = unsafe {
        if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
            return Err("空帧/损坏帧");
        }
        &*frame.as_ptr()
    };
    let (width, height) = (raw.width as usize, raw.height as usize);
    let plane = raw.data[0];
    let stride = raw.linesize[0];
    let row_bytes = width * 3;
    if width == 0 || height == 0 || plane.is_null() {
        return Err("尺寸为0或无数据平面");
    }
    if stride < 0 || (stride as usize) < row_bytes {
        return Err("行步长异常");
    }

    let mut pixels = Vec::with_capacity(row_bytes * height);
    for y in 0..height {
        // SAFETY: 每行起点 y*stride, 长度 row_bytes <= stride, 均在平面内
        let row = unsafe { std::slice::from_raw_parts(plane.add(y * stride as usize), row_bytes) };
        pixels.extend_from_slice(row);
    }
    RgbImage::from_raw(width as u32, height as u32, pixels).ok_or("缓冲区大小不符")
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        info!("✅ 解码线程启动 ({})", if self.live { "实时" } else { "文件" });
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        if self.stop.is_stopped() {
            return Err("capture stopped".to_string());
        }

        match copy_rgb24(&frame) {
            Ok(image) => {
                self.decoded += 1;
                self.window_frames += 1;
                self.deliver(image)?;
            }
            Err(why) => {
                self.rejected += 1;
                if self.rejected <= 10 {
                    warn!("⚠️ 跳过第 {} 帧: {}", self.decoded + self.rejected, why);
                }
                return Ok(None);
            }
        }

        self.report_window();
        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        info!(
            "✅ 解码线程退出 (解码{} | 坏帧{} | 丢弃{})",
            self.decoded, self.rejected, self.skipped
        );
    }
}
