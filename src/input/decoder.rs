// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// FFmpeg 拉流解码器
/// Capture handle backed by an ez-ffmpeg decode thread
use std::collections::HashMap;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use image::RgbImage;
use tracing::{debug, error, info, warn};

use super::decode_filter::DecodeFilter;
use super::source::SourceSpec;
use super::{FrameRead, FrameSource};
use crate::config::CaptureSettings;
use crate::error::CaptureError;
use crate::stop::StopSignal;

/// 拆除时等待解码线程退出的上限
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// FFmpeg 采集句柄
///
/// 解码在独立线程中运行, 通过有界队列按顺序交付帧. Drop 时释放.
pub struct FfmpegCapture {
    spec: SourceSpec,
    fps: f64,
    rx: Option<Receiver<RgbImage>>,
    stop: StopSignal,
    worker: Option<JoinHandle<()>>,
}

impl FfmpegCapture {
    /// 打开视频源, 等到解码上下文启动成功才返回
    pub fn open(
        spec: SourceSpec,
        settings: &CaptureSettings,
        fps: f64,
    ) -> Result<Self, CaptureError> {
        let url = spec.url();
        info!("🎬 打开视频源: {} (目标 {:.1}fps)", spec, fps);

        let (tx, rx) = bounded(settings.channel_capacity.max(1));
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
        let stop = StopSignal::new();

        let filter = DecodeFilter::new(tx, spec.is_live(), stop.clone());
        let filter_desc = format!("scale={}:{},format=rgb24", settings.width, settings.height);
        let format = spec.format();
        let rtsp = url.starts_with("rtsp://");
        let transport = settings.rtsp_transport.clone();
        let live_fps = format!("{}", fps.round() as u32);
        let worker_url = url.clone();

        let worker = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                // 构建帧处理管线
                let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
                let pipe = pipe.filter("decode", Box::new(filter));
                let out = create_null_output().add_frame_pipeline(pipe);

                let mut input = Input::new(worker_url.as_str());
                let mut opts: HashMap<&str, &str> = HashMap::new();
                if let Some(format) = format {
                    input = input.set_format(format);
                    opts.insert("framerate", live_fps.as_str());
                }
                if rtsp {
                    opts.insert("rtsp_transport", transport.as_str());
                    opts.insert("buffer_size", "67108864");
                }
                if !opts.is_empty() {
                    input = input.set_input_opts(opts.into_iter().collect::<Vec<_>>());
                }

                let ctx = match FfmpegContext::builder()
                    .input(input)
                    .filter_desc(filter_desc.as_str())
                    .output(out)
                    .build()
                {
                    Ok(ctx) => ctx,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("构建失败: {}", e)));
                        return;
                    }
                };
                let sch = match ctx.start() {
                    Ok(sch) => sch,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("启动失败: {}", e)));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                if let Err(e) = sch.wait() {
                    debug!("📹 解码结束: {}", e);
                }
                info!("📹 解码循环结束");
            })
            .map_err(|e| CaptureError::Open {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let mut capture = Self {
            spec,
            fps,
            rx: Some(rx),
            stop,
            worker: Some(worker),
        };

        match ready_rx.recv_timeout(settings.open_timeout()) {
            Ok(Ok(())) => {
                info!("✅ 视频源已连接: {}", url);
                Ok(capture)
            }
            Ok(Err(reason)) => {
                capture.shutdown();
                Err(CaptureError::Open { url, reason })
            }
            Err(RecvTimeoutError::Timeout) => {
                capture.shutdown();
                Err(CaptureError::OpenTimeout {
                    url,
                    timeout: settings.open_timeout(),
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                capture.shutdown();
                Err(CaptureError::WorkerGone)
            }
        }
    }

    /// 停止解码并在有限时间内回收线程
    fn shutdown(&mut self) {
        self.stop.stop();
        // 丢弃接收端, 让阻塞中的发送立即失败
        self.rx.take();

        let Some(worker) = self.worker.take() else {
            return;
        };
        let deadline = Instant::now() + WORKER_JOIN_TIMEOUT;
        while !worker.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if worker.is_finished() {
            if worker.join().is_err() {
                error!("❌ 解码线程异常退出");
            }
        } else {
            warn!("⚠️ 解码线程未在 {:?} 内退出, 已分离", WORKER_JOIN_TIMEOUT);
        }
    }
}

impl FrameSource for FfmpegCapture {
    fn read(&mut self, timeout: Duration) -> FrameRead {
        let Some(rx) = self.rx.as_ref() else {
            return FrameRead::Ended;
        };
        match rx.recv_timeout(timeout) {
            Ok(frame) => FrameRead::Frame(frame),
            Err(RecvTimeoutError::Timeout) => FrameRead::Timeout,
            Err(RecvTimeoutError::Disconnected) => FrameRead::Ended,
        }
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn is_live(&self) -> bool {
        self.spec.is_live()
    }

    fn describe(&self) -> String {
        self.spec.to_string()
    }
}

impl Drop for FfmpegCapture {
    fn drop(&mut self) {
        self.shutdown();
        debug!("🧹 采集句柄已释放: {}", self.spec);
    }
}
