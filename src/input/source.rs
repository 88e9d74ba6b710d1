// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 视频源描述 (文件 / 本地摄像头 / 网络流)

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// 视频源
#[derive(Clone, Debug, PartialEq)]
pub enum SourceSpec {
    /// 本地视频文件
    File(PathBuf),
    /// 本地摄像头索引
    Device(usize),
    /// RTSP / RTMP / HTTP 网络流
    Network(String),
}

impl SourceSpec {
    /// 解析源标识: 纯数字为摄像头, 含 "://" 为网络流, 其余按文件处理
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(index) = raw.parse::<usize>() {
            return SourceSpec::Device(index);
        }
        if raw.contains("://") {
            return SourceSpec::Network(raw.to_string());
        }
        SourceSpec::File(PathBuf::from(raw))
    }

    /// 实时源 (摄像头/网络流) 不做文件帧率探测, 也不报超时告警
    pub fn is_live(&self) -> bool {
        !matches!(self, SourceSpec::File(_))
    }

    /// 交给 FFmpeg 的输入地址
    pub fn url(&self) -> String {
        match self {
            SourceSpec::File(path) => path.to_string_lossy().into_owned(),
            SourceSpec::Device(index) => format_camera_url(*index),
            SourceSpec::Network(url) => url.clone(),
        }
    }

    /// 摄像头需要指定采集格式
    pub fn format(&self) -> Option<&'static str> {
        match self {
            SourceSpec::Device(_) => Some(camera_format()),
            _ => None,
        }
    }

    /// 目标帧率: 实时源使用配置值, 文件读取容器帧率 (不可用或非正数时回退)
    pub fn resolve_fps(&self, live_fps: f64, fallback_fps: f64) -> f64 {
        match self {
            SourceSpec::File(path) => sanitize_fps(probe_file_fps(path), fallback_fps),
            _ => live_fps,
        }
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::File(path) => write!(f, "file:{}", path.display()),
            SourceSpec::Device(index) => write!(f, "camera:{}", index),
            SourceSpec::Network(url) => write!(f, "{}", url),
        }
    }
}

/// 帧率回退规则
pub fn sanitize_fps(reported: Option<f64>, fallback: f64) -> f64 {
    match reported {
        Some(fps) if fps.is_finite() && fps > 0.0 => fps,
        _ => fallback,
    }
}

fn probe_file_fps(path: &Path) -> Option<f64> {
    use ez_ffmpeg::stream_info::{find_video_stream_info, StreamInfo};

    match find_video_stream_info(path.to_string_lossy().as_ref()) {
        Ok(Some(StreamInfo::Video { avg_frame_rate, .. })) => {
            if avg_frame_rate.den == 0 {
                return None;
            }
            let fps = avg_frame_rate.num as f64 / avg_frame_rate.den as f64;
            debug!("🎞️ {} 帧率 {:.2}", path.display(), fps);
            Some(fps)
        }
        Ok(_) => None,
        Err(e) => {
            warn!("⚠️ 读取文件帧率失败: {}", e);
            None
        }
    }
}

/// 格式化摄像头URL - 根据平台选择
fn format_camera_url(index: usize) -> String {
    #[cfg(target_os = "windows")]
    {
        // dshow 需要设备名
        match ez_ffmpeg::device::get_input_video_devices() {
            Ok(devices) => match devices.into_iter().nth(index) {
                Some(name) => format!("video={}", name),
                None => format!("video={}", index),
            },
            Err(_) => format!("video={}", index),
        }
    }
    #[cfg(target_os = "linux")]
    {
        format!("/dev/video{}", index)
    }
    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    {
        format!("{}", index)
    }
}

fn camera_format() -> &'static str {
    #[cfg(target_os = "windows")]
    let format = "dshow"; // DirectShow

    #[cfg(target_os = "macos")]
    let format = "avfoundation"; // AVFoundation

    #[cfg(target_os = "linux")]
    let format = "v4l2"; // Video4Linux2

    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    let format = "video4linux2";

    format
}
