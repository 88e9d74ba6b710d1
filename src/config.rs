// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 运行配置 - 通过JSON文件调整参数
//!
//! 所有字段都有默认值, 缺失的字段按默认值补齐.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detection::{DetectorOptions, LineDirection};

/// Telegram 机器人 Token 环境变量
pub const ENV_TELEGRAM_TOKEN: &str = "SENTINEL_TELEGRAM_TOKEN";
/// Telegram 聊天ID 环境变量
pub const ENV_TELEGRAM_CHAT_ID: &str = "SENTINEL_TELEGRAM_CHAT_ID";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub capture: CaptureSettings,
    pub counting: CountingSettings,
    pub tracking: TrackingSettings,
    pub pacing: PacingSettings,
    pub detector: DetectorSettings,
    pub faces: FaceSettings,
    pub notify: NotifySettings,
    pub annotate: AnnotateSettings,
    pub server: ServerSettings,
    pub relay: RelaySettings,
}

/// 采集参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub width: u32,                 // 处理分辨率
    pub height: u32,
    pub channel_capacity: usize,    // 解码 → 处理 的帧队列长度
    pub open_timeout_ms: u64,       // 打开视频源的等待上限
    pub read_timeout_ms: u64,       // 单次读帧等待
    pub live_read_retries: u32,     // 实时源连续空读上限
    pub rtsp_transport: String,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            channel_capacity: 4,
            open_timeout_ms: 10_000,
            read_timeout_ms: 1_000,
            live_read_retries: 3,
            rtsp_transport: "tcp".to_string(),
        }
    }
}

impl CaptureSettings {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// 过线计数参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountingSettings {
    pub line_position: f32,
    pub direction: LineDirection,
    pub threshold: u64, // 超过该人数即进入满员状态
}

impl Default for CountingSettings {
    fn default() -> Self {
        Self {
            line_position: 300.0,
            direction: LineDirection::Down,
            threshold: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    pub max_distance: f32,
    pub max_missed_frames: u32, // 0 = 未匹配立即丢弃
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            max_distance: crate::detection::tracker::DEFAULT_MATCH_DISTANCE,
            max_missed_frames: 0,
        }
    }
}

/// 节拍参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingSettings {
    pub live_fps: f64,     // 实时源固定帧率
    pub fallback_fps: f64, // 文件帧率不可用时的回退值
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            live_fps: 30.0,
            fallback_fps: 30.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub model: PathBuf,
    pub input_size: u32,
    pub num_classes: usize,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub cuda: bool,
    pub intra_threads: usize,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        let opts = DetectorOptions::default();
        Self {
            model: PathBuf::from("yolov8n.onnx"),
            input_size: opts.input_size,
            num_classes: opts.num_classes,
            conf_threshold: opts.conf_threshold,
            iou_threshold: opts.iou_threshold,
            cuda: opts.use_cuda,
            intra_threads: opts.intra_threads,
        }
    }
}

impl DetectorSettings {
    pub fn options(&self) -> DetectorOptions {
        DetectorOptions {
            input_size: self.input_size,
            num_classes: self.num_classes,
            conf_threshold: self.conf_threshold,
            iou_threshold: self.iou_threshold,
            use_cuda: self.cuda,
            intra_threads: self.intra_threads,
        }
    }
}

/// 人脸比对参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceSettings {
    pub enabled: bool,
    pub dir: PathBuf,
    pub cadence: u64,
    pub verify_url: String,
    pub timeout_ms: u64,
}

impl Default for FaceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("faces"),
            cadence: 30,
            verify_url: "http://127.0.0.1:5005/verify".to_string(),
            timeout_ms: 5_000,
        }
    }
}

/// 通知参数 (Token 建议走环境变量)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub api_base: String,
    pub timeout_ms: u64,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            telegram_token: None,
            telegram_chat_id: None,
            api_base: "https://api.telegram.org".to_string(),
            timeout_ms: 5_000,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotateSettings {
    /// TTF/OTF 字体, 缺省时只画框和线不写字
    pub font: Option<PathBuf>,
}

/// WebSocket 服务参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub cameras: PathBuf,
    pub source_template: String, // {key} 替换为流名
    pub write_timeout_ms: u64,
    pub jpeg_quality: u8,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            cameras: PathBuf::from("cameras.json"),
            source_template: "rtmp://localhost:1935/live/{key}".to_string(),
            write_timeout_ms: 5_000,
            jpeg_quality: 80,
        }
    }
}

/// RTMP 转推参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub ffmpeg: PathBuf,
    pub output_url: String,
    pub preset: String,
    pub terminate_timeout_ms: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            output_url: "rtmp://localhost:1935/live/processed".to_string(),
            preset: "veryfast".to_string(),
            terminate_timeout_ms: 2_000,
        }
    }
}

impl Settings {
    /// 从JSON文件加载配置
    ///
    /// 文件不存在时写出默认配置; 解析失败时告警并使用默认值.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut settings = match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                config.save(path);
                config
            }
        };
        settings.apply_env();
        settings
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    warn!("❌ 保存配置失败: {}", e);
                } else {
                    info!("💾 配置已保存到 {}", path.display());
                }
            }
            Err(e) => warn!("❌ 序列化配置失败: {}", e),
        }
    }

    /// 环境变量覆盖 (仅密钥类字段)
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var(ENV_TELEGRAM_TOKEN) {
            self.notify.telegram_token = Some(token);
        }
        if let Ok(chat) = std::env::var(ENV_TELEGRAM_CHAT_ID) {
            self.notify.telegram_chat_id = Some(chat);
        }
    }

    /// 打印当前配置
    pub fn log_summary(&self) {
        info!("🎛️  当前配置:");
        info!(
            "  处理分辨率: {}x{} | 实时帧率: {:.0}",
            self.capture.width, self.capture.height, self.pacing.live_fps
        );
        info!(
            "  计数线: y={} ({}) | 容量上限: {}",
            self.counting.line_position, self.counting.direction, self.counting.threshold
        );
        info!(
            "  关联距离: {:.0}px | 宽限帧: {}",
            self.tracking.max_distance, self.tracking.max_missed_frames
        );
        info!(
            "  人脸比对: {} (每{}帧) | 通知: {}",
            if self.faces.enabled { "开启" } else { "关闭" },
            self.faces.cadence,
            if self.notify.telegram_token.is_some() { "Telegram" } else { "无" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.json");
        let settings = Settings::load(&path);
        assert!(path.exists());
        assert_eq!(settings.counting, CountingSettings::default());
        assert_eq!(settings.faces.cadence, 30);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.json");
        fs::write(&path, r#"{"counting": {"direction": "up", "threshold": 5}}"#).unwrap();

        let settings = Settings::load(&path);
        assert_eq!(settings.counting.direction, LineDirection::Up);
        assert_eq!(settings.counting.threshold, 5);
        assert_eq!(settings.counting.line_position, 300.0);
        assert_eq!(settings.capture.live_read_retries, 3);
    }

    #[test]
    fn broken_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.json");
        fs::write(&path, "{ not json").unwrap();
        let settings = Settings::load(&path);
        assert_eq!(settings.tracking.max_distance, 50.0);
    }
}
