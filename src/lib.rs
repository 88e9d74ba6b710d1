// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 人流哨兵 (Crowd Sentinel)
//!
//! 实时视频人流分析: 行人检测 → 中心点跟踪 → 过线计数 → 密度分级,
//! 标注后的画面通过 WebSocket 或 ffmpeg RTMP 推流输出.
pub mod config; // 运行配置
pub mod detection; // 检测 / 跟踪 / 计数 / 密度
pub mod error; // 错误类型
pub mod input; // 视频输入系统
pub mod output; // 输出传输
pub mod pipeline; // 会话循环
pub mod registry; // 摄像头注册表
pub mod server; // WebSocket 服务
pub mod services; // 外部协作者 (人脸比对 / 通知)
pub mod stop; // 停止信号

pub use crate::config::Settings;
pub use crate::error::{CaptureError, SessionError, SinkError};
pub use crate::stop::StopSignal;
