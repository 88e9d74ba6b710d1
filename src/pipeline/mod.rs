// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 视频处理流水线 (Video Processing Pipeline)
///
/// 单线程协作式循环, 解码线程通过有界队列提前供帧:
/// - session:  会话状态与主循环
/// - pacing:   按目标帧率控制节拍
/// - gate:     周期人脸比对闸门 + 满员锁存
/// - annotate: 画面标注
pub mod annotate;
pub mod gate;
pub mod pacing;
pub mod session;

pub use annotate::Annotator;
pub use gate::{CapacityLatch, CapacityState, FaceMatchGate};
pub use pacing::{PaceDecision, PacingScheduler};
pub use session::{EndReason, PipelineSession, ProcessedFrame, SessionSummary};
