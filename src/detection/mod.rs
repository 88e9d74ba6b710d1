// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 人流分析系统 (Crowd analytics)
///
/// - detector: 检测适配器 (YOLOv8 → 行人框)
/// - tracker:  多目标跟踪 (贪心中心点)
/// - counter:  过线计数
/// - density:  密度分级
pub mod counter;
pub mod density;
pub mod detector;
pub mod tracker;
pub mod types;

pub use counter::{CrossingCounter, LineDirection};
pub use detector::{DetectorOptions, OnnxPersonDetector, PersonDetector, SharedDetector};
pub use tracker::{GreedyCentroidTracker, Track, TrackingStrategy};
pub use types::{BBox, Centroid, CrowdStatus, Detection, FrameMetrics, RiskLevel};
