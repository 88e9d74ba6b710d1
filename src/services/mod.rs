// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 外部协作者边界 (External collaborators)
///
/// - face_match: 人脸比对服务 + 参考人脸目录
/// - notify:     满员通知 (Telegram)
pub mod face_match;
pub mod notify;

pub use face_match::{FaceMatcher, FaceRegistry, HttpFaceMatcher, MatchVerdict, ReferenceFace};
pub use notify::{Notifier, TelegramNotifier};
