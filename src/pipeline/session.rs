// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 流水线会话 (Pipeline session)
//!
//! 一个会话 = 一个协作式循环: 取帧 → 检测 → 跟踪 → 计数/密度 → 标注 → 输出.
//! 会话独占自己的跟踪器、计数器、锁存和帧序号; 唯一可能共享的是检测器.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{imageops, RgbImage};
use tracing::{debug, info, warn};

use super::annotate::{Annotator, Overlay};
use super::gate::{CapacityLatch, FaceMatchGate};
use super::pacing::PacingScheduler;
use crate::config::{CountingSettings, Settings};
use crate::detection::{
    density, CrossingCounter, Detection, FrameMetrics, GreedyCentroidTracker, PersonDetector,
    TrackingStrategy,
};
use crate::error::SessionError;
use crate::input::{FrameRead, FrameSource};
use crate::output::FrameSink;
use crate::services::face_match::{FaceMatcher, FaceRegistry, HttpFaceMatcher, ReferenceFace};
use crate::services::notify::{capacity_alert_text, Notifier, TelegramNotifier};
use crate::stop::StopSignal;

/// 单帧处理结果
pub struct ProcessedFrame {
    pub frame: RgbImage,
    pub metrics: FrameMetrics,
    /// 本帧新计数的轨迹ID
    pub newly_counted: Vec<u64>,
    /// 本帧触发了满员告警
    pub capacity_reached: bool,
}

/// 会话结束原因
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    EndOfStream,
    ReadExhausted,
    Stopped,
}

#[derive(Clone, Debug)]
pub struct SessionSummary {
    pub frames: u64,
    pub occupancy: u64,
    pub overruns: u64,
    pub end: EndReason,
}

struct FaceStage {
    gate: FaceMatchGate,
    registry: FaceRegistry,
    matcher: Box<dyn FaceMatcher>,
}

pub struct PipelineSession {
    name: String,
    detector: Box<dyn PersonDetector>,
    tracker: Box<dyn TrackingStrategy>,
    counter: CrossingCounter,
    latch: CapacityLatch,
    faces: Option<FaceStage>,
    notifier: Option<Box<dyn Notifier>>,
    annotator: Arc<Annotator>,
    frame_index: u64,
    live_read_retries: u32,
    read_timeout: Duration,
    paced: bool,
}

impl PipelineSession {
    pub fn new(
        name: impl Into<String>,
        detector: Box<dyn PersonDetector>,
        tracker: Box<dyn TrackingStrategy>,
        counting: &CountingSettings,
    ) -> Self {
        Self {
            name: name.into(),
            detector,
            tracker,
            counter: CrossingCounter::new(counting.line_position, counting.direction),
            latch: CapacityLatch::new(counting.threshold),
            faces: None,
            notifier: None,
            annotator: Arc::new(Annotator::shapes_only()),
            frame_index: 0,
            live_read_retries: 3,
            read_timeout: Duration::from_secs(1),
            paced: true,
        }
    }

    /// 启用周期人脸比对
    pub fn with_faces(
        mut self,
        registry: FaceRegistry,
        matcher: Box<dyn FaceMatcher>,
        cadence: u64,
    ) -> Self {
        self.faces = Some(FaceStage {
            gate: FaceMatchGate::new(cadence),
            registry,
            matcher,
        });
        self
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_annotator(mut self, annotator: Arc<Annotator>) -> Self {
        self.annotator = annotator;
        self
    }

    /// 连续空读上限与单次等待
    pub fn with_read_policy(mut self, retries: u32, timeout: Duration) -> Self {
        self.live_read_retries = retries.max(1);
        self.read_timeout = timeout;
        self
    }

    /// 关闭节拍 (离线计数尽快跑完)
    pub fn with_pacing(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    /// 按配置装配: 跟踪参数、读帧策略、人脸比对 (目录+服务)、通知
    pub fn from_settings(
        name: impl Into<String>,
        settings: &Settings,
        counting: &CountingSettings,
        detector: Box<dyn PersonDetector>,
        annotator: Arc<Annotator>,
    ) -> Self {
        let tracker = GreedyCentroidTracker::new(settings.tracking.max_distance)
            .with_grace_frames(settings.tracking.max_missed_frames);
        let mut session = Self::new(name, detector, Box::new(tracker), counting)
            .with_annotator(annotator)
            .with_read_policy(
                settings.capture.live_read_retries,
                settings.capture.read_timeout(),
            );

        if settings.faces.enabled {
            let matcher = HttpFaceMatcher::new(
                settings.faces.verify_url.clone(),
                Duration::from_millis(settings.faces.timeout_ms),
            );
            session = session.with_faces(
                FaceRegistry::new(settings.faces.dir.clone()),
                Box::new(matcher),
                settings.faces.cadence,
            );
        }
        if let Some(notifier) = TelegramNotifier::from_settings(&settings.notify) {
            session = session.with_notifier(Box::new(notifier));
        }
        session
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn occupancy(&self) -> u64 {
        self.counter.total()
    }

    pub fn at_capacity(&self) -> bool {
        self.latch.at_capacity()
    }

    /// 处理一帧
    pub fn process_frame(&mut self, mut frame: RgbImage) -> ProcessedFrame {
        let index = self.frame_index;
        let (w, h) = frame.dimensions();

        // 1. 检测 (失败按空结果继续)
        let boxes = match self.detector.detect(&frame) {
            Ok(boxes) => boxes,
            Err(e) => {
                warn!("⚠️ [{}] 帧 {} 检测失败: {:#}", self.name, index, e);
                Vec::new()
            }
        };
        let detections: Vec<Detection> = boxes.into_iter().map(Detection::from).collect();

        // 2. 跟踪 + 过线计数
        self.tracker.update(&detections);
        let newly_counted = self.counter.apply(self.tracker.live_tracks_mut());
        for id in &newly_counted {
            debug!("➡️ [{}] 轨迹 {} 过线, 累计 {}", self.name, id, self.counter.total());
        }

        // 3. 满员锁存
        let occupancy = self.counter.total();
        let capacity_reached = self.latch.observe(occupancy);
        if capacity_reached {
            self.send_capacity_alert(occupancy);
        }

        // 4. 密度分级
        let people_count = detections.len();
        let (d, risk, status) = density::classify(people_count, w as u64 * h as u64);

        // 5. 周期人脸比对
        let detected_persons = self.match_faces(index, &frame, &detections);

        let metrics = FrameMetrics {
            frame_index: index,
            people_count,
            density: d,
            risk: risk.label(),
            status: status.label(),
            detected_persons,
            occupancy,
            at_capacity: self.latch.at_capacity(),
        };

        // 6. 标注
        let overlay = Overlay {
            detections: &detections,
            tracks: self.tracker.live_tracks(),
            metrics: &metrics,
            line_position: self.counter.line_position(),
            threshold: self.latch.threshold(),
        };
        self.annotator.annotate(&mut frame, &overlay);

        self.frame_index += 1;
        ProcessedFrame {
            frame,
            metrics,
            newly_counted,
            capacity_reached,
        }
    }

    fn send_capacity_alert(&self, occupancy: u64) {
        let Some(notifier) = self.notifier.as_ref() else {
            return;
        };
        let text = capacity_alert_text(
            &self.name,
            occupancy,
            self.latch.threshold(),
            chrono::Local::now(),
        );
        if let Err(e) = notifier.notify(&text) {
            warn!("⚠️ [{}] 满员通知发送失败: {:#}", self.name, e);
        }
    }

    fn match_faces(&self, index: u64, frame: &RgbImage, detections: &[Detection]) -> Vec<String> {
        let Some(stage) = self.faces.as_ref() else {
            return Vec::new();
        };
        if !stage.gate.on_cadence(index) || detections.is_empty() {
            return Vec::new();
        }
        let references: Vec<ReferenceFace> = match stage.registry.list() {
            Ok(refs) => refs,
            Err(e) => {
                warn!("⚠️ [{}] 读取参考人脸失败: {:#}", self.name, e);
                return Vec::new();
            }
        };
        if !stage.gate.opens(index, references.len(), detections.len()) {
            return Vec::new();
        }

        let mut identities = BTreeSet::new();
        for det in detections {
            let Some(crop) = crop_person(frame, det) else {
                continue;
            };
            for reference in &references {
                if identities.contains(&reference.label) {
                    continue;
                }
                match stage.matcher.verify(&crop, &reference.path) {
                    Ok(verdict) if verdict.verified => {
                        identities.insert(reference.label.clone());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("⚠️ [{}] 人脸比对失败: {:#}", self.name, e);
                    }
                }
            }
        }
        identities.into_iter().collect()
    }

    /// 取下一帧: 连续空读超过上限视为读耗尽; 等待期间收到停止信号立即返回
    fn next_frame(
        &mut self,
        source: &mut dyn FrameSource,
        stop: &StopSignal,
    ) -> Result<Option<RgbImage>, SessionError> {
        let mut misses = 0;
        loop {
            match source.read(self.read_timeout) {
                FrameRead::Frame(frame) => return Ok(Some(frame)),
                FrameRead::Ended => return Ok(None),
                FrameRead::Timeout if stop.is_stopped() => return Ok(None),
                FrameRead::Timeout => {
                    misses += 1;
                    debug!("⌛ [{}] 读帧超时 ({}/{})", self.name, misses, self.live_read_retries);
                    if misses >= self.live_read_retries {
                        return Err(SessionError::ReadExhausted { attempts: misses });
                    }
                }
            }
        }
    }

    /// 运行会话直到流结束、读耗尽、传输失败或外部停止
    ///
    /// 无论哪条路径退出, 输出都会被关闭.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        stop: &StopSignal,
    ) -> Result<SessionSummary, SessionError> {
        let mut pacer = PacingScheduler::new(source.fps(), !source.is_live());
        info!(
            "▶️ [{}] 会话开始: {} | {:.1}fps | 帧间隔 {:.1}ms",
            self.name,
            source.describe(),
            source.fps(),
            pacer.frame_interval().as_secs_f64() * 1000.0
        );

        let mut stats_last = Instant::now();
        let mut stats_frames = 0u64;
        let end = loop {
            if stop.is_stopped() {
                break EndReason::Stopped;
            }
            let started = Instant::now();

            let frame = match self.next_frame(source, stop) {
                Ok(Some(frame)) => frame,
                Ok(None) if stop.is_stopped() => break EndReason::Stopped,
                Ok(None) => break EndReason::EndOfStream,
                Err(SessionError::ReadExhausted { attempts }) => {
                    warn!("⚠️ [{}] 连续 {} 次读帧失败, 结束会话", self.name, attempts);
                    break EndReason::ReadExhausted;
                }
                Err(e) => {
                    sink.close();
                    return Err(e);
                }
            };

            let out = self.process_frame(frame);
            if let Err(e) = sink.send(&out.frame, &out.metrics) {
                warn!("💔 [{}] 输出失败, 结束会话: {}", self.name, e);
                sink.close();
                return Err(SessionError::TransportFailure(e));
            }

            // 每秒打印一次统计
            stats_frames += 1;
            let elapsed = stats_last.elapsed().as_secs_f64();
            if elapsed >= 1.0 {
                info!(
                    "📊 [{}] {:.1}fps | 人数 {} | 累计 {} | 风险 {} | 超时 {}",
                    self.name,
                    stats_frames as f64 / elapsed,
                    out.metrics.people_count,
                    out.metrics.occupancy,
                    out.metrics.risk,
                    pacer.overruns()
                );
                stats_last = Instant::now();
                stats_frames = 0;
            }

            if self.paced {
                pacer.finish_cycle(started);
            }
        };

        sink.close();
        let summary = SessionSummary {
            frames: self.frame_index,
            occupancy: self.counter.total(),
            overruns: pacer.overruns(),
            end,
        };
        info!(
            "⏹️ [{}] 会话结束 ({:?}): {} 帧, 累计 {} 人, 超时 {} 次 (告警 {})",
            self.name,
            summary.end,
            summary.frames,
            summary.occupancy,
            summary.overruns,
            pacer.warnings()
        );
        Ok(summary)
    }
}

/// 裁剪检测框区域 (越界部分截断)
fn crop_person(frame: &RgbImage, det: &Detection) -> Option<RgbImage> {
    let (w, h) = frame.dimensions();
    let b = &det.bbox;
    let x1 = b.x1.clamp(0.0, w as f32) as u32;
    let y1 = b.y1.clamp(0.0, h as f32) as u32;
    let x2 = b.x2.clamp(0.0, w as f32) as u32;
    let y2 = b.y2.clamp(0.0, h as f32) as u32;
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(imageops::crop_imm(frame, x1, y1, x2 - x1, y2 - y1).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BBox;

    struct Scripted(Vec<Vec<BBox>>);

    impl PersonDetector for Scripted {
        fn detect(&mut self, _frame: &RgbImage) -> anyhow::Result<Vec<BBox>> {
            if self.0.is_empty() {
                anyhow::bail!("script exhausted");
            }
            Ok(self.0.remove(0))
        }
    }

    fn session(script: Vec<Vec<BBox>>) -> PipelineSession {
        PipelineSession::new(
            "test",
            Box::new(Scripted(script)),
            Box::new(GreedyCentroidTracker::default()),
            &CountingSettings::default(),
        )
    }

    #[test]
    fn metrics_follow_detections() {
        let mut s = session(vec![vec![BBox::around(100.0, 100.0, 20.0); 2]]);
        let out = s.process_frame(RgbImage::new(640, 480));
        assert_eq!(out.metrics.people_count, 2);
        assert_eq!(out.metrics.risk, "Low");
        assert_eq!(out.metrics.frame_index, 0);
        assert_eq!(s.frame_index(), 1);
    }

    #[test]
    fn detector_failure_yields_empty_frame() {
        let mut s = session(vec![]);
        let out = s.process_frame(RgbImage::new(64, 48));
        assert_eq!(out.metrics.people_count, 0);
        assert_eq!(out.metrics.status, "Stable");
    }

    #[test]
    fn crop_is_clamped_to_frame() {
        let frame = RgbImage::new(100, 100);
        let det = Detection::from(BBox::new(-10.0, 90.0, 20.0, 130.0));
        let crop = crop_person(&frame, &det).unwrap();
        assert_eq!(crop.dimensions(), (20, 10));
        let outside = Detection::from(BBox::new(150.0, 150.0, 160.0, 160.0));
        assert!(crop_person(&frame, &outside).is_none());
    }
}
