// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 整条会话的场景测试: 假检测器 + 假视频源 + 记录输出

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crowd_sentinel::config::CountingSettings;
use crowd_sentinel::detection::{
    BBox, Detection, FrameMetrics, GreedyCentroidTracker, LineDirection, PersonDetector,
    TrackingStrategy,
};
use crowd_sentinel::input::{FrameRead, FrameSource};
use crowd_sentinel::output::FrameSink;
use crowd_sentinel::pipeline::{EndReason, PipelineSession};
use crowd_sentinel::services::{FaceMatcher, FaceRegistry, MatchVerdict, Notifier};
use crowd_sentinel::{SessionError, SinkError, StopSignal};
use image::RgbImage;

const W: u32 = 640;
const H: u32 = 480;

struct ScriptedDetector(VecDeque<Vec<BBox>>);

impl ScriptedDetector {
    fn new(frames: Vec<Vec<(f32, f32)>>) -> Self {
        Self(
            frames
                .into_iter()
                .map(|people| {
                    people
                        .into_iter()
                        .map(|(x, y)| BBox::around(x, y, 15.0))
                        .collect()
                })
                .collect(),
        )
    }
}

impl PersonDetector for ScriptedDetector {
    fn detect(&mut self, _frame: &RgbImage) -> anyhow::Result<Vec<BBox>> {
        Ok(self.0.pop_front().unwrap_or_default())
    }
}

enum Step {
    Frame,
    Timeout,
}

struct ScriptedSource {
    steps: VecDeque<Step>,
    live: bool,
    reads: usize,
    /// 第一次超时时触发停止 (模拟等帧期间按下 Ctrl-C)
    stop_on_timeout: Option<StopSignal>,
}

impl ScriptedSource {
    fn frames(n: usize) -> Self {
        Self::new((0..n).map(|_| Step::Frame).collect(), false)
    }

    fn new(steps: Vec<Step>, live: bool) -> Self {
        Self {
            steps: steps.into(),
            live,
            reads: 0,
            stop_on_timeout: None,
        }
    }
}

impl FrameSource for ScriptedSource {
    fn read(&mut self, _timeout: Duration) -> FrameRead {
        self.reads += 1;
        let read = match self.steps.pop_front() {
            Some(Step::Frame) => FrameRead::Frame(RgbImage::new(W, H)),
            Some(Step::Timeout) => FrameRead::Timeout,
            None if self.live => FrameRead::Timeout,
            None => FrameRead::Ended,
        };
        if let (FrameRead::Timeout, Some(stop)) = (&read, self.stop_on_timeout.as_ref()) {
            stop.stop();
        }
        read
    }

    fn fps(&self) -> f64 {
        1000.0
    }

    fn is_live(&self) -> bool {
        self.live
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

#[derive(Default)]
struct RecordingSink {
    metrics: Vec<FrameMetrics>,
    fail_after: Option<usize>,
    closed: usize,
}

impl FrameSink for RecordingSink {
    fn send(&mut self, frame: &RgbImage, metrics: &FrameMetrics) -> Result<(), SinkError> {
        assert_eq!(frame.dimensions(), (W, H));
        if self.fail_after == Some(self.metrics.len()) {
            return Err(SinkError::Disconnected);
        }
        self.metrics.push(metrics.clone());
        Ok(())
    }

    fn close(&mut self) {
        self.closed += 1;
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier(Arc<Mutex<Vec<String>>>);

impl Notifier for RecordingNotifier {
    fn notify(&self, text: &str) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// 每次都失败, 但记录调用次数
#[derive(Clone, Default)]
struct FailingNotifier(Arc<AtomicUsize>);

impl Notifier for FailingNotifier {
    fn notify(&self, _text: &str) -> anyhow::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("telegram unreachable")
    }
}

struct UnreachableMatcher(Arc<AtomicUsize>);

impl FaceMatcher for UnreachableMatcher {
    fn verify(&self, _live: &RgbImage, _reference: &Path) -> anyhow::Result<MatchVerdict> {
        self.0.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("verify service timed out")
    }
}

struct AlwaysMatch(Arc<AtomicUsize>);

impl FaceMatcher for AlwaysMatch {
    fn verify(&self, _live: &RgbImage, _reference: &Path) -> anyhow::Result<MatchVerdict> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(MatchVerdict {
            verified: true,
            distance: Some(0.1),
        })
    }
}

fn counting(line: f32, direction: LineDirection, threshold: u64) -> CountingSettings {
    CountingSettings {
        line_position: line,
        direction,
        threshold,
    }
}

fn session(script: Vec<Vec<(f32, f32)>>, counting: &CountingSettings) -> PipelineSession {
    PipelineSession::new(
        "scenario",
        Box::new(ScriptedDetector::new(script)),
        Box::new(GreedyCentroidTracker::default()),
        counting,
    )
    .with_pacing(false)
}

#[test]
fn scenario_a_track_update_drop_and_spawn() {
    let mut tracker = GreedyCentroidTracker::default();
    let frame1: Vec<Detection> = [(100.0, 100.0), (500.0, 500.0)]
        .iter()
        .map(|&(x, y)| Detection::from(BBox::around(x, y, 10.0)))
        .collect();
    let frame2: Vec<Detection> = [(105.0, 104.0), (800.0, 800.0)]
        .iter()
        .map(|&(x, y)| Detection::from(BBox::around(x, y, 10.0)))
        .collect();

    tracker.update(&frame1);
    let live = tracker.update(&frame2);
    let ids: Vec<u64> = live.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![0, 2]);
    assert_eq!((live[0].centroid.x, live[0].centroid.y), (105.0, 104.0));
}

#[test]
fn scenario_b_counts_on_the_crossing_frame() {
    let script = vec![
        vec![(200.0, 250.0)],
        vec![(200.0, 280.0)],
        vec![(200.0, 310.0)],
        vec![(200.0, 340.0)],
    ];
    let mut s = session(script, &counting(300.0, LineDirection::Down, 30));

    let mut occupancy = Vec::new();
    let mut fired = Vec::new();
    for _ in 0..4 {
        let out = s.process_frame(RgbImage::new(W, H));
        occupancy.push(out.metrics.occupancy);
        fired.push(out.newly_counted.len());
    }
    assert_eq!(occupancy, vec![0, 0, 1, 1]);
    assert_eq!(fired, vec![0, 0, 1, 0]);
}

#[test]
fn scenario_c_capacity_alert_fires_once() {
    // 90 帧空画面, 之后每帧出现一个新的人 (左右交替, 互不关联), 都在线下方
    let mut script: Vec<Vec<(f32, f32)>> = vec![vec![]; 90];
    for i in 0..32 {
        let x = if i % 2 == 0 { 100.0 } else { 400.0 };
        script.push(vec![(x, 400.0)]);
    }
    let notifier = RecordingNotifier::default();
    let mut s = session(script, &counting(300.0, LineDirection::Down, 30))
        .with_notifier(Box::new(notifier.clone()));

    let mut reached_at = Vec::new();
    let mut last = None;
    for frame in 0..122u64 {
        let out = s.process_frame(RgbImage::new(W, H));
        if out.capacity_reached {
            reached_at.push(frame);
        }
        last = Some(out.metrics);
        if frame == 120 {
            assert_eq!(s.occupancy(), 31);
        }
    }

    assert_eq!(reached_at, vec![120]);
    let last = last.unwrap();
    assert_eq!(last.occupancy, 32);
    assert!(last.at_capacity);
    let sent = notifier.0.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("Current: 31 | Limit: 30"));
}

#[test]
fn occupancy_never_decreases() {
    let script: Vec<Vec<(f32, f32)>> = (0..60)
        .map(|i| {
            let y = 200.0 + (i as f32 * 37.0) % 200.0;
            vec![(120.0, y), (480.0, 500.0 - y)]
        })
        .collect();
    let mut s = session(script, &counting(300.0, LineDirection::Up, 1000));
    let mut last = 0;
    for _ in 0..60 {
        let occ = s.process_frame(RgbImage::new(W, H)).metrics.occupancy;
        assert!(occ >= last);
        last = occ;
    }
}

#[test]
fn run_drains_a_file_source_and_closes_the_sink() {
    let script = vec![vec![(100.0, 100.0)]; 5];
    let mut s = session(script, &CountingSettings::default());
    let mut source = ScriptedSource::frames(5);
    let mut sink = RecordingSink::default();

    let summary = s.run(&mut source, &mut sink, &StopSignal::new()).unwrap();
    assert_eq!(summary.end, EndReason::EndOfStream);
    assert_eq!(summary.frames, 5);
    assert_eq!(sink.metrics.len(), 5);
    assert_eq!(sink.closed, 1);
    let indices: Vec<u64> = sink.metrics.iter().map(|m| m.frame_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
}

#[test]
fn transport_failure_ends_the_session() {
    let mut s = session(vec![], &CountingSettings::default());
    let mut source = ScriptedSource::frames(10);
    let mut sink = RecordingSink {
        fail_after: Some(2),
        ..Default::default()
    };

    let err = s.run(&mut source, &mut sink, &StopSignal::new()).unwrap_err();
    assert!(matches!(err, SessionError::TransportFailure(SinkError::Disconnected)));
    assert_eq!(sink.metrics.len(), 2);
    assert_eq!(sink.closed, 1);
}

#[test]
fn live_source_gives_up_after_bounded_retries() {
    let mut s = session(vec![], &CountingSettings::default())
        .with_read_policy(3, Duration::from_millis(1));
    let mut source = ScriptedSource::new(vec![Step::Frame, Step::Timeout, Step::Frame], true);
    let mut sink = RecordingSink::default();

    let summary = s.run(&mut source, &mut sink, &StopSignal::new()).unwrap();
    assert_eq!(summary.end, EndReason::ReadExhausted);
    // 单次超时后恢复不算耗尽
    assert_eq!(sink.metrics.len(), 2);
    assert_eq!(sink.closed, 1);
}

#[test]
fn stop_signal_ends_before_the_next_frame() {
    let mut s = session(vec![], &CountingSettings::default());
    let mut source = ScriptedSource::frames(100);
    let mut sink = RecordingSink::default();
    let stop = StopSignal::new();
    stop.stop();

    let summary = s.run(&mut source, &mut sink, &stop).unwrap();
    assert_eq!(summary.end, EndReason::Stopped);
    assert_eq!(summary.frames, 0);
    assert_eq!(sink.closed, 1);
}

#[test]
fn face_matching_runs_only_on_cadence_frames() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("jane_doe.png"), b"png").unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let script = vec![vec![(100.0, 100.0)]; 61];
    let mut s = session(script, &CountingSettings::default()).with_faces(
        FaceRegistry::new(dir.path()),
        Box::new(AlwaysMatch(Arc::clone(&calls))),
        30,
    );

    let mut recognized = Vec::new();
    for frame in 0..61u64 {
        let out = s.process_frame(RgbImage::new(W, H));
        if !out.metrics.detected_persons.is_empty() {
            assert_eq!(out.metrics.detected_persons, vec!["Jane Doe".to_string()]);
            recognized.push(frame);
        }
    }
    assert_eq!(recognized, vec![0, 30, 60]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn face_gate_stays_closed_with_empty_registry() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let script = vec![vec![(100.0, 100.0)]; 31];
    let mut s = session(script, &CountingSettings::default()).with_faces(
        FaceRegistry::new(dir.path()),
        Box::new(AlwaysMatch(Arc::clone(&calls))),
        30,
    );
    for _ in 0..31 {
        assert!(s.process_frame(RgbImage::new(W, H)).metrics.detected_persons.is_empty());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn stop_during_a_stalled_read_ends_as_stopped() {
    let stop = StopSignal::new();
    let mut s = session(vec![], &CountingSettings::default())
        .with_read_policy(3, Duration::from_millis(1));
    let mut source = ScriptedSource::new(vec![Step::Frame], true);
    source.stop_on_timeout = Some(stop.clone());
    let mut sink = RecordingSink::default();

    let summary = s.run(&mut source, &mut sink, &stop).unwrap();
    assert_eq!(summary.end, EndReason::Stopped);
    // 一帧 + 一次超时, 不再继续重试
    assert_eq!(source.reads, 2);
    assert_eq!(sink.metrics.len(), 1);
    assert_eq!(sink.closed, 1);
}

#[test]
fn face_service_failure_leaves_identities_empty() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("jane_doe.png"), b"png").unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let script = vec![vec![(100.0, 100.0)]; 31];
    let mut s = session(script, &CountingSettings::default()).with_faces(
        FaceRegistry::new(dir.path()),
        Box::new(UnreachableMatcher(Arc::clone(&calls))),
        30,
    );

    for frame in 0..31u64 {
        let out = s.process_frame(RgbImage::new(W, H));
        assert!(out.metrics.detected_persons.is_empty());
        assert_eq!(out.metrics.frame_index, frame);
        assert_eq!(out.metrics.people_count, 1);
    }
    // 第 0 帧和第 30 帧各尝试一次
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn failed_capacity_alert_is_not_retried() {
    // 每帧一个新的人 (左右交替), 阈值 2: 第 3 个人进入时触发
    let script: Vec<Vec<(f32, f32)>> = (0..6)
        .map(|i| vec![(if i % 2 == 0 { 100.0 } else { 400.0 }, 400.0)])
        .collect();
    let notifier = FailingNotifier::default();
    let mut s = session(script, &counting(300.0, LineDirection::Down, 2))
        .with_notifier(Box::new(notifier.clone()));

    let mut reached = Vec::new();
    for frame in 0..6u64 {
        let out = s.process_frame(RgbImage::new(W, H));
        if out.capacity_reached {
            reached.push(frame);
        }
        if frame >= 2 {
            assert!(out.metrics.at_capacity);
        }
    }
    assert_eq!(reached, vec![2]);
    assert!(s.at_capacity());
    assert_eq!(s.occupancy(), 6);
    assert_eq!(notifier.0.load(Ordering::SeqCst), 1);
}
