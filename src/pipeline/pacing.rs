// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 节拍调度 (Pacing scheduler)
//!
//! 每轮记录开始时间, 处理耗时不足一帧间隔则睡眠补齐, 否则立即进入下一轮.
//! 超时只计数; 文件源每次超时告警一次, 实时源不告警.

use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

/// 本轮节拍决策
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaceDecision {
    /// 睡眠剩余时间
    Sleep(Duration),
    /// 超出帧间隔的时长 (不睡眠)
    Overrun(Duration),
}

impl PaceDecision {
    pub fn sleep_time(&self) -> Duration {
        match self {
            PaceDecision::Sleep(d) => *d,
            PaceDecision::Overrun(_) => Duration::ZERO,
        }
    }
}

pub struct PacingScheduler {
    frame_interval: Duration,
    warn_on_overrun: bool,
    cycles: u64,
    overruns: u64,
    warnings: u64,
}

impl PacingScheduler {
    /// `warn_on_overrun` 对文件源为 true
    pub fn new(fps: f64, warn_on_overrun: bool) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 30.0 };
        Self {
            frame_interval: Duration::from_secs_f64(1.0 / fps),
            warn_on_overrun,
            cycles: 0,
            overruns: 0,
            warnings: 0,
        }
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    /// 根据本轮处理耗时给出决策 (纯计算 + 统计, 不睡眠)
    pub fn pace(&mut self, processing: Duration) -> PaceDecision {
        self.cycles += 1;
        if processing < self.frame_interval {
            return PaceDecision::Sleep(self.frame_interval - processing);
        }

        self.overruns += 1;
        let over = processing - self.frame_interval;
        if self.warn_on_overrun {
            self.warnings += 1;
            warn!(
                "⏱️ 处理超时: {:.1}ms > 帧间隔 {:.1}ms",
                processing.as_secs_f64() * 1000.0,
                self.frame_interval.as_secs_f64() * 1000.0
            );
        }
        PaceDecision::Overrun(over)
    }

    /// 结束一轮: 计算耗时并按决策睡眠
    pub fn finish_cycle(&mut self, started: Instant) -> PaceDecision {
        let decision = self.pace(started.elapsed());
        if let PaceDecision::Sleep(d) = decision {
            thread::sleep(d);
        }
        decision
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// 已输出的超时告警条数
    pub fn warnings(&self) -> u64 {
        self.warnings
    }
}
