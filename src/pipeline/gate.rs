// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 周期任务闸门 + 满员告警锁存

use tracing::info;

/// 人脸比对闸门: 只在第 0, N, 2N... 帧打开
#[derive(Clone, Copy, Debug)]
pub struct FaceMatchGate {
    cadence: u64,
}

impl FaceMatchGate {
    /// cadence 为 0 时闸门永不打开
    pub fn new(cadence: u64) -> Self {
        Self { cadence }
    }

    pub fn on_cadence(&self, frame_index: u64) -> bool {
        self.cadence > 0 && frame_index % self.cadence == 0
    }

    /// 同时要求: 命中周期, 至少一张参考人脸, 本帧至少检测到一人
    pub fn opens(&self, frame_index: u64, reference_count: usize, person_count: usize) -> bool {
        self.on_cadence(frame_index) && reference_count > 0 && person_count > 0
    }
}

/// 容量告警状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapacityState {
    Normal,
    AtCapacity,
}

/// 单次触发锁存: NORMAL → AT_CAPACITY, 不会回退
#[derive(Clone, Debug)]
pub struct CapacityLatch {
    threshold: u64,
    state: CapacityState,
}

impl CapacityLatch {
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            state: CapacityState::Normal,
        }
    }

    /// 观察当前人数, 仅在首次超过阈值的那一帧返回 true
    pub fn observe(&mut self, occupancy: u64) -> bool {
        if self.state == CapacityState::Normal && occupancy > self.threshold {
            self.state = CapacityState::AtCapacity;
            info!("🚨 人数 {} 超过上限 {}, 进入满员状态", occupancy, self.threshold);
            return true;
        }
        false
    }

    pub fn state(&self) -> CapacityState {
        self.state
    }

    pub fn at_capacity(&self) -> bool {
        self.state == CapacityState::AtCapacity
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }
}
