// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 多目标跟踪 (Track manager)
//! Greedy first-match centroid tracking behind a pluggable strategy trait.
//!
//! 关联规则:
//! 1. 按输入顺序遍历检测, 按插入顺序遍历已有轨迹
//! 2. 第一个距离小于阈值且本帧未被认领的轨迹即为匹配 (先到先得, 不是最优匹配)
//! 3. 无匹配则新建轨迹 (新ID, counted = false)
//! 4. 本帧未被认领的轨迹直接丢弃 (可选宽限帧数, 默认0)

use super::types::{Centroid, Detection};

/// 默认关联距离阈值 (像素)
pub const DEFAULT_MATCH_DISTANCE: f32 = 50.0;

// ========== 公共数据结构 ==========

/// 跟踪对象
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    /// 唯一跟踪ID (单调分配, 永不复用)
    pub id: u64,

    /// 最近一次的中心点
    pub centroid: Centroid,

    /// 是否已计入人数
    pub counted: bool,

    /// 连续未匹配帧数 (仅宽限模式下非0)
    pub frames_missed: u32,
}

impl Track {
    fn new(id: u64, centroid: Centroid) -> Self {
        Self {
            id,
            centroid,
            counted: false,
            frames_missed: 0,
        }
    }
}

// ========== 跟踪器统一接口 ==========

/// 跟踪策略 Trait
///
/// 任何关联算法(贪心、匈牙利、运动预测门控等)都应实现此接口,
/// 调用方只依赖 `update` 返回的活跃轨迹集合.
pub trait TrackingStrategy: Send {
    /// 用当前帧检测更新跟踪器, 返回本帧活跃轨迹 (每个检测对应恰好一条)
    fn update(&mut self, detections: &[Detection]) -> &[Track];

    /// 可变访问本帧活跃轨迹 (计数器需要翻转 counted 标记)
    fn live_tracks_mut(&mut self) -> &mut [Track];

    /// 本帧活跃轨迹
    fn live_tracks(&self) -> &[Track];

    /// 重置跟踪器 (清除所有轨迹, ID 计数不回退)
    fn reset(&mut self);

    /// 获取当前跟踪数量
    fn track_count(&self) -> usize {
        self.live_tracks().len()
    }
}

/// 贪心中心点跟踪器
pub struct GreedyCentroidTracker {
    next_id: u64,
    max_distance: f32,
    max_missed_frames: u32,
    live: Vec<Track>,
    /// 宽限期内暂时丢失的轨迹, 仍可被认领
    lost: Vec<Track>,
}

impl GreedyCentroidTracker {
    pub fn new(max_distance: f32) -> Self {
        Self {
            next_id: 0,
            max_distance,
            max_missed_frames: 0,
            live: Vec::new(),
            lost: Vec::new(),
        }
    }

    /// 未匹配轨迹的保留帧数. 0 表示本帧未匹配立即丢弃.
    pub fn with_grace_frames(mut self, frames: u32) -> Self {
        self.max_missed_frames = frames;
        self
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    fn allocate(&mut self, centroid: Centroid) -> Track {
        let track = Track::new(self.next_id, centroid);
        self.next_id += 1;
        track
    }
}

impl Default for GreedyCentroidTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_DISTANCE)
    }
}

impl TrackingStrategy for GreedyCentroidTracker {
    fn update(&mut self, detections: &[Detection]) -> &[Track] {
        // 候选: 上一帧活跃轨迹在前 (插入顺序), 宽限轨迹在后
        let mut candidates: Vec<Track> = std::mem::take(&mut self.live);
        candidates.append(&mut self.lost);
        let mut claimed = vec![false; candidates.len()];

        let mut next_live = Vec::with_capacity(detections.len());
        for det in detections {
            let hit = candidates.iter().enumerate().position(|(i, t)| {
                !claimed[i] && det.centroid.distance(&t.centroid) < self.max_distance
            });

            match hit {
                Some(i) => {
                    claimed[i] = true;
                    let mut track = candidates[i].clone();
                    track.centroid = det.centroid;
                    track.frames_missed = 0;
                    next_live.push(track);
                }
                None => {
                    let track = self.allocate(det.centroid);
                    next_live.push(track);
                }
            }
        }

        // 未认领的轨迹: 默认丢弃, 宽限模式下保留若干帧
        if self.max_missed_frames > 0 {
            for (i, mut track) in candidates.into_iter().enumerate() {
                if claimed[i] {
                    continue;
                }
                track.frames_missed += 1;
                if track.frames_missed <= self.max_missed_frames {
                    self.lost.push(track);
                }
            }
        }

        self.live = next_live;
        &self.live
    }

    fn live_tracks_mut(&mut self) -> &mut [Track] {
        &mut self.live
    }

    fn live_tracks(&self) -> &[Track] {
        &self.live
    }

    fn reset(&mut self) {
        self.live.clear();
        self.lost.clear();
    }
}

// ========== 工具函数 ==========

/// 根据ID生成不同颜色
pub fn id_to_color(id: u64) -> (u8, u8, u8) {
    let hue = (id as f32 * 137.508) % 360.0; // 黄金角度采样
    hsv_to_rgb(hue, 0.8, 0.9)
}

/// HSV转RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
        (c, x, 0.0)
    } else if h < 120.0 {
        (x, c, 0.0)
    } else if h < 180.0 {
        (0.0, c, x)
    } else if h < 240.0 {
        (0.0, x, c)
    } else if h < 300.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    (
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::BBox;

    fn dets(points: &[(f32, f32)]) -> Vec<Detection> {
        points
            .iter()
            .map(|&(x, y)| Detection::from(BBox::around(x, y, 10.0)))
            .collect()
    }

    fn ids(tracks: &[Track]) -> Vec<u64> {
        tracks.iter().map(|t| t.id).collect()
    }

    #[test]
    fn near_detection_keeps_id_far_one_gets_new_id() {
        let mut tracker = GreedyCentroidTracker::default();
        assert_eq!(ids(tracker.update(&dets(&[(100.0, 100.0), (500.0, 500.0)]))), vec![0, 1]);

        let live = tracker.update(&dets(&[(105.0, 104.0), (800.0, 800.0)]));
        assert_eq!(ids(live), vec![0, 2]);
        assert_eq!(live[0].centroid, Centroid { x: 105.0, y: 104.0 });
    }

    #[test]
    fn first_come_first_served_claims() {
        let mut tracker = GreedyCentroidTracker::default();
        tracker.update(&dets(&[(100.0, 100.0)]));

        // 两个检测都在阈值内, 第一个认领, 第二个新建
        let live = tracker.update(&dets(&[(130.0, 100.0), (110.0, 100.0)]));
        assert_eq!(ids(live), vec![0, 1]);
    }

    #[test]
    fn first_match_not_best_match() {
        let mut tracker = GreedyCentroidTracker::default();
        tracker.update(&dets(&[(100.0, 100.0), (140.0, 100.0)]));

        // (135,100) 离轨迹1更近, 但轨迹0先被扫描到且距离 < 50
        let live = tracker.update(&dets(&[(135.0, 100.0)]));
        assert_eq!(ids(live), vec![0]);
    }

    #[test]
    fn counted_flag_survives_matching() {
        let mut tracker = GreedyCentroidTracker::default();
        tracker.update(&dets(&[(100.0, 100.0)]));
        tracker.live_tracks_mut()[0].counted = true;

        let live = tracker.update(&dets(&[(110.0, 110.0)]));
        assert!(live[0].counted);
    }

    #[test]
    fn empty_frame_drops_everything_and_ids_never_reused() {
        let mut tracker = GreedyCentroidTracker::default();
        tracker.update(&dets(&[(100.0, 100.0)]));
        assert!(tracker.update(&[]).is_empty());

        let live = tracker.update(&dets(&[(100.0, 100.0)]));
        assert_eq!(ids(live), vec![1]);
        assert!(!live[0].counted);
    }

    #[test]
    fn grace_period_reclaims_lost_track() {
        let mut tracker = GreedyCentroidTracker::default().with_grace_frames(2);
        tracker.update(&dets(&[(100.0, 100.0)]));
        tracker.live_tracks_mut()[0].counted = true;

        assert_eq!(tracker.update(&[]).len(), 0);
        let live = tracker.update(&dets(&[(102.0, 101.0)]));
        assert_eq!(ids(live), vec![0]);
        assert!(live[0].counted);
    }

    #[test]
    fn grace_period_expires() {
        let mut tracker = GreedyCentroidTracker::default().with_grace_frames(1);
        tracker.update(&dets(&[(100.0, 100.0)]));
        tracker.update(&[]);
        tracker.update(&[]);

        let live = tracker.update(&dets(&[(100.0, 100.0)]));
        assert_eq!(ids(live), vec![1]);
    }

    #[test]
    fn every_detection_maps_to_one_track() {
        let mut tracker = GreedyCentroidTracker::default();
        let frame = dets(&[(10.0, 10.0), (12.0, 12.0), (14.0, 14.0), (400.0, 10.0)]);
        tracker.update(&frame);
        let live = tracker.update(&frame);
        assert_eq!(live.len(), frame.len());

        let mut unique = ids(live);
        unique.dedup();
        assert_eq!(unique.len(), frame.len());
    }

    #[test]
    fn colors_differ_between_neighbours() {
        assert_ne!(id_to_color(1), id_to_color(2));
    }
}
