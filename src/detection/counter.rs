// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 过线计数 (Crossing counter)
//!
//! 每条轨迹第一次满足过线条件时计数一次, counted 标记对该轨迹终身有效.
//! 注意: 轨迹被丢弃后再次出现会得到新ID, 会被重复计数.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::tracker::Track;

/// 计数方向
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LineDirection {
    /// 中心点 y 大于计数线
    #[default]
    Down,
    /// 中心点 y 小于计数线
    Up,
}

impl LineDirection {
    /// 过线判定
    pub fn crossed(&self, cy: f32, line_position: f32) -> bool {
        match self {
            LineDirection::Down => cy > line_position,
            LineDirection::Up => cy < line_position,
        }
    }
}

impl fmt::Display for LineDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineDirection::Down => write!(f, "down"),
            LineDirection::Up => write!(f, "up"),
        }
    }
}

impl FromStr for LineDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "down" => Ok(LineDirection::Down),
            "up" => Ok(LineDirection::Up),
            other => Err(format!("unknown direction '{}', expected 'down' or 'up'", other)),
        }
    }
}

/// 占用计数器 + 过线判定
#[derive(Clone, Debug)]
pub struct CrossingCounter {
    line_position: f32,
    direction: LineDirection,
    total: u64,
}

impl CrossingCounter {
    pub fn new(line_position: f32, direction: LineDirection) -> Self {
        Self {
            line_position,
            direction,
            total: 0,
        }
    }

    /// 检查所有活跃轨迹, 返回本帧新计数的轨迹ID
    pub fn apply(&mut self, tracks: &mut [Track]) -> Vec<u64> {
        let mut fired = Vec::new();
        for track in tracks.iter_mut() {
            if track.counted {
                continue;
            }
            if self.direction.crossed(track.centroid.y, self.line_position) {
                track.counted = true;
                self.total += 1;
                fired.push(track.id);
            }
        }
        fired
    }

    /// 当前累计人数 (单调不减)
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn line_position(&self) -> f32 {
        self.line_position
    }

    pub fn direction(&self) -> LineDirection {
        self.direction
    }
}
