// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 人流检测系统数据结构定义
/// Data structures for the crowd detection pipeline
use serde::Serialize;

// ========== 数据结构 ==========

/// 检测框 (Detection bounding box)
#[derive(Clone, Debug, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence: 1.0,
        }
    }

    /// 以中心点构造一个方形框 (测试与模拟输入常用)
    pub fn around(cx: f32, cy: f32, half: f32) -> Self {
        Self::new(cx - half, cy - half, cx + half, cy + half)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// 获取中心点
    pub fn centroid(&self) -> Centroid {
        Centroid {
            x: (self.x1 + self.x2) / 2.0,
            y: (self.y1 + self.y2) / 2.0,
        }
    }

    /// 计算两个边界框的IOU (Intersection over Union)
    pub fn iou(&self, other: &BBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }
}

/// 中心点 (Centroid)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Centroid {
    pub x: f32,
    pub y: f32,
}

impl Centroid {
    pub fn distance(&self, other: &Centroid) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// 单帧中的一个人 (检测框 + 中心点)
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub centroid: Centroid,
}

impl From<BBox> for Detection {
    fn from(bbox: BBox) -> Self {
        let centroid = bbox.centroid();
        Self { bbox, centroid }
    }
}

/// 人群风险等级
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        }
    }
}

/// 人群状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum CrowdStatus {
    Stable,
    Unstable,
    Congested,
    Critical,
}

impl CrowdStatus {
    pub fn label(&self) -> &'static str {
        match self {
            CrowdStatus::Stable => "Stable",
            CrowdStatus::Unstable => "Unstable",
            CrowdStatus::Congested => "Congested",
            CrowdStatus::Critical => "Critical",
        }
    }
}

/// 单帧指标快照 (构造后只读)
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameMetrics {
    pub frame_index: u64,
    pub people_count: usize,
    #[serde(serialize_with = "round_density")]
    pub density: f64,
    pub risk: &'static str,
    pub status: &'static str,
    pub detected_persons: Vec<String>,
    pub occupancy: u64,
    pub at_capacity: bool,
}

fn round_density<S: serde::Serializer>(density: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64((density * 1e6).round() / 1e6)
}
