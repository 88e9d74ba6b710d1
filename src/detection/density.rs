// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 人群密度分级 (Density classifier)
//!
//! density = 人数 / 画面像素面积. 风险与状态两套标签共用同一组阈值,
//! 由同一个 tier 派生, 保证两者永远一致.

use super::types::{CrowdStatus, RiskLevel};

/// 升序阈值: < 1e-4, < 1.5e-4, < 2e-4, 其余
pub const DENSITY_THRESHOLDS: [f64; 3] = [0.0001, 0.00015, 0.0002];

/// 计算密度, 面积为0时返回0
pub fn density(person_count: usize, frame_area: u64) -> f64 {
    if frame_area == 0 {
        return 0.0;
    }
    person_count as f64 / frame_area as f64
}

/// 密度所在档位 (0..=3)
pub fn tier(density: f64) -> usize {
    DENSITY_THRESHOLDS
        .iter()
        .position(|&t| density < t)
        .unwrap_or(DENSITY_THRESHOLDS.len())
}

pub fn risk_level(density: f64) -> RiskLevel {
    match tier(density) {
        0 => RiskLevel::Low,
        1 => RiskLevel::Medium,
        2 => RiskLevel::High,
        _ => RiskLevel::Critical,
    }
}

pub fn crowd_status(density: f64) -> CrowdStatus {
    match tier(density) {
        0 => CrowdStatus::Stable,
        1 => CrowdStatus::Unstable,
        2 => CrowdStatus::Congested,
        _ => CrowdStatus::Critical,
    }
}

/// 一次得到 (density, risk, status)
pub fn classify(person_count: usize, frame_area: u64) -> (f64, RiskLevel, CrowdStatus) {
    let d = density(person_count, frame_area);
    (d, risk_level(d), crowd_status(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    const AREA_640X480: u64 = 640 * 480;

    #[test]
    fn boundaries_fall_into_upper_tier() {
        assert_eq!(risk_level(0.0), RiskLevel::Low);
        assert_eq!(risk_level(0.0001), RiskLevel::Medium);
        assert_eq!(risk_level(0.00015), RiskLevel::High);
        assert_eq!(risk_level(0.0002), RiskLevel::Critical);
        assert_eq!(crowd_status(0.0001), CrowdStatus::Unstable);
        assert_eq!(crowd_status(0.00015), CrowdStatus::Congested);
        assert_eq!(crowd_status(1.0), CrowdStatus::Critical);
    }

    #[test]
    fn risk_never_decreases_with_more_people() {
        let mut last = RiskLevel::Low;
        let mut last_status = CrowdStatus::Stable;
        for n in 0..200 {
            let (_, risk, status) = classify(n, AREA_640X480);
            assert!(risk >= last, "risk dropped at {} people", n);
            assert!(status >= last_status, "status dropped at {} people", n);
            last = risk;
            last_status = status;
        }
        assert_eq!(last, RiskLevel::Critical);
    }

    #[test]
    fn zero_area_is_zero_density() {
        assert_eq!(density(10, 0), 0.0);
        assert_eq!(classify(10, 0).1, RiskLevel::Low);
    }

    #[test]
    fn labels_stay_in_lockstep() {
        for n in 0..120 {
            let d = density(n, AREA_640X480);
            assert_eq!(risk_level(d) as usize, crowd_status(d) as usize);
        }
    }
}
