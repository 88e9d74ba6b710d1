// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 画面标注: 检测框 / 轨迹ID / 计数线 / 指标面板 / 满员横幅

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use tracing::{info, warn};

use crate::detection::tracker::id_to_color;
use crate::detection::{Detection, FrameMetrics, Track};

const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

pub const CAPACITY_BANNER: &str = "VENUE AT CAPACITY - STOP ADMISSION";
pub const OPEN_STATUS: &str = "VENUE STATUS: OPEN";

/// 单帧需要绘制的内容
pub struct Overlay<'a> {
    pub detections: &'a [Detection],
    /// 与 detections 一一对应
    pub tracks: &'a [Track],
    pub metrics: &'a FrameMetrics,
    pub line_position: f32,
    pub threshold: u64,
}

/// 指标面板文字
pub fn panel_lines(metrics: &FrameMetrics) -> Vec<String> {
    let mut lines = vec![
        format!("People Count: {}", metrics.people_count),
        format!("Density: {:.6}", metrics.density),
        format!("Risk Level: {}", metrics.risk),
        format!("Crowd Status: {}", metrics.status),
    ];
    if !metrics.detected_persons.is_empty() {
        lines.push(format!("Detected: {}", metrics.detected_persons.join(", ")));
    }
    lines
}

/// 容量提示文字 (标题, 计数)
pub fn capacity_lines(occupancy: u64, threshold: u64, at_capacity: bool) -> (String, String) {
    if at_capacity {
        (
            CAPACITY_BANNER.to_string(),
            format!("Current: {} | Limit: {}", occupancy, threshold),
        )
    } else {
        (
            OPEN_STATUS.to_string(),
            format!("Current Count: {} / {}", occupancy, threshold),
        )
    }
}

pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    /// 字体加载失败时退化为只画图形
    pub fn new(font_path: Option<&Path>) -> Self {
        let font = font_path.and_then(|path| match std::fs::read(path) {
            Ok(bytes) => match FontVec::try_from_vec(bytes) {
                Ok(font) => {
                    info!("🔤 已加载字体: {}", path.display());
                    Some(font)
                }
                Err(e) => {
                    warn!("⚠️ 字体解析失败 {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                warn!("⚠️ 字体读取失败 {}: {}", path.display(), e);
                None
            }
        });
        Self { font }
    }

    /// 无字体标注器
    pub fn shapes_only() -> Self {
        Self { font: None }
    }

    pub fn annotate(&self, frame: &mut RgbImage, overlay: &Overlay<'_>) {
        let (w, h) = frame.dimensions();
        if w == 0 || h == 0 {
            return;
        }

        // 检测框 + 轨迹ID
        for (det, track) in overlay.detections.iter().zip(overlay.tracks) {
            let b = &det.bbox;
            let x = b.x1.max(0.0) as i32;
            let y = b.y1.max(0.0) as i32;
            let bw = b.width().max(1.0) as u32;
            let bh = b.height().max(1.0) as u32;
            draw_hollow_rect_mut(frame, Rect::at(x, y).of_size(bw, bh), GREEN);
            if bw > 2 && bh > 2 {
                draw_hollow_rect_mut(frame, Rect::at(x + 1, y + 1).of_size(bw - 2, bh - 2), GREEN);
            }

            let (r, g, bl) = id_to_color(track.id);
            let color = Rgb([r, g, bl]);
            let c = track.centroid;
            draw_filled_rect_mut(frame, Rect::at(c.x as i32 - 2, c.y as i32 - 2).of_size(5, 5), color);
            self.label(frame, &format!("ID {}", track.id), x, (y - 16).max(0), 14.0, color, None);
        }

        // 计数线
        let ly = overlay.line_position;
        if ly >= 0.0 && ly < h as f32 {
            for dy in [0.0, 1.0] {
                draw_line_segment_mut(frame, (0.0, ly + dy), (w as f32, ly + dy), RED);
            }
        }

        // 指标面板
        let mut y0 = 8;
        for line in panel_lines(overlay.metrics) {
            y0 += self.label(frame, &line, 10, y0, 18.0, WHITE, Some(BLACK)) + 6;
        }

        // 容量状态
        let metrics = overlay.metrics;
        let (title, count) = capacity_lines(metrics.occupancy, overlay.threshold, metrics.at_capacity);
        if metrics.at_capacity {
            self.banner(frame, &title, &count);
        } else {
            y0 += 6;
            y0 += self.label(frame, &title, 10, y0, 20.0, GREEN, Some(BLACK)) + 6;
            self.label(frame, &count, 10, y0, 18.0, WHITE, Some(BLACK));
        }
    }

    /// 画面居中的满员横幅
    fn banner(&self, frame: &mut RgbImage, title: &str, count: &str) {
        let (w, h) = frame.dimensions();
        let Some(font) = self.font.as_ref() else {
            // 没有字体时用红色边框提示
            for inset in 0..4 {
                if w > 2 * inset && h > 2 * inset {
                    let rect = Rect::at(inset as i32, inset as i32).of_size(w - 2 * inset, h - 2 * inset);
                    draw_hollow_rect_mut(frame, rect, RED);
                }
            }
            return;
        };

        let title_scale = PxScale::from(24.0);
        let count_scale = PxScale::from(19.0);
        let (tw, th) = text_size(title_scale, font, title);
        let (cw, ch) = text_size(count_scale, font, count);
        let tx = (w as i32 - tw as i32) / 2;
        let ty = (h as i32 - th as i32) / 2 - 20;
        let cx = (w as i32 - cw as i32) / 2;
        let cy = ty + th as i32 + 20;

        let pad = 10;
        draw_filled_rect_mut(
            frame,
            Rect::at(tx - pad, ty - pad).of_size(tw + 2 * pad as u32, th + 2 * pad as u32),
            BLACK,
        );
        draw_filled_rect_mut(
            frame,
            Rect::at(cx - pad, cy - pad).of_size(cw + 2 * pad as u32, ch + 2 * pad as u32),
            BLACK,
        );
        draw_text_mut(frame, RED, tx, ty, title_scale, font, title);
        draw_text_mut(frame, WHITE, cx, cy, count_scale, font, count);
    }

    /// 带底色的文字, 返回占用高度
    fn label(
        &self,
        frame: &mut RgbImage,
        text: &str,
        x: i32,
        y: i32,
        px: f32,
        color: Rgb<u8>,
        background: Option<Rgb<u8>>,
    ) -> i32 {
        let Some(font) = self.font.as_ref() else {
            return 0;
        };
        let scale = PxScale::from(px);
        let (tw, th) = text_size(scale, font, text);
        if let Some(bg) = background {
            draw_filled_rect_mut(
                frame,
                Rect::at(x - 5, y - 5).of_size(tw.max(1) + 10, th.max(1) + 10),
                bg,
            );
        }
        draw_text_mut(frame, color, x, y, scale, font, text);
        th as i32 + 4
    }
}
