// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测适配器 (Detection adapter)
//! 职责: 输入一帧RGB图像 → 输出"人"类别的检测框
//!
//! 检测模型本身是外部协作者, 这里只负责:
//! - 预处理 (等比缩放 + 灰色填充 + HWC→CHW)
//! - YOLOv8 输出 `[1, 4 + nc, anchors]` 的解码 (argmax类别==0, 置信度过滤, NMS)
//! - 坐标还原到原始帧

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use image::{imageops, RgbImage};
use ndarray::{Array, ArrayView2, Axis};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
};
use tracing::{debug, info};

use super::types::BBox;

/// COCO 数据集中"人"的类别ID
pub const PERSON_CLASS_ID: usize = 0;

/// 检测器统一接口
pub trait PersonDetector: Send {
    /// 检测一帧中的所有人 (坐标为输入帧像素坐标)
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BBox>>;
}

/// 多会话共享的检测器 (推理引擎无会话状态, 仅需互斥)
#[derive(Clone)]
pub struct SharedDetector(Arc<Mutex<Box<dyn PersonDetector>>>);

impl SharedDetector {
    pub fn new(detector: Box<dyn PersonDetector>) -> Self {
        Self(Arc::new(Mutex::new(detector)))
    }
}

impl PersonDetector for SharedDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BBox>> {
        let mut model = self
            .0
            .lock()
            .map_err(|_| anyhow!("detector mutex poisoned"))?;
        model.detect(frame)
    }
}

/// 检测参数
#[derive(Clone, Debug)]
pub struct DetectorOptions {
    pub input_size: u32,
    pub num_classes: usize,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub use_cuda: bool,
    pub intra_threads: usize,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            input_size: 640,
            num_classes: 80,
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            use_cuda: false,
            intra_threads: 4,
        }
    }
}

/// ONNX Runtime YOLOv8 行人检测器
pub struct OnnxPersonDetector {
    session: Session,
    options: DetectorOptions,
}

impl OnnxPersonDetector {
    pub fn new(model_path: impl AsRef<Path>, options: DetectorOptions) -> Result<Self> {
        let model_path = model_path.as_ref();
        info!("📦 加载检测模型: {}", model_path.display());

        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(options.intra_threads)?;
        if options.use_cuda {
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])?;
        }
        let session = builder
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load model {}", model_path.display()))?;

        info!(
            "✅ 检测模型加载成功 (输入 {}x{}, 置信度 {:.2})",
            options.input_size, options.input_size, options.conf_threshold
        );
        Ok(Self { session, options })
    }

    /// 等比缩放比例
    fn scale_ratio(&self, w0: u32, h0: u32) -> f32 {
        let size = self.options.input_size as f32;
        (size / w0 as f32).min(size / h0 as f32)
    }

    /// 预处理: 等比缩放到左上角, 其余填充 144/255, 输出 CHW
    fn preprocess(&self, frame: &RgbImage) -> (Vec<f32>, f32) {
        let size = self.options.input_size as usize;
        let ratio = self.scale_ratio(frame.width(), frame.height());
        let w_new = ((frame.width() as f32 * ratio).round() as u32).clamp(1, size as u32);
        let h_new = ((frame.height() as f32 * ratio).round() as u32).clamp(1, size as u32);
        let resized = imageops::resize(frame, w_new, h_new, imageops::FilterType::Triangle);

        let mut ys = Array::from_elem((1, 3, size, size), 144.0f32 / 255.0);
        for (x, y, rgb) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            let [r, g, b] = rgb.0;
            ys[[0, 0, y, x]] = r as f32 / 255.0;
            ys[[0, 1, y, x]] = g as f32 / 255.0;
            ys[[0, 2, y, x]] = b as f32 / 255.0;
        }
        (ys.into_raw_vec_and_offset().0, ratio)
    }
}

impl PersonDetector for OnnxPersonDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BBox>> {
        let start = Instant::now();
        let (input, ratio) = self.preprocess(frame);
        let size = self.options.input_size as usize;
        let shape = [1, 3, size, size];
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), input.into_boxed_slice()))?;

        let outputs = self.session.run(ort::inputs!["images" => input_value])?;
        let (_, data) = outputs[0].try_extract_tensor::<f32>()?;

        let boxes = decode_person_boxes(
            data,
            self.options.num_classes,
            ratio,
            frame.width() as f32,
            frame.height() as f32,
            self.options.conf_threshold,
            self.options.iou_threshold,
        )?;
        debug!(
            "🎯 检测到 {} 人 | {:.1}ms",
            boxes.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(boxes)
    }
}

/// 解码 YOLOv8 输出 (行: cx, cy, w, h, 各类别分数; 列: anchor)
///
/// 只保留 argmax 类别为"人"且分数不低于阈值的框, 再做 NMS.
pub fn decode_person_boxes(
    output: &[f32],
    num_classes: usize,
    ratio: f32,
    frame_w: f32,
    frame_h: f32,
    conf_threshold: f32,
    iou_threshold: f32,
) -> Result<Vec<BBox>> {
    const CXYWH_OFFSET: usize = 4;
    let rows = CXYWH_OFFSET + num_classes;
    if output.is_empty() || output.len() % rows != 0 {
        return Err(anyhow!(
            "unexpected detector output length {} for {} classes",
            output.len(),
            num_classes
        ));
    }
    let anchors = output.len() / rows;
    let preds = ArrayView2::from_shape((rows, anchors), output)?;

    let mut boxes = Vec::new();
    for pred in preds.axis_iter(Axis(1)) {
        let mut best = (0usize, f32::MIN);
        for c in 0..num_classes {
            let score = pred[CXYWH_OFFSET + c];
            if score > best.1 {
                best = (c, score);
            }
        }
        let (class_id, confidence) = best;
        if class_id != PERSON_CLASS_ID || confidence < conf_threshold {
            continue;
        }

        let cx = pred[0] / ratio;
        let cy = pred[1] / ratio;
        let w = pred[2] / ratio;
        let h = pred[3] / ratio;
        boxes.push(BBox {
            x1: (cx - w / 2.0).clamp(0.0, frame_w),
            y1: (cy - h / 2.0).clamp(0.0, frame_h),
            x2: (cx + w / 2.0).clamp(0.0, frame_w),
            y2: (cy + h / 2.0).clamp(0.0, frame_h),
            confidence,
        });
    }

    non_max_suppression(&mut boxes, iou_threshold);
    Ok(boxes)
}

/// 按置信度降序的贪心 NMS
pub fn non_max_suppression(xs: &mut Vec<BBox>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if xs[prev_index].iou(&xs[index]) > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 构造 [4 + nc, anchors] 的输出张量
    fn tensor(nc: usize, anchors: &[([f32; 4], usize, f32)]) -> Vec<f32> {
        let n = anchors.len();
        let mut out = vec![0.0; (4 + nc) * n];
        for (i, (cxcywh, cls, score)) in anchors.iter().enumerate() {
            for r in 0..4 {
                out[r * n + i] = cxcywh[r];
            }
            out[(4 + cls) * n + i] = *score;
        }
        out
    }

    #[test]
    fn keeps_only_confident_people() {
        let out = tensor(
            3,
            &[
                ([100.0, 100.0, 40.0, 80.0], 0, 0.9),
                ([300.0, 100.0, 40.0, 80.0], 2, 0.95),
                ([500.0, 100.0, 40.0, 80.0], 0, 0.1),
            ],
        );
        let boxes = decode_person_boxes(&out, 3, 1.0, 640.0, 480.0, 0.25, 0.45).unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].centroid().x, 100.0);
        assert_eq!(boxes[0].x1, 80.0);
        assert_eq!(boxes[0].y2, 140.0);
    }

    #[test]
    fn overlapping_people_are_suppressed() {
        let out = tensor(
            1,
            &[
                ([100.0, 100.0, 40.0, 80.0], 0, 0.8),
                ([102.0, 101.0, 40.0, 80.0], 0, 0.9),
                ([400.0, 100.0, 40.0, 80.0], 0, 0.7),
            ],
        );
        let boxes = decode_person_boxes(&out, 1, 1.0, 640.0, 480.0, 0.25, 0.45).unwrap();
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].confidence, 0.9);
    }

    #[test]
    fn coordinates_are_rescaled_and_clamped() {
        let out = tensor(1, &[([10.0, 10.0, 40.0, 40.0], 0, 0.9)]);
        let boxes = decode_person_boxes(&out, 1, 0.5, 640.0, 480.0, 0.25, 0.45).unwrap();
        assert_eq!(boxes[0].x1, 0.0);
        assert_eq!(boxes[0].x2, 60.0);
    }

    #[test]
    fn malformed_output_is_an_error() {
        assert!(decode_person_boxes(&[1.0, 2.0, 3.0], 80, 1.0, 640.0, 480.0, 0.25, 0.45).is_err());
    }
}
