//! 检测器接口 (Detector)
//! 职责: 模型输入图像 (model_size × model_size RGBA) → 模型空间检测结果

use std::path::Path;

use anyhow::Context;
use image::RgbaImage;
use tracing::info;

use super::types::Detection;
use crate::error::PipelineError;

/// 外部检测器
///
/// 从工作线程同步调用,同一时刻只有一次调用;内部可以并行,但必须返回完整结果。
pub trait ObjectDetector: Send {
    /// 检测
    ///
    /// # Arguments
    /// * `image` - 已经letterbox处理的正方形RGBA模型输入
    ///
    /// # Returns
    /// * `Vec<Detection>` - 模型空间坐标的检测结果,置信度 ∈ [0,1]
    fn detect(&mut self, image: &RgbaImage) -> anyhow::Result<Vec<Detection>>;

    fn name(&self) -> &str {
        "detector"
    }
}

/// 闭包直接作为检测器使用
impl<F> ObjectDetector for F
where
    F: FnMut(&RgbaImage) -> anyhow::Result<Vec<Detection>> + Send,
{
    fn detect(&mut self, image: &RgbaImage) -> anyhow::Result<Vec<Detection>> {
        self(image)
    }
}

/// 校验检测器输出: 坐标必须有限,置信度必须在 [0,1]
///
/// 任意一条非法即视为整帧检测失败。
pub fn validate_detections(detections: &[Detection]) -> Result<(), PipelineError> {
    for (i, det) in detections.iter().enumerate() {
        if !det.location.is_finite() {
            return Err(PipelineError::DetectorFailure(format!(
                "detection #{} ({}) has non-finite box {:?}",
                i, det.label, det.location
            )));
        }
        if !(0.0..=1.0).contains(&det.confidence) {
            return Err(PipelineError::DetectorFailure(format!(
                "detection #{} ({}) has confidence {} outside [0,1]",
                i, det.label, det.confidence
            )));
        }
    }
    Ok(())
}

/// 回放检测器: 按帧循环返回JSON文件中预先录制的检测结果
///
/// 文件格式: `[[{label, confidence, location:{top,left,bottom,right}}, ...], ...]`,
/// 外层每个元素对应一帧。
pub struct ReplayDetector {
    frames: Vec<Vec<Detection>>,
    cursor: usize,
}

impl ReplayDetector {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self { frames, cursor: 0 }
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detections from {}", path.display()))?;
        let frames: Vec<Vec<Detection>> = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse detections in {}", path.display()))?;
        info!(
            "✅ 回放检测器加载成功: {} ({}帧)",
            path.display(),
            frames.len()
        );
        Ok(Self::new(frames))
    }
}

impl ObjectDetector for ReplayDetector {
    fn detect(&mut self, _image: &RgbaImage) -> anyhow::Result<Vec<Detection>> {
        if self.frames.is_empty() {
            return Ok(Vec::new());
        }
        let detections = self.frames[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.frames.len();
        Ok(detections)
    }

    fn name(&self) -> &str {
        "replay"
    }
}
