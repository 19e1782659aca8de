/// 检测结果数据结构定义
/// Data structures for detection results
use serde::{Deserialize, Serialize};

// ========== 数据结构 ==========

/// 检测框 (top, left, bottom, right),单位为像素
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoxRect {
    pub top: f32,
    pub left: f32,
    pub bottom: f32,
    pub right: f32,
}

impl BoxRect {
    pub fn new(top: f32, left: f32, bottom: f32, right: f32) -> Self {
        Self {
            top,
            left,
            bottom,
            right,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.left + self.right) / 2.0, (self.top + self.bottom) / 2.0)
    }

    pub fn is_finite(&self) -> bool {
        self.top.is_finite() && self.left.is_finite() && self.bottom.is_finite() && self.right.is_finite()
    }
}

/// 检测器输出 (模型空间坐标)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    /// 置信度 ∈ [0,1]
    pub confidence: f32,
    pub location: BoxRect,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, location: BoxRect) -> Self {
        Self {
            label: label.into(),
            confidence,
            location,
        }
    }
}

/// 映射回原始帧坐标后的检测结果 (标签与置信度不变)
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MappedDetection {
    pub label: String,
    pub confidence: f32,
    pub location: BoxRect,
}
