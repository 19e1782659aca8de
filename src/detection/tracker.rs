//! 跟踪器与界面回调接口
//! Tracker and UI collaborator interfaces
//!
//! 跟踪器负责渲染与ID分配,流水线只按帧序号顺序推送映射后的检测结果。

use tracing::{debug, info, warn};

use super::types::MappedDetection;

/// 外部跟踪器
pub trait Tracker: Send {
    /// 帧序号单调递增 (中间可能因丢帧出现空洞)
    fn track_results(&mut self, detections: Vec<MappedDetection>, frame_sequence: u64);
}

/// 外部界面回调: 帧尺寸与检测耗时
pub trait MetricsReporter: Send {
    fn report_metrics(&mut self, frame_width: u32, frame_height: u32, processing_ms: f64);
}

/// 日志跟踪器: 打印每帧检测摘要,并检查序号顺序
#[derive(Default)]
pub struct LoggingTracker {
    last_sequence: Option<u64>,
    frames: u64,
    detections: u64,
}

impl LoggingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn detections(&self) -> u64 {
        self.detections
    }
}

impl Tracker for LoggingTracker {
    fn track_results(&mut self, detections: Vec<MappedDetection>, frame_sequence: u64) {
        if let Some(last) = self.last_sequence {
            if frame_sequence <= last {
                warn!("⚠️ 帧序号乱序: {} 之后收到 {}", last, frame_sequence);
            }
        }
        self.last_sequence = Some(frame_sequence);
        self.frames += 1;
        self.detections += detections.len() as u64;

        if detections.is_empty() {
            debug!("🎯 帧#{}: 无检测结果", frame_sequence);
            return;
        }
        let summary: Vec<String> = detections
            .iter()
            .map(|d| {
                format!(
                    "{}({:.2}) [{:.0},{:.0},{:.0},{:.0}]",
                    d.label,
                    d.confidence,
                    d.location.left,
                    d.location.top,
                    d.location.right,
                    d.location.bottom
                )
            })
            .collect();
        info!(
            "🎯 帧#{}: {}个目标 {}",
            frame_sequence,
            detections.len(),
            summary.join(" ")
        );
    }
}

/// 日志界面回调
#[derive(Default)]
pub struct LoggingMetrics {
    last_size: Option<(u32, u32)>,
}

impl MetricsReporter for LoggingMetrics {
    fn report_metrics(&mut self, frame_width: u32, frame_height: u32, processing_ms: f64) {
        if self.last_size != Some((frame_width, frame_height)) {
            info!("📐 帧尺寸: {}x{}", frame_width, frame_height);
            self.last_size = Some((frame_width, frame_height));
        }
        debug!("⏱️ 检测耗时: {:.1}ms", processing_ms);
    }
}
