/// 检测系统 (Detection System)
///
/// - Types:    检测框 / 检测结果 / 映射后的检测结果
/// - Detector: 外部检测器接口 + 回放检测器
/// - Tracker:  外部跟踪器与界面回调接口
pub mod detector;
pub mod tracker;
pub mod types;

pub use detector::{validate_detections, ObjectDetector, ReplayDetector};
pub use tracker::{LoggingMetrics, LoggingTracker, MetricsReporter, Tracker};
pub use types::{BoxRect, Detection, MappedDetection};
