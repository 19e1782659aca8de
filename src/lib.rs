// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 流水线配置参数
pub mod detection; // 检测器/跟踪器接口
pub mod error; // 错误类型
pub mod geometry; // 裁剪/补边/缩放与反向映射
pub mod input; // 视频输入系统
pub mod pipeline; // 检测流水线
pub mod utils; // 仿射变换工具

pub use crate::config::{Args, PipelineConfig, PipelineSettings, SettingsSnapshot};
pub use crate::detection::{
    BoxRect, Detection, MappedDetection, MetricsReporter, ObjectDetector, Tracker,
};
pub use crate::error::{PipelineError, Result};
pub use crate::geometry::{build_transform, CropRegion, GeometryTransform, LetterboxRenderer};
pub use crate::input::{
    CanonicalImage, FrameIngestGate, FrameSink, FrameSource, PixelFormatConverter, RawFrame,
    ReleaseHandle,
};
pub use crate::pipeline::{spawn_pipeline, DetectionCoordinator, PipelineHandle};
