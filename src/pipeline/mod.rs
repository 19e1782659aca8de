/// 检测流水线 (Detection Pipeline)
///
/// 两个执行上下文 + 渲染交接:
/// - 生产者: 采集回调,只做 try_admit,从不阻塞
/// - Worker: 单个工作线程,转换 → 几何 → 检测 → 映射
/// - Render: 跟踪器/界面回调投递到渲染线程,保持帧序
pub mod coordinator;
pub mod render;
pub mod worker;

pub use coordinator::{
    map_detections, AdmittedFrame, CoordinatorStats, DetectionCoordinator, FrameOutcome,
};
pub use render::{render_channel, RenderDispatcher, RenderEvent, RenderLoop};
pub use worker::{spawn_pipeline, FrameIngress, PipelineHandle};
