/// 视频输入系统 (Video Input System)
///
/// 采集端 → 流水线的统一入口
/// - Frame: 原始帧布局 (交错YUV / 平面YUV / RGBA) 与释放回调
/// - Gate: 单槽位准入闸门,忙时丢帧
/// - DecodeFilter: 像素格式转换 → RGBA
/// - Camera: 采集分辨率协商
/// - ImageSource: 图片序列回放采集端 (定时器驱动)
pub mod camera;
pub mod decode_filter;
pub mod frame;
pub mod gate;
pub mod image_source;

use std::sync::Arc;

pub use camera::{choose_optimal_size, FrameSize, MINIMUM_PREVIEW_SIZE};
pub use decode_filter::{CanonicalImage, PixelFormatConverter};
pub use frame::{ChromaOrder, PixelLayout, PlaneBuffer, RawFrame, ReleaseHandle};
pub use gate::{Admission, FrameIngestGate, GateStats};
pub use image_source::{ImageSequenceSource, SourceFormat, SourceStats};

/// 任何能产出 RawFrame + 释放回调的采集端都通过这个接口送帧
///
/// 返回 `true` 表示帧被流水线接收,之后由流水线负责调用 `release`;
/// 返回 `false` 时回调已经被调用 (帧被丢弃)。不得阻塞。
pub trait FrameSink: Send + Sync {
    fn on_frame_available(&self, frame: RawFrame, release: ReleaseHandle) -> bool;
}

/// 采集端生命周期
pub trait FrameSource: Send {
    fn name(&self) -> &str;

    fn start(&mut self, sink: Arc<dyn FrameSink>) -> anyhow::Result<()>;

    /// 停止出帧并等待采集线程退出
    fn stop(&mut self);
}
