//! 流水线错误类型
//! Error taxonomy of the frame pipeline
//!
//! 除 `ReleaseWithoutAdmit` / `DoubleRelease` (生命周期编程错误) 外,
//! 所有错误都只会丢弃当前帧,流水线继续等待下一帧。

use crate::geometry::CropRegion;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// 步长/尺寸非法的原始帧 (丢弃并释放)
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// 裁剪区域超出帧边界或为空
    #[error("invalid crop region {region} for {frame_width}x{frame_height} frame")]
    InvalidCropRegion {
        region: CropRegion,
        frame_width: u32,
        frame_height: u32,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// 检测器异常/返回非法结果 (按0个检测结果处理)
    #[error("detector failure: {0}")]
    DetectorFailure(String),

    /// 空闲状态下调用release
    #[error("release called without a matching admit")]
    ReleaseWithoutAdmit,

    /// 同一帧被释放两次
    #[error("frame released twice")]
    DoubleRelease,

    #[error("resize failed: {0}")]
    Resize(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// 生命周期类错误: 说明上游存在admit/release配对问题
    pub fn is_lifecycle_bug(&self) -> bool {
        matches!(
            self,
            PipelineError::ReleaseWithoutAdmit | PipelineError::DoubleRelease
        )
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
