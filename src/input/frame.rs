/// 原始帧数据结构 (Raw frame layouts)
///
/// 采集端产生并持有,直到 release 回调触发前不得复用底层缓冲区;流水线只借用。
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// 交错YUV的色度排列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromaOrder {
    /// NV21: V在前 (Android相机默认)
    Vu,
    /// NV12: U在前
    Uv,
}

/// 单个平面 (Y/U/V) 的缓冲区与步长
#[derive(Debug, Clone)]
pub struct PlaneBuffer {
    pub data: Arc<Vec<u8>>,
    pub row_stride: usize,
    /// 同一行相邻两个样本之间的字节距离 (亮度平面恒为1)
    pub pixel_stride: usize,
}

impl PlaneBuffer {
    pub fn new(data: Arc<Vec<u8>>, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data,
            row_stride,
            pixel_stride,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PixelLayout {
    /// 单缓冲区: Y平面后紧跟交错的色度平面 (NV21/NV12)
    InterleavedYuv {
        data: Arc<Vec<u8>>,
        row_stride: usize,
        chroma: ChromaOrder,
    },
    /// 三个独立平面,色度可非连续采样
    PlanarYuv {
        y: PlaneBuffer,
        u: PlaneBuffer,
        v: PlaneBuffer,
    },
    /// 已经是RGBA,直通
    PackedRgba {
        data: Arc<Vec<u8>>,
        row_stride: usize,
    },
}

impl PixelLayout {
    pub fn name(&self) -> &'static str {
        match self {
            PixelLayout::InterleavedYuv {
                chroma: ChromaOrder::Vu,
                ..
            } => "NV21",
            PixelLayout::InterleavedYuv {
                chroma: ChromaOrder::Uv,
                ..
            } => "NV12",
            PixelLayout::PlanarYuv { .. } => "YUV420 planar",
            PixelLayout::PackedRgba { .. } => "RGBA",
        }
    }
}

/// 采集端提交的一帧
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
    pub layout: PixelLayout,
}

impl RawFrame {
    pub fn new(width: u32, height: u32, layout: PixelLayout) -> Self {
        Self {
            width,
            height,
            timestamp: Instant::now(),
            layout,
        }
    }
}

/// 帧释放回调: 归还相机缓冲区 / 关闭图像句柄 / 清空临时缓冲
///
/// 只能调用一次 (`release` 消耗自身)。
pub struct ReleaseHandle {
    callback: Box<dyn FnOnce() + Send>,
}

impl ReleaseHandle {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }

    /// 无需归还资源的帧
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    pub fn release(self) {
        (self.callback)()
    }
}

impl fmt::Debug for ReleaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReleaseHandle")
    }
}
