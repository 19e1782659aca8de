/// 像素格式转换模块
/// Pixel format converter: RawFrame → packed RGBA
///
/// 只做颜色空间转换,不做任何几何处理。
use image::{ImageBuffer, Rgba};
use tracing::debug;

use super::frame::{ChromaOrder, PixelLayout, PlaneBuffer, RawFrame};
use crate::error::{PipelineError, Result};

/// 标准RGBA图像 (宽高与源帧一致),跨帧复用
#[derive(Debug, Clone, Default)]
pub struct CanonicalImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl CanonicalImage {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if data.len() != width as usize * height as usize * 4 {
            return Err(PipelineError::MalformedFrame(format!(
                "RGBA buffer of {} bytes does not match {}x{}",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    /// 零拷贝视图,供 imageops 使用
    pub fn view(&self) -> Result<ImageBuffer<Rgba<u8>, &[u8]>> {
        ImageBuffer::from_raw(self.width, self.height, self.data.as_slice()).ok_or_else(|| {
            PipelineError::MalformedFrame("canonical image buffer size mismatch".to_string())
        })
    }
}

/// 像素格式转换器
///
/// - 输出缓冲区仅在宽高变化时重新分配
/// - 平面YUV按平面容量分配暂存缓冲区,仅在容量变化时重新分配
pub struct PixelFormatConverter {
    image: CanonicalImage,
    staging: [Vec<u8>; 3],
    allocations: usize,
}

impl Default for PixelFormatConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl PixelFormatConverter {
    pub fn new() -> Self {
        Self {
            image: CanonicalImage::default(),
            staging: [Vec::new(), Vec::new(), Vec::new()],
            allocations: 0,
        }
    }

    /// 累计分配次数 (输出缓冲区 + 暂存缓冲区)
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    pub fn convert(&mut self, frame: &RawFrame) -> Result<&CanonicalImage> {
        let (w, h) = (frame.width as usize, frame.height as usize);
        if w == 0 || h == 0 {
            return Err(malformed(format!("empty frame {}x{}", w, h)));
        }

        // 先校验,校验失败不触碰输出缓冲区
        match &frame.layout {
            PixelLayout::InterleavedYuv {
                data, row_stride, ..
            } => check_interleaved(data.len(), *row_stride, w, h)?,
            PixelLayout::PlanarYuv { y, u, v } => {
                check_plane("Y", y, w, h)?;
                let (cw, ch) = ((w + 1) / 2, (h + 1) / 2);
                check_plane("U", u, cw, ch)?;
                check_plane("V", v, cw, ch)?;
            }
            PixelLayout::PackedRgba { data, row_stride } => {
                if *row_stride < w * 4 {
                    return Err(malformed(format!(
                        "RGBA row stride {} smaller than width {}",
                        row_stride, w
                    )));
                }
                let needed = (h - 1) * row_stride + w * 4;
                if data.len() < needed {
                    return Err(malformed(format!(
                        "RGBA buffer holds {} bytes, needs {}",
                        data.len(),
                        needed
                    )));
                }
            }
        }

        self.ensure_output(frame.width, frame.height);

        match &frame.layout {
            PixelLayout::InterleavedYuv {
                data,
                row_stride,
                chroma,
            } => interleaved_to_rgba(data, *row_stride, *chroma, w, h, &mut self.image.data),
            PixelLayout::PlanarYuv { y, u, v } => {
                for (slot, plane) in [y, u, v].into_iter().enumerate() {
                    self.fill_staging(slot, plane);
                }
                planar_to_rgba(&self.staging, [y, u, v], w, h, &mut self.image.data);
            }
            PixelLayout::PackedRgba { data, row_stride } => {
                for (row, out) in self.image.data.chunks_exact_mut(w * 4).enumerate() {
                    let start = row * row_stride;
                    out.copy_from_slice(&data[start..start + w * 4]);
                }
            }
        }

        Ok(&self.image)
    }

    fn ensure_output(&mut self, width: u32, height: u32) {
        if self.image.width != width || self.image.height != height {
            debug!("🔄 输出缓冲区重新分配: {}x{}", width, height);
            self.image = CanonicalImage {
                width,
                height,
                data: vec![255; width as usize * height as usize * 4],
            };
            self.allocations += 1;
        }
    }

    fn fill_staging(&mut self, slot: usize, plane: &PlaneBuffer) {
        let staging = &mut self.staging[slot];
        if staging.len() != plane.data.len() {
            *staging = vec![0; plane.data.len()];
            self.allocations += 1;
        }
        staging.copy_from_slice(&plane.data);
    }
}

fn malformed(msg: String) -> PipelineError {
    PipelineError::MalformedFrame(msg)
}

fn check_interleaved(len: usize, row_stride: usize, w: usize, h: usize) -> Result<()> {
    if row_stride < w {
        return Err(malformed(format!(
            "interleaved row stride {} smaller than width {}",
            row_stride, w
        )));
    }
    // Y平面 + 最后一行色度的最后一对样本
    let needed = row_stride * h + ((h - 1) >> 1) * row_stride + ((w - 1) >> 1) * 2 + 2;
    if len < needed {
        return Err(malformed(format!(
            "interleaved buffer holds {} bytes, needs {}",
            len, needed
        )));
    }
    Ok(())
}

fn check_plane(name: &str, plane: &PlaneBuffer, w: usize, h: usize) -> Result<()> {
    if plane.pixel_stride == 0 {
        return Err(malformed(format!("{} plane pixel stride is 0", name)));
    }
    let row_span = (w - 1) * plane.pixel_stride + 1;
    if plane.row_stride < w || plane.row_stride < row_span {
        return Err(malformed(format!(
            "{} plane row stride {} smaller than width {}",
            name, plane.row_stride, w
        )));
    }
    let needed = (h - 1) * plane.row_stride + row_span;
    if plane.data.len() < needed {
        return Err(malformed(format!(
            "{} plane holds {} bytes, needs {}",
            name,
            plane.data.len(),
            needed
        )));
    }
    Ok(())
}

const MAX_CHANNEL_VALUE: i32 = 262143; // 2^18 - 1

/// BT.601 视频范围定点转换
#[inline]
pub fn yuv_to_rgba(y: u8, u: u8, v: u8) -> [u8; 4] {
    let y = (y as i32 - 16).max(0);
    let u = u as i32 - 128;
    let v = v as i32 - 128;

    let y1192 = 1192 * y;
    let r = (y1192 + 1634 * v).clamp(0, MAX_CHANNEL_VALUE);
    let g = (y1192 - 833 * v - 400 * u).clamp(0, MAX_CHANNEL_VALUE);
    let b = (y1192 + 2066 * u).clamp(0, MAX_CHANNEL_VALUE);

    [(r >> 10) as u8, (g >> 10) as u8, (b >> 10) as u8, 255]
}

fn interleaved_to_rgba(
    data: &[u8],
    row_stride: usize,
    chroma: ChromaOrder,
    w: usize,
    h: usize,
    out: &mut [u8],
) {
    let chroma_base = row_stride * h;
    for (j, out_row) in out.chunks_exact_mut(w * 4).enumerate() {
        let y_row = j * row_stride;
        let uv_row = chroma_base + (j >> 1) * row_stride;
        for (i, px) in out_row.chunks_exact_mut(4).enumerate() {
            let uv = uv_row + (i >> 1) * 2;
            let (u, v) = match chroma {
                ChromaOrder::Vu => (data[uv + 1], data[uv]),
                ChromaOrder::Uv => (data[uv], data[uv + 1]),
            };
            px.copy_from_slice(&yuv_to_rgba(data[y_row + i], u, v));
        }
    }
}

fn planar_to_rgba(
    staging: &[Vec<u8>; 3],
    planes: [&PlaneBuffer; 3],
    w: usize,
    h: usize,
    out: &mut [u8],
) {
    let [y_plane, u_plane, v_plane] = planes;
    let [y_data, u_data, v_data] = staging;
    for (j, out_row) in out.chunks_exact_mut(w * 4).take(h).enumerate() {
        let y_row = j * y_plane.row_stride;
        let u_row = (j >> 1) * u_plane.row_stride;
        let v_row = (j >> 1) * v_plane.row_stride;
        for (i, px) in out_row.chunks_exact_mut(4).enumerate() {
            let y = y_data[y_row + i * y_plane.pixel_stride];
            let u = u_data[u_row + (i >> 1) * u_plane.pixel_stride];
            let v = v_data[v_row + (i >> 1) * v_plane.pixel_stride];
            px.copy_from_slice(&yuv_to_rgba(y, u, v));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn nv21(
        w: usize,
        h: usize,
        stride: usize,
        y: u8,
        first: u8,
        second: u8,
        chroma: ChromaOrder,
    ) -> RawFrame {
        let mut data = vec![y; stride * h];
        for _ in 0..((h + 1) / 2) * (stride / 2) {
            data.push(first);
            data.push(second);
        }
        RawFrame::new(
            w as u32,
            h as u32,
            PixelLayout::InterleavedYuv {
                data: Arc::new(data),
                row_stride: stride,
                chroma,
            },
        )
    }

    #[test]
    fn test_yuv_reference_values() {
        assert_eq!(yuv_to_rgba(16, 128, 128), [0, 0, 0, 255]);
        assert_eq!(yuv_to_rgba(0, 128, 128), [0, 0, 0, 255]);
        assert_eq!(yuv_to_rgba(255, 128, 128), [255, 255, 255, 255]);
        assert_eq!(yuv_to_rgba(128, 128, 255), [255, 27, 130, 255]);
        assert_eq!(yuv_to_rgba(128, 255, 128), [130, 80, 255, 255]);
    }

    #[test]
    fn test_nv21_and_nv12_chroma_order() {
        let mut converter = PixelFormatConverter::new();
        let frame = nv21(4, 2, 4, 128, 255, 128, ChromaOrder::Vu);
        let img = converter.convert(&frame).unwrap();
        assert!(img.as_raw().chunks_exact(4).all(|p| p == [255, 27, 130, 255]));

        let frame = nv21(4, 2, 4, 128, 255, 128, ChromaOrder::Uv);
        let img = converter.convert(&frame).unwrap();
        assert!(img.as_raw().chunks_exact(4).all(|p| p == [130, 80, 255, 255]));
    }

    #[test]
    fn test_row_stride_smaller_than_width_is_malformed() {
        let mut converter = PixelFormatConverter::new();
        let frame = RawFrame::new(
            8,
            2,
            PixelLayout::InterleavedYuv {
                data: Arc::new(vec![0; 64]),
                row_stride: 6,
                chroma: ChromaOrder::Vu,
            },
        );
        assert!(matches!(
            converter.convert(&frame),
            Err(PipelineError::MalformedFrame(_))
        ));
        assert_eq!(converter.allocations(), 0);

        let plane = |len, stride| PlaneBuffer::new(Arc::new(vec![0; len]), stride, 1);
        let planar = RawFrame::new(
            4,
            4,
            PixelLayout::PlanarYuv {
                y: plane(16, 4),
                u: plane(4, 1),
                v: plane(4, 2),
            },
        );
        assert!(matches!(
            converter.convert(&planar),
            Err(PipelineError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_truncated_buffer_is_malformed() {
        let mut converter = PixelFormatConverter::new();
        let frame = RawFrame::new(
            4,
            4,
            PixelLayout::InterleavedYuv {
                data: Arc::new(vec![0; 16]),
                row_stride: 4,
                chroma: ChromaOrder::Vu,
            },
        );
        assert!(converter.convert(&frame).is_err());

        let rgba = RawFrame::new(
            2,
            2,
            PixelLayout::PackedRgba {
                data: Arc::new(vec![0; 15]),
                row_stride: 8,
            },
        );
        assert!(converter.convert(&rgba).is_err());
    }

    #[test]
    fn test_output_buffer_reused_for_same_size() {
        let mut converter = PixelFormatConverter::new();
        for _ in 0..5 {
            converter
                .convert(&nv21(6, 4, 8, 16, 128, 128, ChromaOrder::Vu))
                .unwrap();
        }
        assert_eq!(converter.allocations(), 1);

        converter
            .convert(&nv21(8, 4, 8, 16, 128, 128, ChromaOrder::Vu))
            .unwrap();
        assert_eq!(converter.allocations(), 2);
    }

    #[test]
    fn test_planar_with_interleaved_chroma_pixel_stride() {
        // 半平面布局: U/V 平面共享一块缓冲区,pixel_stride = 2
        let (w, h) = (4usize, 2usize);
        let y = PlaneBuffer::new(Arc::new(vec![255; w * h]), w, 1);
        let chroma = Arc::new(vec![128u8, 128, 128, 128]);
        let u = PlaneBuffer::new(chroma.clone(), 4, 2);
        let v = PlaneBuffer::new(chroma, 4, 2);
        let frame = RawFrame::new(w as u32, h as u32, PixelLayout::PlanarYuv { y, u, v });

        let mut converter = PixelFormatConverter::new();
        let img = converter.convert(&frame).unwrap();
        assert_eq!((img.width(), img.height()), (4, 2));
        assert!(img.as_raw().chunks_exact(4).all(|p| p == [255, 255, 255, 255]));

        // 输出缓冲区 1 次 + 三个暂存缓冲区各 1 次
        assert_eq!(converter.allocations(), 4);
        converter.convert(&frame).unwrap();
        assert_eq!(converter.allocations(), 4);
    }

    #[test]
    fn test_planar_reads_independent_strides() {
        // Y 行步长 6 (含填充),U/V 行步长不同
        let y_data: Vec<u8> = vec![
            16, 16, 255, 255, 0, 0, //
            16, 16, 255, 255, 0, 0,
        ];
        let y = PlaneBuffer::new(Arc::new(y_data), 6, 1);
        let u = PlaneBuffer::new(Arc::new(vec![128, 128]), 2, 1);
        let v = PlaneBuffer::new(Arc::new(vec![128, 128, 9, 9]), 4, 1);
        let frame = RawFrame::new(4, 2, PixelLayout::PlanarYuv { y, u, v });

        let mut converter = PixelFormatConverter::new();
        let img = converter.convert(&frame).unwrap();
        let px: Vec<&[u8]> = img.as_raw().chunks_exact(4).collect();
        assert_eq!(px[0], [0u8, 0, 0, 255]);
        assert_eq!(px[3], [255u8, 255, 255, 255]);
        assert_eq!(px[4], [0u8, 0, 0, 255]);
    }

    #[test]
    fn test_packed_rgba_copies_rows_without_padding() {
        let data = vec![
            1, 2, 3, 4, 5, 6, 7, 8, 0, 0, //
            9, 10, 11, 12, 13, 14, 15, 16, 0, 0,
        ];
        let frame = RawFrame::new(
            2,
            2,
            PixelLayout::PackedRgba {
                data: Arc::new(data),
                row_stride: 10,
            },
        );
        let mut converter = PixelFormatConverter::new();
        let img = converter.convert(&frame).unwrap();
        assert_eq!(
            img.as_raw(),
            &[1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]
        );
    }
}
