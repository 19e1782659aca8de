//! 图片序列采集端
//!
//! 按文件名顺序回放目录中的图片,定时器线程按固定帧率出帧,
//! 可输出 RGBA / NV21 / I420 三种布局,模拟相机与视频解码回调。

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{bail, Context};
use crossbeam_channel::{select, tick, Receiver, Sender};
use image::{imageops, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::camera::FrameSize;
use super::frame::{ChromaOrder, PixelLayout, PlaneBuffer, RawFrame, ReleaseHandle};
use super::{FrameSink, FrameSource};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// 输出像素布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    #[default]
    Rgba,
    Nv21,
    I420,
}

impl FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgba" => Ok(Self::Rgba),
            "nv21" => Ok(Self::Nv21),
            "i420" | "yuv420p" => Ok(Self::I420),
            other => Err(format!("unknown source format: {}", other)),
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceFormat::Rgba => "rgba",
            SourceFormat::Nv21 => "nv21",
            SourceFormat::I420 => "i420",
        };
        f.write_str(name)
    }
}

/// 采集端计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub emitted: u64,
    pub accepted: u64,
    pub released: u64,
}

#[derive(Default)]
struct Counters {
    emitted: AtomicU64,
    accepted: AtomicU64,
    released: AtomicU64,
}

pub struct ImageSequenceSource {
    name: String,
    paths: Vec<PathBuf>,
    fps: f64,
    format: SourceFormat,
    target_size: Option<FrameSize>,
    looping: bool,
    counters: Arc<Counters>,
    finished: Arc<AtomicBool>,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl ImageSequenceSource {
    /// 扫描目录中的图片 (png/jpg/jpeg/bmp),按文件名排序
    pub fn open(dir: impl AsRef<Path>, fps: f64, format: SourceFormat) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        if !(fps.is_finite() && fps > 0.0) {
            bail!("frame rate must be positive, got {}", fps);
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("failed to read image directory {}", dir.display()))?
        {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_image && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        if paths.is_empty() {
            bail!("no images found in {}", dir.display());
        }
        info!("📁 图片序列: {} ({}张)", dir.display(), paths.len());

        Ok(Self {
            name: format!("images:{}", dir.display()),
            paths,
            fps,
            format,
            target_size: None,
            looping: false,
            counters: Arc::new(Counters::default()),
            finished: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            worker: None,
        })
    }

    /// 出帧前缩放到协商后的分辨率
    pub fn with_target_size(mut self, size: Option<FrameSize>) -> Self {
        self.target_size = size;
        self
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn frame_count(&self) -> usize {
        self.paths.len()
    }

    /// 第一张图片的原始尺寸 (用于分辨率协商)
    pub fn native_size(&self) -> anyhow::Result<FrameSize> {
        let (w, h) = image::image_dimensions(&self.paths[0])
            .with_context(|| format!("failed to read {}", self.paths[0].display()))?;
        Ok(FrameSize::new(w, h))
    }

    /// 非循环模式下所有图片都已出帧
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            emitted: self.counters.emitted.load(Ordering::Relaxed),
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            released: self.counters.released.load(Ordering::Relaxed),
        }
    }
}

impl FrameSource for ImageSequenceSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, sink: Arc<dyn FrameSink>) -> anyhow::Result<()> {
        if self.worker.is_some() {
            bail!("source {} already started", self.name);
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let playback = Playback {
            paths: self.paths.clone(),
            interval: Duration::from_secs_f64(1.0 / self.fps),
            format: self.format,
            target_size: self.target_size,
            looping: self.looping,
            counters: self.counters.clone(),
            finished: self.finished.clone(),
        };

        let handle = std::thread::Builder::new()
            .name("image-source".to_string())
            .spawn(move || playback.run(sink, stop_rx))
            .context("failed to spawn image source thread")?;

        info!(
            "✅ 采集端启动: {} | {:.1}fps | 格式 {}",
            self.name, self.fps, self.format
        );
        self.stop_tx = Some(stop_tx);
        self.worker = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        // 断开停止通道即通知线程退出
        self.stop_tx.take();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("⚠️ 采集线程异常退出: {}", self.name);
            }
            let stats = self.stats();
            info!(
                "🛑 采集端停止: {} | 出帧{} | 接收{} | 释放{}",
                self.name, stats.emitted, stats.accepted, stats.released
            );
        }
    }
}

impl Drop for ImageSequenceSource {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Playback {
    paths: Vec<PathBuf>,
    interval: Duration,
    format: SourceFormat,
    target_size: Option<FrameSize>,
    looping: bool,
    counters: Arc<Counters>,
    finished: Arc<AtomicBool>,
}

impl Playback {
    fn run(self, sink: Arc<dyn FrameSink>, stop_rx: Receiver<()>) {
        let ticker = tick(self.interval);
        let mut index = 0usize;

        loop {
            select! {
                recv(stop_rx) -> _ => break,
                recv(ticker) -> _ => {}
            }

            if index == self.paths.len() {
                if !self.looping {
                    self.finished.store(true, Ordering::Release);
                    info!("📁 图片序列播放完毕");
                    break;
                }
                index = 0;
            }
            let path = &self.paths[index];
            index += 1;

            let rgba = match image::open(path) {
                Ok(img) => img.to_rgba8(),
                Err(e) => {
                    warn!("⚠️ 跳过无法解码的图片 {}: {}", path.display(), e);
                    continue;
                }
            };
            let rgba = match self.target_size {
                Some(size) if (size.width, size.height) != rgba.dimensions() => imageops::resize(
                    &rgba,
                    size.width,
                    size.height,
                    imageops::FilterType::Triangle,
                ),
                _ => rgba,
            };

            let frame = encode_frame(&rgba, self.format);
            let counters = self.counters.clone();
            let release = ReleaseHandle::new(move || {
                counters.released.fetch_add(1, Ordering::Relaxed);
            });

            self.counters.emitted.fetch_add(1, Ordering::Relaxed);
            if sink.on_frame_available(frame, release) {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// RGBA图像编码为指定布局的原始帧
pub fn encode_frame(rgba: &RgbaImage, format: SourceFormat) -> RawFrame {
    let (w, h) = rgba.dimensions();
    let layout = match format {
        SourceFormat::Rgba => PixelLayout::PackedRgba {
            data: Arc::new(rgba.as_raw().clone()),
            row_stride: w as usize * 4,
        },
        SourceFormat::Nv21 => PixelLayout::InterleavedYuv {
            data: Arc::new(rgba_to_nv21(rgba)),
            row_stride: nv21_row_stride(w),
            chroma: ChromaOrder::Vu,
        },
        SourceFormat::I420 => {
            let [y, u, v] = rgba_to_i420(rgba);
            let cw = (w as usize + 1) / 2;
            PixelLayout::PlanarYuv {
                y: PlaneBuffer::new(Arc::new(y), w as usize, 1),
                u: PlaneBuffer::new(Arc::new(u), cw, 1),
                v: PlaneBuffer::new(Arc::new(v), cw, 1),
            }
        }
    };
    RawFrame::new(w, h, layout)
}

/// BT.601 视频范围 RGB → YUV
#[inline]
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (
        y.clamp(0, 255) as u8,
        u.clamp(0, 255) as u8,
        v.clamp(0, 255) as u8,
    )
}

/// NV21 行步长: 宽度向上取偶,保证每行色度样本成对
fn nv21_row_stride(width: u32) -> usize {
    (width as usize + 1) / 2 * 2
}

/// 色度取每个2x2块左上角像素
fn rgba_to_nv21(rgba: &RgbaImage) -> Vec<u8> {
    let h = rgba.height() as usize;
    let stride = nv21_row_stride(rgba.width());
    let chroma_base = stride * h;
    let mut out = vec![0u8; chroma_base + (h + 1) / 2 * stride];

    for (x, y, px) in rgba.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let (luma, u, v) = rgb_to_yuv(px[0], px[1], px[2]);
        out[y * stride + x] = luma;
        if x % 2 == 0 && y % 2 == 0 {
            let uv = chroma_base + (y / 2) * stride + x;
            out[uv] = v;
            out[uv + 1] = u;
        }
    }
    out
}

fn rgba_to_i420(rgba: &RgbaImage) -> [Vec<u8>; 3] {
    let (w, h) = (rgba.width() as usize, rgba.height() as usize);
    let (cw, ch) = ((w + 1) / 2, (h + 1) / 2);
    let mut y_plane = vec![0u8; w * h];
    let mut u_plane = vec![0u8; cw * ch];
    let mut v_plane = vec![0u8; cw * ch];

    for (x, y, px) in rgba.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let (luma, u, v) = rgb_to_yuv(px[0], px[1], px[2]);
        y_plane[y * w + x] = luma;
        if x % 2 == 0 && y % 2 == 0 {
            u_plane[(y / 2) * cw + x / 2] = u;
            v_plane[(y / 2) * cw + x / 2] = v;
        }
    }
    [y_plane, u_plane, v_plane]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::decode_filter::PixelFormatConverter;
    use image::Rgba;
    use std::sync::Mutex;

    /// 记录收到的帧并立即释放
    #[derive(Default)]
    struct CollectingSink {
        sizes: Mutex<Vec<(u32, u32)>>,
    }

    impl FrameSink for CollectingSink {
        fn on_frame_available(&self, frame: RawFrame, release: ReleaseHandle) -> bool {
            self.sizes.lock().unwrap().push((frame.width, frame.height));
            release.release();
            true
        }
    }

    fn close_to(a: &[u8], b: &[u8], tol: u8) -> bool {
        a.iter().zip(b).all(|(x, y)| x.abs_diff(*y) <= tol)
    }

    #[test]
    fn test_encoded_layouts_decode_back() {
        let img = RgbaImage::from_pixel(6, 4, Rgba([200, 40, 90, 255]));
        let mut converter = PixelFormatConverter::new();
        let reference = converter
            .convert(&encode_frame(&img, SourceFormat::Rgba))
            .unwrap()
            .as_raw()
            .to_vec();
        assert_eq!(reference, img.as_raw().clone());

        for format in [SourceFormat::Nv21, SourceFormat::I420] {
            let decoded = converter.convert(&encode_frame(&img, format)).unwrap();
            for px in decoded.as_raw().chunks_exact(4) {
                assert!(close_to(px, &[200, 40, 90, 255], 4), "{} {:?}", format, px);
            }
        }
    }

    #[test]
    fn test_odd_dimensions_encode() {
        let img = RgbaImage::from_pixel(5, 3, Rgba([255, 255, 255, 255]));
        let mut converter = PixelFormatConverter::new();
        for format in [SourceFormat::Nv21, SourceFormat::I420] {
            let decoded = converter.convert(&encode_frame(&img, format)).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (5, 3));
        }
    }

    #[test]
    fn test_source_format_parse() {
        assert_eq!("NV21".parse::<SourceFormat>(), Ok(SourceFormat::Nv21));
        assert_eq!("yuv420p".parse::<SourceFormat>(), Ok(SourceFormat::I420));
        assert!("bgra".parse::<SourceFormat>().is_err());
    }

    #[test]
    fn test_open_rejects_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();
        assert!(ImageSequenceSource::open(dir.path(), 30.0, SourceFormat::Rgba).is_err());
        assert!(ImageSequenceSource::open(dir.path(), 0.0, SourceFormat::Rgba).is_err());
    }

    #[test]
    fn test_plays_directory_once_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, w) in [("b.png", 8), ("a.png", 4), ("c.png", 6)] {
            RgbaImage::from_pixel(w, 4, Rgba([0, 0, 0, 255]))
                .save(dir.path().join(name))
                .unwrap();
        }

        let mut source = ImageSequenceSource::open(dir.path(), 200.0, SourceFormat::Nv21).unwrap();
        assert_eq!(source.frame_count(), 3);
        assert_eq!(source.native_size().unwrap(), FrameSize::new(4, 4));

        let sink = Arc::new(CollectingSink::default());
        source.start(sink.clone()).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !source.is_finished() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        source.stop();

        assert_eq!(*sink.sizes.lock().unwrap(), vec![(4, 4), (8, 4), (6, 4)]);
        let stats = source.stats();
        assert_eq!((stats.emitted, stats.accepted, stats.released), (3, 3, 3));
    }

    #[test]
    fn test_target_size_resizes_frames() {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::from_pixel(16, 8, Rgba([10, 10, 10, 255]))
            .save(dir.path().join("only.png"))
            .unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), 200.0, SourceFormat::I420)
            .unwrap()
            .with_target_size(Some(FrameSize::new(8, 4)));
        let sink = Arc::new(CollectingSink::default());
        source.start(sink.clone()).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !source.is_finished() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        source.stop();
        assert_eq!(*sink.sizes.lock().unwrap(), vec![(8, 4)]);
    }
}
