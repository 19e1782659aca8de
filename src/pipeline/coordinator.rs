//! 检测协调器 (Detection Coordinator)
//! 职责: 准入帧 → 格式转换 → letterbox → 释放源缓冲 → 检测 → 反向映射 → 跟踪器/界面回调

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use image::RgbaImage;
use tracing::{debug, error, info, warn};

use crate::config::{PipelineConfig, PipelineSettings};
use crate::detection::{
    validate_detections, Detection, MappedDetection, MetricsReporter, ObjectDetector, Tracker,
};
use crate::error::{PipelineError, Result};
use crate::geometry::{build_transform, CropRegion, GeometryTransform, LetterboxRenderer};
use crate::input::{FrameIngestGate, GateStats, PixelFormatConverter, RawFrame, ReleaseHandle};

/// 已通过闸门的帧 (生产者线程 → 工作线程)
#[derive(Debug)]
pub struct AdmittedFrame {
    pub frame: RawFrame,
    pub sequence: u64,
}

/// 单帧处理结果
#[derive(Debug)]
pub enum FrameOutcome {
    Processed {
        sequence: u64,
        detections: usize,
        detect_ms: f64,
        detector_failed: bool,
    },
    /// 帧在检测前被丢弃 (已释放)
    Dropped { sequence: u64, error: PipelineError },
}

/// 累计统计
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CoordinatorStats {
    pub processed: u64,
    /// 检测前被丢弃的帧 (坏帧、裁剪失效、缩放失败)
    pub dropped_frames: u64,
    pub detector_failures: u64,
    pub gate: GateStats,
}

/// 持有准入期间的闸门: 先归还源缓冲区,处理全部结束后才允许下一帧准入;
/// 任何提前返回路径都会在析构时补齐
struct AdmissionGuard {
    gate: Arc<FrameIngestGate>,
    released: bool,
}

impl AdmissionGuard {
    fn new(gate: Arc<FrameIngestGate>) -> Self {
        gate.begin_processing();
        Self {
            gate,
            released: false,
        }
    }

    /// 归还源缓冲区 (只执行一次)
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            // 生命周期错误已在闸门内记录
            let _ = self.gate.release();
        }
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.release();
        self.gate.end_processing();
    }
}

pub struct DetectionCoordinator {
    gate: Arc<FrameIngestGate>,
    settings: Arc<PipelineSettings>,
    converter: PixelFormatConverter,
    letterbox: LetterboxRenderer,
    detector: Box<dyn ObjectDetector>,
    tracker: Box<dyn Tracker>,
    metrics: Box<dyn MetricsReporter>,
    model_size: u32,
    dump_dir: Option<PathBuf>,

    // 统计
    count: u64,
    last: Instant,
    current_fps: f64,
    stats: CoordinatorStats,
}

impl DetectionCoordinator {
    pub fn new(
        config: &PipelineConfig,
        gate: Arc<FrameIngestGate>,
        settings: Arc<PipelineSettings>,
        detector: Box<dyn ObjectDetector>,
        tracker: Box<dyn Tracker>,
        metrics: Box<dyn MetricsReporter>,
    ) -> Result<Self> {
        config.validate()?;
        if let Some(dir) = &config.debug_dump_dir {
            std::fs::create_dir_all(dir)?;
            info!("🖼️ 模型输入将保存到 {}", dir.display());
        }
        info!(
            "🔍 检测协调器启动: 检测器 {} | 模型输入 {}x{}",
            detector.name(),
            config.model_size,
            config.model_size
        );

        Ok(Self {
            gate,
            settings,
            converter: PixelFormatConverter::new(),
            letterbox: LetterboxRenderer::new(config.pad_color, config.interpolation),
            detector,
            tracker,
            metrics,
            model_size: config.model_size,
            dump_dir: config.debug_dump_dir.clone(),
            count: 0,
            last: Instant::now(),
            current_fps: 0.0,
            stats: CoordinatorStats::default(),
        })
    }

    pub fn gate(&self) -> &Arc<FrameIngestGate> {
        &self.gate
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            gate: self.gate.stats(),
            ..self.stats
        }
    }

    pub fn current_fps(&self) -> f64 {
        self.current_fps
    }

    /// 同步入口: 尝试准入并立即处理;未准入时释放帧并返回 None
    pub fn submit(&mut self, frame: RawFrame, release: ReleaseHandle) -> Option<FrameOutcome> {
        match self.gate.try_admit(release) {
            Ok(admission) => Some(self.process(AdmittedFrame {
                frame,
                sequence: admission.sequence,
            })),
            Err(release) => {
                release.release();
                None
            }
        }
    }

    /// 处理一帧已准入的帧 (在工作线程中执行)
    pub fn process(&mut self, admitted: AdmittedFrame) -> FrameOutcome {
        let mut guard = AdmissionGuard::new(self.gate.clone());
        let AdmittedFrame { frame, sequence } = admitted;
        let (frame_width, frame_height) = (frame.width, frame.height);

        // 1. 本帧参数快照 (尺寸变化时可能停用裁剪)
        self.settings.observe_frame_size(frame_width, frame_height);
        let snapshot = self.settings.snapshot();

        // 2. 格式转换 + letterbox,完成后源缓冲区不再需要
        let prepared = self.prepare(&frame, snapshot.crop_region.as_ref());
        drop(frame);
        guard.release();

        let (model_input, transform) = match prepared {
            Ok(v) => v,
            Err(e) => {
                warn!("⚠️ 丢弃帧 #{}: {}", sequence, e);
                self.stats.dropped_frames += 1;
                return FrameOutcome::Dropped { sequence, error: e };
            }
        };

        if let Some(dir) = &self.dump_dir {
            let path = dir.join(format!("frame_{}.png", sequence));
            if let Err(e) = model_input.save(&path) {
                warn!("⚠️ 保存模型输入失败 {}: {}", path.display(), e);
            }
        }

        // 3. 检测 (计时只覆盖检测器调用)
        let t_detect = Instant::now();
        let detections = self.run_detector(&model_input, sequence);
        let detect_ms = t_detect.elapsed().as_secs_f64() * 1000.0;
        let detector_failed = detections.is_err();
        let detections = detections.unwrap_or_default();

        // 4. 阈值过滤 + 反向映射
        let mapped = map_detections(&detections, &transform, snapshot.confidence_threshold);
        let detection_count = mapped.len();

        // 5. 跟踪器 + 界面
        self.tracker.track_results(mapped, sequence);
        self.metrics.report_metrics(frame_width, frame_height, detect_ms);

        self.update_stats(detect_ms, detection_count);
        // 处理结束,允许下一帧准入
        drop(guard);

        FrameOutcome::Processed {
            sequence,
            detections: detection_count,
            detect_ms,
            detector_failed,
        }
    }

    fn prepare(
        &mut self,
        frame: &RawFrame,
        crop: Option<&CropRegion>,
    ) -> Result<(RgbaImage, GeometryTransform)> {
        let image = self.converter.convert(frame)?;
        let transform = build_transform(frame.width, frame.height, crop, self.model_size)?;
        let model_input = self.letterbox.apply(image, &transform)?;
        Ok((model_input, transform))
    }

    /// 检测器错误、panic、非法输出统一按0个检测结果处理
    fn run_detector(&mut self, image: &RgbaImage, sequence: u64) -> Result<Vec<Detection>> {
        let detector = &mut self.detector;
        let outcome = catch_unwind(AssertUnwindSafe(|| detector.detect(image)));

        let result = match outcome {
            Ok(Ok(detections)) => validate_detections(&detections).map(|_| detections),
            Ok(Err(e)) => Err(PipelineError::DetectorFailure(format!("{:#}", e))),
            Err(payload) => Err(PipelineError::DetectorFailure(format!(
                "detector panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };

        if let Err(e) = &result {
            error!("❌ 帧 #{} 检测失败: {}", sequence, e);
            self.stats.detector_failures += 1;
        }
        result
    }

    fn update_stats(&mut self, detect_ms: f64, detections: usize) {
        self.stats.processed += 1;
        self.count += 1;

        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_secs_f64();
        if elapsed >= 1.0 {
            self.current_fps = self.count as f64 / elapsed;
            let gate = self.gate.stats();

            // 每秒打印一次检测统计
            info!(
                "📊 检测统计: 处理{}帧 | {:.1}fps | 到达{} | 丢弃{} ({:.1}%) | 最近 {}个目标 {:.1}ms",
                self.count,
                self.current_fps,
                gate.arrived,
                gate.dropped,
                gate.drop_rate(),
                detections,
                detect_ms
            );

            self.last = now;
            self.count = 0;
        } else {
            debug!("🎯 {}个目标 | 检测 {:.1}ms", detections, detect_ms);
        }
    }

    /// 打印最终统计
    pub fn log_summary(&self) {
        let stats = self.stats();
        info!(
            "📊 流水线结束: 到达{} | 准入{} | 丢弃{} ({:.1}%) | 处理{} | 丢弃(处理前){} | 检测失败{}",
            stats.gate.arrived,
            stats.gate.admitted,
            stats.gate.dropped,
            stats.gate.drop_rate(),
            stats.processed,
            stats.dropped_frames,
            stats.detector_failures
        );
    }
}

/// 置信度 ≥ 阈值的检测结果映射回帧坐标
pub fn map_detections(
    detections: &[Detection],
    transform: &GeometryTransform,
    confidence_threshold: f32,
) -> Vec<MappedDetection> {
    detections
        .iter()
        .filter(|d| d.confidence >= confidence_threshold)
        .map(|d| transform.map_back(d))
        .collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
