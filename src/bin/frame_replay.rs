/// 帧回放检测 (Frame Replay)
///
/// 离线运行完整检测流水线
///
/// 系统架构:
/// 1. 采集线程: 图片序列按帧率出帧 (定时器回调)
/// 2. 检测线程: 准入闸门 → 转换 → letterbox → 检测 → 映射
/// 3. 主线程:   渲染交接 (跟踪器 + 界面回调)
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use image::RgbaImage;
use mimalloc::MiMalloc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use framegate_rs::detection::{LoggingMetrics, LoggingTracker, ReplayDetector};
use framegate_rs::input::{choose_optimal_size, FrameSize, FrameSource, ImageSequenceSource};
use framegate_rs::pipeline::{render_channel, spawn_pipeline, DetectionCoordinator};
use framegate_rs::{Args, Detection, FrameIngestGate, ObjectDetector, PipelineConfig, PipelineSettings};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// 常见采集分辨率
const STANDARD_SIZES: [(u32, u32); 5] = [(1920, 1080), (1280, 720), (800, 600), (640, 480), (320, 240)];

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    // ========== 配置 ==========
    let mut config = PipelineConfig::load(&args.config)?;
    config.apply_args(&args);
    config.validate()?;
    config.print_summary();

    // ========== 采集端 ==========
    let mut source = ImageSequenceSource::open(&args.source, args.fps, args.format)?
        .with_looping(args.looping);
    if let Some(desired) = args.preview_size {
        let native = source.native_size()?;
        let mut choices = vec![native];
        choices.extend(
            STANDARD_SIZES
                .iter()
                .map(|&(w, h)| FrameSize::new(w, h))
                .filter(|s| *s != native),
        );
        let chosen = choose_optimal_size(&choices, desired);
        source = source.with_target_size(chosen.filter(|s| *s != native));
    }

    // ========== 检测器 ==========
    let detector: Box<dyn ObjectDetector> = match &args.detections {
        Some(path) => Box::new(ReplayDetector::from_path(path)?),
        None => {
            warn!("⚠️ 未指定检测结果文件,检测器始终返回空结果");
            Box::new(|_: &RgbaImage| -> anyhow::Result<Vec<Detection>> { Ok(Vec::new()) })
        }
    };

    // ========== 检测线程 ==========
    let settings = Arc::new(PipelineSettings::new(&config));
    let (dispatcher, mut render) = render_channel();
    let coordinator = DetectionCoordinator::new(
        &config,
        Arc::new(FrameIngestGate::new()),
        settings.clone(),
        detector,
        Box::new(dispatcher.clone()),
        Box::new(dispatcher),
    )?;
    let pipeline = spawn_pipeline(coordinator, settings)?;

    source
        .start(pipeline.sink())
        .with_context(|| format!("failed to start {}", source.name()))?;
    info!("🚀 回放开始");

    // ========== 主线程: 渲染交接 ==========
    let mut tracker = LoggingTracker::new();
    let mut metrics = LoggingMetrics::default();
    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs_f64(secs.max(0.0)));

    loop {
        render.step(Duration::from_millis(50), &mut tracker, &mut metrics);
        if source.is_finished() {
            break;
        }
        if deadline.map_or(false, |d| Instant::now() >= d) {
            break;
        }
    }

    source.stop();
    let stats = pipeline.shutdown();
    render.pump(&mut tracker, &mut metrics);

    let source_stats = source.stats();
    info!(
        "✅ 回放结束: 采集端出帧{} / 释放{} | 流水线处理{} | 跟踪器收到{}帧 {}个目标",
        source_stats.emitted,
        source_stats.released,
        stats.processed,
        tracker.frames(),
        tracker.detections()
    );
    if source_stats.emitted != source_stats.released {
        warn!(
            "⚠️ 有帧未被释放: 出帧{} 释放{}",
            source_stats.emitted, source_stats.released
        );
    }
    Ok(())
}
