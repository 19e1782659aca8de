//! 流水线配置 - 命令行参数 + JSON配置文件 + 运行时可调参数

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::geometry::CropRegion;
use crate::input::{FrameSize, SourceFormat};
use crate::utils::InterpolationMethod;

/// 离线回放参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "单槽位检测流水线 - 图片序列回放", long_about = None)]
pub struct Args {
    /// 图片目录 (png/jpg/bmp,按文件名顺序回放)
    #[arg(short, long)]
    pub source: PathBuf,

    /// 预录检测结果 (JSON,每帧一个列表)
    #[arg(short, long)]
    pub detections: Option<PathBuf>,

    /// 配置文件 (不存在时自动创建默认配置)
    #[arg(short, long, default_value = "pipeline_config.json")]
    pub config: PathBuf,

    /// 出帧帧率
    #[arg(long, default_value_t = 30.0)]
    pub fps: f64,

    /// 采集端像素布局: rgba / nv21 / i420
    #[arg(long, default_value = "rgba")]
    pub format: SourceFormat,

    /// 期望采集分辨率,如 1280x720
    #[arg(long)]
    pub preview_size: Option<FrameSize>,

    /// 模型输入尺寸 (覆盖配置文件)
    #[arg(long)]
    pub model_size: Option<u32>,

    /// 置信度阈值 (覆盖配置文件)
    #[arg(long)]
    pub conf: Option<f32>,

    /// 裁剪区域 top,left,width,height (覆盖配置文件)
    #[arg(long)]
    pub crop: Option<CropRegion>,

    /// 插值方法: nearest / bilinear (覆盖配置文件)
    #[arg(long)]
    pub interpolation: Option<InterpolationMethod>,

    /// 模型输入调试输出目录 (覆盖配置文件)
    #[arg(long)]
    pub dump_dir: Option<PathBuf>,

    /// 循环播放
    #[arg(long = "loop")]
    pub looping: bool,

    /// 运行时长 (秒),不指定则播放完毕后退出
    #[arg(long)]
    pub duration: Option<f64>,
}

/// 流水线参数配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model_size: u32,                   // 模型输入边长
    pub confidence_threshold: f32,         // 检测置信度阈值
    pub crop_region: Option<CropRegion>,   // 裁剪区域 (帧坐标)
    pub pad_color: [u8; 4],                // 补边颜色 RGBA
    pub interpolation: InterpolationMethod, // 缩放插值
    pub debug_dump_dir: Option<PathBuf>,   // 模型输入保存目录
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_size: 300,
            confidence_threshold: 0.5,
            crop_region: None,
            pad_color: [0, 0, 0, 255],
            interpolation: InterpolationMethod::Bilinear,
            debug_dump_dir: None,
        }
    }
}

impl PipelineConfig {
    /// 从JSON文件加载配置,文件不存在时写入默认配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    Ok(config)
                }
                Err(e) => {
                    warn!("⚠️ 配置文件解析失败: {}, 使用默认值", e);
                    Ok(Self::default())
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                config.save(path)?;
                Ok(config)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    /// 命令行参数覆盖配置文件
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(model_size) = args.model_size {
            self.model_size = model_size;
        }
        if let Some(conf) = args.conf {
            self.confidence_threshold = conf;
        }
        if let Some(crop) = args.crop {
            self.crop_region = Some(crop);
        }
        if let Some(interpolation) = args.interpolation {
            self.interpolation = interpolation;
        }
        if let Some(dir) = &args.dump_dir {
            self.debug_dump_dir = Some(dir.clone());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "model_size must be positive".to_string(),
            ));
        }
        validate_threshold(self.confidence_threshold)?;
        if let Some(crop) = &self.crop_region {
            if crop.width == 0 || crop.height == 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "crop region {} is empty",
                    crop
                )));
            }
        }
        Ok(())
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️ 当前流水线配置:");
        info!("  模型输入: {}x{}", self.model_size, self.model_size);
        info!("  置信度阈值: {:.2}", self.confidence_threshold);
        match &self.crop_region {
            Some(crop) => info!("  裁剪区域: {}", crop),
            None => info!("  裁剪区域: 无"),
        }
        info!("  补边颜色: {:?}", self.pad_color);
        info!("  插值方法: {:?}", self.interpolation);
        if let Some(dir) = &self.debug_dump_dir {
            info!("  调试输出: {}", dir.display());
        }
    }
}

fn validate_threshold(threshold: f32) -> Result<()> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(PipelineError::InvalidConfig(format!(
            "confidence threshold {} outside [0,1]",
            threshold
        )))
    }
}

/// 工作线程每帧读取一次的参数快照
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettingsSnapshot {
    pub confidence_threshold: f32,
    pub crop_region: Option<CropRegion>,
}

#[derive(Debug)]
struct SettingsState {
    confidence_threshold: f32,
    crop_region: Option<CropRegion>,
    frame_size: Option<(u32, u32)>,
}

/// 运行时可调参数 (界面线程写,工作线程读)
#[derive(Debug)]
pub struct PipelineSettings {
    state: Mutex<SettingsState>,
}

impl PipelineSettings {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            state: Mutex::new(SettingsState {
                confidence_threshold: config.confidence_threshold,
                crop_region: config.crop_region,
                frame_size: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SettingsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> SettingsSnapshot {
        let state = self.lock();
        SettingsSnapshot {
            confidence_threshold: state.confidence_threshold,
            crop_region: state.crop_region,
        }
    }

    /// 设置裁剪区域;非法时保留原区域并返回错误
    pub fn set_crop_region(&self, region: CropRegion) -> Result<()> {
        let mut state = self.lock();
        let check = match state.frame_size {
            Some((w, h)) => region.validate(w, h),
            None if region.width == 0 || region.height == 0 => {
                Err(PipelineError::InvalidCropRegion {
                    region,
                    frame_width: 0,
                    frame_height: 0,
                })
            }
            None => Ok(()),
        };
        match check {
            Ok(()) => {
                info!("✂️ 裁剪区域: {}", region);
                state.crop_region = Some(region);
                Ok(())
            }
            Err(e) => {
                warn!("⚠️ 拒绝裁剪区域: {}", e);
                Err(e)
            }
        }
    }

    pub fn clear_crop_region(&self) {
        if self.lock().crop_region.take().is_some() {
            info!("✂️ 裁剪区域已清除");
        }
    }

    pub fn set_confidence_threshold(&self, threshold: f32) -> Result<()> {
        validate_threshold(threshold)?;
        self.lock().confidence_threshold = threshold;
        info!("🎛️ 置信度阈值: {:.2}", threshold);
        Ok(())
    }

    /// 记录当前帧尺寸;尺寸变化后裁剪区域越界时停用裁剪,返回被停用的区域
    pub fn observe_frame_size(&self, width: u32, height: u32) -> Option<CropRegion> {
        let mut state = self.lock();
        if state.frame_size == Some((width, height)) {
            return None;
        }
        state.frame_size = Some((width, height));

        let crop = state.crop_region?;
        if crop.validate(width, height).is_ok() {
            return None;
        }
        state.crop_region = None;
        warn!(
            "⚠️ 帧尺寸变为 {}x{}, 裁剪区域 {} 越界,已停用裁剪",
            width, height, crop
        );
        Some(crop)
    }
}
