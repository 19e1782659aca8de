//! 采集分辨率协商模块
//!
//! 从采集端支持的分辨率列表中选出送入流水线的帧尺寸

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// 最小可接受边长 (像素)
pub const MINIMUM_PREVIEW_SIZE: u32 = 320;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// 解析 "1280x720"
impl FromStr for FrameSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("invalid frame size '{}': expected WIDTHxHEIGHT", s))?;
        let width = w
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid frame width '{}': {}", w, e))?;
        let height = h
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid frame height '{}': {}", h, e))?;
        if width == 0 || height == 0 {
            return Err(format!("invalid frame size '{}': sides must be positive", s));
        }
        Ok(Self { width, height })
    }
}

/// 选择最合适的采集分辨率
///
/// 最小边长 = max(min(期望宽, 期望高), 320)。
/// 完全匹配优先;否则取两边都不小于最小边长的面积最小者;都不满足时退回第一个选项。
pub fn choose_optimal_size(choices: &[FrameSize], desired: FrameSize) -> Option<FrameSize> {
    let first = *choices.first()?;
    let min_side = desired.width.min(desired.height).max(MINIMUM_PREVIEW_SIZE);

    let (big_enough, too_small): (Vec<FrameSize>, Vec<FrameSize>) = choices
        .iter()
        .partition(|s| s.width >= min_side && s.height >= min_side);

    info!(
        "📐 期望分辨率: {}, 最小边长: {}x{}",
        desired, min_side, min_side
    );
    info!("📐 可用分辨率: {}", join_sizes(&big_enough));
    info!("📐 过小分辨率: {}", join_sizes(&too_small));

    if choices.contains(&desired) {
        info!("✅ 找到完全匹配的分辨率");
        return Some(desired);
    }

    match big_enough.iter().min_by_key(|s| s.area()) {
        Some(chosen) => {
            info!("✅ 选择分辨率: {}", chosen);
            Some(*chosen)
        }
        None => {
            error!("❌ 没有合适的分辨率,使用 {}", first);
            Some(first)
        }
    }
}

fn join_sizes(sizes: &[FrameSize]) -> String {
    sizes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
