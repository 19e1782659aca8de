/// 仿射变换工具模块
/// 帧坐标 ↔ 模型坐标的正向/反向映射都由同一个矩阵推导
use serde::{Deserialize, Serialize};

/// 仿射变换矩阵 (2x3)
/// | a11 a12 b1 |
/// | a21 a22 b2 |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMatrix {
    pub a11: f32,
    pub a12: f32,
    pub b1: f32,
    pub a21: f32,
    pub a22: f32,
    pub b2: f32,
}

impl AffineMatrix {
    /// 创建单位仿射矩阵
    pub fn identity() -> Self {
        Self {
            a11: 1.0,
            a12: 0.0,
            b1: 0.0,
            a21: 0.0,
            a22: 1.0,
            b2: 0.0,
        }
    }

    /// 应用仿射变换到点 (x, y)
    pub fn transform_point(&self, x: f32, y: f32) -> (f32, f32) {
        let new_x = self.a11 * x + self.a12 * y + self.b1;
        let new_y = self.a21 * x + self.a22 * y + self.b2;
        (new_x, new_y)
    }

    /// 创建平移矩阵
    pub fn translation(dx: f32, dy: f32) -> Self {
        Self {
            b1: dx,
            b2: dy,
            ..Self::identity()
        }
    }

    /// 创建缩放矩阵
    pub fn scale(sx: f32, sy: f32) -> Self {
        Self {
            a11: sx,
            a22: sy,
            ..Self::identity()
        }
    }

    /// 矩阵组合 (self * other): 先应用other,再应用self
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            a11: self.a11 * other.a11 + self.a12 * other.a21,
            a12: self.a11 * other.a12 + self.a12 * other.a22,
            b1: self.a11 * other.b1 + self.a12 * other.b2 + self.b1,
            a21: self.a21 * other.a11 + self.a22 * other.a21,
            a22: self.a21 * other.a12 + self.a22 * other.a22,
            b2: self.a21 * other.b1 + self.a22 * other.b2 + self.b2,
        }
    }
}

/// 插值方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    Nearest, // 最近邻插值
    #[default]
    Bilinear, // 双线性插值
}

impl std::str::FromStr for InterpolationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" => Ok(Self::Nearest),
            "bilinear" | "linear" => Ok(Self::Bilinear),
            other => Err(format!("unknown interpolation method: {}", other)),
        }
    }
}
