/// 几何变换流水线 (Geometry Pipeline)
///
/// 帧空间 → 模型空间: 裁剪(可选) → 补边成正方形 → 缩放到 model_size × model_size
/// 模型空间 → 帧空间: 同一个 `GeometryTransform` 的精确逆变换
///
/// 变换每帧计算一次,正向(生成模型输入)与反向(映射检测框)共用,避免两处算法漂移。
pub mod letterbox;

pub use letterbox::LetterboxRenderer;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::detection::types::{BoxRect, Detection, MappedDetection};
use crate::error::{PipelineError, Result};
use crate::utils::AffineMatrix;

/// 裁剪区域 (帧坐标)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CropRegion {
    pub top: u32,
    pub left: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    pub fn new(top: u32, left: u32, width: u32, height: u32) -> Self {
        Self {
            top,
            left,
            width,
            height,
        }
    }

    pub fn bottom(&self) -> u64 {
        self.top as u64 + self.height as u64
    }

    pub fn right(&self) -> u64 {
        self.left as u64 + self.width as u64
    }

    /// 校验区域是否完全位于帧内。越界直接拒绝,不做截断。
    pub fn validate(&self, frame_width: u32, frame_height: u32) -> Result<()> {
        let fits = self.width > 0
            && self.height > 0
            && self.bottom() <= frame_height as u64
            && self.right() <= frame_width as u64;
        if fits {
            Ok(())
        } else {
            Err(PipelineError::InvalidCropRegion {
                region: *self,
                frame_width,
                frame_height,
            })
        }
    }
}

impl fmt::Display for CropRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(top={}, left={}, {}x{})",
            self.top, self.left, self.width, self.height
        )
    }
}

/// 解析 "top,left,width,height"
impl FromStr for CropRegion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| format!("invalid crop region '{}': {}", s, e))?;
        match parts.as_slice() {
            [top, left, width, height] => Ok(Self::new(*top, *left, *width, *height)),
            _ => Err(format!(
                "invalid crop region '{}': expected top,left,width,height",
                s
            )),
        }
    }
}

/// 单帧几何变换记录 (每帧重新计算,不跨帧保存)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryTransform {
    pub crop_applied: bool,
    pub crop_offset_x: u32,
    pub crop_offset_y: u32,

    /// 工作矩形 (裁剪区域或整帧)
    pub working_width: u32,
    pub working_height: u32,

    pub pad_top: u32,
    pub pad_bottom: u32,
    pub pad_left: u32,
    pub pad_right: u32,

    /// 补边后正方形边长 = max(working_width, working_height)
    pub square_side: u32,
    pub model_size: u32,

    /// square_side / model_size
    pub scale_ratio: f32,
}

/// 计算正向变换
///
/// 1. 有裁剪区域时工作矩形为裁剪区域,否则为整帧
/// 2. 宽>高时上下补边 (w-h)/2,余数补在下方;高>宽时左右补边,余数补在右侧
/// 3. 正方形统一缩放到 model_size
pub fn build_transform(
    frame_width: u32,
    frame_height: u32,
    crop: Option<&CropRegion>,
    model_size: u32,
) -> Result<GeometryTransform> {
    if model_size == 0 {
        return Err(PipelineError::InvalidConfig(
            "model size must be positive".to_string(),
        ));
    }
    if frame_width == 0 || frame_height == 0 {
        return Err(PipelineError::MalformedFrame(format!(
            "empty frame {}x{}",
            frame_width, frame_height
        )));
    }

    let (crop_applied, crop_offset_x, crop_offset_y, working_width, working_height) = match crop
    {
        Some(region) => {
            region.validate(frame_width, frame_height)?;
            (true, region.left, region.top, region.width, region.height)
        }
        None => (false, 0, 0, frame_width, frame_height),
    };

    let (mut pad_top, mut pad_bottom, mut pad_left, mut pad_right) = (0, 0, 0, 0);
    if working_width > working_height {
        let diff = working_width - working_height;
        pad_top = diff / 2;
        pad_bottom = diff - pad_top;
    } else if working_height > working_width {
        let diff = working_height - working_width;
        pad_left = diff / 2;
        pad_right = diff - pad_left;
    }

    let square_side = working_width.max(working_height);

    Ok(GeometryTransform {
        crop_applied,
        crop_offset_x,
        crop_offset_y,
        working_width,
        working_height,
        pad_top,
        pad_bottom,
        pad_left,
        pad_right,
        square_side,
        model_size,
        scale_ratio: square_side as f32 / model_size as f32,
    })
}

impl GeometryTransform {
    /// 模型坐标 → 帧坐标: 先乘scale_ratio撤销缩放,再减前导补边,最后加裁剪偏移
    pub fn model_to_frame(&self) -> AffineMatrix {
        let dx = self.crop_offset_x as f32 - self.pad_left as f32;
        let dy = self.crop_offset_y as f32 - self.pad_top as f32;
        AffineMatrix::translation(dx, dy)
            .compose(&AffineMatrix::scale(self.scale_ratio, self.scale_ratio))
    }

    /// 帧坐标 → 模型坐标 (model_to_frame 的逆)
    pub fn frame_to_model(&self) -> AffineMatrix {
        let inv_ratio = 1.0 / self.scale_ratio;
        let dx = self.pad_left as f32 - self.crop_offset_x as f32;
        let dy = self.pad_top as f32 - self.crop_offset_y as f32;
        AffineMatrix::scale(inv_ratio, inv_ratio).compose(&AffineMatrix::translation(dx, dy))
    }

    /// 将模型空间的框映射回原始帧坐标
    pub fn map_box_back(&self, location: &BoxRect) -> BoxRect {
        map_rect(&self.model_to_frame(), location)
    }

    /// 将帧坐标的框映射到模型空间
    pub fn map_box_forward(&self, location: &BoxRect) -> BoxRect {
        map_rect(&self.frame_to_model(), location)
    }

    /// 反向映射单个检测结果,标签与置信度不变
    pub fn map_back(&self, detection: &Detection) -> MappedDetection {
        MappedDetection {
            label: detection.label.clone(),
            confidence: detection.confidence,
            location: self.map_box_back(&detection.location),
        }
    }
}

fn map_rect(matrix: &AffineMatrix, rect: &BoxRect) -> BoxRect {
    let (left, top) = matrix.transform_point(rect.left, rect.top);
    let (right, bottom) = matrix.transform_point(rect.right, rect.bottom);
    BoxRect {
        top,
        left,
        bottom,
        right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn approx(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn test_landscape_frame_pads_top_and_bottom() {
        let t = build_transform(640, 480, None, 300).unwrap();
        assert!(!t.crop_applied);
        assert_eq!((t.pad_top, t.pad_bottom), (80, 80));
        assert_eq!((t.pad_left, t.pad_right), (0, 0));
        assert_eq!(t.square_side, 640);
        assert!(approx(t.scale_ratio, 640.0 / 300.0, 1e-6));
    }

    #[test]
    fn test_full_model_box_covers_letterboxed_frame() {
        let t = build_transform(640, 480, None, 300).unwrap();
        let det = Detection::new("person", 0.9, BoxRect::new(0.0, 0.0, 300.0, 300.0));
        let mapped = t.map_back(&det);
        assert!(approx(mapped.location.top, -80.0, 1e-3));
        assert!(approx(mapped.location.left, 0.0, 1e-3));
        assert!(approx(mapped.location.bottom, 560.0, 1e-3));
        assert!(approx(mapped.location.right, 640.0, 1e-3));
        assert_eq!(mapped.label, "person");
        assert_eq!(mapped.confidence, 0.9);
    }

    #[test]
    fn test_portrait_frame_pads_left_and_right() {
        let t = build_transform(480, 640, None, 320).unwrap();
        assert_eq!((t.pad_left, t.pad_right), (80, 80));
        assert_eq!((t.pad_top, t.pad_bottom), (0, 0));
    }

    #[test]
    fn test_square_frame_has_no_padding() {
        let t = build_transform(300, 300, None, 300).unwrap();
        assert_eq!((t.pad_top, t.pad_bottom, t.pad_left, t.pad_right), (0, 0, 0, 0));
        assert_eq!(t.scale_ratio, 1.0);
    }

    #[test]
    fn test_odd_difference_puts_remainder_on_bottom_and_right() {
        let t = build_transform(101, 50, None, 64).unwrap();
        assert_eq!((t.pad_top, t.pad_bottom), (25, 26));
        let t = build_transform(50, 101, None, 64).unwrap();
        assert_eq!((t.pad_left, t.pad_right), (25, 26));
    }

    #[test]
    fn test_crop_is_padded_to_square() {
        let crop = CropRegion::new(50, 50, 200, 100);
        let t = build_transform(640, 480, Some(&crop), 300).unwrap();
        assert!(t.crop_applied);
        assert_eq!((t.crop_offset_x, t.crop_offset_y), (50, 50));
        assert_eq!((t.pad_top, t.pad_bottom), (50, 50));
        assert_eq!((t.pad_left, t.pad_right), (0, 0));
        assert_eq!(t.square_side, 200);
        assert!(approx(t.scale_ratio, 200.0 / 300.0, 1e-6));
    }

    #[test]
    fn test_crop_offset_is_added_back() {
        let crop = CropRegion::new(50, 50, 200, 100);
        let t = build_transform(640, 480, Some(&crop), 300).unwrap();
        // 模型空间中心 → 裁剪区域中心
        let det = Detection::new("car", 0.7, BoxRect::new(150.0, 150.0, 150.0, 150.0));
        let mapped = t.map_back(&det);
        assert!(approx(mapped.location.left, 150.0, 1e-3));
        assert!(approx(mapped.location.top, 100.0, 1e-3));
    }

    #[test]
    fn test_crop_outside_frame_is_rejected() {
        let crop = CropRegion::new(400, 0, 100, 100);
        let err = build_transform(640, 480, Some(&crop), 300).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidCropRegion { .. }));

        let crop = CropRegion::new(0, 600, 41, 10);
        assert!(build_transform(640, 480, Some(&crop), 300).is_err());

        // 恰好贴边是合法的
        let crop = CropRegion::new(380, 540, 100, 100);
        assert!(build_transform(640, 480, Some(&crop), 300).is_ok());
    }

    #[test]
    fn test_empty_crop_and_zero_model_size_are_rejected() {
        let crop = CropRegion::new(0, 0, 0, 10);
        assert!(build_transform(640, 480, Some(&crop), 300).is_err());
        assert!(matches!(
            build_transform(640, 480, None, 0),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_round_trip_random_geometry() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let fw = rng.gen_range(1..2000u32);
            let fh = rng.gen_range(1..2000u32);
            let model = rng.gen_range(1..1024u32);
            let crop = if rng.gen_bool(0.5) {
                let w = rng.gen_range(1..=fw);
                let h = rng.gen_range(1..=fh);
                let left = rng.gen_range(0..=fw - w);
                let top = rng.gen_range(0..=fh - h);
                Some(CropRegion::new(top, left, w, h))
            } else {
                None
            };
            let t = build_transform(fw, fh, crop.as_ref(), model).unwrap();

            let (x0, y0) = (rng.gen_range(0..fw) as f32, rng.gen_range(0..fh) as f32);
            let original = BoxRect::new(y0, x0, fh as f32, fw as f32);
            let model_box = t.map_box_forward(&original);
            let back = t.map_box_back(&model_box);

            assert!(approx(back.top, original.top, 1.0), "{:?} {:?}", t, back);
            assert!(approx(back.left, original.left, 1.0), "{:?} {:?}", t, back);
            assert!(approx(back.bottom, original.bottom, 1.0), "{:?} {:?}", t, back);
            assert!(approx(back.right, original.right, 1.0), "{:?} {:?}", t, back);
        }
    }

    #[test]
    fn test_forward_and_inverse_matrices_compose_to_identity() {
        let crop = CropRegion::new(50, 50, 200, 100);
        let t = build_transform(640, 480, Some(&crop), 300).unwrap();
        let m = t.model_to_frame().compose(&t.frame_to_model());
        let id = AffineMatrix::identity();
        for (got, want) in [
            (m.a11, id.a11),
            (m.a12, id.a12),
            (m.b1, id.b1),
            (m.a21, id.a21),
            (m.a22, id.a22),
            (m.b2, id.b2),
        ] {
            assert!(approx(got, want, 1e-4), "{:?}", m);
        }
    }

    #[test]
    fn test_padding_pairs_are_exclusive_without_crop() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let fw = rng.gen_range(1..4000u32);
            let fh = rng.gen_range(1..4000u32);
            let t = build_transform(fw, fh, None, 300).unwrap();
            let vertical = t.pad_top + t.pad_bottom;
            let horizontal = t.pad_left + t.pad_right;
            if fw == fh {
                assert_eq!((vertical, horizontal), (0, 0));
            } else {
                assert!(vertical == 0 || horizontal == 0);
                assert!(t.pad_top.abs_diff(t.pad_bottom) <= 1);
                assert!(t.pad_left.abs_diff(t.pad_right) <= 1);
            }
            assert_eq!(t.working_width + horizontal, t.square_side);
            assert_eq!(t.working_height + vertical, t.square_side);
        }
    }

    #[test]
    fn test_crop_region_parse_and_display() {
        let crop: CropRegion = "50, 60,200,100".parse().unwrap();
        assert_eq!(crop, CropRegion::new(50, 60, 200, 100));
        assert_eq!(crop.to_string(), "(top=50, left=60, 200x100)");
        assert!("1,2,3".parse::<CropRegion>().is_err());
        assert!("a,b,c,d".parse::<CropRegion>().is_err());
    }
}
