/// Letterbox渲染: 裁剪 → 补边 → 缩放,输出模型输入图像
/// Letterbox renderer producing the square model input
use fast_image_resize as fr;
use image::{imageops, Rgba, RgbaImage};

use super::GeometryTransform;
use crate::error::{PipelineError, Result};
use crate::input::decode_filter::CanonicalImage;
use crate::utils::InterpolationMethod;

pub struct LetterboxRenderer {
    fill: Rgba<u8>,
    interpolation: InterpolationMethod,
    resizer: fr::Resizer, // 复用缩放器内部缓冲区
    canvas: Option<RgbaImage>, // 补边画布,边长不变时复用
}

impl LetterboxRenderer {
    pub fn new(pad_color: [u8; 4], interpolation: InterpolationMethod) -> Self {
        Self {
            fill: Rgba(pad_color),
            interpolation,
            resizer: fr::Resizer::new(),
            canvas: None,
        }
    }

    pub fn set_interpolation(&mut self, interpolation: InterpolationMethod) {
        self.interpolation = interpolation;
    }

    pub fn set_pad_color(&mut self, pad_color: [u8; 4]) {
        self.fill = Rgba(pad_color);
    }

    /// 按变换记录生成 model_size × model_size 的RGBA图像
    pub fn apply(
        &mut self,
        image: &CanonicalImage,
        transform: &GeometryTransform,
    ) -> Result<RgbaImage> {
        if image.width() < transform.crop_offset_x + transform.working_width
            || image.height() < transform.crop_offset_y + transform.working_height
        {
            return Err(PipelineError::MalformedFrame(format!(
                "image {}x{} smaller than working rect {}x{}+{}+{}",
                image.width(),
                image.height(),
                transform.working_width,
                transform.working_height,
                transform.crop_offset_x,
                transform.crop_offset_y
            )));
        }

        // 1. 裁剪 + 补边: 将工作矩形贴到填充色画布的 (pad_left, pad_top)
        let source = image.view()?;
        let region = imageops::crop_imm(
            &source,
            transform.crop_offset_x,
            transform.crop_offset_y,
            transform.working_width,
            transform.working_height,
        );
        let side = transform.square_side;
        let mut canvas = match self.canvas.take() {
            Some(canvas) if canvas.dimensions() == (side, side) => canvas,
            _ => RgbaImage::new(side, side),
        };
        fill_padding(&mut canvas, transform, self.fill);
        imageops::replace(
            &mut canvas,
            &*region,
            transform.pad_left as i64,
            transform.pad_top as i64,
        );

        // 2. 缩放到模型尺寸
        let model_size = transform.model_size;
        if side == model_size {
            let output = canvas.clone();
            self.canvas = Some(canvas);
            return Ok(output);
        }

        let resized = self.resize(&canvas, side, model_size);
        self.canvas = Some(canvas);
        resized
    }

    fn resize(&mut self, canvas: &RgbaImage, side: u32, model_size: u32) -> Result<RgbaImage> {
        let src_image = fr::images::ImageRef::new(side, side, canvas.as_raw(), fr::PixelType::U8x4)
            .map_err(|e| PipelineError::Resize(e.to_string()))?;
        let mut dst_image = fr::images::Image::new(model_size, model_size, fr::PixelType::U8x4);

        let alg = match self.interpolation {
            InterpolationMethod::Nearest => fr::ResizeAlg::Nearest,
            InterpolationMethod::Bilinear => {
                fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)
            }
        };
        self.resizer
            .resize(
                &src_image,
                &mut dst_image,
                &fr::ResizeOptions::new().resize_alg(alg),
            )
            .map_err(|e| PipelineError::Resize(e.to_string()))?;

        RgbaImage::from_raw(model_size, model_size, dst_image.buffer().to_vec()).ok_or_else(|| {
            PipelineError::Resize("resized buffer has unexpected length".to_string())
        })
    }
}

/// 填充工作矩形以外的区域 (画布复用时上一帧的内容可能残留在这里)
fn fill_padding(canvas: &mut RgbaImage, transform: &GeometryTransform, fill: Rgba<u8>) {
    let side = transform.square_side;
    let (x0, y0) = (transform.pad_left, transform.pad_top);
    let (x1, y1) = (x0 + transform.working_width, y0 + transform.working_height);
    for y in 0..side {
        if y < y0 || y >= y1 {
            for x in 0..side {
                canvas.put_pixel(x, y, fill);
            }
        } else {
            for x in (0..x0).chain(x1..side) {
                canvas.put_pixel(x, y, fill);
            }
        }
    }
}
