use std::path::Path;

use image::{DynamicImage, ImageFormat};

use crate::error::AssetError;
use crate::scene::EnvironmentMap;

/// Decodes an equirectangular image into linear radiance. Float formats
/// (Radiance HDR, OpenEXR) are taken as linear; 8/16-bit images are assumed
/// sRGB-encoded.
pub fn decode_environment_bytes(
    bytes: &[u8],
    format: Option<ImageFormat>,
) -> Result<EnvironmentMap, AssetError> {
    let image = match format {
        Some(format) => image::load_from_memory_with_format(bytes, format)?,
        None => image::load_from_memory(bytes)?,
    };
    Ok(environment_from_image(image))
}

pub fn decode_environment_file(path: &Path) -> Result<EnvironmentMap, AssetError> {
    let bytes = std::fs::read(path).map_err(|source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode_environment_bytes(&bytes, ImageFormat::from_path(path).ok())
}

pub fn environment_from_image(image: DynamicImage) -> EnvironmentMap {
    let linear = matches!(
        image,
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_)
    );
    let rgba = image.into_rgba32f();
    let (width, height) = rgba.dimensions();
    let texels = rgba
        .pixels()
        .map(|p| {
            let [r, g, b, a] = p.0;
            if linear {
                [r, g, b, a]
            } else {
                [srgb_to_linear(r), srgb_to_linear(g), srgb_to_linear(b), a]
            }
        })
        .collect();
    EnvironmentMap {
        width,
        height,
        texels,
    }
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgb32FImage, RgbImage};

    #[test]
    fn float_images_stay_linear() {
        let img = Rgb32FImage::from_pixel(4, 2, Rgb([2.5, 0.5, 0.0]));
        let map = environment_from_image(DynamicImage::ImageRgb32F(img));
        assert_eq!((map.width, map.height), (4, 2));
        assert_eq!(map.texels[0], [2.5, 0.5, 0.0, 1.0]);
    }

    #[test]
    fn ldr_images_are_linearized() {
        let img = RgbImage::from_pixel(1, 1, Rgb([255, 128, 0]));
        let map = environment_from_image(DynamicImage::ImageRgb8(img));
        let [r, g, b, _] = map.texels[0];
        assert!((r - 1.0).abs() < 1e-6);
        assert!((g - 0.2158605).abs() < 1e-3, "{g}");
        assert_eq!(b, 0.0);
    }

    #[test]
    fn png_bytes_decode() {
        let img = RgbImage::from_pixel(2, 1, Rgb([0, 0, 255]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        let map = decode_environment_bytes(&bytes, None).unwrap();
        assert_eq!(map.texels.len(), 2);
        assert_eq!(map.texels[1][2], 1.0);
    }
}
