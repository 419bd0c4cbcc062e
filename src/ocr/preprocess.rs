use image::{imageops, ImageBuffer, Rgba};

use crate::geometry::Rotation;

/// Luminance weights used to desaturate (same as a zero-saturation color matrix).
const LUMA_R: f32 = 0.213;
const LUMA_G: f32 = 0.715;
const LUMA_B: f32 = 0.072;

/// Default contrast factor for gauge displays.
pub const DEFAULT_CONTRAST: f32 = 2.0;

/// Enhances a bitmap for OCR: grayscale, then a linear contrast stretch.
///
/// Each pixel becomes `clamp(contrast * luma - 128 * (contrast - 1))` on
/// R, G and B; alpha is left unchanged. Mid-gray stays put, lighter tones
/// are pushed to white and darker ones to black, which helps dark digits
/// on a light display.
///
/// The result is deterministic for a given input but the operation is not
/// idempotent: enhancing twice stretches contrast twice.
pub fn enhance(
    img: &ImageBuffer<Rgba<u8>, Vec<u8>>,
    contrast: f32,
) -> ImageBuffer<Rgba<u8>, Vec<u8>> {
    let offset = -128.0 * (contrast - 1.0);
    let (width, height) = img.dimensions();
    let mut output = ImageBuffer::new(width, height);

    for (x, y, pixel) in img.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let luma = LUMA_R * r as f32 + LUMA_G * g as f32 + LUMA_B * b as f32;
        let value = (contrast * luma + offset).round().clamp(0.0, 255.0) as u8;
        output.put_pixel(x, y, Rgba([value, value, value, a]));
    }

    output
}

/// Rotates a bitmap clockwise so its content is upright.
pub fn rotate_upright(
    img: &ImageBuffer<Rgba<u8>, Vec<u8>>,
    rotation: Rotation,
) -> ImageBuffer<Rgba<u8>, Vec<u8>> {
    match rotation {
        Rotation::Deg0 => img.clone(),
        Rotation::Deg90 => imageops::rotate90(img),
        Rotation::Deg180 => imageops::rotate180(img),
        Rotation::Deg270 => imageops::rotate270(img),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(v: u8) -> Rgba<u8> {
        Rgba([v, v, v, 255])
    }

    #[test]
    fn test_enhance_stretches_contrast() {
        let mut img: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::new(4, 1);
        img.put_pixel(0, 0, gray(128)); // mid-gray stays
        img.put_pixel(1, 0, gray(200)); // light -> white
        img.put_pixel(2, 0, gray(50)); // dark -> black
        img.put_pixel(3, 0, gray(160));

        let result = enhance(&img, DEFAULT_CONTRAST);

        assert_eq!(result.get_pixel(0, 0)[0], 128);
        assert_eq!(result.get_pixel(1, 0)[0], 255);
        assert_eq!(result.get_pixel(2, 0)[0], 0);
        assert_eq!(result.get_pixel(3, 0)[0], 192);
    }

    #[test]
    fn test_enhance_desaturates_and_keeps_alpha() {
        let mut img: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::new(2, 1);
        img.put_pixel(0, 0, Rgba([255, 0, 0, 40]));
        img.put_pixel(1, 0, Rgba([0, 255, 0, 255]));

        let result = enhance(&img, DEFAULT_CONTRAST);

        let red = result.get_pixel(0, 0);
        assert_eq!(red[0], red[1]);
        assert_eq!(red[1], red[2]);
        // luma 54.3 is dark: stretched to black
        assert_eq!(red[0], 0);
        assert_eq!(red[3], 40, "Alpha must be unchanged");

        // luma 182.325 -> 2 * 182.325 - 128 = 236.65
        assert_eq!(result.get_pixel(1, 0)[0], 237);
    }

    #[test]
    fn test_enhance_is_deterministic() {
        let img: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_fn(16, 16, |x, y| {
            Rgba([(x * 16) as u8, (y * 16) as u8, ((x + y) * 8) as u8, 255])
        });

        let once = enhance(&img, DEFAULT_CONTRAST);
        assert_eq!(once, enhance(&img, DEFAULT_CONTRAST));
        assert_eq!(once.dimensions(), img.dimensions());
    }

    #[test]
    fn test_enhance_twice_differs() {
        let img: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_pixel(1, 1, gray(150));
        let once = enhance(&img, DEFAULT_CONTRAST);
        let twice = enhance(&once, DEFAULT_CONTRAST);
        assert_ne!(once, twice);
    }

    #[test]
    fn test_contrast_one_is_plain_grayscale() {
        let img: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_pixel(1, 1, gray(77));
        assert_eq!(enhance(&img, 1.0).get_pixel(0, 0)[0], 77);
    }

    #[test]
    fn test_rotate_upright_dimensions() {
        let img: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::new(30, 10);
        assert_eq!(rotate_upright(&img, Rotation::Deg0).dimensions(), (30, 10));
        assert_eq!(rotate_upright(&img, Rotation::Deg90).dimensions(), (10, 30));
        assert_eq!(rotate_upright(&img, Rotation::Deg180).dimensions(), (30, 10));
        assert_eq!(rotate_upright(&img, Rotation::Deg270).dimensions(), (10, 30));
    }
}
