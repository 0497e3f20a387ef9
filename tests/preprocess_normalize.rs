//! Integration tests for image normalization

mod common;

use common::test_images::{encode, gradient, png, solid};
use image::{
    ColorType, DynamicImage, GenericImageView, ImageBuffer, ImageFormat as CodecFormat, Luma, LumaA,
    Rgb, Rgba, RgbaImage,
};
use vision_gateway::config::PreprocessConfig;
use vision_gateway::{GatewayError, ImageFormat, Preprocessor};

fn png_preprocessor() -> Preprocessor {
    Preprocessor::new(PreprocessConfig {
        format: ImageFormat::Png,
        ..PreprocessConfig::default()
    })
}

#[test]
fn normalizing_twice_changes_nothing() {
    for preprocessor in [Preprocessor::default(), png_preprocessor()] {
        let once = preprocessor.normalize(&png(&gradient(320, 200, 17))).unwrap();
        let twice = preprocessor.normalize(&once.bytes).unwrap();

        assert_eq!(twice.hash, once.hash);
        assert_eq!(twice.bytes, once.bytes);
        assert_eq!((twice.width, twice.height), (320, 200));
        assert_eq!(twice.compression_ratio(), 1.0);
    }
}

#[test]
fn source_container_does_not_affect_the_hash() {
    let img = gradient(100, 80, 3);
    let preprocessor = Preprocessor::default();

    let from_png = preprocessor.normalize(&encode(&img, CodecFormat::Png)).unwrap();
    let from_bmp = preprocessor.normalize(&encode(&img, CodecFormat::Bmp)).unwrap();

    assert_eq!(from_png.hash, from_bmp.hash);
    assert_ne!(from_png.original_size, from_bmp.original_size);
}

#[test]
fn oversized_images_fit_the_bounding_box() {
    let preprocessor = Preprocessor::default();
    let out = preprocessor.normalize(&png(&gradient(3000, 1000, 0))).unwrap();

    assert_eq!((out.width, out.height), (2048, 683));
    let decoded = image::load_from_memory(&out.bytes).unwrap();
    assert_eq!(decoded.dimensions(), (2048, 683));
}

#[test]
fn tall_images_are_clamped_by_height() {
    let preprocessor = Preprocessor::new(PreprocessConfig {
        max_width: 400,
        max_height: 300,
        ..PreprocessConfig::default()
    });
    let out = preprocessor.normalize(&png(&solid(300, 600, [10, 20, 30]))).unwrap();
    assert_eq!((out.width, out.height), (150, 300));
}

#[test]
fn small_images_are_never_upscaled() {
    let out = Preprocessor::default()
        .normalize(&png(&solid(40, 30, [200, 200, 200])))
        .unwrap();
    assert_eq!((out.width, out.height), (40, 30));
}

#[test]
fn output_matches_the_configured_format() {
    let source = png(&gradient(64, 64, 9));

    let jpeg = Preprocessor::default().normalize(&source).unwrap();
    assert_eq!(jpeg.format, ImageFormat::Jpeg);
    assert_eq!(image::guess_format(&jpeg.bytes).unwrap(), CodecFormat::Jpeg);
    assert!(jpeg.data_url().starts_with("data:image/jpeg;base64,"));

    let png_out = png_preprocessor().normalize(&source).unwrap();
    assert_eq!(image::guess_format(&png_out.bytes).unwrap(), CodecFormat::Png);
    assert_eq!(png_out.processed_size, png_out.bytes.len());
}

#[test]
fn alpha_is_dropped() {
    let rgba = RgbaImage::from_pixel(32, 32, Rgba([255, 0, 0, 64]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    rgba.write_to(&mut bytes, CodecFormat::Png).unwrap();

    let out = Preprocessor::default().normalize(bytes.get_ref()).unwrap();
    let decoded = image::load_from_memory(&out.bytes).unwrap();
    assert!(!decoded.color().has_alpha());
}

#[test]
fn grayscale_and_sixteen_bit_input_come_out_as_rgb8() {
    let sources = [
        DynamicImage::ImageLuma16(ImageBuffer::from_pixel(24, 12, Luma([40_000u16]))),
        DynamicImage::ImageLumaA8(ImageBuffer::from_pixel(24, 12, LumaA([90u8, 128]))),
        DynamicImage::ImageRgb16(ImageBuffer::from_pixel(24, 12, Rgb([1u16, 30_000, 65_535]))),
    ];

    for source in sources {
        let mut bytes = std::io::Cursor::new(Vec::new());
        source.write_to(&mut bytes, CodecFormat::Png).unwrap();

        let out = png_preprocessor().normalize(bytes.get_ref()).unwrap();
        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!(decoded.color(), ColorType::Rgb8);
        assert_eq!(decoded.dimensions(), (24, 12));
    }
}

#[test]
fn empty_and_garbage_input_are_rejected() {
    let preprocessor = Preprocessor::default();

    let err = preprocessor.normalize_labeled("baseline", &[]).unwrap_err();
    assert!(matches!(err, GatewayError::Preprocessing { ref image, .. } if image == "baseline"));
    assert!(err.to_string().contains("zero-byte"));

    let err = preprocessor
        .normalize_labeled("current", b"definitely not pixels")
        .unwrap_err();
    assert!(matches!(err, GatewayError::Preprocessing { ref image, .. } if image == "current"));
    assert_eq!(err.category(), "preprocessing");
}
