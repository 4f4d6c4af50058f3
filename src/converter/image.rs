use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, ImageReader};

use super::error::ConversionError;
use super::pdf;
use super::strategy::{ConversionRequest, Strategy};

/// JPEG quality used for every lossy re-encode.
pub const JPEG_QUALITY: u8 = 85;

// largest edge an icon entry can hold
const ICO_MAX: u32 = 256;

fn image_format(target: &str) -> Option<ImageFormat> {
    match target {
        "jpg" => Some(ImageFormat::Jpeg),
        "png" => Some(ImageFormat::Png),
        "webp" => Some(ImageFormat::WebP),
        "gif" => Some(ImageFormat::Gif),
        "bmp" => Some(ImageFormat::Bmp),
        "tiff" => Some(ImageFormat::Tiff),
        "ico" => Some(ImageFormat::Ico),
        _ => None,
    }
}

fn decode(path: &Path) -> Result<DynamicImage, ConversionError> {
    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| ConversionError::failed(format!("cannot decode image: {}", e)))
}

fn encode_jpeg(img: &DynamicImage, writer: &mut impl Write) -> Result<(), ConversionError> {
    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(writer, JPEG_QUALITY))
        .map_err(|e| ConversionError::failed(format!("cannot encode jpeg: {}", e)))
}

fn reencode(input: &Path, output: &Path, format: ImageFormat) -> Result<(), ConversionError> {
    let mut img = decode(input)?;
    if format == ImageFormat::Ico && (img.width() > ICO_MAX || img.height() > ICO_MAX) {
        img = img.thumbnail(ICO_MAX, ICO_MAX);
    }
    let mut writer = BufWriter::new(std::fs::File::create(output)?);

    if format == ImageFormat::Jpeg {
        encode_jpeg(&img, &mut writer)?;
    } else {
        // 8-bit RGBA is accepted by every other encoder we target
        DynamicImage::ImageRgba8(img.to_rgba8())
            .write_to(&mut writer, format)
            .map_err(|e| ConversionError::failed(format!("cannot encode {:?}: {}", format, e)))?;
    }

    writer.flush()?;
    Ok(())
}

fn image_to_pdf(input: &Path, output: &Path) -> Result<(), ConversionError> {
    let img = decode(input)?;
    let mut jpeg = Cursor::new(Vec::new());
    encode_jpeg(&img, &mut jpeg)?;
    let document = pdf::jpeg_document(img.width(), img.height(), jpeg.get_ref());
    std::fs::write(output, document)?;
    Ok(())
}

async fn blocking<F>(work: F) -> Result<(), ConversionError>
where
    F: FnOnce() -> Result<(), ConversionError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ConversionError::failed(format!("image worker stopped: {}", e)))?
}

/// Raster to raster through the `image` codecs.
pub struct ImageReencode;

#[async_trait]
impl Strategy for ImageReencode {
    fn name(&self) -> &'static str {
        "image-reencode"
    }

    async fn attempt(&self, request: &ConversionRequest) -> Result<(), ConversionError> {
        let format = image_format(&request.target).ok_or_else(|| ConversionError::Unsupported {
            from: request.source_ext.clone(),
            to: request.target.clone(),
        })?;
        let (input, output): (PathBuf, PathBuf) = (request.input.clone(), request.output.clone());
        blocking(move || reencode(&input, &output, format)).await
    }
}

/// Places the image on a single PDF page of the same size.
pub struct ImageToPdf;

#[async_trait]
impl Strategy for ImageToPdf {
    fn name(&self) -> &'static str {
        "image-to-pdf"
    }

    async fn attempt(&self, request: &ConversionRequest) -> Result<(), ConversionError> {
        let (input, output) = (request.input.clone(), request.output.clone());
        blocking(move || image_to_pdf(&input, &output)).await
    }
}
