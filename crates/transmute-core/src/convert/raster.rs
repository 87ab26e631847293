//! Raster image conversion with the `image` crate.

use std::io::Cursor;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use image::{DynamicImage, ImageFormat};

use crate::domain::format::{ConversionPair, Format};
use crate::ports::{ByteStream, bytes_stream};

use super::{ConversionInput, ConvertError, Converter, ProgressReporter};

const SOURCES: [&str; 5] = ["png", "jpg", "webp", "gif", "bmp"];
const TARGETS: [&str; 2] = ["png", "jpg"];

fn image_format(format: &Format) -> Option<ImageFormat> {
    match format.as_str() {
        "png" => Some(ImageFormat::Png),
        "jpg" => Some(ImageFormat::Jpeg),
        "webp" => Some(ImageFormat::WebP),
        "gif" => Some(ImageFormat::Gif),
        "bmp" => Some(ImageFormat::Bmp),
        _ => None,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ImageConverter;

impl ImageConverter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Converter for ImageConverter {
    fn name(&self) -> &str {
        "image"
    }

    fn pairs(&self) -> Vec<ConversionPair> {
        SOURCES
            .iter()
            .flat_map(|source| {
                TARGETS
                    .iter()
                    .filter(move |target| *target != source)
                    .map(move |target| ConversionPair::new(*source, *target))
            })
            .collect()
    }

    async fn convert(
        &self,
        input: ConversionInput,
        progress: ProgressReporter,
    ) -> Result<ByteStream<'static>, ConvertError> {
        let ConversionInput {
            pair,
            size,
            mut body,
        } = input;
        let (Some(declared), Some(target)) = (image_format(&pair.source), image_format(&pair.target))
        else {
            return Err(ConvertError::Unsupported(pair));
        };

        let mut buf = BytesMut::with_capacity(size.min(1 << 24) as usize);
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
            progress.report_fraction(buf.len() as u64 * 30, size.max(1) * 100);
        }

        let encoded = tokio::task::spawn_blocking(move || {
            // Trust the content over the extension when they disagree.
            let format = image::guess_format(&buf).unwrap_or(declared);
            let decoded = image::load_from_memory_with_format(&buf, format)
                .map_err(|err| ConvertError::Corrupt(format!("cannot decode image: {err}")))?;
            progress.report(60);

            // JPEG has no alpha channel.
            let decoded = match target {
                ImageFormat::Jpeg => DynamicImage::ImageRgb8(decoded.to_rgb8()),
                _ => decoded,
            };

            let mut out = Cursor::new(Vec::new());
            decoded
                .write_to(&mut out, target)
                .map_err(|err| ConvertError::Corrupt(format!("cannot encode image: {err}")))?;
            progress.report(90);
            Ok::<_, ConvertError>(out.into_inner())
        })
        .await
        .map_err(|err| ConvertError::Io(std::io::Error::other(err)))??;

        Ok(bytes_stream(encoded))
    }
}
