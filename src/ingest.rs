use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use axum::body::Bytes;
use image::{
    codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder},
    imageops::FilterType,
    DynamicImage, GenericImageView, ImageReader,
};
use time::{macros::format_description, OffsetDateTime};

use crate::Error;

pub const ALLOWED_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];

/// Cheap pre-check before any bytes hit the disk. Deliberately loose: an
/// allow-listed extension or an `image/*` content type is enough on its own,
/// decoding is the authoritative check.
pub fn allowed_upload(filename: &str, content_type: Option<&str>) -> bool {
    let ext_ok = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            ALLOWED_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        });
    let mime_ok = content_type.is_some_and(|mime| mime.starts_with("image/"));
    ext_ok || mime_ok
}

/// Logical grouping folder under the storage root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Prereg,
    Discord,
    Tweets,
    DcLikes,
}

impl Bucket {
    pub const fn as_dir(self) -> &'static str {
        match self {
            Self::Prereg => "prereg",
            Self::Discord => "discord",
            Self::Tweets => "tweets",
            Self::DcLikes => "dc_likes",
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_dir())
    }
}

/// One uploaded file as it came off the wire. Never persisted as-is.
#[derive(Debug, Clone)]
pub struct RawUpload {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// What became of an upload. `Unconverted` means the staged bytes did not
/// decode as an image; the staged file is kept and stays servable, callers
/// decide whether to keep the reference around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingested {
    Normalized(String),
    Unconverted(String),
}

impl Ingested {
    pub fn relative_path(&self) -> &str {
        match self {
            Self::Normalized(path) | Self::Unconverted(path) => path,
        }
    }

    pub fn into_relative_path(self) -> String {
        match self {
            Self::Normalized(path) | Self::Unconverted(path) => path,
        }
    }

    pub const fn is_normalized(&self) -> bool {
        matches!(self, Self::Normalized(_))
    }
}

/// Filesystem-backed image pipeline: stages raw uploads under the storage
/// root, re-encodes them to one of two canonical formats, and hands back
/// root-relative paths. One instance is shared by every request; all fields
/// are fixed at startup.
pub struct ImageStore {
    root: PathBuf,
    max_long_edge: u32,
    jpeg_quality: u8,
}

impl ImageStore {
    pub fn new(
        root: impl Into<PathBuf>,
        max_long_edge: u32,
        jpeg_quality: u8,
    ) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let root = root.canonicalize()?;
        Ok(Self {
            root,
            max_long_edge,
            jpeg_quality,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stage, normalize, and store one upload. Returns `None` when no file
    /// was actually attached (blank filename), the relative path of the
    /// stored artifact otherwise. Undecodable uploads are kept staged rather
    /// than rejected; encode and write failures propagate.
    #[tracing::instrument(skip_all, fields(filename = %upload.filename, %bucket))]
    pub async fn ingest(
        &self,
        upload: RawUpload,
        bucket: Bucket,
    ) -> Result<Option<Ingested>, Error> {
        if upload.filename.trim().is_empty() {
            return Ok(None);
        }
        let dir = self.root.join(bucket.as_dir());
        tokio::fs::create_dir_all(&dir).await?;
        let staged = dir.join(format!("{}.tmp", unique_stem(&upload.filename)?));
        tokio::fs::write(&staged, &upload.bytes).await?;
        debug!(path = %staged.display(), bytes = upload.bytes.len(), %bucket, "staged upload");

        let max_long_edge = self.max_long_edge;
        let jpeg_quality = self.jpeg_quality;
        let work = staged.clone();
        let converted =
            tokio::task::spawn_blocking(move || normalize(&work, max_long_edge, jpeg_quality))
                .await??;

        let ingested = match converted {
            Some(target) => Ingested::Normalized(self.relative_path(&target)),
            None => {
                warn!(path = %staged.display(), "upload did not decode as an image, keeping staged file");
                Ingested::Unconverted(self.relative_path(&staged))
            }
        };
        info!(
            path = ingested.relative_path(),
            normalized = ingested.is_normalized(),
            %bucket,
            "stored upload"
        );
        Ok(Some(ingested))
    }

    /// Best-effort removal of a stored artifact. Paths come from our own
    /// records, but anything rooted or traversing upward is refused outright.
    pub async fn remove(&self, relative: &str) -> Result<(), Error> {
        if relative.starts_with('/') || relative.split('/').any(|part| part == "..") {
            return Err(Error::PathTraversal);
        }
        tokio::fs::remove_file(self.root.join(relative)).await?;
        Ok(())
    }

    fn relative_path(&self, absolute: &Path) -> String {
        let relative = absolute.strip_prefix(&self.root).unwrap_or(absolute);
        relative
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Decode the staged file, bound its long edge, and re-encode it next to the
/// staged path: PNG for alpha-bearing images, JPEG for everything else. The
/// staged file is deleted once the target is written; deletion failure is
/// advisory. Returns `None` when the file does not decode.
fn normalize(staged: &Path, max_long_edge: u32, jpeg_quality: u8) -> Result<Option<PathBuf>, Error> {
    let decoded = match ImageReader::open(staged)?.with_guessed_format()?.decode() {
        Ok(image) => image,
        Err(source) => {
            debug!(path = %staged.display(), %source, "staged file did not decode");
            return Ok(None);
        }
    };
    let image = bound_long_edge(decoded, max_long_edge);
    let target = if image.color().has_alpha() {
        let target = staged.with_extension("png");
        encode_png(&image, &target)?;
        target
    } else {
        let target = staged.with_extension("jpg");
        encode_jpeg(&image, jpeg_quality, &target)?;
        target
    };
    if let Err(source) = std::fs::remove_file(staged) {
        warn!(path = %staged.display(), %source, "could not remove staged file");
    }
    Ok(Some(target))
}

/// Downscale so the long edge is at most `max_long_edge`, preserving aspect
/// ratio. No-op for images already within bounds.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn bound_long_edge(image: DynamicImage, max_long_edge: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    let long_edge = width.max(height);
    if long_edge <= max_long_edge {
        return image;
    }
    let scale = f64::from(max_long_edge) / f64::from(long_edge);
    // Scaled dimensions truncate toward zero. resize() rounds internally, so
    // compute both dimensions here and hand them to resize_exact.
    let new_width = ((f64::from(width) * scale) as u32).max(1);
    let new_height = ((f64::from(height) * scale) as u32).max(1);
    image.resize_exact(new_width, new_height, FilterType::Lanczos3)
}

fn encode_png(image: &DynamicImage, target: &Path) -> Result<(), Error> {
    let file = File::create(target)?;
    let encoder = PngEncoder::new_with_quality(
        BufWriter::new(file),
        CompressionType::Best,
        PngFilter::Adaptive,
    );
    match image {
        DynamicImage::ImageRgba8(_) | DynamicImage::ImageLumaA8(_) => {
            image.write_with_encoder(encoder)?;
        }
        other => DynamicImage::ImageRgba8(other.to_rgba8()).write_with_encoder(encoder)?,
    }
    Ok(())
}

#[allow(clippy::cast_possible_truncation)]
fn encode_jpeg(image: &DynamicImage, quality: u8, target: &Path) -> Result<(), Error> {
    let rgb = image.to_rgb8();
    let mut comp = mozjpeg::Compress::new(mozjpeg::ColorSpace::JCS_RGB);
    comp.set_size(rgb.width() as usize, rgb.height() as usize);
    comp.set_quality(f32::from(quality));
    comp.set_progressive_mode();
    comp.set_optimize_coding(true);
    let mut comp = comp.start_compress(Vec::new())?;
    comp.write_scanlines(rgb.as_raw())?;
    let encoded = comp.finish()?;
    std::fs::write(target, encoded)?;
    Ok(())
}

fn unique_stem(filename: &str) -> Result<String, Error> {
    let stamp = OffsetDateTime::now_utc().format(format_description!(
        "[year][month][day]-[hour][minute][second]"
    ))?;
    let token: u32 = rand::random();
    Ok(format!("{}-{stamp}-{token:08x}", sanitize_base(filename)))
}

/// Reduce an uploader-supplied filename to a safe stem: directories and the
/// extension dropped, anything that is not alphanumeric, `-`, or `_` removed,
/// capped at 64 chars, with `image` as the fallback for names that sanitize
/// away entirely.
fn sanitize_base(filename: &str) -> String {
    let name = Path::new(filename.trim())
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("");
    let stem = name.rsplit_once('.').map_or(name, |(stem, _ext)| stem);
    let cleaned: String = stem
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_'))
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "image".to_owned()
    } else {
        cleaned
    }
}
