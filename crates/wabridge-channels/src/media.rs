//! Media materialization: fetch bytes for a received message, recompress
//! images, and store the result under the public media directory.

use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use tracing::{debug, info};
use uuid::Uuid;

use wabridge_core::{
    config::Config, error::BridgeError, message::MediaKind, traits::MediaSource,
};

/// Document extensions routed through image recompression.
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// How downloaded bytes are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoding {
    /// Downscale to the configured width and re-encode as JPEG.
    Image,
    /// Store bytes unmodified with this extension.
    Raw { extension: String },
}

/// A stored media file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedMedia {
    pub file_name: String,
    pub path: PathBuf,
    /// Externally fetchable URL.
    pub url: String,
}

pub struct MediaMaterializer {
    dir: PathBuf,
    public_url: String,
    max_width: u32,
    jpeg_quality: u8,
}

impl MediaMaterializer {
    pub fn new(
        dir: impl Into<PathBuf>,
        public_url: &str,
        max_width: u32,
        jpeg_quality: u8,
    ) -> Result<Self, BridgeError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            BridgeError::Media(format!("failed to create {}: {e}", dir.display()))
        })?;
        info!("Media directory at {}", dir.display());
        Ok(Self {
            dir,
            public_url: public_url.trim_end_matches('/').to_string(),
            max_width,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, BridgeError> {
        Self::new(
            config.media_dir(),
            &config.media.public_url,
            config.media.max_width,
            config.media.jpeg_quality,
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Download `kind` from `source` and store it.
    pub async fn materialize(
        &self,
        source: &dyn MediaSource,
        kind: MediaKind,
        encoding: Encoding,
    ) -> Result<MaterializedMedia, BridgeError> {
        let bytes = source.download(kind).await?;
        debug!("downloaded {} bytes of {}", bytes.len(), kind.as_str());

        let (data, extension) = match encoding {
            Encoding::Image => (self.compress_image(bytes).await?, "jpg".to_string()),
            Encoding::Raw { extension } => (bytes, extension),
        };
        self.store(&data, &extension).await
    }

    /// Downscale and re-encode off the async runtime.
    pub async fn compress_image(&self, bytes: Vec<u8>) -> Result<Vec<u8>, BridgeError> {
        let (max_width, quality) = (self.max_width, self.jpeg_quality);
        tokio::task::spawn_blocking(move || recompress_image(&bytes, max_width, quality))
            .await
            .map_err(|e| BridgeError::Media(format!("image task failed: {e}")))?
    }

    async fn store(&self, data: &[u8], extension: &str) -> Result<MaterializedMedia, BridgeError> {
        let millis = chrono::Utc::now().timestamp_millis();
        let suffix = Uuid::new_v4().simple().to_string();
        let file_name = format!("{millis}-{}.{extension}", &suffix[..8]);
        let path = self.dir.join(&file_name);

        tokio::fs::write(&path, data).await.map_err(|e| {
            BridgeError::Media(format!("failed to write {}: {e}", path.display()))
        })?;

        let url = format!("{}/{file_name}", self.public_url);
        debug!("stored media {}", path.display());
        Ok(MaterializedMedia {
            file_name,
            path,
            url,
        })
    }
}

/// Decode, shrink to `max_width` if wider (aspect preserved), and encode
/// as JPEG at `quality`.
pub fn recompress_image(bytes: &[u8], max_width: u32, quality: u8) -> Result<Vec<u8>, BridgeError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| BridgeError::Media(format!("image decode failed: {e}")))?;
    let img = if img.width() > max_width {
        img.resize(max_width, u32::MAX, FilterType::Triangle)
    } else {
        img
    };

    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&rgb)
        .map_err(|e| BridgeError::Media(format!("jpeg encode failed: {e}")))?;
    Ok(out)
}

/// Lowercased extension of a file name, if it has a usable one.
pub fn file_extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    sanitize_extension(ext)
}

/// Whether a document with this extension should be treated as an image.
pub fn is_image_extension(ext: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&ext)
}

/// Extension for a raw file: file name first, then mimetype, then the
/// per-kind default.
pub fn raw_extension(kind: MediaKind, mimetype: Option<&str>, file_name: Option<&str>) -> String {
    file_name
        .and_then(file_extension)
        .or_else(|| mimetype.and_then(extension_from_mimetype))
        .unwrap_or_else(|| default_extension(kind).to_string())
}

fn default_extension(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "jpg",
        MediaKind::Voice | MediaKind::Audio => "mp3",
        MediaKind::Video => "mp4",
        MediaKind::Document => "doc",
    }
}

fn extension_from_mimetype(mimetype: &str) -> Option<String> {
    let essence = mimetype.split(';').next()?.trim().to_ascii_lowercase();
    let ext = match essence.as_str() {
        "audio/ogg" => "ogg",
        "audio/mpeg" => "mp3",
        "audio/mp4" | "audio/aac" => "m4a",
        "video/mp4" => "mp4",
        "video/3gpp" => "3gp",
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "text/plain" => "txt",
        _ => {
            let (_, sub) = essence.split_once('/')?;
            return sanitize_extension(sub);
        }
    };
    Some(ext.to_string())
}

fn sanitize_extension(ext: &str) -> Option<String> {
    let ext = ext.trim().to_ascii_lowercase();
    (!ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .then_some(ext)
}
