//! Image pipeline: validates an upload, compresses it to the budget for its
//! purpose and stores it either in object storage (returning a URL) or
//! inline as a data URI that lives inside the owning document.

pub mod compress;

use std::sync::Arc;

use data_encoding::BASE64;
use thiserror::Error;

use crate::backend::{ObjectStore, StoreError};
use crate::utils::validation::{extension_from_mime, is_supported_image_type, sanitize_file_name};

pub use compress::{compress, CompressedImage, CompressionBudget};

const MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Unsupported image type '{0}'. Allowed: JPEG, PNG, WebP, GIF")]
    UnsupportedType(String),

    #[error("File too large ({size_mb:.2}MB). Maximum is {max_mb:.0}MB")]
    FileTooLarge { size_mb: f64, max_mb: f64 },

    #[error("No image data")]
    Empty,

    #[error("Invalid base64 image data")]
    InvalidBase64,

    #[error("Could not process image: {0}")]
    Codec(#[from] image::ImageError),

    #[error(
        "Image is still too large after compression ({size_mb:.2}MB). Please choose a smaller image"
    )]
    InlineTooLarge { size_mb: f64 },

    #[error("Upload failed: {}", .0.user_message())]
    Storage(#[from] StoreError),

    #[error("Image worker failed: {0}")]
    Worker(String),
}

/// Where processed images end up. Chosen once from configuration and
/// injected into the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStrategy {
    ObjectStorage,
    Inline,
}

impl ImageStrategy {
    pub fn from_flag(use_object_storage: bool) -> Self {
        if use_object_storage {
            ImageStrategy::ObjectStorage
        } else {
            ImageStrategy::Inline
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageBudgets {
    pub avatar_inline: CompressionBudget,
    pub avatar_object: CompressionBudget,
    pub task_inline: CompressionBudget,
    pub task_object: CompressionBudget,
    pub chat: CompressionBudget,
    pub emergency: CompressionBudget,
    /// Maximum data URI length stored inline, below the document size limit.
    pub inline_margin: usize,
    pub max_upload_bytes: usize,
}

impl Default for ImageBudgets {
    fn default() -> Self {
        ImageBudgets {
            avatar_inline: CompressionBudget::new(314_573, 500),
            avatar_object: CompressionBudget::new(1_048_576, 1200),
            task_inline: CompressionBudget::new(314_573, 1200),
            task_object: CompressionBudget::new(838_861, 1600),
            chat: CompressionBudget::new(314_573, 800),
            emergency: CompressionBudget::new(157_286, 300),
            inline_margin: 943_718,
            max_upload_bytes: 5 * 1_048_576,
        }
    }
}

/// What an image is for; decides the budget and the object path.
#[derive(Debug, Clone, Copy)]
pub enum ImageTarget<'a> {
    Avatar { uid: &'a str },
    Task { task_id: Option<&'a str> },
    Chat { chat_id: &'a str },
}

impl ImageTarget<'_> {
    fn object_path(&self, file_name: &str, extension: &str) -> String {
        let millis = chrono::Utc::now().timestamp_millis();
        // The extension follows the stored bytes, not the uploaded name.
        let safe_name = sanitize_file_name(file_name);
        let stem = match safe_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => safe_name.as_str(),
        };
        match self {
            ImageTarget::Avatar { uid } => {
                format!("avatars/{uid}/avatar_{uid}_{millis}_{stem}.{extension}")
            }
            ImageTarget::Task { task_id: Some(task_id) } => {
                format!("tasks/{task_id}/images/{millis}_{stem}.{extension}")
            }
            ImageTarget::Task { task_id: None } => {
                format!("tasks/images/{millis}/{stem}.{extension}")
            }
            ImageTarget::Chat { chat_id } => {
                format!("chat-images/chat_{chat_id}_{millis}.{extension}")
            }
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ImageTarget::Avatar { .. } => "avatar",
            ImageTarget::Task { .. } => "task image",
            ImageTarget::Chat { .. } => "chat image",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(file_name: &str, content_type: &str, bytes: Vec<u8>) -> Self {
        ImageUpload {
            file_name: file_name.to_string(),
            content_type: content_type.to_ascii_lowercase(),
            bytes,
        }
    }

    /// Accepts raw base64 or a `data:<mime>;base64,` URI.
    pub fn from_base64(file_name: &str, content_type: &str, data: &str) -> Result<Self, ImageError> {
        let payload = match data.split_once(";base64,") {
            Some((_, rest)) if data.starts_with("data:") => rest,
            _ => data,
        };
        let bytes = BASE64
            .decode(payload.trim().as_bytes())
            .map_err(|_| ImageError::InvalidBase64)?;
        Ok(ImageUpload::new(file_name, content_type, bytes))
    }
}

/// A stored image reference, ready to be written into a document.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredImage {
    Url(String),
    Inline(String),
}

impl StoredImage {
    pub fn reference(&self) -> &str {
        match self {
            StoredImage::Url(url) => url,
            StoredImage::Inline(data_uri) => data_uri,
        }
    }

    pub fn into_reference(self) -> String {
        match self {
            StoredImage::Url(url) | StoredImage::Inline(url) => url,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, StoredImage::Inline(_))
    }
}

pub fn data_uri(content_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", content_type, BASE64.encode(bytes))
}

pub struct ImagePipeline {
    strategy: ImageStrategy,
    objects: Option<Arc<dyn ObjectStore>>,
    budgets: ImageBudgets,
    verbose: bool,
}

impl ImagePipeline {
    /// Object storage mode without an object store degrades to inline.
    pub fn new(strategy: ImageStrategy, objects: Option<Arc<dyn ObjectStore>>) -> Self {
        let strategy = match (strategy, &objects) {
            (ImageStrategy::ObjectStorage, None) => {
                log::warn!("object storage requested but not configured, storing images inline");
                ImageStrategy::Inline
            }
            (strategy, _) => strategy,
        };
        ImagePipeline {
            strategy,
            objects,
            budgets: ImageBudgets::default(),
            verbose: false,
        }
    }

    pub fn with_budgets(mut self, budgets: ImageBudgets) -> Self {
        self.budgets = budgets;
        self
    }

    /// Logs size diagnostics for every processed image at info level.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn strategy(&self) -> ImageStrategy {
        self.strategy
    }

    pub fn validate(&self, upload: &ImageUpload) -> Result<(), ImageError> {
        if upload.bytes.is_empty() {
            return Err(ImageError::Empty);
        }
        if !is_supported_image_type(&upload.content_type) {
            return Err(ImageError::UnsupportedType(upload.content_type.clone()));
        }
        if upload.bytes.len() > self.budgets.max_upload_bytes {
            return Err(ImageError::FileTooLarge {
                size_mb: upload.bytes.len() as f64 / MB,
                max_mb: self.budgets.max_upload_bytes as f64 / MB,
            });
        }
        Ok(())
    }

    pub async fn store(
        &self,
        target: ImageTarget<'_>,
        upload: ImageUpload,
    ) -> Result<StoredImage, ImageError> {
        self.validate(&upload)?;
        let original_size = upload.bytes.len();

        let stored = match (self.strategy, &self.objects) {
            (ImageStrategy::ObjectStorage, Some(objects)) => {
                let first = self.first_pass(&target, self.object_budget(&target), upload).await?;
                let path = target.object_path(&first.file_name, extension_from_mime(&first.content_type));
                let stored_size = first.bytes.len();
                let url = objects
                    .put_object(&path, first.bytes, &first.content_type)
                    .await?;
                self.report(&target, original_size, stored_size);
                StoredImage::Url(url)
            }
            _ => self.store_inline(&target, upload, original_size).await?,
        };
        Ok(stored)
    }

    async fn store_inline(
        &self,
        target: &ImageTarget<'_>,
        upload: ImageUpload,
        original_size: usize,
    ) -> Result<StoredImage, ImageError> {
        let first = self.first_pass(target, self.inline_budget(target), upload).await?;
        let encoded = data_uri(&first.content_type, &first.bytes);
        if encoded.len() < self.budgets.inline_margin {
            self.report(target, original_size, first.bytes.len());
            return Ok(StoredImage::Inline(encoded));
        }

        log::warn!(
            "{} data URI is {:.2}MB, running emergency compression",
            target.label(),
            encoded.len() as f64 / MB
        );
        let emergency = run_compression(first.bytes, self.budgets.emergency).await?;
        let encoded = data_uri(emergency.content_type, &emergency.bytes);
        if encoded.len() >= self.budgets.inline_margin {
            return Err(ImageError::InlineTooLarge {
                size_mb: encoded.len() as f64 / MB,
            });
        }
        self.report(target, original_size, emergency.bytes.len());
        Ok(StoredImage::Inline(encoded))
    }

    async fn first_pass(
        &self,
        target: &ImageTarget<'_>,
        budget: CompressionBudget,
        upload: ImageUpload,
    ) -> Result<ImageUpload, ImageError> {
        // Animated avatars keep their original encoding.
        if matches!(target, ImageTarget::Avatar { .. }) && upload.content_type == "image/gif" {
            return Ok(upload);
        }
        let compressed = run_compression(upload.bytes, budget).await?;
        Ok(ImageUpload {
            file_name: upload.file_name,
            content_type: compressed.content_type.to_string(),
            bytes: compressed.bytes,
        })
    }

    fn inline_budget(&self, target: &ImageTarget<'_>) -> CompressionBudget {
        match target {
            ImageTarget::Avatar { .. } => self.budgets.avatar_inline,
            ImageTarget::Task { .. } => self.budgets.task_inline,
            ImageTarget::Chat { .. } => self.budgets.chat,
        }
    }

    fn object_budget(&self, target: &ImageTarget<'_>) -> CompressionBudget {
        match target {
            ImageTarget::Avatar { .. } => self.budgets.avatar_object,
            ImageTarget::Task { .. } => self.budgets.task_object,
            ImageTarget::Chat { .. } => self.budgets.chat,
        }
    }

    fn report(&self, target: &ImageTarget<'_>, original: usize, stored: usize) {
        let reduction = if original > 0 {
            100.0 - stored as f64 * 100.0 / original as f64
        } else {
            0.0
        };
        let line = format!(
            "{} compressed {:.2}MB -> {:.2}MB ({:.0}% smaller, {:?})",
            target.label(),
            original as f64 / MB,
            stored as f64 / MB,
            reduction,
            self.strategy
        );
        if self.verbose {
            log::info!("{}", line);
        } else {
            log::debug!("{}", line);
        }
    }
}

async fn run_compression(
    bytes: Vec<u8>,
    budget: CompressionBudget,
) -> Result<CompressedImage, ImageError> {
    tokio::task::spawn_blocking(move || compress(&bytes, &budget))
        .await
        .map_err(|e| ImageError::Worker(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::compress::tests::noise_png;
    use super::*;
    use crate::backend::LocalObjectStore;

    fn png_upload(width: u32, height: u32) -> ImageUpload {
        ImageUpload::new("photo.png", "image/png", noise_png(width, height))
    }

    #[tokio::test]
    async fn rejects_unsupported_types_before_decoding() {
        let pipeline = ImagePipeline::new(ImageStrategy::Inline, None);
        let upload = ImageUpload::new("doc.pdf", "application/pdf", vec![1, 2, 3]);
        let err = pipeline
            .store(ImageTarget::Chat { chat_id: "c1" }, upload)
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::UnsupportedType(_)));
    }

    #[tokio::test]
    async fn rejects_oversized_uploads() {
        let pipeline = ImagePipeline::new(ImageStrategy::Inline, None);
        let upload = ImageUpload::new("big.jpg", "image/jpeg", vec![0; 5 * 1_048_576 + 1]);
        let err = pipeline
            .store(ImageTarget::Task { task_id: None }, upload)
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::FileTooLarge { .. }));
    }

    #[tokio::test]
    async fn inline_images_become_jpeg_data_uris() {
        let pipeline = ImagePipeline::new(ImageStrategy::Inline, None);
        let stored = pipeline
            .store(ImageTarget::Task { task_id: Some("t1") }, png_upload(64, 64))
            .await
            .unwrap();
        assert!(stored.is_inline());
        assert!(stored.reference().starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn inline_overflow_runs_emergency_pass() {
        let budgets = ImageBudgets {
            task_inline: CompressionBudget::new(200_000, 600),
            emergency: CompressionBudget::new(6_000, 120),
            inline_margin: 12_000,
            ..ImageBudgets::default()
        };
        let pipeline = ImagePipeline::new(ImageStrategy::Inline, None).with_budgets(budgets);
        let stored = pipeline
            .store(ImageTarget::Task { task_id: None }, png_upload(600, 600))
            .await
            .unwrap();
        assert!(stored.reference().len() < 12_000);
    }

    #[tokio::test]
    async fn inline_overflow_after_emergency_is_descriptive() {
        let budgets = ImageBudgets {
            chat: CompressionBudget::new(200_000, 400),
            inline_margin: 200,
            ..ImageBudgets::default()
        };
        let pipeline = ImagePipeline::new(ImageStrategy::Inline, None).with_budgets(budgets);
        let err = pipeline
            .store(ImageTarget::Chat { chat_id: "c1" }, png_upload(400, 400))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::InlineTooLarge { .. }));
        assert!(err.to_string().contains("still too large"));
    }

    #[tokio::test]
    async fn object_storage_returns_url_under_target_path() {
        let dir = tempfile::tempdir().unwrap();
        let objects: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(dir.path(), "/uploads"));
        let pipeline = ImagePipeline::new(ImageStrategy::ObjectStorage, Some(objects));
        let stored = pipeline
            .store(ImageTarget::Avatar { uid: "u1" }, png_upload(32, 32))
            .await
            .unwrap();
        match stored {
            StoredImage::Url(url) => {
                assert!(url.starts_with("/uploads/avatars/u1/avatar_u1_"));
                assert!(url.ends_with("_photo.jpg"));
            }
            other => panic!("expected url, got {:?}", other),
        }
        assert!(dir.path().join("avatars/u1").is_dir());
    }

    #[tokio::test]
    async fn payload_exactly_at_margin_is_not_accepted() {
        let upload = png_upload(300, 300);
        let target = ImageTarget::Chat { chat_id: "c1" };
        let roomy = ImagePipeline::new(ImageStrategy::Inline, None);
        let margin = roomy.store(target, upload.clone()).await.unwrap().reference().len();

        let budgets = ImageBudgets {
            inline_margin: margin,
            ..ImageBudgets::default()
        };
        let tight = ImagePipeline::new(ImageStrategy::Inline, None).with_budgets(budgets);
        match tight.store(target, upload).await {
            Ok(stored) => assert!(stored.reference().len() < margin),
            Err(err) => assert!(matches!(err, ImageError::InlineTooLarge { .. })),
        }
    }

    #[test]
    fn object_names_carry_the_stored_extension() {
        let avatar = ImageTarget::Avatar { uid: "u1" }.object_path("my photo.png", "jpg");
        assert!(avatar.starts_with("avatars/u1/avatar_u1_"));
        assert!(avatar.ends_with("_my_photo.jpg"));

        let task = ImageTarget::Task { task_id: None }.object_path("scan.webp", "jpg");
        assert!(task.starts_with("tasks/images/"));
        assert!(task.ends_with("/scan.jpg"));

        let gif = ImageTarget::Avatar { uid: "u1" }.object_path("dance.gif", "gif");
        assert!(gif.ends_with("_dance.gif"));
    }

    #[test]
    fn base64_uploads_accept_data_uris() {
        let upload = ImageUpload::from_base64("a.png", "image/png", "data:image/png;base64,AAEC").unwrap();
        assert_eq!(upload.bytes, vec![0, 1, 2]);
        assert!(matches!(
            ImageUpload::from_base64("a.png", "image/png", "***"),
            Err(ImageError::InvalidBase64)
        ));
    }

    #[test]
    fn missing_object_store_falls_back_to_inline() {
        let pipeline = ImagePipeline::new(ImageStrategy::ObjectStorage, None);
        assert_eq!(pipeline.strategy(), ImageStrategy::Inline);
    }
}
