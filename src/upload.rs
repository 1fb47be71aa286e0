use std::{
    fmt, fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use axum::http::StatusCode;
use mime::Mime;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::DispatchError,
    handlers::{HandlerResult, Page, RouteContext},
    routes::RouteParams,
};

/// Header carrying the client-side file name for raw-body uploads.
pub const FILE_NAME_HEADER: &str = "x-file-name";

/// Default size ceiling for a single upload, in bytes.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 2_000_000;

/// How many leading bytes are inspected to detect the content type.
const SNIFF_LEN: usize = 512;

/// UploadStatus
///
/// The status the transport reported for a received file. Only `Ok` uploads
/// can be wrapped in an [`UploadedFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Ok,
    /// Larger than the server-wide limit.
    ExceedsServerLimit,
    /// Larger than the limit declared by the form.
    ExceedsFormLimit,
    /// Only part of the file arrived.
    Partial,
    /// The field was submitted without a file.
    NoFile,
    /// No temporary directory was available.
    NoTempDir,
    /// The temporary file could not be written.
    WriteFailed,
    /// An extension or filter stopped the upload.
    Blocked,
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ok => "no error",
            Self::ExceedsServerLimit => "file exceeds the server upload limit",
            Self::ExceedsFormLimit => "file exceeds the form upload limit",
            Self::Partial => "file was only partially uploaded",
            Self::NoFile => "no file was uploaded",
            Self::NoTempDir => "missing temporary directory",
            Self::WriteFailed => "failed to write file to disk",
            Self::Blocked => "upload stopped by an extension",
        };
        f.write_str(text)
    }
}

/// UploadError
///
/// Failures local to upload handling. Callers decide how to surface them.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload failed: {0}")]
    Upload(UploadStatus),
    #[error("file is {size} bytes, the limit is {max}")]
    SizeExceeded { size: u64, max: u64 },
    #[error("unsupported file type '{0}'")]
    UnsupportedType(String),
    #[error("failed to move upload to '{}': {source}", .path.display())]
    MoveFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read upload: {0}")]
    Io(#[from] io::Error),
}

/// UploadDescriptor
///
/// The raw facts about one uploaded field: declared name and size, where the
/// transport left the bytes, and its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadDescriptor {
    pub name: String,
    pub size: u64,
    pub tmp_path: PathBuf,
    pub status: UploadStatus,
}

impl UploadDescriptor {
    /// stage
    ///
    /// Writes a received body to a uniquely named temporary file in `tmp_dir`
    /// and describes it, for transports that deliver uploads in memory.
    pub fn stage(tmp_dir: &Path, name: &str, data: &[u8]) -> Result<Self, UploadError> {
        fs::create_dir_all(tmp_dir)?;
        let tmp_path = tmp_dir.join(format!(".upload-{}.part", Uuid::new_v4().simple()));
        fs::write(&tmp_path, data)?;
        Ok(Self {
            name: name.to_string(),
            size: data.len() as u64,
            tmp_path,
            status: UploadStatus::Ok,
        })
    }
}

/// UploadPolicy
///
/// Size ceiling and allowed content types for uploads.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadPolicy {
    pub max_bytes: u64,
    pub allowed: Vec<Mime>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed: vec![
                mime::IMAGE_JPEG,
                mime::IMAGE_GIF,
                mime::IMAGE_PNG,
                image_webp(),
                mime::APPLICATION_PDF,
            ],
        }
    }
}

impl UploadPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_bytes: config.upload_max_bytes,
            ..Self::default()
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn allows(&self, detected: &Mime) -> bool {
        self.allowed
            .iter()
            .any(|allowed| allowed.essence_str() == detected.essence_str())
    }
}

/// UploadedFile
///
/// A single accepted upload. Validation is lazy: nothing beyond the status is
/// checked until [`UploadedFile::validate`] or [`UploadedFile::persist`] runs.
/// Persisting consumes the value.
#[derive(Debug)]
pub struct UploadedFile {
    descriptor: UploadDescriptor,
    policy: UploadPolicy,
}

impl UploadedFile {
    /// # Errors
    /// [`UploadError::Upload`] unless the transport reported `Ok`.
    pub fn new(descriptor: UploadDescriptor, policy: UploadPolicy) -> Result<Self, UploadError> {
        if descriptor.status != UploadStatus::Ok {
            return Err(UploadError::Upload(descriptor.status));
        }
        Ok(Self { descriptor, policy })
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    pub fn tmp_path(&self) -> &Path {
        &self.descriptor.tmp_path
    }

    /// The content type detected from the file's leading bytes.
    pub fn sniff(&self) -> Result<Mime, UploadError> {
        let mut head = Vec::with_capacity(SNIFF_LEN);
        fs::File::open(&self.descriptor.tmp_path)?
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut head)?;
        Ok(sniff_mime(&head))
    }

    /// validate
    ///
    /// Checks the declared size against the ceiling, then the sniffed type
    /// against the allowed set. Returns the detected type.
    pub fn validate(&self) -> Result<Mime, UploadError> {
        if self.descriptor.size > self.policy.max_bytes {
            return Err(UploadError::SizeExceeded {
                size: self.descriptor.size,
                max: self.policy.max_bytes,
            });
        }
        let detected = self.sniff()?;
        if !self.policy.allows(&detected) {
            return Err(UploadError::UnsupportedType(detected.essence_str().to_string()));
        }
        Ok(detected)
    }

    /// persist
    ///
    /// Validates, then moves the file into `directory` (created when missing)
    /// under `name` or a generated token, suffixed with the detected
    /// extension. Returns the final file name.
    pub fn persist(self, directory: &Path, name: Option<&str>) -> Result<String, UploadError> {
        let detected = self.validate()?;
        let extension = extension_for(&detected)
            .ok_or_else(|| UploadError::UnsupportedType(detected.essence_str().to_string()))?;

        let stem = name
            .map(sanitize_stem)
            .filter(|stem| !stem.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let file_name = format!("{stem}.{extension}");

        fs::create_dir_all(directory)?;
        let destination = directory.join(&file_name);
        fs::rename(&self.descriptor.tmp_path, &destination).map_err(|source| {
            UploadError::MoveFailed {
                path: destination.clone(),
                source,
            }
        })?;

        tracing::info!(file = %file_name, size = self.descriptor.size, mime = %detected, "persisted upload");
        Ok(file_name)
    }
}

/// accept_upload
///
/// Route handler storing a raw request body as a single file in the
/// configured upload directory. The declared name comes from the
/// `x-file-name` header.
///
/// Responds `201 {"file": name}` on success, `413` when the body exceeds the
/// configured ceiling, and `422` for size or type violations. The staged
/// temporary file is removed whenever the upload is not persisted.
pub async fn accept_upload(mut ctx: RouteContext, _params: RouteParams) -> HandlerResult {
    let config = ctx.router().config().clone();
    let name = ctx
        .headers()
        .get(FILE_NAME_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("upload")
        .to_string();

    let limit = usize::try_from(config.upload_max_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(1);
    let bytes = match axum::body::to_bytes(ctx.take_body(), limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, limit, "upload body rejected");
            let body = json!({ "error": "upload too large" });
            return Ok(Page::json(StatusCode::PAYLOAD_TOO_LARGE, &body)?.into());
        }
    };

    let descriptor = UploadDescriptor::stage(&config.upload_dir.join(".staging"), &name, &bytes)
        .map_err(|e| DispatchError::internal(e.to_string()))?;
    let staged = descriptor.tmp_path.clone();
    let stored = UploadedFile::new(descriptor, UploadPolicy::from_config(&config))
        .and_then(|file| file.persist(&config.upload_dir, None));
    if stored.is_err() {
        if let Err(e) = fs::remove_file(&staged) {
            tracing::warn!(error = %e, path = %staged.display(), "failed to remove staged upload");
        }
    }

    match stored {
        Ok(file_name) => Ok(Page::json(StatusCode::CREATED, &json!({ "file": file_name }))?.into()),
        Err(err @ (UploadError::SizeExceeded { .. } | UploadError::UnsupportedType(_))) => {
            tracing::warn!(error = %err, "rejected upload");
            let body = json!({ "error": err.to_string() });
            Ok(Page::json(StatusCode::UNPROCESSABLE_ENTITY, &body)?.into())
        }
        Err(err) => Err(DispatchError::internal(err.to_string())),
    }
}

/// sniff_mime
///
/// Detects the content type from magic numbers. Unknown content is reported as
/// `text/plain` when it is valid UTF-8 without NUL bytes, otherwise as
/// `application/octet-stream`.
pub fn sniff_mime(head: &[u8]) -> Mime {
    if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
        mime::IMAGE_JPEG
    } else if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        mime::IMAGE_GIF
    } else if head.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        mime::IMAGE_PNG
    } else if head.len() >= 12 && head.starts_with(b"RIFF") && &head[8..12] == b"WEBP" {
        image_webp()
    } else if head.starts_with(b"%PDF-") {
        mime::APPLICATION_PDF
    } else if looks_like_text(head) {
        mime::TEXT_PLAIN
    } else {
        mime::APPLICATION_OCTET_STREAM
    }
}

/// File extension used when persisting content of type `detected`.
pub fn extension_for(detected: &Mime) -> Option<&'static str> {
    match detected.essence_str() {
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "application/pdf" => Some("pdf"),
        _ => None,
    }
}

fn image_webp() -> Mime {
    "image/webp".parse().unwrap_or(mime::APPLICATION_OCTET_STREAM)
}

fn looks_like_text(head: &[u8]) -> bool {
    if head.is_empty() || head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        // A multi-byte character cut off by the sniff window.
        Err(e) => e.error_len().is_none(),
    }
}

fn sanitize_stem(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let stem = base.rsplit_once('.').map_or(base, |(stem, _)| stem);
    stem.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}
