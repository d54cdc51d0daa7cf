//! Incremental multipart boundary parsing.

use std::fmt;
use std::io;

use bytes::Bytes;
use futures::Stream;
use mime_guess::mime::{self, Mime};
use multer::{Constraints, Multipart, SizeLimit};
use tracing::debug;

use super::{ContentDisposition, UploadOptions};
use crate::{Result, UploadError};

/// One section of a multipart body, classified by its Content-Disposition.
#[derive(Debug)]
pub enum Section<'r> {
    /// A section carrying a file name.
    File(FileSection<'r>),
    /// A plain form value.
    Field(FieldSection<'r>),
}

/// A file section.
#[derive(Debug)]
pub struct FileSection<'r> {
    /// Form field name, if the client sent one.
    pub field_name: Option<String>,
    /// Client-supplied file name, possibly including path components.
    pub file_name: String,
    /// Declared content type of the section.
    pub content_type: Option<String>,
    /// Section body.
    pub body: SectionBody<'r>,
}

/// A form value section.
#[derive(Debug)]
pub struct FieldSection<'r> {
    /// Form field name.
    pub key: String,
    /// Declared content type of the section.
    pub content_type: Option<String>,
    /// Section body.
    pub body: SectionBody<'r>,
}

/// Streaming body of a section.
///
/// The next section only becomes available once this body is read to the
/// end or dropped.
pub struct SectionBody<'r> {
    field: multer::Field<'r>,
}

impl SectionBody<'_> {
    /// Read the next chunk, or `None` at the end of the section.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        self.field.chunk().await.map_err(map_multer_error)
    }
}

impl fmt::Debug for SectionBody<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectionBody")
            .field("index", &self.field.index())
            .finish_non_exhaustive()
    }
}

/// Forward-only parser over one request body.
pub struct BoundaryParser<'r> {
    multipart: Multipart<'r>,
}

impl<'r> BoundaryParser<'r> {
    /// Create a parser for a request body.
    ///
    /// Fails with `MalformedRequest` when the content type is not multipart or
    /// carries no boundary, and with `LimitExceeded` when the boundary is longer
    /// than `boundary_length_limit`.
    pub fn new<S, O, E>(
        stream: S,
        content_type: Option<&str>,
        options: &UploadOptions,
    ) -> Result<Self>
    where
        S: Stream<Item = std::result::Result<O, E>> + Send + 'r,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'r,
    {
        let boundary = extract_boundary(content_type, options.boundary_length_limit)?;
        let constraints =
            Constraints::new().size_limit(SizeLimit::new().whole_stream(options.body_length_limit));

        Ok(Self {
            multipart: Multipart::with_constraints(stream, boundary, constraints),
        })
    }

    /// Advance to the next classifiable section.
    ///
    /// Sections whose Content-Disposition is missing, is not `form-data`, or
    /// names neither a field nor a file are skipped.
    pub async fn next_section(&mut self) -> Result<Option<Section<'r>>> {
        loop {
            let Some(field) = self
                .multipart
                .next_field()
                .await
                .map_err(map_multer_error)?
            else {
                return Ok(None);
            };

            let index = field.index();
            let disposition = header_str(&field, "content-disposition")
                .as_deref()
                .and_then(ContentDisposition::parse);
            let content_type = header_str(&field, "content-type");
            let body = SectionBody { field };

            match disposition {
                Some(ContentDisposition {
                    name,
                    file_name: Some(file_name),
                }) => {
                    debug!(index, file_name = %file_name, "classified file section");
                    return Ok(Some(Section::File(FileSection {
                        field_name: name,
                        file_name,
                        content_type,
                        body,
                    })));
                }
                Some(ContentDisposition {
                    name: Some(key),
                    file_name: None,
                }) => {
                    debug!(index, key = %key, "classified field section");
                    return Ok(Some(Section::Field(FieldSection {
                        key,
                        content_type,
                        body,
                    })));
                }
                _ => {
                    debug!(index, "skipping section without usable content-disposition");
                }
            }
        }
    }
}

/// Header value as text; raw UTF-8 file names are common in the wild.
fn header_str(field: &multer::Field<'_>, name: &str) -> Option<String> {
    field
        .headers()
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
}

/// Validate a request content type and return its multipart boundary.
pub fn extract_boundary(content_type: Option<&str>, length_limit: usize) -> Result<String> {
    let content_type = content_type
        .map(str::trim)
        .filter(|ct| !ct.is_empty())
        .ok_or_else(|| UploadError::MalformedRequest("missing content type".to_string()))?;

    let not_multipart = || {
        UploadError::MalformedRequest(format!(
            "expected a multipart request, but got {content_type}"
        ))
    };
    let parsed: Mime = content_type.parse().map_err(|_| not_multipart())?;
    if parsed.type_() != mime::MULTIPART {
        return Err(not_multipart());
    }

    let boundary = parsed
        .get_param(mime::BOUNDARY)
        .map(|b| b.as_str().trim_matches('"').to_string())
        .filter(|b| !b.trim().is_empty())
        .ok_or_else(|| {
            UploadError::MalformedRequest("missing content-type boundary".to_string())
        })?;

    if boundary.len() > length_limit {
        return Err(UploadError::LimitExceeded(format!(
            "multipart boundary length limit {length_limit} exceeded"
        )));
    }

    Ok(boundary)
}

fn map_multer_error(err: multer::Error) -> UploadError {
    match err {
        multer::Error::StreamSizeExceeded { limit } => {
            UploadError::LimitExceeded(format!("request body length limit {limit} exceeded"))
        }
        multer::Error::FieldSizeExceeded { limit, .. } => {
            UploadError::LimitExceeded(format!("section length limit {limit} exceeded"))
        }
        multer::Error::StreamReadFailed(e) => {
            UploadError::Io(io::Error::new(io::ErrorKind::Other, e))
        }
        other => UploadError::MalformedRequest(other.to_string()),
    }
}
