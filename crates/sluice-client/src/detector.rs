use sluice_core::error::AppError;
use sluice_core::models::ContentType;
use sluice_core::traits::Detector;
use url::Url;

/// Content-type detection from magic bytes, then the URL path extension.
///
/// Pages without an extension on an http(s) URL are assumed to be HTML.
#[derive(Debug, Clone, Default)]
pub struct HeuristicDetector;

impl HeuristicDetector {
    fn from_sample(sample: &[u8], extension: Option<&str>) -> Option<ContentType> {
        if sample.starts_with(b"%PDF") {
            return Some(ContentType::Pdf);
        }
        // Office Open XML containers are zip files; the extension tells them apart.
        if sample.starts_with(b"PK\x03\x04") {
            return Some(match extension.map(ContentType::from_extension) {
                Some(ct @ (ContentType::Spreadsheet | ContentType::Presentation)) => ct,
                _ => ContentType::Docx,
            });
        }
        if sample.starts_with(b"\x89PNG")
            || sample.starts_with(b"\xFF\xD8\xFF")
            || sample.starts_with(b"GIF8")
        {
            return Some(ContentType::Image);
        }

        let head = String::from_utf8_lossy(&sample[..sample.len().min(512)]).to_lowercase();
        let head = head.trim_start_matches('\u{feff}').trim_start();
        if head.starts_with("<!doctype html") || head.starts_with("<html") {
            return Some(ContentType::Html);
        }
        if head.starts_with('{') || head.starts_with('[') {
            return Some(ContentType::Json);
        }
        None
    }
}

fn path_extension(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    let (_, ext) = last.rsplit_once('.')?;
    (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

impl Detector for HeuristicDetector {
    async fn detect(&self, url: &str, sample: Option<&[u8]>) -> Result<ContentType, AppError> {
        let parsed = Url::parse(url).map_err(|e| AppError::HttpError(format!("Invalid URL: {e}")))?;
        let extension = path_extension(&parsed);

        if let Some(detected) = sample.and_then(|s| Self::from_sample(s, extension.as_deref())) {
            return Ok(detected);
        }

        let by_extension = extension
            .as_deref()
            .map(ContentType::from_extension)
            .unwrap_or(ContentType::Unknown);

        Ok(match by_extension {
            ContentType::Unknown
                if extension.is_none() && matches!(parsed.scheme(), "http" | "https") =>
            {
                ContentType::Html
            }
            other => other,
        })
    }
}
