//! Cloud backend: LlamaParse.
//!
//! Per document: upload → poll the job → fetch the JSON result. Page images
//! are fetched lazily during export, each one through a temporary file that
//! is removed whether or not it decodes.

use super::http;
use super::Backend;
use crate::config::LlamaConfig;
use crate::error::{BackendError, ParseError};
use crate::modality::Modalities;
use crate::output::{BoundingBox, ImageElement, Metadata, ParserOutput, TableElement, TextElement};
use crate::pipeline::{encode, input, input::PdfUpload};
use crate::poll::{JobStatus, Poller};
use crate::retry::retry;
use crate::table;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const SERVICE: &str = "llamaparse";

// ── Result JSON ──────────────────────────────────────────────────────────

/// Item box as LlamaParse reports it: origin plus extent.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ItemBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl From<ItemBox> for BoundingBox {
    fn from(b: ItemBox) -> Self {
        BoundingBox::new(b.x, b.y, b.x + b.w, b.y + b.h)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PageItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub md: Option<String>,
    #[serde(default)]
    pub csv: Option<String>,
    #[serde(rename = "bBox", default)]
    pub bbox: Option<ItemBox>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PageImage {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LlamaPage {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub md: String,
    #[serde(default)]
    pub items: Vec<PageItem>,
    #[serde(default)]
    pub images: Vec<PageImage>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LlamaResult {
    #[serde(default)]
    pub pages: Vec<LlamaPage>,
}

/// Raw result: the finished job and its JSON.
#[derive(Debug, Clone)]
pub struct LlamaJob {
    pub job_id: String,
    pub result: LlamaResult,
}

// ── API seam ─────────────────────────────────────────────────────────────

/// The four LlamaParse calls the backend needs.
#[async_trait]
pub trait CloudParseApi: Send + Sync {
    /// Start a parse job; returns its id.
    async fn upload(&self, upload: &PdfUpload) -> Result<String, BackendError>;

    async fn job_status(&self, job_id: &str) -> Result<JobStatus<()>, BackendError>;

    async fn result(&self, job_id: &str) -> Result<LlamaResult, BackendError>;

    /// Write the named page image to `dest`.
    async fn download_image(&self, job_id: &str, name: &str, dest: &Path) -> Result<(), BackendError>;
}

#[derive(Deserialize)]
struct JobResponse {
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    error_message: Option<String>,
}

/// Production [`CloudParseApi`] over reqwest.
pub struct LlamaCloud {
    client: reqwest::Client,
    api_key: String,
    config: LlamaConfig,
}

impl LlamaCloud {
    pub fn new(config: &LlamaConfig) -> Result<Self, ParseError> {
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            api_key: config.require_api_key()?.to_string(),
            config: config.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        http::join(&self.config.base_url, path)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, BackendError> {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(http::send_error(SERVICE))?;
        http::ensure_success(SERVICE, resp).await
    }
}

#[async_trait]
impl CloudParseApi for LlamaCloud {
    async fn upload(&self, upload: &PdfUpload) -> Result<String, BackendError> {
        let part = Part::bytes(upload.bytes.clone())
            .file_name(upload.file_name.clone())
            .mime_str("application/pdf")
            .map_err(|e| BackendError::Decode(format!("multipart: {e}")))?;
        let c = &self.config;
        let form = Form::new()
            .part("file", part)
            .text("premium_mode", c.premium_mode.to_string())
            .text("continuous_mode", c.continuous_mode.to_string())
            .text("take_screenshot", c.take_screenshot.to_string())
            .text("disable_ocr", c.disable_ocr.to_string())
            .text("invalidate_cache", c.invalidate_cache.to_string())
            .text("do_not_cache", c.do_not_cache.to_string());

        let resp = self
            .client
            .post(self.url("/api/parsing/upload"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(http::send_error(SERVICE))?;
        let job: JobResponse = http::json(SERVICE, resp).await?;
        Ok(job.id)
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatus<()>, BackendError> {
        let resp = self.get(&format!("/api/parsing/job/{job_id}")).await?;
        let job: JobResponse = http::json(SERVICE, resp).await?;
        Ok(match job.status.as_str() {
            "SUCCESS" => JobStatus::Done(()),
            "ERROR" | "CANCELED" => JobStatus::Failed(job.error_message.unwrap_or(job.status)),
            _ => JobStatus::Pending,
        })
    }

    async fn result(&self, job_id: &str) -> Result<LlamaResult, BackendError> {
        let resp = self.get(&format!("/api/parsing/job/{job_id}/result/json")).await?;
        http::json(SERVICE, resp).await
    }

    async fn download_image(&self, job_id: &str, name: &str, dest: &Path) -> Result<(), BackendError> {
        let resp = self
            .get(&format!("/api/parsing/job/{job_id}/result/image/{name}"))
            .await?;
        let bytes = resp.bytes().await.map_err(http::send_error(SERVICE))?;
        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|source| BackendError::Io {
                path: dest.to_path_buf(),
                source,
            })
    }
}

// ── Backend ──────────────────────────────────────────────────────────────

/// The `llama` backend.
pub struct LlamaBackend<A = LlamaCloud> {
    api: A,
    config: LlamaConfig,
}

impl LlamaBackend<LlamaCloud> {
    /// Fails with [`ParseError::MissingCredential`] when no key is set.
    pub fn new(config: LlamaConfig) -> Result<Self, ParseError> {
        let api = LlamaCloud::new(&config)?;
        Ok(Self { api, config })
    }
}

impl<A: CloudParseApi> LlamaBackend<A> {
    pub fn with_api(api: A, config: LlamaConfig) -> Self {
        Self { api, config }
    }

    fn item_table(page: &LlamaPage, item: &PageItem) -> Option<TableElement> {
        let from_csv = item
            .csv
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(table::parse_csv_table);
        let dataframe = match from_csv {
            Some(Ok(df)) => df,
            other => {
                if let Some(Err(e)) = other {
                    debug!("page {}: CSV table unreadable ({e}), trying markdown", page.page);
                }
                match item.md.as_deref().map(table::parse_markdown_table) {
                    Some(Ok(df)) => df,
                    Some(Err(e)) => {
                        warn!("page {}: dropping table: {e}", page.page);
                        return None;
                    }
                    None => {
                        warn!("page {}: dropping table with neither CSV nor markdown", page.page);
                        return None;
                    }
                }
            }
        };

        let markdown = match item.md.as_deref() {
            Some(md) if !md.trim().is_empty() => md.to_string(),
            _ => table::render_markdown(&dataframe.columns, &dataframe.rows),
        };
        let metadata = Metadata::new(page.page, item.bbox.map(Into::into).unwrap_or_default());
        TableElement::new(markdown, dataframe, metadata)
            .map_err(|e| warn!("page {}: dropping table: {e}", page.page))
            .ok()
    }

    async fn fetch_image(&self, job_id: &str, name: &str, dir: &Path) -> Result<image::DynamicImage, BackendError> {
        let file = Path::new(name)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("image.png"));
        let dest = dir.join(file);

        let dest_ref = &dest;
        retry(&self.config.retry, "llamaparse image download", move |_| {
            self.api.download_image(job_id, name, dest_ref)
        })
        .await?;

        let decoded = match tokio::fs::read(&dest).await {
            Ok(bytes) => encode::decode_rgb(&bytes),
            Err(source) => Err(BackendError::Io {
                path: dest.clone(),
                source,
            }),
        };
        if let Err(e) = tokio::fs::remove_file(&dest).await {
            warn!("could not remove temporary image {}: {e}", dest.display());
        }
        decoded
    }

    async fn page_images(&self, job_id: &str, pages: &[LlamaPage]) -> Vec<ImageElement> {
        let names = pages.iter().map(|p| p.images.len()).sum::<usize>();
        if names == 0 {
            return Vec::new();
        }
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => {
                warn!("no temporary directory for page images: {e}");
                return Vec::new();
            }
        };

        let mut images = Vec::with_capacity(names);
        for page in pages {
            for image in &page.images {
                let element = self
                    .fetch_image(job_id, &image.name, dir.path())
                    .await
                    .map_err(|e| e.to_string())
                    .and_then(|img| {
                        ImageElement::new(img, Metadata::page(page.page)).map_err(|e| e.to_string())
                    });
                match element {
                    Ok(el) => images.push(el),
                    Err(e) => warn!("page {}: skipping image '{}': {e}", page.page, image.name),
                }
            }
        }
        images
    }
}

#[async_trait]
impl<A: CloudParseApi> Backend for LlamaBackend<A> {
    type Raw = LlamaJob;

    fn name(&self) -> &'static str {
        "llama"
    }

    async fn load_one(&self, path: &Path) -> Result<LlamaJob, BackendError> {
        let upload = input::read_pdf(path).await?;
        let api = &self.api;
        let upload = &upload;
        let job_id = retry(&self.config.retry, "llamaparse upload", move |_| api.upload(upload)).await?;
        info!("llamaparse job {job_id} started for {}", upload.file_name);

        let id = job_id.as_str();
        Poller::new(SERVICE, id, self.config.poll)
            .run(|| api.job_status(id))
            .await?;

        let result = retry(&self.config.retry, "llamaparse result", move |_| api.result(id)).await?;
        debug!("llamaparse job {job_id}: {} page(s)", result.pages.len());
        Ok(LlamaJob { job_id, result })
    }

    async fn export(&self, raw: LlamaJob, modalities: &Modalities) -> Result<ParserOutput, ParseError> {
        let pages = &raw.result.pages;

        let mut text = String::new();
        if modalities.text() {
            for page in pages {
                text.push_str(&page.text);
                text.push('\n');
            }
        }

        let tables = if modalities.tables() {
            pages
                .iter()
                .flat_map(|p| p.items.iter().filter(|i| i.kind == "table").map(move |i| (p, i)))
                .filter_map(|(p, i)| Self::item_table(p, i))
                .collect()
        } else {
            Vec::new()
        };

        let images = if modalities.images() {
            self.page_images(&raw.job_id, pages).await
        } else {
            Vec::new()
        };

        ParserOutput::new(TextElement::new(text), tables, images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::PollPolicy;
    use crate::progress::NoopProgressCallback;
    use crate::retry::RetryPolicy;
    use image::{DynamicImage, Rgb, RgbImage};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MockCloud {
        pending_checks: usize,
        fail_job: bool,
        checks: AtomicUsize,
        downloaded: Mutex<Vec<PathBuf>>,
    }

    impl MockCloud {
        fn new(pending_checks: usize) -> Self {
            Self {
                pending_checks,
                fail_job: false,
                checks: AtomicUsize::new(0),
                downloaded: Mutex::new(Vec::new()),
            }
        }
    }

    fn result() -> LlamaResult {
        serde_json::from_value(json!({
            "pages": [
                {
                    "page": 1,
                    "text": "Quarterly report",
                    "items": [
                        {"type": "heading", "md": "# Quarterly report"},
                        {"type": "table", "csv": "Region,Sales\nNorth,10\nSouth,",
                         "md": "| Region | Sales |\n|---|---|\n| North | 10 |\n| South | |",
                         "bBox": {"x": 10.0, "y": 20.0, "w": 100.0, "h": 50.0}}
                    ],
                    "images": [{"name": "img_p1_1.png"}, {"name": "broken.png"}]
                },
                {
                    "page": 2,
                    "text": "Appendix",
                    "items": [
                        {"type": "table", "md": "| A | B |\n|---|---|\n| 1 | 2 |"},
                        {"type": "table", "md": "just one line"}
                    ]
                }
            ]
        }))
        .unwrap()
    }

    #[async_trait]
    impl CloudParseApi for MockCloud {
        async fn upload(&self, _upload: &PdfUpload) -> Result<String, BackendError> {
            Ok("job-1".into())
        }

        async fn job_status(&self, _job_id: &str) -> Result<JobStatus<()>, BackendError> {
            let n = self.checks.fetch_add(1, Ordering::SeqCst);
            Ok(if self.fail_job {
                JobStatus::Failed("unsupported file".into())
            } else if n < self.pending_checks {
                JobStatus::Pending
            } else {
                JobStatus::Done(())
            })
        }

        async fn result(&self, _job_id: &str) -> Result<LlamaResult, BackendError> {
            Ok(result())
        }

        async fn download_image(&self, _job_id: &str, name: &str, dest: &Path) -> Result<(), BackendError> {
            self.downloaded.lock().unwrap().push(dest.to_path_buf());
            let bytes = if name == "broken.png" {
                b"not a png".to_vec()
            } else {
                let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(5, 4, Rgb([1, 2, 3])));
                encode::encode_png(&img).unwrap()
            };
            std::fs::write(dest, bytes).unwrap();
            Ok(())
        }
    }

    fn config() -> LlamaConfig {
        LlamaConfig::default()
            .api_key("llx-test")
            .poll(PollPolicy::new(0, 60))
            .retry(RetryPolicy::none())
    }

    fn pdf(dir: &tempfile::TempDir) -> PathBuf {
        let p = dir.path().join("report.pdf");
        std::fs::write(&p, b"%PDF-1.4\n").unwrap();
        p
    }

    #[tokio::test]
    async fn full_export() {
        let dir = tempfile::tempdir().unwrap();
        let b = LlamaBackend::with_api(MockCloud::new(2), config());
        let out = super::super::run(&b, &[pdf(&dir)], &["text", "tables", "images"], &NoopProgressCallback)
            .await
            .unwrap();
        let doc = &out[0];
        assert_eq!(b.api.checks.load(Ordering::SeqCst), 3);
        assert_eq!(doc.text.text, "Quarterly report\nAppendix\n");

        assert_eq!(doc.tables.len(), 2, "unparseable table dropped");
        let first = &doc.tables[0];
        assert_eq!(first.dataframe.columns, vec!["Region", "Sales"]);
        assert_eq!(first.dataframe.cell(1, 1), None, "empty CSV cell is null");
        assert_eq!(first.metadata.page_number, 1);
        assert_eq!(first.metadata.bounding_box, BoundingBox::new(10.0, 20.0, 110.0, 70.0));
        let second = &doc.tables[1];
        assert_eq!(second.metadata.page_number, 2);
        assert_eq!(second.dataframe.columns, vec!["A", "B"], "markdown fallback");

        assert_eq!(doc.images.len(), 1, "undecodable image skipped");
        assert_eq!(doc.images[0].width(), 5);
        for tmp in b.api.downloaded.lock().unwrap().iter() {
            assert!(!tmp.exists(), "{} left behind", tmp.display());
        }
    }

    #[tokio::test]
    async fn failed_job_yields_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let mut api = MockCloud::new(0);
        api.fail_job = true;
        let b = LlamaBackend::with_api(api, config());
        let out = super::super::run(&b, &[pdf(&dir)], &["text"], &NoopProgressCallback)
            .await
            .unwrap();
        assert!(out[0].is_empty());
    }

    #[tokio::test]
    async fn images_not_downloaded_unless_requested() {
        let dir = tempfile::tempdir().unwrap();
        let b = LlamaBackend::with_api(MockCloud::new(0), config());
        super::super::run(&b, &[pdf(&dir)], &["text", "tables"], &NoopProgressCallback)
            .await
            .unwrap();
        assert!(b.api.downloaded.lock().unwrap().is_empty());
    }

    #[test]
    fn missing_key_is_fatal() {
        let err = LlamaBackend::new(LlamaConfig::default()).err().unwrap();
        assert!(matches!(err, ParseError::MissingCredential { backend: "llama", .. }));
    }
}
