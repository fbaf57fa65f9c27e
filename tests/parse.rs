//! Integration tests through the public API, every external engine mocked.
//!
//! Nothing here touches the network or needs a PDFium library.

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use parsestudio::backend::docling::{
    ConversionStatus, DoclingBackend, DoclingDocument, DoclingResult, LayoutEngine,
};
use parsestudio::backend::file_search::{FileSearchApi, FileSearchBackend, Resource};
use parsestudio::backend::llama::{CloudParseApi, LlamaBackend, LlamaPage, LlamaResult};
use parsestudio::backend::pdfium::{NativeDocument, PageContent, PdfLibrary, PdfiumBackend};
use parsestudio::backend::vision::{PageAnalyzer, PageRenderer, VisionBackend};
use parsestudio::pipeline::input::PdfUpload;
use parsestudio::{
    parse_markdown_table, Backend, BackendError, Backoff, DoclingConfig, FileSearchConfig,
    JobStatus, LlamaConfig, Modalities, ParseError, ParseProgressCallback, ParserOutput,
    PdfParser, PdfiumConfig, PollPolicy, RetryPolicy, TableParseFailure, TextElement,
    VisionConfig,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_test::{assert_err, assert_ok};
use tracing_subscriber::EnvFilter;

// ── Fixtures ─────────────────────────────────────────────────────────────────

/// Route library logs to the test harness; `PARSESTUDIO_LOG=debug` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PARSESTUDIO_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn write_pdfs(dir: &tempfile::TempDir, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|n| {
            let p = dir.path().join(n);
            std::fs::write(&p, b"%PDF-1.4\n%%EOF\n").unwrap();
            p
        })
        .collect()
}

fn no_wait() -> RetryPolicy {
    RetryPolicy::new(3, Backoff::None)
}

/// Counts loads; documents whose name contains "broken" fail.
#[derive(Default)]
struct SpyBackend {
    loads: Arc<AtomicUsize>,
}

#[async_trait]
impl Backend for SpyBackend {
    type Raw = String;

    fn name(&self) -> &'static str {
        "spy"
    }

    async fn load_one(&self, path: &Path) -> Result<String, BackendError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        if name.contains("broken") {
            return Err(BackendError::Transport {
                service: "spy",
                detail: "connection reset".into(),
            });
        }
        Ok(name)
    }

    async fn export(&self, raw: String, modalities: &Modalities) -> Result<ParserOutput, ParseError> {
        let text = if modalities.text() { raw } else { String::new() };
        ParserOutput::new(TextElement::new(text), vec![], vec![])
    }
}

struct RichEngine;

#[async_trait]
impl LayoutEngine for RichEngine {
    async fn convert(&self, _upload: &PdfUpload, _config: &DoclingConfig) -> Result<DoclingResult, BackendError> {
        let png = {
            let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 3, Rgb([0, 0, 0])));
            let mut buf = Vec::new();
            img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
                .unwrap();
            buf
        };
        use base64::Engine as _;
        let uri = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png)
        );
        let document: DoclingDocument = serde_json::from_value(json!({
            "tables": [{"prov": [{"page_no": 1, "bbox": {"l": 0.0, "t": 0.0, "r": 1.0, "b": 1.0}}],
                        "data": {"grid": [[{"text": "k"}, {"text": "v"}], [{"text": "a"}, {"text": "1"}]]}}],
            "pictures": [{"prov": [{"page_no": 1, "bbox": {"l": 0.0, "t": 0.0, "r": 1.0, "b": 1.0}}],
                          "image": {"uri": uri}}]
        }))
        .unwrap();
        Ok(DoclingResult {
            status: ConversionStatus::Success,
            markdown: "## Findings\n\n| k | v |".into(),
            document,
            errors: vec![],
        })
    }
}

struct OnePage;

#[async_trait]
impl PageRenderer for OnePage {
    async fn render(&self, _path: &Path) -> Result<Vec<DynamicImage>, BackendError> {
        Ok(vec![DynamicImage::ImageRgb8(RgbImage::new(16, 16))])
    }
}

/// Fails with a transient error `failures` times, then answers.
struct Flaky {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl PageAnalyzer for Flaky {
    async fn analyze(&self, _page: &DynamicImage, _page_number: u32) -> Result<String, BackendError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(BackendError::Api {
                service: "openai",
                status: 503,
                message: "overloaded".into(),
            });
        }
        Ok(json!({
            "text_content": "page body",
            "tables": [{"markdown": "| H1 | H2 |\n|----|----|\n| a | b |"}]
        })
        .to_string())
    }
}

/// Answers immediately with one table that carries no page number.
#[derive(Default)]
struct InstantFiles {
    deleted: Arc<Mutex<Vec<Resource>>>,
}

#[async_trait]
impl FileSearchApi for InstantFiles {
    async fn upload_file(&self, _upload: &PdfUpload) -> Result<String, BackendError> {
        Ok("file-1".into())
    }
    async fn create_vector_store(&self, _name: &str) -> Result<String, BackendError> {
        Ok("vs-1".into())
    }
    async fn attach_file(&self, _store_id: &str, _file_id: &str) -> Result<(), BackendError> {
        Ok(())
    }
    async fn file_status(&self, _store_id: &str, _file_id: &str) -> Result<JobStatus<()>, BackendError> {
        Ok(JobStatus::Done(()))
    }
    async fn respond(&self, _store_id: &str) -> Result<String, BackendError> {
        Ok(r#"{"text_content": "whole document", "tables": [{"markdown": "| A |\n|---|\n| 1 |"}]}"#.into())
    }
    async fn create_assistant(&self, _store_id: &str) -> Result<String, BackendError> {
        Ok("asst-1".into())
    }
    async fn create_thread(&self) -> Result<String, BackendError> {
        Ok("thread-1".into())
    }
    async fn add_message(&self, _thread_id: &str, _text: &str) -> Result<(), BackendError> {
        Ok(())
    }
    async fn start_run(&self, _thread_id: &str, _assistant_id: &str) -> Result<String, BackendError> {
        Ok("run-1".into())
    }
    async fn run_status(&self, _thread_id: &str, _run_id: &str) -> Result<JobStatus<()>, BackendError> {
        Ok(JobStatus::Done(()))
    }
    async fn latest_answer(&self, _thread_id: &str) -> Result<Option<String>, BackendError> {
        Ok(None)
    }
    async fn delete(&self, resource: &Resource) -> Result<(), BackendError> {
        self.deleted.lock().unwrap().push(resource.clone());
        Ok(())
    }
}

fn vision(failures: usize) -> VisionBackend<OnePage, Flaky> {
    let config = VisionConfig::builder().retry(no_wait()).build().unwrap();
    VisionBackend::with_parts(
        "vision",
        OnePage,
        Flaky {
            failures,
            calls: AtomicUsize::new(0),
        },
        config,
    )
}

fn file_search() -> FileSearchBackend<InstantFiles> {
    file_search_with(InstantFiles::default())
}

fn file_search_with(api: InstantFiles) -> FileSearchBackend<InstantFiles> {
    let config = FileSearchConfig::default()
        .api_key("sk-test")
        .retry(no_wait())
        .index_poll(PollPolicy::new(0, 5));
    FileSearchBackend::with_api(api, config)
}

// ── Normalizer scenarios ─────────────────────────────────────────────────────

#[test]
fn markdown_table_normalises() {
    let df = parse_markdown_table("| H1 | H2 |\n|----|----|\n| a | b |\n| c | d |").unwrap();
    assert_eq!(df.columns, vec!["H1", "H2"]);
    assert_eq!(
        df.rows,
        vec![
            vec![Some("a".to_string()), Some("b".to_string())],
            vec![Some("c".to_string()), Some("d".to_string())],
        ]
    );
}

#[test]
fn single_line_table_is_rejected() {
    assert_eq!(
        parse_markdown_table("| H |"),
        Err(TableParseFailure::TooFewLines { found: 1 })
    );
}

#[tokio::test]
async fn single_line_table_from_a_model_is_dropped() {
    struct OneLine;
    #[async_trait]
    impl PageAnalyzer for OneLine {
        async fn analyze(&self, _p: &DynamicImage, _n: u32) -> Result<String, BackendError> {
            Ok(r#"{"text_content": "x", "tables": [{"markdown": "| H |"}]}"#.into())
        }
    }
    let dir = tempfile::tempdir().unwrap();
    let b = VisionBackend::with_parts("vision", OnePage, OneLine, VisionConfig::default());
    let out = PdfParser::with_backend(Box::new(b))
        .parse(write_pdfs(&dir, &["a.pdf"]), &["tables"])
        .await
        .unwrap();
    assert!(out[0].tables.is_empty());
}

// ── Dispatcher behaviour ─────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_modality_never_reaches_the_backend() {
    let spy = SpyBackend::default();
    let loads = Arc::clone(&spy.loads);
    let parser = PdfParser::with_backend(Box::new(spy));
    let err = assert_err!(parser.parse("a.pdf", &["text", "audio", "video"]).await);
    match err {
        ParseError::InvalidModality { invalid, .. } => assert_eq!(invalid, vec!["audio", "video"]),
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn outputs_line_up_with_inputs() {
    init_tracing();
    let parser = PdfParser::with_backend(Box::new(SpyBackend::default()));
    let out = assert_ok!(
        parser
            .parse(vec!["one.pdf", "broken.pdf", "three.pdf"], &["text"])
            .await
    );
    let texts: Vec<&str> = out.iter().map(|o| o.text.text.as_str()).collect();
    assert_eq!(texts, vec!["one.pdf", "", "three.pdf"]);
    assert!(out[1].is_empty());
}

#[derive(Default)]
struct Tally {
    started: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl ParseProgressCallback for Tally {
    fn on_document_start(&self, _i: usize, _t: usize, _p: &Path) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_document_complete(&self, _i: usize, _t: usize, _len: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_document_error(&self, _i: usize, _t: usize, _e: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn progress_sees_every_document() {
    let tally = Arc::new(Tally::default());
    let parser = PdfParser::with_backend(Box::new(SpyBackend::default())).with_progress(tally.clone());
    parser.run(["a.pdf", "broken.pdf"]).await.unwrap();
    assert_eq!(tally.started.load(Ordering::SeqCst), 2);
    assert_eq!(tally.completed.load(Ordering::SeqCst), 1);
    assert_eq!(tally.failed.load(Ordering::SeqCst), 1);
}

// ── Adapter scenarios ────────────────────────────────────────────────────────

#[tokio::test]
async fn table_without_page_defaults_to_page_one() {
    let dir = tempfile::tempdir().unwrap();
    let backend = file_search();
    let out = PdfParser::with_backend(Box::new(backend))
        .run(write_pdfs(&dir, &["doc.pdf"]))
        .await
        .unwrap();
    let t = &out[0].tables[0];
    assert_eq!(t.metadata.page_number, 1);
    assert_eq!(t.metadata.bounding_box.0, [0.0, 0.0, 0.0, 0.0]);
}

#[tokio::test]
async fn three_transient_failures_degrade_to_empty() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let out = PdfParser::with_backend(Box::new(vision(3)))
        .run(write_pdfs(&dir, &["scan.pdf"]))
        .await;
    let out = assert_ok!(out);
    assert_eq!(out[0].text.text, "\n--- Page 1 ---\n");
    assert!(out[0].tables.is_empty());
}

#[tokio::test]
async fn two_transient_failures_then_success() {
    let dir = tempfile::tempdir().unwrap();
    let out = PdfParser::with_backend(Box::new(vision(2)))
        .run(write_pdfs(&dir, &["scan.pdf"]))
        .await
        .unwrap();
    assert_eq!(out[0].text.text, "\n--- Page 1 ---\npage body");
    assert_eq!(out[0].tables.len(), 1);
}

#[tokio::test]
async fn text_only_request_drops_tables_and_images() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_pdfs(&dir, &["rich.pdf"]);

    let docling = DoclingBackend::with_engine(RichEngine, DoclingConfig::default().retry(no_wait())).unwrap();
    let full = PdfParser::with_backend(Box::new(docling)).run(paths.clone()).await.unwrap();
    assert_eq!(full[0].tables.len(), 1);
    assert_eq!(full[0].images.len(), 1);

    let parsers: Vec<PdfParser> = vec![
        PdfParser::with_backend(Box::new(
            DoclingBackend::with_engine(RichEngine, DoclingConfig::default()).unwrap(),
        )),
        PdfParser::with_backend(Box::new(vision(0))),
        PdfParser::with_backend(Box::new(file_search())),
    ];
    for parser in parsers {
        let out = parser.parse(paths.clone(), &["text"]).await.unwrap();
        assert!(!out[0].text.text.is_empty(), "{}", parser.backend_name());
        assert!(out[0].tables.is_empty(), "{}", parser.backend_name());
        assert!(out[0].images.is_empty(), "{}", parser.backend_name());
    }
}

#[tokio::test]
async fn llm_backends_never_return_images() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_pdfs(&dir, &["a.pdf", "b.pdf"]);
    for parser in [
        PdfParser::with_backend(Box::new(vision(0))),
        PdfParser::with_backend(Box::new(file_search())),
    ] {
        let out = parser.run(paths.as_slice()).await.unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|o| o.images.is_empty()), "{}", parser.backend_name());
    }
}

#[tokio::test]
async fn file_search_releases_its_resources() {
    let dir = tempfile::tempdir().unwrap();
    let api = InstantFiles::default();
    let deleted = Arc::clone(&api.deleted);
    let parser = PdfParser::with_backend(Box::new(file_search_with(api)));
    let out = parser.parse(write_pdfs(&dir, &["doc.pdf"]), &["text"]).await.unwrap();
    assert_eq!(out[0].text.text, "whole document");
    assert_eq!(
        *deleted.lock().unwrap(),
        vec![
            Resource::VectorStore("vs-1".into()),
            Resource::File("file-1".into()),
        ]
    );
}

#[test]
fn unknown_backend_is_rejected() {
    let err = PdfParser::from_name("tesseract", serde_json::Value::Null).err().unwrap();
    assert!(err.to_string().contains("Invalid parser: 'tesseract'"));
}

// ── Per-adapter contract ─────────────────────────────────────────────────────
//
// Each engine stub echoes the document's file stem back as its text and
// counts how often the adapter reached it.

fn stem(path: &Path) -> String {
    path.file_stem().unwrap().to_string_lossy().into_owned()
}

#[derive(Default)]
struct EchoEngine {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl LayoutEngine for EchoEngine {
    async fn convert(&self, upload: &PdfUpload, _config: &DoclingConfig) -> Result<DoclingResult, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(DoclingResult {
            status: ConversionStatus::Success,
            markdown: stem(&upload.path),
            document: DoclingDocument::default(),
            errors: vec![],
        })
    }
}

#[derive(Default)]
struct EchoLibrary {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl PdfLibrary for EchoLibrary {
    async fn read(&self, path: &Path) -> Result<NativeDocument, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(NativeDocument {
            pages: vec![PageContent {
                text: stem(path),
                images: vec![],
            }],
        })
    }
}

#[derive(Default)]
struct EchoCloud {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl CloudParseApi for EchoCloud {
    async fn upload(&self, upload: &PdfUpload) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(stem(&upload.path))
    }
    async fn job_status(&self, _job_id: &str) -> Result<JobStatus<()>, BackendError> {
        Ok(JobStatus::Done(()))
    }
    async fn result(&self, job_id: &str) -> Result<LlamaResult, BackendError> {
        Ok(LlamaResult {
            pages: vec![LlamaPage {
                page: 1,
                text: job_id.to_string(),
                ..Default::default()
            }],
        })
    }
    async fn download_image(&self, _job_id: &str, _name: &str, _dest: &Path) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Renders as many pages as the digit at the end of the file stem.
#[derive(Default)]
struct DigitRenderer {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl PageRenderer for DigitRenderer {
    async fn render(&self, path: &Path) -> Result<Vec<DynamicImage>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pages = stem(path)
            .chars()
            .last()
            .and_then(|c| c.to_digit(10))
            .unwrap_or(1);
        Ok((0..pages)
            .map(|_| DynamicImage::ImageRgb8(RgbImage::new(8, 8)))
            .collect())
    }
}

struct PageEcho;

#[async_trait]
impl PageAnalyzer for PageEcho {
    async fn analyze(&self, _page: &DynamicImage, page_number: u32) -> Result<String, BackendError> {
        Ok(json!({"text_content": format!("body {page_number}"), "tables": []}).to_string())
    }
}

/// Answers with the name of the last file attached to a store.
#[derive(Default)]
struct EchoFiles {
    calls: Arc<AtomicUsize>,
    attached: Mutex<String>,
}

#[async_trait]
impl FileSearchApi for EchoFiles {
    async fn upload_file(&self, upload: &PdfUpload) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(stem(&upload.path))
    }
    async fn create_vector_store(&self, _name: &str) -> Result<String, BackendError> {
        Ok("vs".into())
    }
    async fn attach_file(&self, _store_id: &str, file_id: &str) -> Result<(), BackendError> {
        *self.attached.lock().unwrap() = file_id.to_string();
        Ok(())
    }
    async fn file_status(&self, _store_id: &str, _file_id: &str) -> Result<JobStatus<()>, BackendError> {
        Ok(JobStatus::Done(()))
    }
    async fn respond(&self, _store_id: &str) -> Result<String, BackendError> {
        let name = self.attached.lock().unwrap().clone();
        Ok(json!({"text_content": name, "tables": []}).to_string())
    }
    async fn create_assistant(&self, _store_id: &str) -> Result<String, BackendError> {
        Ok("asst".into())
    }
    async fn create_thread(&self) -> Result<String, BackendError> {
        Ok("thread".into())
    }
    async fn add_message(&self, _thread_id: &str, _text: &str) -> Result<(), BackendError> {
        Ok(())
    }
    async fn start_run(&self, _thread_id: &str, _assistant_id: &str) -> Result<String, BackendError> {
        Ok("run".into())
    }
    async fn run_status(&self, _thread_id: &str, _run_id: &str) -> Result<JobStatus<()>, BackendError> {
        Ok(JobStatus::Done(()))
    }
    async fn latest_answer(&self, _thread_id: &str) -> Result<Option<String>, BackendError> {
        Ok(None)
    }
    async fn delete(&self, _resource: &Resource) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Every concrete adapter over its echoing stub, with the stub's call counter.
fn echo_adapters() -> Vec<(PdfParser, Arc<AtomicUsize>)> {
    let docling = EchoEngine::default();
    let docling_calls = Arc::clone(&docling.calls);
    let native = EchoLibrary::default();
    let native_calls = Arc::clone(&native.calls);
    let cloud = EchoCloud::default();
    let cloud_calls = Arc::clone(&cloud.calls);
    let renderer = DigitRenderer::default();
    let render_calls = Arc::clone(&renderer.calls);
    let files = EchoFiles::default();
    let file_calls = Arc::clone(&files.calls);

    let llama_config = LlamaConfig::default()
        .api_key("llx-test")
        .poll(PollPolicy::new(0, 5))
        .retry(no_wait());
    let vision_config = VisionConfig::builder().retry(no_wait()).build().unwrap();
    let files_config = FileSearchConfig::default()
        .api_key("sk-test")
        .retry(no_wait())
        .index_poll(PollPolicy::new(0, 5));

    vec![
        (
            // a missing file must not abort the batch here
            PdfParser::with_backend(Box::new(
                DoclingBackend::with_engine(docling, DoclingConfig::default().raises_on_error(false)).unwrap(),
            )),
            docling_calls,
        ),
        (
            PdfParser::with_backend(Box::new(
                PdfiumBackend::with_library(native, PdfiumConfig::default()).unwrap(),
            )),
            native_calls,
        ),
        (
            PdfParser::with_backend(Box::new(LlamaBackend::with_api(cloud, llama_config))),
            cloud_calls,
        ),
        (
            PdfParser::with_backend(Box::new(VisionBackend::with_parts(
                "vision",
                renderer,
                PageEcho,
                vision_config,
            ))),
            render_calls,
        ),
        (
            PdfParser::with_backend(Box::new(FileSearchBackend::with_api(files, files_config))),
            file_calls,
        ),
    ]
}

#[tokio::test]
async fn every_adapter_rejects_bad_modalities_before_io() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let paths = write_pdfs(&dir, &["doc1.pdf", "doc2.pdf"]);
    for (parser, calls) in echo_adapters() {
        let err = assert_err!(parser.parse(paths.as_slice(), &["text", "audio"]).await);
        assert!(
            matches!(err, ParseError::InvalidModality { .. }),
            "{}: {err:?}",
            parser.backend_name()
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0, "{}", parser.backend_name());
    }
}

#[tokio::test]
async fn every_adapter_keeps_input_order() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut paths = write_pdfs(&dir, &["first1.pdf", "third3.pdf"]);
    paths.insert(1, dir.path().join("missing2.pdf"));

    for (parser, calls) in echo_adapters() {
        let name = parser.backend_name();
        let out = assert_ok!(parser.parse(paths.as_slice(), &["text"]).await);
        assert_eq!(out.len(), 3, "{name}");
        assert!(out[1].is_empty(), "{name}: missing file should yield an empty result");
        assert_eq!(calls.load(Ordering::SeqCst), 2, "{name}");

        let (first, third) = (&out[0].text.text, &out[2].text.text);
        if name == "vision" {
            // page count comes from the stem's digit
            assert!(first.contains("--- Page 1 ---") && !first.contains("--- Page 2 ---"), "{name}: {first:?}");
            assert!(third.contains("--- Page 3 ---"), "{name}: {third:?}");
        } else {
            assert!(first.contains("first1") && !first.contains("third3"), "{name}: {first:?}");
            assert!(third.contains("third3"), "{name}: {third:?}");
        }
    }
}
