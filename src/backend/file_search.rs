//! LLM file-search backend: the whole PDF goes to OpenAI, is indexed into a
//! vector store and read back through the `file_search` tool.
//!
//! Two request styles are supported:
//!
//! * [`FileSearchMode::Responses`]: one `/responses` call with a strict JSON
//!   schema.
//! * [`FileSearchMode::Assistant`]: assistant + thread + run, polled until
//!   the run settles. A run that outlives its deadline still yields whatever
//!   answer is already in the thread.
//!
//! Every remote object created for a document (file, vector store,
//! assistant, thread) is recorded in a [`Scope`] and deleted before
//! `load_one` returns, on success and failure alike.

use super::http;
use super::Backend;
use crate::config::{FileSearchConfig, FileSearchMode};
use crate::error::{BackendError, ParseError};
use crate::modality::Modalities;
use crate::output::{BoundingBox, Metadata, ParserOutput, TableElement, TextElement};
use crate::pipeline::postprocess::{self, StructuredAnswer};
use crate::pipeline::{input, input::PdfUpload};
use crate::poll::{JobStatus, Poller};
use crate::prompts;
use crate::retry::retry;
use crate::table;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const SERVICE: &str = "openai";

/// A remote object owned by one document's extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    File(String),
    VectorStore(String),
    Assistant(String),
    Thread(String),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::File(id) => write!(f, "file {id}"),
            Resource::VectorStore(id) => write!(f, "vector store {id}"),
            Resource::Assistant(id) => write!(f, "assistant {id}"),
            Resource::Thread(id) => write!(f, "thread {id}"),
        }
    }
}

/// The OpenAI calls the backend needs.
#[async_trait]
pub trait FileSearchApi: Send + Sync {
    async fn upload_file(&self, upload: &PdfUpload) -> Result<String, BackendError>;
    async fn create_vector_store(&self, name: &str) -> Result<String, BackendError>;
    async fn attach_file(&self, store_id: &str, file_id: &str) -> Result<(), BackendError>;
    /// Indexing state of a file inside a vector store.
    async fn file_status(&self, store_id: &str, file_id: &str) -> Result<JobStatus<()>, BackendError>;

    /// Responses mode: the model's raw output text.
    async fn respond(&self, store_id: &str) -> Result<String, BackendError>;

    async fn create_assistant(&self, store_id: &str) -> Result<String, BackendError>;
    async fn create_thread(&self) -> Result<String, BackendError>;
    async fn add_message(&self, thread_id: &str, text: &str) -> Result<(), BackendError>;
    async fn start_run(&self, thread_id: &str, assistant_id: &str) -> Result<String, BackendError>;
    async fn run_status(&self, thread_id: &str, run_id: &str) -> Result<JobStatus<()>, BackendError>;
    /// Text of the newest assistant message, if any.
    async fn latest_answer(&self, thread_id: &str) -> Result<Option<String>, BackendError>;

    async fn delete(&self, resource: &Resource) -> Result<(), BackendError>;
}

/// Remote objects to delete when a document is done.
#[derive(Debug, Default)]
pub struct Scope {
    resources: Vec<Resource>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, resource: Resource) {
        debug!("created {resource}");
        self.resources.push(resource);
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Delete everything, newest first. Failures are logged and skipped.
    pub async fn release<A: FileSearchApi + ?Sized>(self, api: &A) {
        for resource in self.resources.into_iter().rev() {
            match api.delete(&resource).await {
                Ok(()) => debug!("deleted {resource}"),
                Err(e) => warn!("could not delete {resource}: {e}"),
            }
        }
    }
}

// ── OpenAI REST client ───────────────────────────────────────────────────

#[derive(Deserialize)]
struct Created {
    id: String,
}

#[derive(Deserialize)]
struct LastError {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct StatusBody {
    status: String,
    #[serde(default)]
    last_error: Option<LastError>,
}

impl StatusBody {
    fn failure(self) -> String {
        match self.last_error {
            Some(e) if !e.message.is_empty() => e.message,
            _ => self.status,
        }
    }
}

/// Production [`FileSearchApi`] over reqwest.
pub struct OpenAiFiles {
    client: reqwest::Client,
    api_key: String,
    config: FileSearchConfig,
}

impl OpenAiFiles {
    pub fn new(config: &FileSearchConfig) -> Result<Self, ParseError> {
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            api_key: config.require_api_key()?.to_string(),
            config: config.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        http::join(&self.config.base_url, path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.api_key).header("OpenAI-Beta", "assistants=v2")
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, BackendError> {
        let resp = self
            .authed(req)
            .send()
            .await
            .map_err(http::send_error(SERVICE))?;
        http::json(SERVICE, resp).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, BackendError> {
        self.send(self.client.post(self.url(path)).json(&body)).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        self.send(self.client.get(self.url(path))).await
    }
}

/// Concatenate every `output_text` part of a `/responses` body.
fn response_text(body: &Value) -> String {
    let mut out = String::new();
    for item in body["output"].as_array().into_iter().flatten() {
        if item["type"] != "message" {
            continue;
        }
        for part in item["content"].as_array().into_iter().flatten() {
            if part["type"] == "output_text" {
                if let Some(t) = part["text"].as_str() {
                    out.push_str(t);
                }
            }
        }
    }
    out
}

/// First text part of the newest assistant message in a message list.
fn first_assistant_text(body: &Value) -> Option<String> {
    body["data"]
        .as_array()?
        .iter()
        .filter(|m| m["role"] == "assistant")
        .flat_map(|m| m["content"].as_array().into_iter().flatten())
        .find(|c| c["type"] == "text")
        .and_then(|c| c["text"]["value"].as_str())
        .map(str::to_string)
}

#[async_trait]
impl FileSearchApi for OpenAiFiles {
    async fn upload_file(&self, upload: &PdfUpload) -> Result<String, BackendError> {
        let part = Part::bytes(upload.bytes.clone())
            .file_name(upload.file_name.clone())
            .mime_str("application/pdf")
            .map_err(|e| BackendError::Decode(format!("multipart: {e}")))?;
        let form = Form::new().text("purpose", "assistants").part("file", part);
        let created: Created = self
            .send(self.client.post(self.url("/files")).multipart(form))
            .await?;
        Ok(created.id)
    }

    async fn create_vector_store(&self, name: &str) -> Result<String, BackendError> {
        let created: Created = self.post("/vector_stores", json!({ "name": name })).await?;
        Ok(created.id)
    }

    async fn attach_file(&self, store_id: &str, file_id: &str) -> Result<(), BackendError> {
        let _: Value = self
            .post(
                &format!("/vector_stores/{store_id}/files"),
                json!({ "file_id": file_id }),
            )
            .await?;
        Ok(())
    }

    async fn file_status(&self, store_id: &str, file_id: &str) -> Result<JobStatus<()>, BackendError> {
        let body: StatusBody = self
            .get(&format!("/vector_stores/{store_id}/files/{file_id}"))
            .await?;
        Ok(match body.status.as_str() {
            "completed" => JobStatus::Done(()),
            "failed" | "cancelled" => JobStatus::Failed(body.failure()),
            _ => JobStatus::Pending,
        })
    }

    async fn respond(&self, store_id: &str) -> Result<String, BackendError> {
        let body: Value = self
            .post(
                "/responses",
                json!({
                    "model": self.config.model,
                    "input": [
                        { "role": "system", "content": prompts::FILE_SEARCH_SYSTEM_PROMPT },
                        { "role": "user", "content": prompts::FILE_SEARCH_USER_PROMPT }
                    ],
                    "tools": [{ "type": "file_search", "vector_store_ids": [store_id] }],
                    "text": {
                        "format": {
                            "type": "json_schema",
                            "name": prompts::DOCUMENT_SCHEMA_NAME,
                            "schema": prompts::strict_extraction_schema(),
                            "strict": true
                        }
                    },
                    "max_output_tokens": self.config.max_tokens,
                    "temperature": self.config.temperature
                }),
            )
            .await?;
        Ok(response_text(&body))
    }

    async fn create_assistant(&self, store_id: &str) -> Result<String, BackendError> {
        let created: Created = self
            .post(
                "/assistants",
                json!({
                    "model": self.config.model,
                    "instructions": prompts::FILE_SEARCH_SYSTEM_PROMPT,
                    "tools": [{ "type": "file_search" }],
                    "tool_resources": { "file_search": { "vector_store_ids": [store_id] } },
                    "temperature": self.config.temperature
                }),
            )
            .await?;
        Ok(created.id)
    }

    async fn create_thread(&self) -> Result<String, BackendError> {
        let created: Created = self.post("/threads", json!({})).await?;
        Ok(created.id)
    }

    async fn add_message(&self, thread_id: &str, text: &str) -> Result<(), BackendError> {
        let _: Value = self
            .post(
                &format!("/threads/{thread_id}/messages"),
                json!({ "role": "user", "content": text }),
            )
            .await?;
        Ok(())
    }

    async fn start_run(&self, thread_id: &str, assistant_id: &str) -> Result<String, BackendError> {
        let created: Created = self
            .post(
                &format!("/threads/{thread_id}/runs"),
                json!({
                    "assistant_id": assistant_id,
                    "max_completion_tokens": self.config.max_tokens
                }),
            )
            .await?;
        Ok(created.id)
    }

    async fn run_status(&self, thread_id: &str, run_id: &str) -> Result<JobStatus<()>, BackendError> {
        let body: StatusBody = self.get(&format!("/threads/{thread_id}/runs/{run_id}")).await?;
        Ok(match body.status.as_str() {
            "queued" | "in_progress" | "cancelling" => JobStatus::Pending,
            "completed" => JobStatus::Done(()),
            _ => JobStatus::Failed(body.failure()),
        })
    }

    async fn latest_answer(&self, thread_id: &str) -> Result<Option<String>, BackendError> {
        let body: Value = self
            .get(&format!("/threads/{thread_id}/messages?order=desc&limit=20"))
            .await?;
        Ok(first_assistant_text(&body))
    }

    async fn delete(&self, resource: &Resource) -> Result<(), BackendError> {
        let path = match resource {
            Resource::File(id) => format!("/files/{id}"),
            Resource::VectorStore(id) => format!("/vector_stores/{id}"),
            Resource::Assistant(id) => format!("/assistants/{id}"),
            Resource::Thread(id) => format!("/threads/{id}"),
        };
        let resp = self
            .authed(self.client.delete(self.url(&path)))
            .send()
            .await
            .map_err(http::send_error(SERVICE))?;
        http::ensure_success(SERVICE, resp).await.map(|_| ())
    }
}

// ── Backend ──────────────────────────────────────────────────────────────

/// The `openai` backend.
pub struct FileSearchBackend<A = OpenAiFiles> {
    api: A,
    config: FileSearchConfig,
}

impl FileSearchBackend<OpenAiFiles> {
    /// Fails with [`ParseError::MissingCredential`] when no key is set.
    pub fn new(config: FileSearchConfig) -> Result<Self, ParseError> {
        let api = OpenAiFiles::new(&config)?;
        Ok(Self { api, config })
    }
}

/// Lenient read of an assistant answer: anything that is not the expected
/// JSON becomes the text.
fn answer_or_text(raw: String) -> StructuredAnswer {
    postprocess::parse_structured_answer(&raw).unwrap_or(StructuredAnswer {
        text_content: raw,
        tables: Vec::new(),
    })
}

impl<A: FileSearchApi> FileSearchBackend<A> {
    pub fn with_api(api: A, config: FileSearchConfig) -> Self {
        Self { api, config }
    }

    async fn index(&self, upload: &PdfUpload, scope: &mut Scope) -> Result<String, BackendError> {
        let api = &self.api;
        let policy = &self.config.retry;

        let file_id = retry(policy, "file upload", move |_| api.upload_file(upload)).await?;
        scope.track(Resource::File(file_id.clone()));

        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let name = format!("pdf_analysis_{ts}");
        let name = name.as_str();
        let store_id = retry(policy, "vector store", move |_| api.create_vector_store(name)).await?;
        scope.track(Resource::VectorStore(store_id.clone()));

        let (store, file) = (store_id.as_str(), file_id.as_str());
        retry(policy, "attach file", move |_| api.attach_file(store, file)).await?;
        Poller::new(SERVICE, format!("indexing {file}"), self.config.index_poll)
            .run(|| api.file_status(store, file))
            .await?;
        info!("{} indexed into {store_id}", upload.file_name);
        Ok(store_id)
    }

    async fn via_responses(&self, store: &str) -> Result<StructuredAnswer, BackendError> {
        let api = &self.api;
        retry(&self.config.retry, "structured extraction", move |_| async move {
            let raw = api.respond(store).await?;
            postprocess::parse_structured_answer(&raw)
        })
        .await
    }

    async fn via_assistant(&self, store: &str, scope: &mut Scope) -> Result<StructuredAnswer, BackendError> {
        let api = &self.api;
        let policy = &self.config.retry;

        let assistant_id = retry(policy, "create assistant", move |_| api.create_assistant(store)).await?;
        scope.track(Resource::Assistant(assistant_id.clone()));
        let thread_id = retry(policy, "create thread", move |_| api.create_thread()).await?;
        scope.track(Resource::Thread(thread_id.clone()));

        let (assistant, thread) = (assistant_id.as_str(), thread_id.as_str());
        retry(policy, "add message", move |_| {
            api.add_message(thread, prompts::FILE_SEARCH_USER_PROMPT)
        })
        .await?;
        let run_id = retry(policy, "start run", move |_| api.start_run(thread, assistant)).await?;
        let run = run_id.as_str();

        let outcome = Poller::new(SERVICE, format!("run {run}"), self.config.run_poll)
            .run(|| api.run_status(thread, run))
            .await;
        match outcome {
            Ok(()) => {
                let raw = retry(policy, "read answer", move |_| api.latest_answer(thread))
                    .await?
                    .unwrap_or_default();
                Ok(answer_or_text(raw))
            }
            Err(e @ BackendError::Timeout { .. }) => {
                warn!("{e}; using the partial answer in {thread}");
                match api.latest_answer(thread).await {
                    Ok(Some(raw)) => Ok(answer_or_text(raw)),
                    Ok(None) => Ok(StructuredAnswer::default()),
                    Err(read) => {
                        warn!("could not read partial answer: {read}");
                        Ok(StructuredAnswer::default())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn extract(&self, upload: &PdfUpload, scope: &mut Scope) -> Result<StructuredAnswer, BackendError> {
        let store = self.index(upload, scope).await?;
        match self.config.mode {
            FileSearchMode::Responses => self.via_responses(&store).await,
            FileSearchMode::Assistant => self.via_assistant(&store, scope).await,
        }
    }
}

#[async_trait]
impl<A: FileSearchApi> Backend for FileSearchBackend<A> {
    type Raw = StructuredAnswer;

    fn name(&self) -> &'static str {
        "openai"
    }

    async fn load_one(&self, path: &Path) -> Result<StructuredAnswer, BackendError> {
        let upload = input::read_pdf(path).await?;
        let mut scope = Scope::new();
        let result = self.extract(&upload, &mut scope).await;
        scope.release(&self.api).await;
        result
    }

    async fn export(&self, raw: StructuredAnswer, modalities: &Modalities) -> Result<ParserOutput, ParseError> {
        let text = if modalities.text() {
            TextElement::new(raw.text_content)
        } else {
            TextElement::default()
        };

        let mut tables = Vec::new();
        if modalities.tables() {
            for (idx, t) in raw.tables.iter().enumerate() {
                let markdown = postprocess::clean_table_markdown(&t.markdown);
                let df = match table::parse_markdown_table(&markdown) {
                    Ok(df) => df,
                    Err(e) => {
                        warn!("openai: skipping table {idx}: {e}");
                        continue;
                    }
                };
                let bbox = t.bbox.as_deref().map(BoundingBox::from_slice).unwrap_or_default();
                let metadata = Metadata::new(t.page_or(1), bbox);
                match TableElement::new(markdown, df, metadata) {
                    Ok(el) => tables.push(el),
                    Err(e) => warn!("openai: skipping table {idx}: {e}"),
                }
            }
        }
        ParserOutput::new(text, tables, Vec::new())
    }
}
