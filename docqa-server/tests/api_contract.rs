use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docqa_rag::parser::{PageExtractor, ParsedPdf, number_pages, title_from_file_name};
use docqa_rag::{
    FlatVectorIndex, GenerationRequest, HashingEmbeddingProvider, LlmProvider, LocalObjectStore,
    RagConfig, RagError, RagPipeline, Result,
};
use docqa_server::{AppState, app_router};
use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};

const DIM: usize = 256;
const PAGE: &str = "Retrieval systems split documents into chunks before embedding them for search.";

struct TextPages;

#[async_trait]
impl PageExtractor for TextPages {
    async fn extract(&self, bytes: Vec<u8>, file_name: &str) -> Result<ParsedPdf> {
        let text = String::from_utf8(bytes).map_err(|e| RagError::ParseError(e.to_string()))?;
        let pages = number_pages(text.split('\x0c').map(str::to_string).collect());
        Ok(ParsedPdf { title: title_from_file_name(file_name), page_count: pages.len(), pages })
    }
}

struct FixedLlm {
    fail: bool,
}

#[async_trait]
impl LlmProvider for FixedLlm {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        if self.fail {
            return Err(RagError::LlmError { provider: "fixed".into(), message: "quota".into() });
        }
        Ok("general guidance".into())
    }
}

struct TestServer {
    base: String,
    handle: tokio::task::JoinHandle<()>,
    _dir: tempfile::TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn spawn_server(fail_llm: bool) -> TestServer {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = RagConfig::builder()
        .embedding_dimension(DIM)
        .llm_max_attempts(1)
        .build()
        .expect("config");
    let pipeline = RagPipeline::builder()
        .config(config)
        .embedding_provider(Arc::new(HashingEmbeddingProvider::new(DIM)))
        .vector_index(Arc::new(FlatVectorIndex::in_memory(DIM)))
        .llm(Arc::new(FixedLlm { fail: fail_llm }))
        .retry_backoff(Duration::from_millis(1))
        .object_store(Arc::new(LocalObjectStore::new(dir.path().join("uploads"))))
        .page_extractor(Arc::new(TextPages))
        .build()
        .expect("pipeline");

    let app = app_router(AppState::new(Arc::new(pipeline)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server run");
    });
    TestServer { base: format!("http://{addr}"), handle, _dir: dir }
}

fn pdf_form(file_name: &str, body: &str) -> Form {
    Form::new().part("file", Part::bytes(body.as_bytes().to_vec()).file_name(file_name.to_string()))
}

async fn json_body(response: reqwest::Response) -> Value {
    response.json().await.expect("json body")
}

#[tokio::test]
async fn greeting_and_health() {
    let server = spawn_server(false).await;
    let client = reqwest::Client::new();

    let root = client.get(format!("{}/", server.base)).send().await.expect("root");
    assert!(root.status().is_success());
    assert_eq!(json_body(root).await, json!({ "msg": "Welcome!!!" }));

    let health = client.get(format!("{}/health", server.base)).send().await.expect("health");
    assert_eq!(json_body(health).await, json!({ "status": "ok", "service": "docqa" }));
}

#[tokio::test]
async fn document_lifecycle() {
    let server = spawn_server(false).await;
    let client = reqwest::Client::new();

    let upload = client
        .post(format!("{}/upload", server.base))
        .multipart(pdf_form("guide.pdf", PAGE))
        .send()
        .await
        .expect("upload");
    assert_eq!(upload.status(), 200);
    let body = json_body(upload).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["message"], json!("File guide.pdf uploaded and indexed successfully"));
    assert_eq!(body["document_id"], json!(1));

    let listed = client.get(format!("{}/documents", server.base)).send().await.expect("list");
    let listed = json_body(listed).await;
    assert_eq!(listed["documents"].as_array().map(Vec::len), Some(1));

    let one = client.get(format!("{}/documents/1", server.base)).send().await.expect("get");
    let one = json_body(one).await;
    assert_eq!(one["document"]["title"], json!("guide"));
    assert_eq!(one["document"]["indexed"], json!(true));
    assert_eq!(one["document"]["chunks"][0]["page_number"], json!(1));

    let search = client
        .post(format!("{}/search", server.base))
        .json(&json!({ "query": PAGE, "detail_level": "detailed" }))
        .send()
        .await
        .expect("search");
    assert_eq!(search.status(), 200);
    let result = json_body(search).await;
    assert_eq!(result["response_type"], json!("direct"));
    assert_eq!(result["used_llm"], json!(false));
    assert_eq!(result["detail_level"], json!("detailed"));
    assert_eq!(result["response"], json!(PAGE));
    assert_eq!(result["results"][0]["metadata"]["document_title"], json!("guide"));

    let stats = client.get(format!("{}/stats", server.base)).send().await.expect("stats");
    let stats = json_body(stats).await;
    assert_eq!(stats["documents_count"], json!(1));
    assert_eq!(stats["indexed_vectors"], json!(2));

    let deleted =
        client.delete(format!("{}/documents/1", server.base)).send().await.expect("delete");
    assert_eq!(json_body(deleted).await, json!({ "success": true, "document_id": 1 }));

    let gone = client.get(format!("{}/documents/1", server.base)).send().await.expect("get");
    assert_eq!(gone.status(), 404);
    assert_eq!(json_body(gone).await, json!({ "error": "Document not found" }));

    let gone = client.delete(format!("{}/documents/1", server.base)).send().await.expect("delete");
    assert_eq!(gone.status(), 404);
}

#[tokio::test]
async fn upload_rejections() {
    let server = spawn_server(false).await;
    let client = reqwest::Client::new();
    let upload = |form: Form| client.post(format!("{}/upload", server.base)).multipart(form).send();

    let no_part = upload(Form::new().text("note", "hello")).await.expect("upload");
    assert_eq!(no_part.status(), 400);
    assert_eq!(json_body(no_part).await, json!({ "error": "No file part" }));

    let unnamed = upload(pdf_form("", PAGE)).await.expect("upload");
    assert_eq!(unnamed.status(), 400);
    assert_eq!(json_body(unnamed).await, json!({ "error": "No selected file" }));

    let text = upload(pdf_form("notes.txt", PAGE)).await.expect("upload");
    assert_eq!(text.status(), 400);
    assert_eq!(json_body(text).await, json!({ "error": "Only PDF files are allowed" }));

    let stats = client.get(format!("{}/stats", server.base)).send().await.expect("stats");
    assert_eq!(json_body(stats).await["documents_count"], json!(0));
}

#[tokio::test]
async fn search_rejections() {
    let server = spawn_server(false).await;
    let client = reqwest::Client::new();
    let url = format!("{}/search", server.base);

    for body in [json!({ "query": "   " }), json!({})] {
        let response = client.post(&url).json(&body).send().await.expect("search");
        assert_eq!(response.status(), 400);
        assert_eq!(json_body(response).await, json!({ "error": "Query is required" }));
    }

    let bad_level = client
        .post(&url)
        .json(&json!({ "query": "hello", "detail_level": "verbose" }))
        .send()
        .await
        .expect("search");
    assert_eq!(bad_level.status(), 400);

    let not_json = client
        .post(&url)
        .header("content-type", "application/json")
        .body("not json")
        .send()
        .await
        .expect("search");
    assert_eq!(not_json.status(), 400);
    assert!(json_body(not_json).await["error"].is_string());
}

#[tokio::test]
async fn fallback_answers_and_provider_failures() {
    let server = spawn_server(false).await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/search", server.base))
        .json(&json!({ "query": "What is a vector index?" }))
        .send()
        .await
        .expect("search");
    let result = json_body(response).await;
    assert_eq!(result["response_type"], json!("fallback"));
    assert_eq!(result["response"], json!("general guidance"));
    assert_eq!(result["detail_level"], json!("medium"));

    let failing = spawn_server(true).await;
    let response = client
        .post(format!("{}/search", failing.base))
        .json(&json!({ "query": "What is a vector index?" }))
        .send()
        .await
        .expect("search");
    assert_eq!(response.status(), 500);
    assert_eq!(json_body(response).await, json!({ "error": "LLM error (fixed): quota" }));
}
