#![allow(dead_code)]

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use agentgate::config::{Config, ImageConfig, WebConfig};
use agentgate::scope::Roots;
use agentgate::tools::ToolCtx;

pub struct TestWorkspace {
    // Keep TempDir alive so dirs aren't deleted until struct drop
    _tmp: TempDir,
    pub root: PathBuf,
    pub additional: Option<PathBuf>,
}

impl TestWorkspace {
    /// Workspace root only.
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let root = tmp.path().join("project");
        std::fs::create_dir_all(&root).unwrap();
        Self {
            _tmp: tmp,
            root,
            additional: None,
        }
    }

    /// Workspace plus an additional root named `shared`.
    pub fn with_additional() -> Self {
        let mut ws = Self::new();
        let add = ws.root.parent().unwrap().join("shared");
        std::fs::create_dir_all(&add).unwrap();
        ws.additional = Some(add);
        ws
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn roots(&self) -> Roots {
        let roots = Roots::new(&self.root);
        match &self.additional {
            Some(add) => roots.with_additional(add),
            None => roots,
        }
    }

    pub fn ctx(&self) -> ToolCtx {
        ToolCtx::new(self.roots())
    }

    /// Write `content` at `rel` under the workspace, creating parents.
    pub fn write(&self, rel: &str, content: &str) {
        write_under(&self.root, rel, content);
    }

    /// Write `content` at `rel` under the additional root.
    pub fn write_additional(&self, rel: &str, content: &str) {
        let add = self.additional.as_ref().expect("no additional root");
        write_under(add, rel, content);
    }

    pub fn config(&self) -> Config {
        Config {
            workspace: Some(self.root.to_string_lossy().to_string()),
            additional_root: self
                .additional
                .as_ref()
                .map(|a| a.to_string_lossy().to_string()),
            ..Config::default()
        }
    }
}

fn write_under(base: &Path, rel: &str, content: &str) {
    let p = base.join(rel);
    if let Some(parent) = p.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(p, content).unwrap();
}

pub struct MockGoogle {
    pub server: MockServer,
}

impl MockGoogle {
    pub async fn new() -> Self {
        let server = MockServer::start().await;
        Self { server }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/customsearch/v1", self.server.uri())
    }

    /// Mount a mock for the search endpoint answering `q` with `body`.
    pub async fn mock_search(&self, q: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/customsearch/v1"))
            .and(query_param("q", q))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_error(&self, status: u16, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/customsearch/v1"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Config for `ws` with Google search pointed at this server.
    pub fn config_for(&self, ws: &TestWorkspace) -> Config {
        Config {
            web: Some(WebConfig {
                google_api_key: Some("test_key".to_string()),
                google_cx: Some("test_cx".to_string()),
                endpoint: Some(self.endpoint()),
            }),
            ..ws.config()
        }
    }
}

/// OpenAI-style `/images/generations` endpoint.
pub struct MockImageApi {
    pub server: MockServer,
}

impl MockImageApi {
    pub const KEY: &'static str = "test_image_key";

    pub async fn new() -> Self {
        let server = MockServer::start().await;
        Self { server }
    }

    /// Answer prompt `prompt` with one base64 image and an optional revised prompt.
    pub async fn mock_image(&self, prompt: &str, b64: &str, revised: Option<&str>) {
        let mut item = serde_json::json!({ "b64_json": b64 });
        if let Some(r) = revised {
            item["revised_prompt"] = serde_json::Value::from(r);
        }
        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .and(header("authorization", format!("Bearer {}", Self::KEY).as_str()))
            .and(body_partial_json(serde_json::json!({
                "prompt": prompt,
                "response_format": "b64_json"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "created": 1,
                "data": [item]
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_error(&self, status: u16, body: &str) {
        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    /// Config for `ws` with image generation pointed at this server.
    pub fn config_for(&self, ws: &TestWorkspace) -> Config {
        Config {
            image: Some(ImageConfig {
                api_base: Some(self.server.uri()),
                api_key: Some(Self::KEY.to_string()),
                model: Some("test-model".to_string()),
            }),
            ..ws.config()
        }
    }
}
