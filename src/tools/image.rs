//! generate_image_tool: prompt → image file inside a root, via an [`ImageProvider`].

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::clamp::clamp_text;
use crate::config::ImageConfig;
use crate::scope::{self, Intent};
use crate::tools::args::{get_optional_string, get_string};
use crate::tools::context::ToolCtx;
use crate::tools::registry::{BoxFuture, Tool};
use crate::tools::result::Envelope;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "dall-e-3";
const DEFAULT_SIZE: &str = "1024x1024";
const DEFAULT_QUALITY: &str = "standard";
const QUALITIES: &[&str] = &["standard", "hd", "low", "medium", "high", "auto"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    pub size: String,
    pub quality: String,
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub revised_prompt: Option<String>,
}

/// Something that turns a prompt into encoded image bytes.
pub trait ImageProvider: Send + Sync {
    fn generate<'a>(&'a self, req: &'a ImageRequest) -> BoxFuture<'a, Result<GeneratedImage, String>>;
}

/// OpenAI-compatible `/images/generations` endpoint returning base64 data.
pub struct HttpImageProvider {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl HttpImageProvider {
    /// Provider for `cfg`, or `None` when no API key is configured.
    pub fn from_config(cfg: &ImageConfig, client: Client) -> Option<Self> {
        let api_key = cfg.api_key.as_deref().filter(|k| !k.is_empty())?;
        Some(Self {
            client,
            api_base: cfg
                .api_base
                .as_deref()
                .filter(|b| !b.is_empty())
                .unwrap_or(DEFAULT_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.to_string(),
            model: cfg.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }
}

impl ImageProvider for HttpImageProvider {
    fn generate<'a>(&'a self, req: &'a ImageRequest) -> BoxFuture<'a, Result<GeneratedImage, String>> {
        Box::pin(async move {
            let body = serde_json::json!({
                "model": self.model,
                "prompt": req.prompt,
                "size": req.size,
                "quality": req.quality,
                "n": 1,
                "response_format": "b64_json",
            });
            let res = self
                .client
                .post(format!("{}/images/generations", self.api_base))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| e.to_string())?;
            let status = res.status();
            let text = res.text().await.map_err(|e| e.to_string())?;
            if !status.is_success() {
                return Err(format!("image API error {}: {}", status, text.trim()));
            }
            let v: Value = serde_json::from_str(&text).map_err(|e| e.to_string())?;
            let first = v.pointer("/data/0").ok_or("image API returned no data")?;
            let b64 = first
                .get("b64_json")
                .and_then(Value::as_str)
                .ok_or("image API response has no b64_json")?;
            let bytes = BASE64
                .decode(b64.trim())
                .map_err(|e| format!("invalid image data: {e}"))?;
            Ok(GeneratedImage {
                bytes,
                revised_prompt: first
                    .get("revised_prompt")
                    .and_then(Value::as_str)
                    .map(String::from),
            })
        })
    }
}

fn valid_size(size: &str) -> bool {
    size == "auto"
        || size
            .split_once('x')
            .is_some_and(|(w, h)| w.parse::<u32>().is_ok() && h.parse::<u32>().is_ok())
}

pub struct GenerateImageTool {
    provider: Arc<dyn ImageProvider>,
}

impl GenerateImageTool {
    pub fn new(provider: Arc<dyn ImageProvider>) -> Self {
        Self { provider }
    }
}

impl Tool for GenerateImageTool {
    fn name(&self) -> &str {
        "generate_image_tool"
    }

    fn description(&self) -> &str {
        "Generate an image from a text prompt and save it to outputPath (a new file inside a root)."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string", "description": "Description of the image" },
                "outputPath": { "type": "string", "description": "Where to save the image, e.g. 'assets/logo.png'" },
                "size": { "type": "string", "description": "WIDTHxHEIGHT, e.g. 1024x1024" },
                "quality": { "type": "string", "description": "standard | hd | low | medium | high | auto" }
            },
            "required": ["prompt", "outputPath"]
        })
    }

    fn execute<'a>(&'a self, ctx: &'a ToolCtx, args: &'a Value) -> BoxFuture<'a, Envelope> {
        Box::pin(async move {
            let prompt = match get_string(args, "prompt") {
                Ok(p) if !p.trim().is_empty() => p,
                Ok(_) => return Envelope::error("prompt is empty"),
                Err(e) => return Envelope::error(e),
            };
            let output = match get_string(args, "outputPath") {
                Ok(p) => p,
                Err(e) => return Envelope::error(e),
            };
            let size = get_optional_string(args, "size").unwrap_or_else(|| DEFAULT_SIZE.into());
            if !valid_size(&size) {
                return Envelope::error(format!("invalid size '{size}'; expected WIDTHxHEIGHT"));
            }
            let quality = get_optional_string(args, "quality")
                .map(|q| q.to_ascii_lowercase())
                .unwrap_or_else(|| DEFAULT_QUALITY.into());
            if !QUALITIES.contains(&quality.as_str()) {
                return Envelope::error(format!("invalid quality '{quality}'"));
            }
            let resolved = match scope::resolve(&ctx.roots, &output, Intent::Write) {
                Ok(r) => r,
                Err(e) => return Envelope::error(e.to_string()),
            };
            if resolved.abs.exists() {
                return Envelope::error(format!("file already exists: {}", resolved.abs.display()));
            }

            let req = ImageRequest {
                prompt,
                size,
                quality,
            };
            let generated = tokio::select! {
                r = self.provider.generate(&req) => r,
                _ = ctx.cancel.cancelled() => Err("image generation canceled".to_string()),
            };
            let image = match generated {
                Ok(i) => i,
                Err(e) => return Envelope::error(clamp_text(&e, ctx.limits.stderr_clamp_chars).text),
            };

            let abs = &resolved.abs;
            if let Some(parent) = abs.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return Envelope::error(format!("failed to create directories: {e}"));
                }
            }
            let written = async {
                let mut f = tokio::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(abs)
                    .await?;
                f.write_all(&image.bytes).await?;
                f.flush().await
            };
            if let Err(e) = written.await {
                return Envelope::error(format!("failed to write image: {e}"));
            }
            tracing::info!(path = %abs.display(), bytes = image.bytes.len(), "image saved");

            let mut env = Envelope::ok()
                .with("path", abs.to_string_lossy().into_owned())
                .with("bytes", image.bytes.len())
                .with("size", req.size)
                .with("quality", req.quality);
            if let Some(revised) = image.revised_prompt {
                env = env.with("revisedPrompt", clamp_text(&revised, ctx.limits.stderr_clamp_chars).text);
            }
            env
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Roots;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FakeProvider {
        seen: Mutex<Vec<ImageRequest>>,
    }

    /// Answers with a fixed, oversized text on both paths.
    struct WordyProvider {
        fail: bool,
    }

    impl ImageProvider for WordyProvider {
        fn generate<'a>(&'a self, _req: &'a ImageRequest) -> BoxFuture<'a, Result<GeneratedImage, String>> {
            Box::pin(async move {
                let text = "z".repeat(50_000);
                if self.fail {
                    Err(format!("image API error 500: {text}"))
                } else {
                    Ok(GeneratedImage {
                        bytes: vec![1, 2, 3],
                        revised_prompt: Some(text),
                    })
                }
            })
        }
    }

    impl ImageProvider for FakeProvider {
        fn generate<'a>(&'a self, req: &'a ImageRequest) -> BoxFuture<'a, Result<GeneratedImage, String>> {
            self.seen.lock().unwrap().push(req.clone());
            Box::pin(async move {
                Ok(GeneratedImage {
                    bytes: b"\x89PNG fake".to_vec(),
                    revised_prompt: Some("a tidier cat".into()),
                })
            })
        }
    }

    fn tool() -> (GenerateImageTool, Arc<FakeProvider>) {
        let fake = Arc::new(FakeProvider {
            seen: Mutex::new(Vec::new()),
        });
        (GenerateImageTool::new(fake.clone()), fake)
    }

    #[tokio::test]
    async fn saves_image_inside_root() {
        let tmp = TempDir::new().unwrap();
        let ctx = ToolCtx::new(Roots::new(tmp.path()));
        let (tool, fake) = tool();
        let res = tool
            .execute(&ctx, &json!({ "prompt": "a cat", "outputPath": "img/cat.png" }))
            .await;
        assert!(res.ok, "{:?}", res.error);
        assert_eq!(res.get("bytes").unwrap(), 10);
        assert_eq!(res.get("revisedPrompt").unwrap(), "a tidier cat");
        assert_eq!(std::fs::read(tmp.path().join("img/cat.png")).unwrap(), b"\x89PNG fake");
        assert_eq!(fake.seen.lock().unwrap()[0].size, "1024x1024");
    }

    #[tokio::test]
    async fn rejects_escape_and_bad_size() {
        let tmp = TempDir::new().unwrap();
        let ctx = ToolCtx::new(Roots::new(tmp.path()));
        let (tool, fake) = tool();
        let res = tool
            .execute(&ctx, &json!({ "prompt": "x", "outputPath": "../out.png" }))
            .await;
        assert!(res.error.unwrap().contains("escapes"));
        let res = tool
            .execute(&ctx, &json!({ "prompt": "x", "outputPath": "o.png", "size": "huge" }))
            .await;
        assert!(!res.ok);
        assert!(fake.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn provider_text_is_clamped() {
        let tmp = TempDir::new().unwrap();
        let ctx = ToolCtx::new(Roots::new(tmp.path()));
        let limit = ctx.limits.stderr_clamp_chars;

        let tool = GenerateImageTool::new(Arc::new(WordyProvider { fail: true }));
        let res = tool
            .execute(&ctx, &json!({ "prompt": "x", "outputPath": "a.png" }))
            .await;
        let err = res.error.unwrap();
        assert!(err.starts_with("image API error 500"));
        assert!(err.chars().count() < 50_000);
        assert!(err.chars().count() <= limit + 100);

        let tool = GenerateImageTool::new(Arc::new(WordyProvider { fail: false }));
        let res = tool
            .execute(&ctx, &json!({ "prompt": "x", "outputPath": "b.png" }))
            .await;
        assert!(res.ok, "{:?}", res.error);
        let revised = res.get("revisedPrompt").unwrap().as_str().unwrap();
        assert!(revised.chars().count() <= limit + 100);
    }

    #[test]
    fn size_validation() {
        assert!(valid_size("1024x1024"));
        assert!(valid_size("auto"));
        assert!(!valid_size("1024"));
        assert!(!valid_size("axb"));
    }
}
