//! Cloud recognition using a vision model behind an OpenAI-compatible
//! `/chat/completions` endpoint (OpenAI itself, LiteLLM, Ollama, etc).
//!
//! [`CloudPageEngine`] is a drop-in [`RecognitionEngine`] for rasterized
//! pages. [`CloudDocumentExtractor`] skips local rasterization entirely and
//! asks the model for a finished [`ExtractedData`] record, which we then hold
//! to the same invariants as locally computed records.

use std::{env, time::Duration};

use leaky_bucket::RateLimiter;
use schemars::{JsonSchema, schema_for};
use serde::de::DeserializeOwned;
use tokio::time;

use crate::{
    aggregate::confidence_to_score,
    async_utils::io::read_json_or_toml,
    data_url::data_url,
    entities::Entities,
    errors::ExtractionError,
    pipeline::{DocumentExtractor, ExtractedData},
    prelude::*,
    rasterize::{PDF_MIME_TYPE, RasterPage, resolve_media_type},
    recognize::ProgressListener,
};

use super::{EngineOpts, PageRecognition, RecognitionEngine};

/// The model we use if none is specified.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// The API we talk to if `OPENAI_API_BASE` isn't set.
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// The default prompts, used if no prompt file is provided.
const DEFAULT_PROMPT: &str = include_str!("cloud/default_prompt.toml");

/// Prompts for the cloud engines.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloudPrompt {
    /// The developer (aka "system") message.
    pub developer: String,

    /// Instructions sent along with each page image.
    pub page: String,

    /// Instructions sent along with a whole document.
    pub document: String,
}

impl CloudPrompt {
    /// Load prompts from a TOML or JSON file, or use our built-in prompts.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => read_json_or_toml(path).await,
            None => Ok(Self::default()),
        }
    }
}

impl Default for CloudPrompt {
    fn default() -> Self {
        toml::from_str(DEFAULT_PROMPT).expect("failed to parse built-in cloud prompt")
    }
}

/// A minimal client for structured chat completions.
pub struct CloudClient {
    /// Our HTTP client.
    http: reqwest::Client,
    /// Base URL, without `/chat/completions`.
    api_base: String,
    /// Bearer token.
    api_key: String,
    /// The model to ask.
    model: String,
    /// Optional limit on how fast we send requests.
    rate_limiter: Option<RateLimiter>,
    /// Optional limit on how long each request may take.
    timeout: Option<Duration>,
}

impl CloudClient {
    /// Create a client configured from `OPENAI_API_BASE`, `OPENAI_API_KEY`
    /// and our command-line options.
    pub fn from_env(opts: &EngineOpts) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY must be set to use a cloud engine")?;
        let api_base =
            env::var("OPENAI_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_owned());
        Ok(Self {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_owned(),
            api_key,
            model: opts.model.clone(),
            rate_limiter: opts.rate_limit.as_ref().map(|rl| rl.to_rate_limiter()),
            timeout: opts.timeout(),
        })
    }

    /// Send instructions and an attachment of type `media_type`, and parse
    /// the model's JSON response as `T`. The JSON Schema for `T` is sent as the
    /// response format.
    #[instrument(level = "debug", skip_all, fields(model = %self.model, media_type = %media_type))]
    async fn complete_json<T>(
        &self,
        developer: &str,
        instructions: &str,
        media_type: &str,
        attachment_url: String,
    ) -> Result<T>
    where
        T: DeserializeOwned + JsonSchema,
    {
        if let Some(rate_limiter) = &self.rate_limiter {
            rate_limiter.acquire_one().await;
        }

        let body = chat_request_body::<T>(
            &self.model,
            developer,
            instructions,
            media_type,
            attachment_url,
        )?;
        let request = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();
        let response = match self.timeout {
            Some(timeout) => time::timeout(timeout, request)
                .await
                .map_err(|_| anyhow!("cloud request timed out after {:?}", timeout))?,
            None => request.await,
        }
        .context("cloud request failed")?
        .error_for_status()
        .context("cloud request returned an error status")?;

        let completion = response
            .json::<ChatCompletion>()
            .await
            .context("could not parse chat completion")?;
        parse_completion_content(completion)
    }
}

/// The filename we give PDFs sent as `file` parts.
const PDF_FILENAME: &str = "document.pdf";

/// Build the message part carrying our attachment. Endpoints only accept
/// images in `image_url` parts, so PDFs go in a `file` part instead.
fn attachment_part(media_type: &str, attachment_url: String) -> Value {
    if media_type == PDF_MIME_TYPE {
        json!({
            "type": "file",
            "file": { "filename": PDF_FILENAME, "file_data": attachment_url },
        })
    } else {
        json!({ "type": "image_url", "image_url": { "url": attachment_url } })
    }
}

/// Build a `/chat/completions` request asking for JSON matching `T`.
fn chat_request_body<T: JsonSchema>(
    model: &str,
    developer: &str,
    instructions: &str,
    media_type: &str,
    attachment_url: String,
) -> Result<Value> {
    let mut schema =
        serde_json::to_value(schema_for!(T)).context("could not serialize schema")?;
    if let Some(schema) = schema.as_object_mut() {
        schema.remove("$schema");
    }
    let name = schema
        .get("title")
        .and_then(|title| title.as_str())
        .unwrap_or("ResponseFormat")
        .to_owned();
    Ok(json!({
        "model": model,
        "messages": [
            { "role": "system", "content": developer },
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": instructions },
                    attachment_part(media_type, attachment_url),
                ],
            },
        ],
        "response_format": {
            "type": "json_schema",
            "json_schema": { "name": name, "schema": schema },
        },
        "store": false,
    }))
}

/// The parts of a chat completion response we care about.
#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Pull the JSON content out of a completion.
fn parse_completion_content<T: DeserializeOwned>(completion: ChatCompletion) -> Result<T> {
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no choices in chat completion"))?;
    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Err(anyhow!(
            "content filter triggered (may also be a RECITATION error for Gemini models)"
        ));
    }
    let content = choice
        .message
        .content
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| anyhow!("no response from cloud model"))?;
    trace!(%content, "Cloud response");
    serde_json::from_str(&content)
        .with_context(|| format!("error parsing cloud response content: {:?}", content))
}

/// What we ask the model for, for each page.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct PageResponse {
    /// The complete text of the page.
    text: String,

    /// Confidence in the transcription, from 0 to 100.
    confidence: f64,
}

/// Recognize pages with a cloud model.
pub struct CloudPageEngine {
    client: CloudClient,
    prompt: CloudPrompt,
}

impl CloudPageEngine {
    /// Create a new cloud page engine.
    pub fn new(client: CloudClient, prompt: CloudPrompt) -> Self {
        Self { client, prompt }
    }
}

#[async_trait]
impl RecognitionEngine for CloudPageEngine {
    #[instrument(level = "debug", skip_all, fields(page_index = page.page_index))]
    async fn recognize(&self, page: RasterPage) -> Result<PageRecognition> {
        let url = data_url(&page.mime_type, &page.data);
        let response = self
            .client
            .complete_json::<PageResponse>(
                &self.prompt.developer,
                &self.prompt.page,
                &page.mime_type,
                url,
            )
            .await?;
        Ok(PageRecognition {
            text: response.text,
            confidence: response.confidence.clamp(0.0, 100.0),
        })
    }
}

/// What we ask the model for, for a whole document. This mirrors
/// [`ExtractedData`], but we don't trust the model to uphold its invariants.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct DocumentResponse {
    /// The full verbatim text, preserving layout with newlines.
    raw_text: String,

    /// A 2-3 sentence executive summary.
    #[serde(default)]
    summary: String,

    /// Dates, names and case numbers found in the document.
    #[serde(default)]
    entities: Entities,

    /// Legibility of the document, from 0 to 100.
    confidence_score: f64,
}

impl DocumentResponse {
    /// Convert into a record which obeys the same rules as a local one.
    fn into_extracted_data(self) -> Result<ExtractedData, ExtractionError> {
        let raw_text = self.raw_text.trim().to_owned();
        if raw_text.is_empty() {
            return Err(ExtractionError::EmptyDocument);
        }
        Ok(ExtractedData {
            raw_text,
            summary: self.summary.trim().to_owned(),
            entities: self.entities.normalized(),
            confidence_score: confidence_to_score(self.confidence_score),
        })
    }
}

/// Extract a whole document with a single cloud request.
pub struct CloudDocumentExtractor {
    client: CloudClient,
    prompt: CloudPrompt,
}

impl CloudDocumentExtractor {
    /// Create a new cloud document extractor.
    pub fn new(client: CloudClient, prompt: CloudPrompt) -> Self {
        Self { client, prompt }
    }
}

#[async_trait]
impl DocumentExtractor for CloudDocumentExtractor {
    #[instrument(level = "debug", skip_all, fields(media_type = %media_type))]
    async fn extract(
        &self,
        data: Vec<u8>,
        media_type: &str,
        progress: &dyn ProgressListener,
    ) -> Result<ExtractedData, ExtractionError> {
        let media_type =
            resolve_media_type(media_type, &data).map_err(ExtractionError::rasterization)?;
        let url = data_url(&media_type, &data);
        drop(data);

        // The whole document is a single unit of recognition work.
        let response = self
            .client
            .complete_json::<DocumentResponse>(
                &self.prompt.developer,
                &self.prompt.document,
                &media_type,
                url,
            )
            .await
            .map_err(|source| ExtractionError::Recognition {
                page_index: 1,
                source,
            })?;
        progress.page_recognized(1, 1.0);
        response.into_extracted_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prompt_parses() {
        let prompt = CloudPrompt::default();
        assert!(prompt.developer.contains("legal OCR"));
        assert!(prompt.document.contains("caseNumbers"));
    }

    #[test]
    fn request_body_includes_schema_and_attachment() -> Result<()> {
        let body = chat_request_body::<PageResponse>(
            "gpt-4o",
            "system",
            "transcribe",
            "image/png",
            "data:image/png;base64,AAAA".to_owned(),
        )?;
        assert_eq!(body["messages"][1]["content"][1]["type"], "image_url");
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(
            body["messages"][1]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
        let schema = &body["response_format"]["json_schema"]["schema"];
        assert!(schema.get("$schema").is_none());
        assert!(schema["properties"].get("confidence").is_some());
        assert_eq!(body["response_format"]["json_schema"]["name"], "PageResponse");
        Ok(())
    }

    #[test]
    fn request_body_sends_pdfs_as_files() -> Result<()> {
        let body = chat_request_body::<DocumentResponse>(
            "gpt-4o",
            "system",
            "extract",
            "application/pdf",
            "data:application/pdf;base64,JVBERi0=".to_owned(),
        )?;
        let attachment = &body["messages"][1]["content"][1];
        assert_eq!(attachment["type"], "file");
        assert_eq!(attachment["file"]["filename"], "document.pdf");
        assert_eq!(
            attachment["file"]["file_data"],
            "data:application/pdf;base64,JVBERi0="
        );
        assert!(attachment.get("image_url").is_none());
        Ok(())
    }

    #[test]
    fn parses_completion_content() -> Result<()> {
        let completion: ChatCompletion = serde_json::from_value(json!({
            "choices": [{
                "message": { "content": "{\"text\": \"Hello\", \"confidence\": 91.5}" },
                "finish_reason": "stop",
            }],
        }))?;
        let page = parse_completion_content::<PageResponse>(completion)?;
        assert_eq!(page.text, "Hello");
        assert_eq!(page.confidence, 91.5);
        Ok(())
    }

    #[test]
    fn empty_or_filtered_completions_fail() -> Result<()> {
        let empty: ChatCompletion = serde_json::from_value(json!({
            "choices": [{ "message": { "content": null } }],
        }))?;
        assert!(parse_completion_content::<PageResponse>(empty).is_err());

        let filtered: ChatCompletion = serde_json::from_value(json!({
            "choices": [{
                "message": { "content": "{}" },
                "finish_reason": "content_filter",
            }],
        }))?;
        assert!(parse_completion_content::<PageResponse>(filtered).is_err());
        Ok(())
    }

    #[test]
    fn document_response_is_normalized() -> Result<()> {
        let response: DocumentResponse = serde_json::from_value(json!({
            "rawText": "  Case No. 12-345\n",
            "summary": "A filing. ",
            "entities": {
                "dates": ["January 5, 2024", "January 5, 2024"],
                "names": [
                    "A Aa", "B Bb", "C Cc", "D Dd", "E Ee", "F Ff",
                    "G Gg", "H Hh", "I Ii", "J Jj", "K Kk", "A Aa",
                ],
                "caseNumbers": ["Case No. 12-345"],
            },
            "confidenceScore": 87.6,
        }))?;
        let data = response.into_extracted_data()?;
        assert_eq!(data.raw_text, "Case No. 12-345");
        assert_eq!(data.summary, "A filing.");
        assert_eq!(data.entities.dates, vec!["January 5, 2024"]);
        assert_eq!(data.entities.names.len(), 10);
        assert_eq!(data.entities.names.last().map(String::as_str), Some("J Jj"));
        assert_eq!(data.confidence_score, 88);
        Ok(())
    }

    #[test]
    fn blank_document_response_is_empty_document() -> Result<()> {
        let response: DocumentResponse = serde_json::from_value(json!({
            "rawText": " \n ",
            "confidenceScore": 10,
        }))?;
        assert!(matches!(
            response.into_extracted_data(),
            Err(ExtractionError::EmptyDocument)
        ));
        Ok(())
    }
}
