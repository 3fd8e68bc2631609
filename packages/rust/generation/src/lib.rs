//! Study-guide and mind-map generation from transcripts.
//!
//! [`ContentGenerator`] owns the prompts and truncation limits and runs each
//! provider call under its own retry policy. Content generation is fatal to
//! a job on failure; diagram generation is best-effort and yields `None`.

mod provider;

use std::sync::Arc;

use tracing::{info, instrument, warn};

use tubewiki_executor::{RetryPolicy, retry_with_backoff};
use tubewiki_shared::{ErrorKind, Result, TubeWikiError};

pub use provider::{ChatCompletionsProvider, GenerationProvider, GenerationRequest};

/// Failure kinds retried for generation calls.
pub const GENERATION_RETRYABLE: &[ErrorKind] =
    &[ErrorKind::Generation, ErrorKind::Network, ErrorKind::Timeout];

pub const DEFAULT_MAX_TRANSCRIPT_CHARS: usize = 15_000;
pub const DEFAULT_MAX_DIAGRAM_CHARS: usize = 5_000;

const CONTENT_TEMPERATURE: f32 = 0.7;
const DIAGRAM_TEMPERATURE: f32 = 0.2;

const CONTENT_SYSTEM: &str =
    "You are a helpful assistant. You output in the same language as the input text.";

const CONTENT_INSTRUCTIONS: &str = "\
You are an expert study assistant. Create a comprehensive study guide from the following YouTube transcript.
The output must be in Markdown format.

IMPORTANT: Output in the same language as the transcript.

Structure:
# Title
## Summary
(Provide a detailed and comprehensive summary of the video content, capturing the main narrative and arguments.)

## Key Concepts
(List the most important concepts, terms, and ideas discussed. Use bullet points with brief explanations for each.)

## Detailed Notes
(Provide an in-depth explanation of the content, organized by logical sections or topics. Include specific examples and details mentioned in the video.)

## Quiz
(Create 3 multiple choice or short answer questions to test understanding.
Format:
**Q1:** [Question]
**A:** [Answer]
)

Transcript:
";

const DIAGRAM_SYSTEM: &str = "You are a helpful assistant.";

const DIAGRAM_INSTRUCTIONS: &str = "\
Create a Mermaid.js diagram code that visualizes the key concepts from the following study guide.

RULES:
1. Return ONLY the mermaid code block. Do not include markdown backticks (```).
2. Use `graph TD` (Top-Down) orientation.
3. Use alphanumeric node IDs (e.g., A, B, C) and put the text in quotes (e.g., A[\"Text\"]).
4. DO NOT use special characters or spaces in node IDs.
5. Ensure the graph syntax is valid.
6. The text inside quotes should be in the same language as the study guide.

Example:
graph TD
A[\"Main Concept\"] --> B[\"Sub Concept 1\"]
A --> C[\"Sub Concept 2\"]

Study Guide:
";

/// Longest prefix of `s` holding at most `max` characters.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Remove a surrounding ``` fence (with optional language tag) from model
/// output.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => "",
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Prompting and retry wrapper around a [`GenerationProvider`].
#[derive(Clone)]
pub struct ContentGenerator {
    provider: Arc<dyn GenerationProvider>,
    content_policy: RetryPolicy,
    diagram_policy: RetryPolicy,
    max_transcript_chars: usize,
    max_diagram_chars: usize,
}

impl ContentGenerator {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        content_policy: RetryPolicy,
        diagram_policy: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            content_policy,
            diagram_policy,
            max_transcript_chars: DEFAULT_MAX_TRANSCRIPT_CHARS,
            max_diagram_chars: DEFAULT_MAX_DIAGRAM_CHARS,
        }
    }

    /// Override the prompt truncation limits.
    pub fn with_limits(mut self, max_transcript_chars: usize, max_diagram_chars: usize) -> Self {
        self.max_transcript_chars = max_transcript_chars;
        self.max_diagram_chars = max_diagram_chars;
        self
    }

    /// Generate the Markdown study guide for a transcript.
    ///
    /// Transport failures that survive the retry budget are reported as
    /// [`TubeWikiError::Generation`]; configuration errors pass through.
    #[instrument(skip_all, fields(transcript_chars = transcript.chars().count()))]
    pub async fn generate_content(&self, transcript: &str) -> Result<String> {
        let request = GenerationRequest {
            system: CONTENT_SYSTEM.to_string(),
            user: format!(
                "{CONTENT_INSTRUCTIONS}{}",
                truncate_chars(transcript, self.max_transcript_chars)
            ),
            temperature: CONTENT_TEMPERATURE,
        };

        let content = retry_with_backoff(
            &self.content_policy,
            "generate_content",
            GENERATION_RETRYABLE,
            || self.provider.complete(&request),
        )
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::Network | ErrorKind::Timeout => TubeWikiError::Generation(e.to_string()),
            _ => e,
        })?;

        if content.trim().is_empty() {
            return Err(TubeWikiError::Generation("empty completion".into()));
        }

        info!(chars = content.chars().count(), "study guide generated");
        Ok(content)
    }

    /// Generate a Mermaid mind map for `content`. Returns `None` on any
    /// failure or an empty result.
    #[instrument(skip_all)]
    pub async fn generate_diagram(&self, content: &str) -> Option<String> {
        let request = GenerationRequest {
            system: DIAGRAM_SYSTEM.to_string(),
            user: format!(
                "{DIAGRAM_INSTRUCTIONS}{}",
                truncate_chars(content, self.max_diagram_chars)
            ),
            temperature: DIAGRAM_TEMPERATURE,
        };

        let result = retry_with_backoff(
            &self.diagram_policy,
            "generate_diagram",
            GENERATION_RETRYABLE,
            || self.provider.complete(&request),
        )
        .await;

        match result {
            Ok(raw) => {
                let diagram = strip_code_fence(&raw);
                (!diagram.is_empty()).then(|| diagram.to_string())
            }
            Err(e) => {
                warn!(error = %e, "diagram generation failed, continuing without it");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Provider replaying scripted results and recording requests.
    struct ScriptedProvider {
        results: Mutex<Vec<Result<String>>>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedProvider {
        fn new(results: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into_iter().rev().collect()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl GenerationProvider for ScriptedProvider {
        async fn complete(&self, request: &GenerationRequest) -> Result<String> {
            self.requests.lock().unwrap().push(request.clone());
            self.results
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(TubeWikiError::Generation("script exhausted".into())))
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_factor: 2.0,
            attempt_timeout: None,
        }
    }

    fn generator(provider: Arc<ScriptedProvider>) -> ContentGenerator {
        ContentGenerator::new(provider, policy(3), policy(2))
    }

    #[test]
    fn truncates_by_characters() {
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("hi", 10), "hi");
        assert_eq!(truncate_chars("日本語テキスト", 3), "日本語");
    }

    #[test]
    fn strips_fences() {
        assert_eq!(strip_code_fence("graph TD\nA --> B"), "graph TD\nA --> B");
        assert_eq!(
            strip_code_fence("```mermaid\ngraph TD\nA --> B\n```"),
            "graph TD\nA --> B"
        );
        assert_eq!(strip_code_fence("  ```\ngraph LR\n```  "), "graph LR");
        assert_eq!(strip_code_fence("```"), "");
    }

    #[tokio::test(start_paused = true)]
    async fn content_prompt_is_truncated() {
        let provider = ScriptedProvider::new(vec![Ok("# Guide".into())]);
        let generator = generator(provider.clone()).with_limits(5, 5000);

        let content = generator.generate_content("abcdefghij").await.unwrap();
        assert_eq!(content, "# Guide");

        let requests = provider.requests.lock().unwrap();
        assert!(requests[0].user.ends_with("Transcript:\nabcde"));
        assert_eq!(requests[0].temperature, CONTENT_TEMPERATURE);
    }

    #[tokio::test(start_paused = true)]
    async fn content_retries_generation_failures() {
        let provider = ScriptedProvider::new(vec![
            Err(TubeWikiError::Generation("HTTP 503".into())),
            Ok("# Guide".into()),
        ]);
        let content = generator(provider.clone())
            .generate_content("text")
            .await
            .unwrap();
        assert_eq!(content, "# Guide");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_network_failure_becomes_generation_error() {
        let provider = ScriptedProvider::new(vec![
            Err(TubeWikiError::Network("reset".into())),
            Err(TubeWikiError::Network("reset".into())),
            Err(TubeWikiError::Network("reset".into())),
        ]);
        let err = generator(provider.clone())
            .generate_content("text")
            .await
            .unwrap_err();
        assert!(matches!(err, TubeWikiError::Generation(_)));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_key_is_not_retried() {
        let provider = ScriptedProvider::new(vec![Err(TubeWikiError::config("no key"))]);
        let err = generator(provider.clone())
            .generate_content("text")
            .await
            .unwrap_err();
        assert!(matches!(err, TubeWikiError::Config { .. }));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_content_is_an_error() {
        let provider = ScriptedProvider::new(vec![Ok("  \n".into())]);
        let err = generator(provider).generate_content("text").await.unwrap_err();
        assert!(matches!(err, TubeWikiError::Generation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn diagram_failure_yields_none() {
        let provider = ScriptedProvider::new(vec![
            Err(TubeWikiError::Generation("boom".into())),
            Err(TubeWikiError::Generation("boom".into())),
        ]);
        assert_eq!(generator(provider.clone()).generate_diagram("# Guide").await, None);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn diagram_is_unfenced() {
        let provider =
            ScriptedProvider::new(vec![Ok("```mermaid\ngraph TD\nA[\"x\"] --> B\n```".into())]);
        let diagram = generator(provider.clone())
            .generate_diagram("# Guide")
            .await
            .unwrap();
        assert_eq!(diagram, "graph TD\nA[\"x\"] --> B");

        let requests = provider.requests.lock().unwrap();
        assert!(requests[0].user.ends_with("Study Guide:\n# Guide"));
        assert_eq!(requests[0].temperature, DIAGRAM_TEMPERATURE);
    }
}
