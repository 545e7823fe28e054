use async_trait::async_trait;
use folio_core::{Event, FolioResult, GenerationRequest, Role, TextGenerator};
use std::sync::Arc;
use tracing::warn;

/// Longest excerpt kept per event by [`DigestSummarizer`].
const EXCERPT_CHARS: usize = 160;

/// Collapses a window of older events into one summary text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, events: &[Event]) -> FolioResult<String>;
}

/// Offline summarizer: one truncated line per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestSummarizer;

impl DigestSummarizer {
    pub fn digest(events: &[Event]) -> String {
        let mut out = format!("Summary of {} earlier events:", events.len());
        for ev in events {
            let role = match ev.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
            };
            let line = ev.content.replace('\n', " ");
            let excerpt: String = line.chars().take(EXCERPT_CHARS).collect();
            let ellipsis = if line.chars().count() > EXCERPT_CHARS { "..." } else { "" };
            out.push_str(&format!("\n- {role} ({}): {excerpt}{ellipsis}", ev.author));
        }
        out
    }
}

#[async_trait]
impl Summarizer for DigestSummarizer {
    async fn summarize(&self, events: &[Event]) -> FolioResult<String> {
        Ok(Self::digest(events))
    }
}

/// Summarizer that asks a text generator, falling back to the digest when the
/// generator fails.
pub struct GeneratorSummarizer {
    generator: Arc<dyn TextGenerator>,
}

impl GeneratorSummarizer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Summarizer for GeneratorSummarizer {
    async fn summarize(&self, events: &[Event]) -> FolioResult<String> {
        let request = GenerationRequest::new(
            "MemoryCompactor",
            "Condense the conversation excerpt into a short factual summary. Keep names, \
             risk tolerance, time horizon, goals, holdings and any approved strategy.",
            DigestSummarizer::digest(events),
        );
        match self.generator.generate(&request).await {
            Ok(text) if !text.trim().is_empty() => Ok(text),
            Ok(_) => Ok(DigestSummarizer::digest(events)),
            Err(e) => {
                warn!(error = %e, "Summary generation failed, using digest");
                Ok(DigestSummarizer::digest(events))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use folio_core::FolioError;

    struct Failing;

    #[async_trait]
    impl TextGenerator for Failing {
        async fn generate(&self, _request: &GenerationRequest) -> FolioResult<String> {
            Err(FolioError::Capability("offline".into()))
        }
    }

    #[tokio::test]
    async fn test_digest_lists_each_event() {
        let events = vec![Event::user("I am Ada"), Event::assistant("ClientAdvisor", "Welcome")];
        let text = DigestSummarizer.summarize(&events).await.unwrap();
        assert!(text.starts_with("Summary of 2 earlier events:"));
        assert!(text.contains("- user (user): I am Ada"));
        assert!(text.contains("- assistant (ClientAdvisor): Welcome"));
    }

    #[tokio::test]
    async fn test_digest_truncates_long_content() {
        let long = "x".repeat(500);
        let text = DigestSummarizer::digest(&[Event::user(long)]);
        assert!(text.ends_with("..."));
        assert!(text.len() < 300);
    }

    #[tokio::test]
    async fn test_generator_failure_falls_back_to_digest() {
        let summarizer = GeneratorSummarizer::new(Arc::new(Failing));
        let text = summarizer.summarize(&[Event::user("hello")]).await.unwrap();
        assert!(text.starts_with("Summary of 1 earlier events:"));
    }
}
