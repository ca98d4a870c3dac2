/// Retrieval-augmented generation of a single tender section.
///
/// Embeds a query built from the brief, retrieves same-section historical examples, composes
/// the prompt and generates with bounded retry. Every outcome is returned as a
/// `SectionResult`; nothing here aborts the document.
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tender_common::retry::RetryPolicy;
use tracing::{debug, info, warn};

use crate::error::{ProviderError, SectionGenerationFailure};
use crate::model::{ProjectBrief, RetrievedNeighbor, SectionId, SectionResult, SectionSpec};
use crate::prompt;
use crate::providers::{EmbeddingProvider, GenerationRequest, SimilarityIndex, TextGenerator};

/// Tunables for one section generation.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub top_k: usize,
    /// Neighbours scoring below this are left out of the prompt. `None` keeps everything.
    pub min_similarity: Option<f32>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Trimmed output shorter than this counts as a failed attempt.
    pub min_output_chars: usize,
    pub retry: RetryPolicy,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            top_k: 3,
            min_similarity: None,
            max_tokens: 2000,
            temperature: 0.7,
            min_output_chars: 40,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct SectionGenerator {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn SimilarityIndex>,
    generator: Arc<dyn TextGenerator>,
    settings: GenerationSettings,
}

impl SectionGenerator {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn SimilarityIndex>,
        generator: Arc<dyn TextGenerator>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            embedder,
            index,
            generator,
            settings,
        }
    }

    pub async fn generate(&self, spec: &SectionSpec, brief: &ProjectBrief) -> SectionResult {
        match self.try_generate(spec, brief).await {
            Ok((text, attempts)) => {
                info!(section = %spec.id, attempts, chars = text.len(), "section generated");
                SectionResult::success(spec.id, text, attempts)
            }
            Err(failure) => {
                warn!(section = %spec.id, attempts = failure.attempts, error = %failure.source, "section failed");
                failure.into()
            }
        }
    }

    async fn try_generate(
        &self,
        spec: &SectionSpec,
        brief: &ProjectBrief,
    ) -> Result<(String, u32), SectionGenerationFailure> {
        let query = prompt::query_text(spec, brief, self.embedder.max_input_chars());
        let vector = self
            .embedder
            .embed(&query)
            .await
            .map_err(|e| SectionGenerationFailure::new(spec.id, 0, e))?;

        let neighbors = self
            .index
            .query(&vector, self.settings.top_k, Some(spec.id))
            .await
            .map_err(|e| SectionGenerationFailure::new(spec.id, 0, e))?;
        let neighbors = self.apply_threshold(neighbors);

        let request = GenerationRequest {
            system: prompt::SYSTEM_PROMPT.to_string(),
            prompt: prompt::build_prompt(spec, brief, &neighbors),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };
        debug!(
            section = %spec.id,
            neighbors = neighbors.len(),
            prompt_chars = request.prompt.len(),
            "prompt composed"
        );

        self.generate_with_retry(spec.id, &request).await
    }

    fn apply_threshold(&self, neighbors: Vec<RetrievedNeighbor>) -> Vec<RetrievedNeighbor> {
        match self.settings.min_similarity {
            Some(min) => neighbors.into_iter().filter(|n| n.score >= min).collect(),
            None => neighbors,
        }
    }

    /// Up to `retry.max_attempts()` attempts, sleeping with backoff between them.
    async fn generate_with_retry(
        &self,
        section: SectionId,
        request: &GenerationRequest,
    ) -> Result<(String, u32), SectionGenerationFailure> {
        let max_attempts = self.settings.retry.max_attempts();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let error = match self.generator.generate(request).await {
                Ok(raw) => match self.accept(&raw) {
                    Ok(text) => return Ok((text, attempt)),
                    Err(e) => e,
                },
                Err(e) => e,
            };

            if attempt >= max_attempts {
                return Err(SectionGenerationFailure::new(section, attempt, error));
            }
            let delay = self.settings.retry.delay_after(attempt);
            warn!(
                %section,
                attempt,
                delay_ms = delay.as_millis(),
                error = %error,
                "generation failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn accept(&self, raw: &str) -> Result<String, ProviderError> {
        let text = clean_output(raw);
        let len = text.chars().count();
        let min = self.settings.min_output_chars.max(1);
        if len < min {
            return Err(ProviderError::Degenerate { len, min });
        }
        Ok(text)
    }
}

/// Trim surrounding whitespace and collapse runs of blank lines to a single blank line.
pub fn clean_output(raw: &str) -> String {
    static BLANK_RUNS: OnceLock<Regex> = OnceLock::new();
    let re = BLANK_RUNS.get_or_init(|| Regex::new(r"\n(?:[ \t]*\n){2,}").expect("valid regex"));
    re.replace_all(raw.trim(), "\n\n").into_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::model::{EmbeddingVector, SectionStatus};

    pub struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, text: &str) -> Result<EmbeddingVector, ProviderError> {
            assert!(!text.trim().is_empty());
            Ok(EmbeddingVector::new(vec![0.1, 0.2, 0.3]))
        }

        fn max_input_chars(&self) -> usize {
            8000
        }
    }

    pub struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<EmbeddingVector, ProviderError> {
            Err(ProviderError::Embedding("401 unauthorized".to_string()))
        }

        fn max_input_chars(&self) -> usize {
            8000
        }
    }

    /// Brute-force index over tagged texts; scores decrease with insertion order.
    pub struct MemoryIndex {
        rows: Vec<(SectionId, String)>,
        pub queries: Mutex<Vec<Option<SectionId>>>,
    }

    impl MemoryIndex {
        pub fn with_examples() -> Self {
            let mut rows = Vec::new();
            for spec in crate::model::SECTIONS.iter() {
                for n in 1..=4 {
                    rows.push((spec.id, format!("historical {} example {n}", spec.display_name)));
                }
            }
            Self {
                rows,
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SimilarityIndex for MemoryIndex {
        async fn query(
            &self,
            _vector: &EmbeddingVector,
            top_k: usize,
            section_filter: Option<SectionId>,
        ) -> Result<Vec<RetrievedNeighbor>, ProviderError> {
            self.queries.lock().unwrap().push(section_filter);
            let mut neighbors: Vec<RetrievedNeighbor> = self
                .rows
                .iter()
                .filter(|(s, _)| section_filter.map_or(true, |f| f == *s))
                .enumerate()
                .map(|(i, (s, text))| RetrievedNeighbor {
                    text: text.clone(),
                    section: *s,
                    score: 0.9 - 0.3 * i as f32,
                })
                .collect();
            crate::retrieval::rank(&mut neighbors, top_k);
            Ok(neighbors)
        }
    }

    pub struct FailingIndex;

    #[async_trait]
    impl SimilarityIndex for FailingIndex {
        async fn query(
            &self,
            _vector: &EmbeddingVector,
            _top_k: usize,
            _section_filter: Option<SectionId>,
        ) -> Result<Vec<RetrievedNeighbor>, ProviderError> {
            Err(ProviderError::Index("connection refused".to_string()))
        }
    }

    /// Fails `failures` times, then writes a section echoing the prompt's first line.
    pub struct FlakyGenerator {
        failures: u32,
        pub calls: AtomicU32,
        pub prompts: Mutex<Vec<String>>,
    }

    impl FlakyGenerator {
        pub fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for FlakyGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.prompts.lock().unwrap().push(request.prompt.clone());
            if call <= self.failures {
                return Err(ProviderError::Generation(format!("timeout on call {call}")));
            }
            Ok(format!(
                "\n\n  1. General\n\n\n\nThis section was drafted for: {}\n",
                request.prompt.lines().next().unwrap_or_default()
            ))
        }
    }

    /// Returns output too short to be a section.
    pub struct TerseGenerator;

    #[async_trait]
    impl TextGenerator for TerseGenerator {
        async fn generate(&self, _request: &GenerationRequest) -> Result<String, ProviderError> {
            Ok("  OK  ".to_string())
        }
    }

    /// Returns nothing but whitespace.
    pub struct BlankGenerator;

    #[async_trait]
    impl TextGenerator for BlankGenerator {
        async fn generate(&self, _request: &GenerationRequest) -> Result<String, ProviderError> {
            Ok("   \n\t\n".to_string())
        }
    }

    pub fn fast_settings(max_attempts: u32) -> GenerationSettings {
        GenerationSettings {
            retry: RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(2)),
            ..GenerationSettings::default()
        }
    }

    pub fn brief() -> ProjectBrief {
        ProjectBrief::new(
            "Municipal Road Resurfacing",
            "Springfield",
            "6 months",
            "Resurface 12km of arterial road including drainage upgrades.",
        )
    }

    fn section_generator(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn SimilarityIndex>,
        generator: Arc<dyn TextGenerator>,
        max_attempts: u32,
    ) -> SectionGenerator {
        SectionGenerator::new(embedder, index, generator, fast_settings(max_attempts))
    }

    #[tokio::test]
    async fn success_trims_and_uses_same_section_examples() {
        let index = Arc::new(MemoryIndex::with_examples());
        let generator = Arc::new(FlakyGenerator::new(0));
        let sg = section_generator(Arc::new(FixedEmbedder), index.clone(), generator.clone(), 3);

        let result = sg.generate(SectionId::ScopeOfWork.spec(), &brief()).await;
        assert_eq!(result.status(), SectionStatus::Success);
        assert_eq!(result.attempts(), 1);
        assert!(result.text().starts_with("1. General\n\nThis section"));
        assert!(!result.text().ends_with('\n'));

        assert_eq!(*index.queries.lock().unwrap(), vec![Some(SectionId::ScopeOfWork)]);
        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("historical SCOPE OF WORK example 1"));
        assert!(prompts[0].contains("Example 3:"));
        assert!(!prompts[0].contains("Example 4:"));
        assert!(!prompts[0].contains("PRICE BID example"));
    }

    #[tokio::test]
    async fn embedding_failure_short_circuits() {
        let generator = Arc::new(FlakyGenerator::new(0));
        let sg = section_generator(
            Arc::new(FailingEmbedder),
            Arc::new(MemoryIndex::with_examples()),
            generator.clone(),
            3,
        );

        let result = sg.generate(SectionId::PriceBid.spec(), &brief()).await;
        assert_eq!(result.status(), SectionStatus::Failed);
        assert_eq!(result.attempts(), 0);
        assert_eq!(result.text(), "");
        assert!(result.error().unwrap().contains("401 unauthorized"));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn index_failure_is_a_failed_section() {
        let generator = Arc::new(FlakyGenerator::new(0));
        let sg = section_generator(Arc::new(FixedEmbedder), Arc::new(FailingIndex), generator.clone(), 3);

        let result = sg.generate(SectionId::BriefIntroduction.spec(), &brief()).await;
        assert_eq!(result.status(), SectionStatus::Failed);
        assert!(result.error().unwrap().contains("connection refused"));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retries_until_success_within_bound() {
        let generator = Arc::new(FlakyGenerator::new(2));
        let sg = section_generator(
            Arc::new(FixedEmbedder),
            Arc::new(MemoryIndex::with_examples()),
            generator.clone(),
            3,
        );

        let result = sg.generate(SectionId::TermsAndConditions.spec(), &brief()).await;
        assert_eq!(result.status(), SectionStatus::Success);
        assert_eq!(result.attempts(), 3);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_exactly_the_bound() {
        let generator = Arc::new(FlakyGenerator::new(10));
        let sg = section_generator(
            Arc::new(FixedEmbedder),
            Arc::new(MemoryIndex::with_examples()),
            generator.clone(),
            4,
        );

        let result = sg.generate(SectionId::InstructionToBidders.spec(), &brief()).await;
        assert_eq!(result.status(), SectionStatus::Failed);
        assert_eq!(result.attempts(), 4);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            result.error(),
            Some("generation provider: timeout on call 4")
        );
    }

    #[tokio::test]
    async fn degenerate_output_is_retried_then_fails() {
        let sg = section_generator(
            Arc::new(FixedEmbedder),
            Arc::new(MemoryIndex::with_examples()),
            Arc::new(TerseGenerator),
            2,
        );

        let result = sg.generate(SectionId::NoticeInvitingTender.spec(), &brief()).await;
        assert_eq!(result.status(), SectionStatus::Failed);
        assert_eq!(result.attempts(), 2);
        assert!(result.error().unwrap().starts_with("degenerate output: 2 characters"));
    }

    #[tokio::test]
    async fn blank_output_fails_even_without_a_length_floor() {
        let settings = GenerationSettings {
            min_output_chars: 0,
            ..fast_settings(2)
        };
        let sg = SectionGenerator::new(
            Arc::new(FixedEmbedder),
            Arc::new(MemoryIndex::with_examples()),
            Arc::new(BlankGenerator),
            settings,
        );

        let result = sg.generate(SectionId::ScopeOfWork.spec(), &brief()).await;
        assert_eq!(result.status(), SectionStatus::Failed);
        assert_eq!(result.text(), "");
        assert_eq!(result.attempts(), 2);
        assert_eq!(
            result.error(),
            Some("degenerate output: 0 characters, at least 1 required")
        );
    }

    #[tokio::test]
    async fn threshold_drops_weak_neighbours() {
        let generator = Arc::new(FlakyGenerator::new(0));
        let settings = GenerationSettings {
            min_similarity: Some(0.5),
            ..fast_settings(2)
        };
        let sg = SectionGenerator::new(
            Arc::new(FixedEmbedder),
            Arc::new(MemoryIndex::with_examples()),
            generator.clone(),
            settings,
        );

        sg.generate(SectionId::ScopeOfWork.spec(), &brief()).await;
        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("Example 2:"));
        assert!(!prompts[0].contains("Example 3:"));
    }

    #[test]
    fn clean_output_collapses_blank_runs() {
        assert_eq!(clean_output("  a\n\n\n\nb\n \n\t\nc  "), "a\n\nb\n\nc");
        assert_eq!(clean_output("a\n\nb"), "a\n\nb");
    }
}
