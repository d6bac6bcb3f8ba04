use std::{fmt::Write as _, sync::Arc, time::Duration};

use tokio::time::sleep;

use crate::{chunk::Chunker, config::Settings, error::SummarizeError, llm::Completion};

/// Produces the final summary for a document: directly for short text, or
/// by summarizing each chunk and reducing the chunk summaries into one.
pub struct Summarizer {
    llm: Arc<dyn Completion>,
    chunker: Chunker,
    direct_threshold: usize,
    max_chunks: usize,
    chunk_call_delay: Duration,
}

struct SectionSummary {
    index: usize,
    word_count: usize,
    char_count: usize,
    text: String,
}

impl Summarizer {
    pub fn new(llm: Arc<dyn Completion>, settings: &Settings) -> Self {
        Self {
            llm,
            chunker: Chunker::new(settings.chunk_size, settings.chunk_overlap),
            direct_threshold: settings.direct_summary_threshold,
            max_chunks: settings.max_chunks,
            chunk_call_delay: settings.chunk_call_delay,
        }
    }

    pub async fn summarize(&self, text: &str) -> Result<String, SummarizeError> {
        if text.chars().count() < self.direct_threshold {
            let summary = self.llm.complete(&direct_prompt(text)).await?;
            return Ok(summary.trim().to_string());
        }

        // The ceiling check happens before any completion call so an
        // oversized document costs nothing downstream.
        let total = self.chunker.count(text);
        if total > self.max_chunks {
            return Err(SummarizeError::DocumentTooLarge {
                chunks: total,
                limit: self.max_chunks,
            });
        }

        let mut sections = Vec::with_capacity(total);
        for chunk in self.chunker.chunks(text) {
            // Spacing between section calls to respect downstream rate
            // limits; not a correctness requirement.
            if chunk.index > 0 && !self.chunk_call_delay.is_zero() {
                sleep(self.chunk_call_delay).await;
            }

            let prompt = section_prompt(chunk.index, total, chunk.text);
            let summary = self.llm.complete(&prompt).await?;
            sections.push(SectionSummary {
                index: chunk.index,
                word_count: chunk.word_count(),
                char_count: chunk.char_len(),
                text: summary.trim().to_string(),
            });
        }

        let reduced = self.llm.complete(&reduce_prompt(&sections)).await?;
        Ok(compose_report(reduced.trim(), &sections))
    }
}

fn direct_prompt(text: &str) -> String {
    format!(
        "Summarize the following document. Capture the key points, \
         conclusions, and any notable data. Respond with the summary only.\n\n{text}"
    )
}

fn section_prompt(index: usize, total: usize, text: &str) -> String {
    format!(
        "You are summarizing section {position} of {total} of a longer document. \
         Write a concise summary of this section only; it will later be merged \
         with the other section summaries.\n\n{text}",
        position = index + 1,
    )
}

fn reduce_prompt(sections: &[SectionSummary]) -> String {
    let mut prompt = format!(
        "The following are summaries of {count} consecutive sections of one \
         document. Merge them into a single coherent summary of the whole \
         document. Respond with the summary only.\n",
        count = sections.len(),
    );
    for section in sections {
        let _ = write!(prompt, "\nSection {}:\n{}\n", section.index + 1, section.text);
    }
    prompt
}

/// Structured artifact required when chunking occurred: aggregate
/// statistics first, then the reduced summary, then the per-section
/// appendix. Downstream consumers rely on the statistics block.
fn compose_report(reduced: &str, sections: &[SectionSummary]) -> String {
    let total_words: usize = sections.iter().map(|s| s.word_count).sum();
    let total_chars: usize = sections.iter().map(|s| s.char_count).sum();

    let mut report = format!(
        "# Summary Statistics\n\n\
         - Sections summarized: {count}\n\
         - Section text: {total_words} words / {total_chars} characters\n\n\
         # Summary\n\n{reduced}\n\n\
         # Section Summaries\n",
        count = sections.len(),
    );

    for section in sections {
        let _ = write!(
            report,
            "\n## Section {position} of {total} ({words} words / {chars} characters)\n\n{text}\n",
            position = section.index + 1,
            total = sections.len(),
            words = section.word_count,
            chars = section.char_count,
            text = section.text,
        );
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;

    use crate::error::CompletionError;

    #[derive(Default)]
    struct MockCompletion {
        calls: AtomicUsize,
        failures_remaining: Mutex<usize>,
        prompts: Mutex<Vec<String>>,
    }

    impl MockCompletion {
        fn failing_first(failures: usize) -> Self {
            Self {
                failures_remaining: Mutex::new(failures),
                ..Self::default()
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Completion for MockCompletion {
        async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.prompts.lock().unwrap().push(prompt.to_string());

            let mut failures = self.failures_remaining.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(CompletionError("simulated outage".to_string()));
            }
            Ok(format!("summary-{call}"))
        }
    }

    fn settings(threshold: usize, chunk_size: usize, overlap: usize, max_chunks: usize) -> Settings {
        Settings {
            direct_summary_threshold: threshold,
            chunk_size,
            chunk_overlap: overlap,
            max_chunks,
            chunk_call_delay: Duration::ZERO,
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn short_document_takes_direct_path_with_one_call() {
        let llm = Arc::new(MockCompletion::default());
        let summarizer = Summarizer::new(llm.clone(), &settings(8000, 4000, 200, 10));

        let result = summarizer
            .summarize(&"a".repeat(2000))
            .await
            .expect("summarize");

        assert_eq!(llm.call_count(), 1);
        assert_eq!(result, "summary-1");
    }

    #[tokio::test]
    async fn text_at_threshold_is_chunked() {
        let llm = Arc::new(MockCompletion::default());
        let summarizer = Summarizer::new(llm.clone(), &settings(100, 80, 10, 10));

        // Exactly the threshold length: "below" is strict, so this chunks.
        summarizer
            .summarize(&"z".repeat(100))
            .await
            .expect("summarize");

        // Two sections plus the reduce call.
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn oversized_document_fails_with_zero_calls() {
        let llm = Arc::new(MockCompletion::default());
        let summarizer = Summarizer::new(llm.clone(), &settings(10, 1000, 100, 10));

        let err = summarizer
            .summarize(&"y".repeat(10_900))
            .await
            .expect_err("should overflow ceiling");

        match err {
            SummarizeError::DocumentTooLarge { chunks, limit } => {
                assert_eq!(chunks, 12);
                assert_eq!(limit, 10);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn map_reduce_issues_one_call_per_section_plus_reduce() {
        let llm = Arc::new(MockCompletion::default());
        let summarizer = Summarizer::new(llm.clone(), &settings(10, 100, 10, 10));

        // 100 + 3 * 90 chars walks to exactly 4 chunks.
        summarizer
            .summarize(&"q".repeat(370))
            .await
            .expect("summarize");

        assert_eq!(llm.call_count(), 5);

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].contains("section 1 of 4"));
        assert!(prompts[3].contains("section 4 of 4"));
        assert!(prompts[4].contains("4 consecutive sections"));
    }

    #[tokio::test]
    async fn report_contains_statistics_summary_and_appendix() {
        let llm = Arc::new(MockCompletion::default());
        let summarizer = Summarizer::new(llm.clone(), &settings(10, 100, 10, 10));

        let report = summarizer
            .summarize(&"w".repeat(190))
            .await
            .expect("summarize");

        assert!(report.starts_with("# Summary Statistics"));
        assert!(report.contains("- Sections summarized: 2"));
        // Reduce call is the third and final completion.
        assert!(report.contains("# Summary\n\nsummary-3"));
        assert!(report.contains("## Section 1 of 2"));
        assert!(report.contains("## Section 2 of 2"));
        let stats_pos = report.find("# Summary Statistics").unwrap();
        let summary_pos = report.find("# Summary\n").unwrap();
        let appendix_pos = report.find("# Section Summaries").unwrap();
        assert!(stats_pos < summary_pos && summary_pos < appendix_pos);
    }

    #[tokio::test]
    async fn completion_failure_propagates() {
        let llm = Arc::new(MockCompletion::failing_first(1));
        let summarizer = Summarizer::new(llm.clone(), &settings(8000, 4000, 200, 10));

        let err = summarizer
            .summarize("short document")
            .await
            .expect_err("should fail");
        assert!(matches!(err, SummarizeError::Completion(_)));
    }
}
