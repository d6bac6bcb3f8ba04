use thiserror::Error;

/// Failures raised while turning a stored document into plain text.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: .{0}")]
    UnsupportedFormat(String),
    #[error("failed to download document: {0}")]
    DownloadFailed(String),
    #[error("document is corrupted or password protected")]
    CorruptedOrProtected,
    #[error("no extractable text found in document")]
    NoExtractableText,
}

/// Generic failure from the LLM completion service.
#[derive(Debug, Error)]
#[error("completion request failed: {0}")]
pub struct CompletionError(pub String);

/// Failures raised by the map-reduce summarizer.
#[derive(Debug, Error)]
pub enum SummarizeError {
    /// Deterministic capacity overflow. Never retried: the chunk count
    /// depends only on the input text and the configured chunk size.
    #[error("document splits into {chunks} chunks, exceeding the limit of {limit}")]
    DocumentTooLarge { chunks: usize, limit: usize },
    #[error(transparent)]
    Completion(#[from] CompletionError),
}

/// Umbrella error carried by one summary job execution. The retry policy
/// dispatches on the tag, not on message contents.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Summarize(#[from] SummarizeError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl JobError {
    /// Transient dependency failures are worth retrying; everything else
    /// is deterministic and fails the job on first occurrence.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            JobError::Extract(ExtractError::DownloadFailed(_))
                | JobError::Summarize(SummarizeError::Completion(_))
        )
    }

    /// Machine-readable reason code surfaced through the status endpoint.
    pub fn reason_code(&self) -> &'static str {
        match self {
            JobError::Extract(ExtractError::UnsupportedFormat(_)) => "unsupported-format",
            JobError::Extract(ExtractError::DownloadFailed(_)) => "download-failed",
            JobError::Extract(ExtractError::CorruptedOrProtected) => {
                "corrupted-or-password-protected"
            }
            JobError::Extract(ExtractError::NoExtractableText) => "no-extractable-text",
            JobError::Summarize(SummarizeError::DocumentTooLarge { .. }) => "document-too-large",
            JobError::Summarize(SummarizeError::Completion(_)) => "summarization-failed",
            JobError::Other(_) => "internal-error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_are_retryable() {
        assert!(JobError::from(ExtractError::DownloadFailed("timeout".into())).is_retryable());
        assert!(
            JobError::from(SummarizeError::Completion(CompletionError("503".into())))
                .is_retryable()
        );
    }

    #[test]
    fn deterministic_failures_are_terminal() {
        let errors = [
            JobError::from(ExtractError::UnsupportedFormat("xlsx".into())),
            JobError::from(ExtractError::CorruptedOrProtected),
            JobError::from(ExtractError::NoExtractableText),
            JobError::from(SummarizeError::DocumentTooLarge {
                chunks: 12,
                limit: 10,
            }),
        ];
        for err in errors {
            assert!(!err.is_retryable(), "{err} should not be retryable");
        }
    }

    #[test]
    fn reason_codes_are_stable() {
        let err = JobError::from(SummarizeError::DocumentTooLarge {
            chunks: 12,
            limit: 10,
        });
        assert_eq!(err.reason_code(), "document-too-large");
        assert!(err.to_string().contains("12"));
        assert!(err.to_string().contains("10"));

        let err = JobError::from(ExtractError::UnsupportedFormat("doc".into()));
        assert_eq!(err.reason_code(), "unsupported-format");
    }
}
