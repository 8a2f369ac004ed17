use serde::{Deserialize, Serialize};

use crate::serial::{ResponseRecord, ResponseStatus};

/// Verdict on a generation attempt drawn from one firmware record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum GenerationOutcome {
    Completed(String),
    Failed(String),
}

/// Decides whether a record finishes the current generation attempt
pub trait OutcomeClassifier: Send + Sync {
    fn classify(&self, record: &ResponseRecord) -> Option<GenerationOutcome>;
}

impl<F> OutcomeClassifier for F
where
    F: Fn(&ResponseRecord) -> Option<GenerationOutcome> + Send + Sync,
{
    fn classify(&self, record: &ResponseRecord) -> Option<GenerationOutcome> {
        self(record)
    }
}

/// Success records whose message mentions `keyword` complete the attempt;
/// any error record fails it.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    keyword: String,
}

impl KeywordClassifier {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self { keyword: keyword.into() }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new("circuit")
    }
}

impl OutcomeClassifier for KeywordClassifier {
    fn classify(&self, record: &ResponseRecord) -> Option<GenerationOutcome> {
        match record.status {
            ResponseStatus::Success => record
                .message
                .as_ref()
                .filter(|m| m.contains(&self.keyword))
                .map(|m| GenerationOutcome::Completed(m.clone())),
            ResponseStatus::Error => Some(GenerationOutcome::Failed(
                record
                    .message
                    .clone()
                    .unwrap_or_else(|| "Generation failed".to_string()),
            )),
            ResponseStatus::Data => None,
        }
    }
}
