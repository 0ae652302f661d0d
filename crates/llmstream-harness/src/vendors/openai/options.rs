/// Which OpenAI streaming protocol to speak.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenAiApi {
    /// `/v1/chat/completions`; also spoken by most OpenAI-compatible servers.
    ChatCompletions,
    /// `/v1/responses`.
    #[default]
    Responses,
}

/// OpenAI reasoning effort hint (when supported by the selected model/API).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAiReasoningEffort {
    /// Lower latency / cost-oriented reasoning.
    Low,
    /// Balanced reasoning.
    #[default]
    Medium,
    /// Higher effort reasoning.
    High,
}

impl OpenAiReasoningEffort {
    /// Maps an explicit token budget onto the closest effort level.
    pub fn from_budget(budget_tokens: u32) -> Self {
        match budget_tokens {
            0..=2048 => Self::Low,
            2049..=8192 => Self::Medium,
            _ => Self::High,
        }
    }
}
