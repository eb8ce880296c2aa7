//! External reasoning service.
//!
//! The pipeline only ever sees the `Reasoner` trait: one call that answers a
//! yes/no criterion against a record's content, and one that parses a
//! free-text request into a structured filter plus a residual question. The
//! HTTP implementation talks to a chat-completions endpoint and maps the
//! provider's distinct "rate limited" error onto `AppError::RateLimitExceeded`
//! so the rate-limited client can drive its shared backoff.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use indoc::{formatdoc, indoc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::ReasonerConfig;
use crate::error::{AppError, AppResult};
use crate::model::{Criterion, RecordFilter};
use crate::HttpClient;

/// Typed answer for one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub included: bool,
    pub reason: String,
}

#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Answer the criterion question for one record's content.
    async fn classify(&self, criterion: &str, content: &str) -> AppResult<Verdict>;

    /// Parse a free-text request into a structured filter plus the residual
    /// question put to `classify` per record. The default keeps the text
    /// verbatim with no structural narrowing, which is the right fallback
    /// when no reasoning service is involved.
    async fn parse_criterion(&self, text: &str) -> AppResult<Criterion> {
        Ok(Criterion::from_text(text))
    }
}

// -- wire types (chat-completions shape)

#[derive(Debug, Serialize, Deserialize)]
pub struct PromptUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: i32,
    pub message: ChatMessage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiResponse {
    pub choices: Vec<ChatChoice>,
    pub usage: PromptUsage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiError {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatApiResponseOrError {
    Response(ChatApiResponse),
    Error(ChatApiError),
}

const RATE_LIMIT_MESSAGE: &str = "Requests rate limit exceeded";

const CLASSIFY_SYSTEM_PROMPT: &str = indoc! {r#"
    You are an expert at deciding whether a record matches a question with a
    true/false answer.
    You will be given the question and one record's content.
    Respond with a JSON object with the keys reason and result.
    "reason" must come first: a short sentence or two, no more than 50 tokens.
    "result" is the true/false answer. Only respond true if the record clearly
    and unambiguously matches the question.
    Do not provide any other output."#
};

const PARSE_SYSTEM_PROMPT: &str = indoc! {r#"
    You are an expert at turning a description of records to find into a
    structured filter.
    Fill the filter fields you are confident about and leave the rest null:
    posted_after, posted_before (RFC 3339 timestamps), agency (exact name),
    source (substring), category, amount_min, amount_max, facets (an object
    of boolean flags).
    Put whatever cannot be expressed structurally into "question": a yes/no
    question answerable from one record's content, or null if nothing
    remains.
    Respond with a JSON object only."#
};

fn classify_user_prompt(criterion: &str, content: &str) -> String {
    formatdoc!(
        r#"You are answering this question: `{}`
        Use the record content below to answer it with true/false in the
        `result` field.

        <record>{}</record>"#,
        criterion,
        content
    )
}

/// Answer fields expected inside the model's JSON content.
#[derive(Debug, Deserialize)]
struct ClassifyAnswer {
    reason: String,
    result: bool,
}

#[derive(Debug, Deserialize)]
struct ParsedCriterion {
    #[serde(default)]
    question: Option<String>,
    #[serde(flatten)]
    filter: RecordFilter,
}

/// Chat-completions implementation of `Reasoner`.
pub struct HttpReasoner {
    http_client: HttpClient,
    config: ReasonerConfig,
}

impl HttpReasoner {
    pub fn new(http_client: HttpClient, config: ReasonerConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }

    async fn send_chat(
        &self,
        model: &str,
        system_prompt: &str,
        user_content: &str,
    ) -> AppResult<String> {
        let resp = self
            .http_client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.key)
            .json(&json!(
              {
                "model": model,
                "temperature": self.config.temperature,
                "messages": [
                  {
                    "role": "system",
                    "content": system_prompt
                  },
                  {
                    "role": "user",
                    "content": user_content
                  }
                ],
                "response_format": {
                    "type": "json_object",
                }
              }
            ))
            .send()
            .await?
            .json::<serde_json::Value>()
            .await
            .map_err(|e| {
                if let Some(status) = e.status() {
                    match status {
                        StatusCode::BAD_REQUEST => AppError::BadRequest(e.to_string()),
                        StatusCode::REQUEST_TIMEOUT => AppError::RequestTimeout,
                        StatusCode::TOO_MANY_REQUESTS => AppError::RateLimitExceeded,
                        _ => AppError::Internal(e.into()),
                    }
                } else {
                    AppError::Internal(e.into())
                }
            })?;

        let parsed = serde_json::from_value::<ChatApiResponseOrError>(resp.clone())
            .context(format!("Could not parse chat response: {}", resp))?;

        let parsed = match parsed {
            ChatApiResponseOrError::Error(error) => {
                if error.message == RATE_LIMIT_MESSAGE {
                    return Err(AppError::RateLimitExceeded);
                }
                return Err(anyhow!("Chat API error: {:?}", error).into());
            }
            ChatApiResponseOrError::Response(parsed) => parsed,
        };

        let choice = parsed.choices.first().context("No choices in response")?;
        Ok(choice.message.content.clone())
    }
}

#[async_trait]
impl Reasoner for HttpReasoner {
    async fn classify(&self, criterion: &str, content: &str) -> AppResult<Verdict> {
        let user_content = classify_user_prompt(criterion, content);
        let answer = self
            .send_chat(&self.config.model, CLASSIFY_SYSTEM_PROMPT, &user_content)
            .await?;

        let answer: ClassifyAnswer = serde_json::from_str(&answer)
            .context(format!("Could not parse JSON answer: {}", answer))?;

        Ok(Verdict {
            included: answer.result,
            reason: answer.reason,
        })
    }

    async fn parse_criterion(&self, text: &str) -> AppResult<Criterion> {
        let user_content = format!("User description: {text}");
        let answer = self
            .send_chat(&self.config.parse_model, PARSE_SYSTEM_PROMPT, &user_content)
            .await?;

        let parsed: ParsedCriterion = serde_json::from_str(&answer)
            .context(format!("Could not parse criterion answer: {}", answer))?;

        let question = parsed
            .question
            .filter(|q| !q.trim().is_empty())
            .unwrap_or_else(|| text.to_string());

        Ok(Criterion {
            text: question,
            filter: parsed.filter,
        })
    }
}
