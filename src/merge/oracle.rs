use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::prompts;
use super::verdict::{parse_verdict, Verdict};
use crate::assemble::DocumentModel;
use crate::error::OracleError;
use crate::llm::{LlmClient, Message};
use crate::types::ContextItem;

/// Semantic judge for candidates that survived exact dedup.
#[async_trait]
pub trait SimilarityOracle: Send + Sync {
    async fn classify(
        &self,
        candidate: &ContextItem,
        document: &DocumentModel,
    ) -> Result<Verdict, OracleError>;
}

/// Oracle backed by the chat completions client.
pub struct LlmOracle {
    llm: Arc<LlmClient>,
}

impl LlmOracle {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl SimilarityOracle for LlmOracle {
    async fn classify(
        &self,
        candidate: &ContextItem,
        document: &DocumentModel,
    ) -> Result<Verdict, OracleError> {
        let (prompt, anchors) = prompts::classify_prompt(candidate, document);
        let messages = [Message::system(prompts::CLASSIFY_SYSTEM), Message::user(prompt)];
        let reply = self
            .llm
            .chat(&messages)
            .await
            .map_err(|e| OracleError::Unavailable(format!("{:#}", e)))?;
        let verdict = parse_verdict(&reply, &anchors);
        debug!(candidate = %candidate.identity(), ?verdict, model = self.llm.model(), "oracle verdict");
        Ok(verdict)
    }
}
