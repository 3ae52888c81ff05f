use crate::answer::QaService;
use crate::embeddings::Embedder;
use crate::error::QueryError;
use crate::llm::LanguageModel;
use crate::models::Answer;
use crate::traits::VectorStore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub question: String,
    pub answer: Answer,
}

/// Interactive question history. Each question is answered independently;
/// earlier exchanges are kept for display only and never enter the prompt.
#[derive(Debug, Default)]
pub struct QaSession {
    history: Vec<Exchange>,
}

impl QaSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn ask<S, E, L>(
        &mut self,
        service: &QaService<'_, S, E, L>,
        question: &str,
        k: usize,
    ) -> Result<Answer, QueryError>
    where
        S: VectorStore + ?Sized,
        E: Embedder + ?Sized,
        L: LanguageModel + ?Sized,
    {
        let answer = service.ask(question, k).await?;
        self.history.push(Exchange {
            question: question.to_string(),
            answer: answer.clone(),
        });
        Ok(answer)
    }

    pub fn history(&self) -> &[Exchange] {
        &self.history
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}
