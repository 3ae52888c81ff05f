use crate::embeddings::Embedder;
use crate::error::{LanguageModelError, QueryError};
use crate::llm::LanguageModel;
use crate::models::{Answer, ChunkMetadata, QueryResult};
use crate::retriever::Retriever;
use crate::traits::VectorStore;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Returned verbatim whenever the retrieved context cannot answer the question.
pub const NOT_IN_CONTEXT: &str = "answer is not available in the context";

pub const DEFAULT_TOP_K: usize = 20;

/// Builds the grounded prompt: instructions, numbered passages with their
/// sources, then the question.
pub fn render_prompt(texts: &[String], metadata: &[ChunkMetadata], question: &str) -> String {
    let mut prompt = String::from(
        "Answer the question as detailed as possible using only the provided context. \
         Do not use outside knowledge and do not guess. \
         If the answer is not in the context, reply exactly: \"",
    );
    prompt.push_str(NOT_IN_CONTEXT);
    prompt.push_str("\"\n\nContext:\n");

    for (index, text) in texts.iter().enumerate() {
        let label = match metadata.get(index) {
            Some(source) => format!(
                "[{}] (source: {}, page {})\n",
                index + 1,
                source.document_id,
                source.page
            ),
            None => format!("[{}]\n", index + 1),
        };
        prompt.push_str(&label);
        prompt.push_str(text);
        prompt.push_str("\n\n");
    }

    prompt.push_str(&format!("Question:\n{}\n\nAnswer:\n", question.trim()));
    prompt
}

fn not_in_context() -> Answer {
    Answer {
        text: NOT_IN_CONTEXT.to_string(),
        sources: Vec::new(),
        elapsed: Duration::ZERO,
    }
}

pub struct AnswerComposer<'a, L: ?Sized> {
    model: &'a L,
}

impl<'a, L> AnswerComposer<'a, L>
where
    L: LanguageModel + ?Sized,
{
    pub fn new(model: &'a L) -> Self {
        Self { model }
    }

    /// One model call per question. The reply is returned as-is.
    pub async fn compose(
        &self,
        retrieved: &QueryResult,
        question: &str,
    ) -> Result<Answer, LanguageModelError> {
        if retrieved.is_empty() || question.trim().is_empty() {
            debug!("nothing to ground an answer on");
            return Ok(not_in_context());
        }

        let prompt = render_prompt(&retrieved.texts, &retrieved.metadata, question);
        let started = Instant::now();
        let text = self.model.complete(&prompt).await?;
        let elapsed = started.elapsed();

        info!(
            passages = retrieved.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "composed answer"
        );
        Ok(Answer {
            text,
            sources: retrieved.metadata.clone(),
            elapsed,
        })
    }
}

/// Retrieval plus grounded answering over one collection.
pub struct QaService<'a, S: ?Sized, E: ?Sized, L: ?Sized> {
    retriever: Retriever<'a, S, E>,
    composer: AnswerComposer<'a, L>,
}

impl<'a, S, E, L> QaService<'a, S, E, L>
where
    S: VectorStore + ?Sized,
    E: Embedder + ?Sized,
    L: LanguageModel + ?Sized,
{
    pub fn new(store: &'a S, embedder: &'a E, model: &'a L, collection: impl Into<String>) -> Self {
        Self {
            retriever: Retriever::new(store, embedder, collection),
            composer: AnswerComposer::new(model),
        }
    }

    pub async fn ask(&self, question: &str, k: usize) -> Result<Answer, QueryError> {
        if question.trim().is_empty() {
            return Ok(not_in_context());
        }

        let retrieved = self.retriever.search(question, k).await?;
        Ok(self.composer.compose(&retrieved, question).await?)
    }
}
