//! Answer composer: grounded prompt construction and a single completion.
//!
//! Retrieved chunk texts are joined, in retrieval order, into one context
//! block and placed in a fixed template that tells the model to answer
//! only from that context and to reply with [`NOT_IN_CONTEXT`] otherwise.
//!
//! Two outcomes must stay distinguishable for the caller:
//!
//! - the model answered with the sentinel: a successful [`Answer`] whose
//!   text is kept verbatim ([`Answer::is_not_in_context`] is true);
//! - the capability failed: [`Error::LanguageService`] or
//!   [`Error::Timeout`].

use std::time::Duration;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::llm::LanguageProvider;
use crate::models::Chunk;

/// Phrase the model is instructed to emit when the context lacks the answer.
pub const NOT_IN_CONTEXT: &str = "answer is not available in the context";

const CONTEXT_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub text: String,
    /// True when at least one chunk was supplied as context.
    pub used_context: bool,
}

impl Answer {
    pub fn is_not_in_context(&self) -> bool {
        self.text.to_lowercase().contains(NOT_IN_CONTEXT)
    }

    /// The reply without surrounding whitespace, for printing.
    pub fn display_text(&self) -> &str {
        self.text.trim()
    }
}

/// Fill the grounding template with `context` and `question`.
pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "Answer the question as detailed as possible from the provided context, make sure to provide all the details, \
         if the answer is not in provided context just say, \"{NOT_IN_CONTEXT}\", don't provide the wrong answer.\n\n\
         Context:\n {context}?\n\n\
         Question: \n{question}\n\n\
         Answer:"
    )
}

/// Join chunk texts in the order given.
pub fn context_block(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// Compose the prompt, call the language capability once, and return its text.
///
/// Any capability error becomes [`Error::LanguageService`]; exceeding
/// `timeout` becomes [`Error::Timeout`].
pub async fn answer(
    question: &str,
    chunks: &[Chunk],
    llm: &dyn LanguageProvider,
    timeout: Duration,
) -> Result<Answer> {
    let prompt = build_prompt(&context_block(chunks), question);

    let text = match tokio::time::timeout(timeout, llm.complete(&prompt)).await {
        Err(_) => {
            return Err(Error::Timeout {
                operation: "completion",
                after: timeout,
            })
        }
        Ok(Err(e @ Error::LanguageService(_))) => return Err(e),
        Ok(Err(e)) => return Err(Error::language(e.to_string())),
        Ok(Ok(text)) => text,
    };

    Ok(Answer {
        text,
        used_context: !chunks.is_empty(),
    })
}
