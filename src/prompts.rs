//! Prompts for summarisation and question answering.
//!
//! Every prompt lives here so the wording can be changed in one place and
//! inspected by unit tests without a live model. Callers can override the
//! system prompt via [`crate::config::ServiceConfig::system_prompt`].

/// Default system prompt used for every model call.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful business analyst AI.";

/// Reply returned in place of model output when the call fails.
pub const FALLBACK_REPLY: &str = "Something went wrong while calling the language model.";

/// Build the summarisation prompt for the extracted document text.
pub fn summary_prompt(document_text: &str) -> String {
    format!(
        "Please summarize the following PDF content clearly and concisely:\n\n{}",
        document_text
    )
}

/// Build the question-answering prompt grounded in the stored summary.
pub fn answer_prompt(question: &str, summary: &str) -> String {
    format!(
        "You are an expert business assistant. Use the following PDF summary to answer the user's question.\n\n\
Summary:\n{summary}\n\n\
Question:\n{question}\n\n\
Answer briefly and clearly:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_prompt_embeds_text() {
        let p = summary_prompt("Quarterly revenue grew 12%.");
        assert!(p.starts_with("Please summarize"));
        assert!(p.ends_with("Quarterly revenue grew 12%."));
    }

    #[test]
    fn answer_prompt_orders_summary_before_question() {
        let p = answer_prompt("What grew?", "Revenue grew.");
        let s = p.find("Revenue grew.").unwrap();
        let q = p.find("What grew?").unwrap();
        assert!(s < q);
        assert!(p.trim_end().ends_with("Answer briefly and clearly:"));
    }
}
