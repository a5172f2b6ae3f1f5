//! Rewrite a free-form question as a ticket in the style of the top-ranked stored questions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::graph::GraphStore;
use crate::prompt::{vars_from_pairs, ChatPrompt, MessageTemplate};
use crate::rag::LlmOnlyChain;
use crate::Result;

pub const TOP_QUESTIONS_QUERY: &str =
    "MATCH (q:Question) RETURN q.title AS title, q.body AS body ORDER BY q.score DESC LIMIT 3";

const BODY_PREVIEW_CHARS: usize = 150;
const TITLE_LABEL: &str = "Title:";
const QUESTION_LABEL: &str = "Question:";

/// Examples arrive through the `questions` variable so braces inside them stay literal.
pub const TICKET_SYSTEM: &str = "You're an expert in formulating high quality questions.
Formulate a question in the same style and tone as the following example questions.
{{ questions }}
---

Don't make anything up, only use information in the following question.
Return a title for the question, and the question post itself.

Return format template:
---
Title: This is a new title
Question: This is a new question
---";

pub const TICKET_FORMAT_REMINDER: &str = "Respond in the following template format or you will be unplugged.
---
Title: New title
Question: New question
---";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub title: String,
    pub question: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TicketParseError {
    #[error("model reply has no `Title:` line")]
    MissingTitle,

    #[error("model reply has no `Question:` line after its title")]
    MissingQuestion,
}

fn text_field(row: &Map<String, Value>, key: &str) -> String {
    match row.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

pub async fn fetch_top_questions(graph: &dyn GraphStore) -> Result<Vec<QuestionRecord>> {
    let rows = graph.query(TOP_QUESTIONS_QUERY, Map::new()).await?;
    Ok(rows
        .iter()
        .map(|row| QuestionRecord { title: text_field(row, "title"), body: text_field(row, "body") })
        .collect())
}

pub fn format_examples(examples: &[QuestionRecord]) -> String {
    let mut out = String::new();
    for (i, q) in examples.iter().enumerate() {
        let preview: String = q.body.chars().take(BODY_PREVIEW_CHARS).collect();
        out.push_str(&format!("{}. \n{}\n----\n\n", i + 1, q.title));
        out.push_str(&format!("{preview}\n\n"));
        out.push_str("----\n\n");
    }
    out
}

pub fn ticket_prompt() -> ChatPrompt {
    ChatPrompt::new(vec![
        MessageTemplate::system(TICKET_SYSTEM).jinja(),
        MessageTemplate::system(TICKET_FORMAT_REMINDER),
        MessageTemplate::user("{question}"),
    ])
}

fn label_value<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    line.trim_start().strip_prefix(label)
}

fn ends_value(line: &str) -> bool {
    label_value(line, TITLE_LABEL).is_some()
        || label_value(line, QUESTION_LABEL).is_some()
        || line.trim().starts_with("---")
}

fn collect_value(first: &str, rest: &[&str]) -> String {
    let mut parts = vec![first];
    parts.extend(rest.iter().take_while(|l| !ends_value(l)).copied());
    parts.join("\n").trim().to_string()
}

/// Extract the `Title:` and `Question:` sections of a model reply.
///
/// Each label must start its own line. A value runs until the next label,
/// a `---` fence or the end of the text.
pub fn parse_ticket(text: &str) -> std::result::Result<Ticket, TicketParseError> {
    let lines: Vec<&str> = text.lines().collect();
    let (t, first) = lines
        .iter()
        .enumerate()
        .find_map(|(i, l)| label_value(l, TITLE_LABEL).map(|v| (i, v)))
        .ok_or(TicketParseError::MissingTitle)?;
    let title = collect_value(first, &lines[t + 1..]);

    let (q, first) = lines[t + 1..]
        .iter()
        .enumerate()
        .find_map(|(i, l)| label_value(l, QUESTION_LABEL).map(|v| (t + 1 + i, v)))
        .ok_or(TicketParseError::MissingQuestion)?;
    let question = collect_value(first, &lines[q + 1..]);

    Ok(Ticket { title, question })
}

pub async fn generate_ticket(graph: &dyn GraphStore, chain: &LlmOnlyChain, input_question: &str) -> Result<Ticket> {
    let examples = fetch_top_questions(graph).await?;
    debug!(count = examples.len(), "loaded example questions");
    let questions = format_examples(&examples);
    let question = format!("Here's the question to rewrite in the expected format: ```{input_question}```");
    let vars = vars_from_pairs(&[("questions", questions.as_str()), ("question", question.as_str())]);

    let reply = chain.generate_with(&vars, &[], Some(&ticket_prompt())).await?;
    let ticket = parse_ticket(&reply.answer)?;
    info!(title = %ticket.title, "generated ticket");
    Ok(ticket)
}
