//! Prompt templates for label resolution and query synthesis.
//!
//! Prompts only carry bounded context: the label names, a stream count with a
//! few example streams, and the values of the one resolved label.

use crate::loki::StreamDescriptor;
use std::collections::BTreeSet;

/// Example streams shown to the model
const MAX_EXAMPLE_STREAMS: usize = 5;

/// Rendered prompt ready for a completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptInstance {
    pub system: String,
    pub user: String,
}

/// Escape XML special characters so user text cannot close the prompt's tags.
fn escape_xml_chars(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

const LABEL_SYSTEM: &str = "You map questions about application logs to the single log-stream \
label that best narrows the search. Answer with a JSON object {\"label\": \"<name>\"} where \
<name> is copied exactly from the list of known labels. Do not invent labels.";

/// Prompt asking for one label out of `labels`.
///
/// `reminder` carries the reason the previous answer was rejected.
pub fn label_selection(
    question: &str,
    labels: &BTreeSet<String>,
    reminder: Option<&str>,
) -> PromptInstance {
    let known = labels.iter().cloned().collect::<Vec<_>>().join(", ");
    let mut user = format!(
        "<question>{}</question>\n<known_labels>{}</known_labels>\n",
        escape_xml_chars(question),
        escape_xml_chars(&known)
    );

    if let Some(reason) = reminder {
        user.push_str(&format!(
            "\nYour previous answer was rejected: {}\nThe label MUST be exactly one of: {}\n",
            escape_xml_chars(reason),
            escape_xml_chars(&known)
        ));
    }
    user.push_str("\nRespond with the JSON object only.");

    PromptInstance {
        system: LABEL_SYSTEM.to_string(),
        user,
    }
}

const SYNTHESIS_SYSTEM: &str = "You translate questions about application logs into a single \
Grafana Loki LogQL query. Rules:\n\
- Start from a stream selector such as {label=\"value\"} that uses only the known labels.\n\
- Use line filters (|=, !=, |~, !~), parsers (json, logfmt, regexp, pattern) and label filters \
to narrow results.\n\
- For counts or rates wrap the log query in a range aggregation with a duration, for example \
sum(count_over_time({label=\"value\"} [1h])).\n\
Answer with a JSON object {\"query\": \"<logql>\"} and nothing else.";

/// Context for one synthesis prompt
#[derive(Debug, Clone, Copy)]
pub struct SynthesisPrompt<'a> {
    pub question: &'a str,
    pub labels: &'a BTreeSet<String>,
    pub streams: &'a [StreamDescriptor],
    pub label: &'a str,
    pub values: &'a BTreeSet<String>,
    pub max_values: usize,
    pub feedback: Option<&'a str>,
}

/// Prompt asking for a LogQL query built around the resolved label.
pub fn query_synthesis(ctx: &SynthesisPrompt<'_>) -> PromptInstance {
    let known = ctx.labels.iter().cloned().collect::<Vec<_>>().join(", ");

    let shown: Vec<&str> = ctx
        .values
        .iter()
        .take(ctx.max_values)
        .map(String::as_str)
        .collect();
    let mut values = shown.join(", ");
    if ctx.values.len() > shown.len() {
        values.push_str(&format!(
            " (truncated: showing {} of {} values)",
            shown.len(),
            ctx.values.len()
        ));
    }
    if ctx.values.is_empty() {
        values.push_str("(no values observed)");
    }

    let examples = ctx
        .streams
        .iter()
        .take(MAX_EXAMPLE_STREAMS)
        .map(render_stream)
        .collect::<Vec<_>>()
        .join("\n");

    let mut user = format!(
        "<question>{}</question>\n\
         <known_labels>{}</known_labels>\n\
         <stream_count>{}</stream_count>\n\
         <example_streams>\n{}\n</example_streams>\n\
         <resolved_label name=\"{}\">{}</resolved_label>\n",
        escape_xml_chars(ctx.question),
        escape_xml_chars(&known),
        ctx.streams.len(),
        escape_xml_chars(&examples),
        escape_xml_chars(ctx.label),
        escape_xml_chars(&values),
    );

    if let Some(feedback) = ctx.feedback {
        user.push_str(&format!(
            "\nYour previous query was rejected: {}\nReturn a corrected query.\n",
            escape_xml_chars(feedback)
        ));
    }
    user.push_str("\nRespond with the JSON object only.");

    PromptInstance {
        system: SYNTHESIS_SYSTEM.to_string(),
        user,
    }
}

fn render_stream(stream: &StreamDescriptor) -> String {
    let matchers = stream
        .iter()
        .map(|(k, v)| format!("{}={:?}", k, v))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{}}}", matchers)
}
