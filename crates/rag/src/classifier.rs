use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use formfill_index::SearchResult;
use formfill_llm::{ImageAttachment, LlmClient, LlmRequest};

use crate::error::{RagError, Result};

/// First round input: the tagged document as text, plus optional page renders.
#[derive(Debug, Clone, Default)]
pub struct DescribeRequest {
    pub document_text: String,
    pub page_images: Vec<ImageAttachment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescriptionResponse {
    #[serde(default)]
    pub fields_to_fill: Vec<FieldDescription>,
    #[serde(default)]
    pub restored_cells: Vec<RestoredCell>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldDescription {
    #[serde(default, deserialize_with = "lenient_index")]
    pub index: Option<u32>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub description: String,
    #[serde(default)]
    pub suggested_content_type: Option<String>,
    #[serde(default)]
    pub field_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestoredCell {
    #[serde(default, deserialize_with = "lenient_index")]
    pub index: Option<u32>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub restored_content: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DecisionRequest {
    pub fields: Vec<DecisionField>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionField {
    pub index: u32,
    pub original_text: String,
    pub description: String,
    pub suggested_content_type: String,
    pub evidence: Vec<SearchResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionResponse {
    #[serde(default)]
    pub filled_cells: Vec<FilledCell>,
    #[serde(default)]
    pub restored_cells: Vec<RestoredCell>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilledCell {
    #[serde(default, deserialize_with = "lenient_index")]
    pub index: Option<u32>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub content: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub suggested_content_type: Option<String>,
}

/// The two classification rounds the orchestrator drives.
pub trait FieldClassifier {
    fn describe(&self, request: &DescribeRequest) -> Result<DescriptionResponse>;
    fn decide(&self, request: &DecisionRequest) -> Result<DecisionResponse>;
}

/// Model-assisted knowledge splitting.
pub trait TextSplitter {
    fn split(&self, text: &str, max_chars: usize) -> Result<Vec<String>>;
}

const DESCRIBE_SYSTEM: &str = "You read forms. Every table cell ends with a numeric tag such as [7]. \
For each tagged cell decide whether it is a blank that must be filled or existing content \
(labels, headings, values already present) that must stay. Reply with JSON only: \
{\"fields_to_fill\": [{\"index\": 7, \"description\": \"what belongs here\", \
\"suggested_content_type\": \"text|number|date|...\", \"field_type\": \"name|email|phone|address|company|position|department|skill|education|experience|other\"}], \
\"restored_cells\": [{\"index\": 3, \"restored_content\": \"cell text without its tag\"}]}";

const DECIDE_SYSTEM: &str = "You complete form fields from reference material. For each field, \
write the final cell content using only the supplied evidence. When the evidence does not support \
a value, restore the field to its original text instead of guessing. You may refine the description. \
Reply with JSON only: {\"filled_cells\": [{\"index\": 7, \"content\": \"...\", \"description\": \"...\"}], \
\"restored_cells\": [{\"index\": 3, \"restored_content\": \"...\"}]}";

const SPLIT_SYSTEM: &str = "Split the text into self-contained passages without rewriting or \
dropping any of it. Reply with a JSON array of strings only.";

pub struct LlmClassifier {
    client: LlmClient,
}

impl LlmClassifier {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }

    fn ask(&self, request: LlmRequest) -> Result<String> {
        let response = self
            .client
            .chat_blocking(&request)
            .map_err(|err| RagError::Model(format!("{err:#}")))?;
        debug!(
            tokens = response.total_tokens(),
            chars = response.content.len(),
            "model replied"
        );
        Ok(response.content)
    }
}

impl FieldClassifier for LlmClassifier {
    fn describe(&self, request: &DescribeRequest) -> Result<DescriptionResponse> {
        let raw = self.ask(LlmRequest {
            system: Some(DESCRIBE_SYSTEM.to_string()),
            user: format!("Tagged document:\n\n{}", request.document_text),
            images: request.page_images.clone(),
            temperature: Some(0.1),
        })?;
        parse_payload(&raw)
    }

    fn decide(&self, request: &DecisionRequest) -> Result<DecisionResponse> {
        let fields = serde_json::to_string_pretty(&request.fields)
            .map_err(|err| RagError::ClassificationParse(err.to_string()))?;
        let raw = self.ask(LlmRequest {
            system: Some(DECIDE_SYSTEM.to_string()),
            user: format!("Fields with retrieved evidence (JSON):\n\n{fields}"),
            images: Vec::new(),
            temperature: Some(0.2),
        })?;
        parse_payload(&raw)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SplitPayload {
    List(Vec<String>),
    Wrapped { chunks: Vec<String> },
}

impl TextSplitter for LlmClassifier {
    fn split(&self, text: &str, max_chars: usize) -> Result<Vec<String>> {
        let raw = self.ask(LlmRequest {
            system: Some(SPLIT_SYSTEM.to_string()),
            user: format!("Maximum passage length: {max_chars} characters.\n\n{text}"),
            images: Vec::new(),
            temperature: Some(0.0),
        })?;
        let chunks = match parse_split_payload(&raw)? {
            SplitPayload::List(chunks) | SplitPayload::Wrapped { chunks } => chunks,
        };
        Ok(chunks
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect())
    }
}

/// A round payload: a JSON object carrying at least one of `KEYS`.
pub trait ClassifierPayload: DeserializeOwned {
    const KEYS: &'static [&'static str];
}

impl ClassifierPayload for DescriptionResponse {
    const KEYS: &'static [&'static str] = &["fields_to_fill", "restored_cells"];
}

impl ClassifierPayload for DecisionResponse {
    const KEYS: &'static [&'static str] = &["filled_cells", "restored_cells"];
}

/// Deserializes the first JSON object embedded in `raw` that carries one of
/// the payload keys. Code fences, surrounding prose and stray arrays are skipped.
pub fn parse_payload<T: ClassifierPayload>(raw: &str) -> Result<T> {
    let mut last_error = None;
    for candidate in json_candidates(raw, &['{']) {
        let value = match serde_json::from_str::<Value>(candidate) {
            Ok(value) => value,
            Err(err) => {
                last_error = Some(err.to_string());
                continue;
            }
        };
        if !T::KEYS.iter().any(|key| value.get(*key).is_some()) {
            last_error = Some(format!("object has none of: {}", T::KEYS.join(", ")));
            continue;
        }
        match serde_json::from_value::<T>(value) {
            Ok(parsed) => return Ok(parsed),
            Err(err) => last_error = Some(err.to_string()),
        }
    }
    Err(RagError::ClassificationParse(
        last_error.unwrap_or_else(|| "no JSON object in model output".to_string()),
    ))
}

fn parse_split_payload(raw: &str) -> Result<SplitPayload> {
    json_candidates(raw, &['[', '{'])
        .find_map(|candidate| serde_json::from_str::<SplitPayload>(candidate).ok())
        .ok_or_else(|| RagError::ClassificationParse("no passage list in model output".to_string()))
}

/// The first balanced `{...}` in `raw` that is valid JSON.
pub fn extract_json_payload(raw: &str) -> Option<&str> {
    json_candidates(raw, &['{']).find(|c| serde_json::from_str::<Value>(c).is_ok())
}

fn json_candidates<'a>(raw: &'a str, openers: &'a [char]) -> impl Iterator<Item = &'a str> + 'a {
    raw.char_indices()
        .filter(move |(_, ch)| openers.contains(ch))
        .filter_map(move |(start, _)| balanced_end(&raw[start..]).map(|end| &raw[start..start + end]))
}

/// Byte length of the balanced value opening at the start of `text`.
fn balanced_end(text: &str) -> Option<usize> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (pos, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(ch) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(pos + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

fn lenient_index<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<u32>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Some(Value::String(s)) => s
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .trim()
            .parse()
            .ok(),
        _ => None,
    })
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}
