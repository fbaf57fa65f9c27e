//! Instructions and the structured-answer schema shared by the LLM backends.
//!
//! Both LLM adapters ask for the same answer shape: one text string plus a
//! list of markdown tables. Keeping the prompt and the schema side by side
//! means a change to one is hard to make without noticing the other.

use serde_json::{json, Value};

/// System prompt for the per-page vision adapter.
pub const VISION_SYSTEM_PROMPT: &str = "You receive a single PDF page as an image. Extract:\n\
1) All legible text as a single string in 'text_content'.\n\
2) Every table as Markdown (GitHub table format) in 'tables[].markdown'.\n\
- If you detect table boundaries, add an approximate pixel bbox [x1,y1,x2,y2].\n\
- Always return valid JSON conforming to the provided schema.";

/// System prompt for the file-search adapter.
pub const FILE_SEARCH_SYSTEM_PROMPT: &str = "You are an expert PDF content analyzer. \
Extract and structure the content from the provided PDF file. You MUST return a valid JSON response with:\n\
1) 'text_content': All text content as a single comprehensive string\n\
2) 'tables': Array of table objects, each with 'markdown' field containing table in markdown format\n\
3) For tables, include 'page_number' and 'bbox' if available\n\n\
IMPORTANT: Always respond with valid JSON only. Do not include any other text or explanations.";

/// User turn sent with the file-search request.
pub const FILE_SEARCH_USER_PROMPT: &str = "Please extract all text content and tables from the PDF file. \
Return the response as JSON with 'text_content' (string) and 'tables' (array of objects with 'markdown' field). \
Include all text content comprehensively.";

/// Schema names used in `json_schema` response formats.
pub const PAGE_SCHEMA_NAME: &str = "pdf_page_extract";
pub const DOCUMENT_SCHEMA_NAME: &str = "pdf_content_extract";

/// User turn accompanying one page image.
pub fn vision_user_prompt(page_number: u32) -> String {
    format!("Analyze page {page_number}.")
}

/// JSON schema of the structured answer: `text_content` plus `tables[]`.
///
/// `markdown` is the only required table field; `page_number` and a
/// four-number `bbox` are optional hints from the model.
pub fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "text_content": { "type": "string" },
            "tables": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "markdown": { "type": "string" },
                        "page_number": { "type": "integer" },
                        "bbox": {
                            "type": "array",
                            "items": { "type": "number" },
                            "minItems": 4,
                            "maxItems": 4
                        }
                    },
                    "required": ["markdown"]
                }
            }
        },
        "required": ["text_content", "tables"],
        "additionalProperties": false
    })
}

/// Variant of [`extraction_schema`] accepted by OpenAI strict structured
/// outputs: every property required, optional ones nullable, no extras.
pub fn strict_extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "text_content": { "type": "string" },
            "tables": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "markdown": { "type": "string" },
                        "page_number": { "type": ["integer", "null"] },
                        "bbox": {
                            "type": ["array", "null"],
                            "items": { "type": "number" }
                        }
                    },
                    "required": ["markdown", "page_number", "bbox"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["text_content", "tables"],
        "additionalProperties": false
    })
}

/// Vision system prompt with the schema spelled out.
///
/// Chat providers behind `edgequake-llm` do not all accept a response-format
/// parameter, so the schema travels in the instructions and the answer is
/// validated on our side.
pub fn vision_system_prompt_with_schema() -> String {
    format!(
        "{VISION_SYSTEM_PROMPT}\n\nRespond with a single JSON object matching this schema \
(no prose, no code fences):\n{}",
        extraction_schema()
    )
}
