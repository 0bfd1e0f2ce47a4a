//! Wire shapes for the three request flavours.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Flavour, TokenLimit, VendorProfile};
use crate::ocr::content::text_of;

/// Output token cap sent to chat vendors.
const MAX_OUTPUT_TOKENS: u32 = 5000;

// OpenAI-compatible chat completions

#[derive(Debug, Serialize)]
pub(super) struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<ChatParameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<Thinking>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enable_thinking: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_mode: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ChatContent<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ChatContent<'a> {
    #[serde(rename = "text")]
    Text { text: &'a str },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ChatParameters {
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Thinking {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Value,
}

// Gemini generateContent

#[derive(Debug, Serialize)]
pub(super) struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart<'a> {
    Text { text: &'a str },
    InlineData { inline_data: GeminiInlineData<'a> },
}

#[derive(Debug, Serialize)]
struct GeminiInlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

// Ollama generate

#[derive(Debug, Serialize)]
pub(super) struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: [&'a str; 1],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: Option<Value>,
    error: Option<Value>,
}

/// Serialize one recognition request for `profile`.
pub(super) fn encode(
    profile: &VendorProfile,
    model: &str,
    image_base64: &str,
    mime_type: &str,
    prompt: &str,
) -> Result<String, serde_json::Error> {
    match &profile.flavour {
        Flavour::Chat(knobs) => {
            let limit = (knobs.token_limit == TokenLimit::MaxTokens).then_some(MAX_OUTPUT_TOKENS);
            let completion =
                (knobs.token_limit == TokenLimit::MaxCompletionTokens).then_some(MAX_OUTPUT_TOKENS);
            let parameters = (knobs.token_limit == TokenLimit::Parameters).then_some(ChatParameters {
                max_tokens: MAX_OUTPUT_TOKENS,
            });
            let request = ChatRequest {
                model,
                messages: vec![ChatMessage {
                    role: "user",
                    content: vec![
                        ChatContent::Text { text: prompt },
                        ChatContent::ImageUrl {
                            image_url: ImageUrl {
                                url: format!("data:{};base64,{}", mime_type, image_base64),
                            },
                        },
                    ],
                }],
                max_tokens: limit,
                max_completion_tokens: completion,
                parameters,
                temperature: knobs.temperature,
                stream: knobs.disable_stream.then_some(false),
                thinking: knobs.disable_thinking.then_some(Thinking { kind: "disabled" }),
                enable_thinking: knobs.enable_thinking_flag.then_some(false),
                thinking_mode: knobs.thinking_mode_flag.then_some(false),
            };
            serde_json::to_string(&request)
        }
        Flavour::GeminiContents => serde_json::to_string(&GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![
                    GeminiPart::Text { text: prompt },
                    GeminiPart::InlineData {
                        inline_data: GeminiInlineData {
                            mime_type,
                            data: image_base64,
                        },
                    },
                ],
            }],
        }),
        Flavour::OllamaGenerate => serde_json::to_string(&GenerateRequest {
            model,
            prompt,
            images: [image_base64],
            stream: false,
        }),
    }
}

/// Pull the content value out of a reply body. `Err` carries a readable reason.
pub(super) fn decode(flavour: &Flavour, body: &str) -> Result<Value, String> {
    if body.trim().is_empty() {
        return Err("empty response body".to_string());
    }

    let preview = || body.chars().take(100).collect::<String>();

    match flavour {
        Flavour::Chat(_) => {
            let response: ChatResponse = serde_json::from_str(body)
                .map_err(|e| format!("invalid JSON ({}): {}", e, preview()))?;
            if let Some(error) = response.error {
                return Err(error_message(&error));
            }
            let content = response
                .choices
                .and_then(|c| c.into_iter().next())
                .map(|c| c.message.content)
                .unwrap_or(Value::Null);
            Ok(match content {
                Value::Null => Value::String(String::new()),
                other => other,
            })
        }
        Flavour::GeminiContents => {
            let response: GeminiResponse = serde_json::from_str(body)
                .map_err(|e| format!("invalid JSON ({}): {}", e, preview()))?;
            if let Some(error) = response.error {
                return Err(error_message(&error));
            }
            let text = response
                .candidates
                .and_then(|c| c.into_iter().next())
                .and_then(|c| c.content)
                .map(|content| {
                    content
                        .parts
                        .into_iter()
                        .filter_map(|p| p.text)
                        .collect::<String>()
                })
                .unwrap_or_default();
            Ok(Value::String(text))
        }
        Flavour::OllamaGenerate => {
            let response: GenerateResponse = serde_json::from_str(body)
                .map_err(|e| format!("invalid JSON ({}): {}", e, preview()))?;
            if let Some(error) = response.error {
                return Err(error_message(&error));
            }
            Ok(response.response.unwrap_or(Value::String(String::new())))
        }
    }
}

/// `{"error": {"message": ".."}}`, `{"error": ".."}` or anything else.
fn error_message(error: &Value) -> String {
    match error.get("message") {
        Some(message) => text_of(message),
        None => text_of(error),
    }
}
