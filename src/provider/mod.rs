//! Vendor table and the per-session [`ProviderSpec`].
//!
//! Vendor differences are data: endpoint base, path, auth style, payload
//! flavour and a handful of flavour knobs. Adding a vendor means adding a row.

mod payload;

use std::fmt;

use base64::Engine;
use serde_json::Value;

use crate::ocr::OcrError;

/// Where the credential goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `?key=<key>` on the URL
    QueryKey,
    None,
}

/// Which field carries the output token cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenLimit {
    MaxTokens,
    MaxCompletionTokens,
    /// Nested under `parameters`.
    Parameters,
    Omitted,
}

/// Knobs of the OpenAI-compatible chat flavour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatKnobs {
    pub token_limit: TokenLimit,
    pub temperature: Option<f32>,
    pub disable_stream: bool,
    /// `thinking: {type: "disabled"}`
    pub disable_thinking: bool,
    /// `enable_thinking: false`
    pub enable_thinking_flag: bool,
    /// `thinking_mode: false`
    pub thinking_mode_flag: bool,
}

impl ChatKnobs {
    const fn standard() -> Self {
        Self {
            token_limit: TokenLimit::MaxTokens,
            temperature: None,
            disable_stream: false,
            disable_thinking: false,
            enable_thinking_flag: false,
            thinking_mode_flag: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Flavour {
    Chat(ChatKnobs),
    GeminiContents,
    OllamaGenerate,
}

/// One row of the vendor table.
#[derive(Debug, Clone, Copy)]
pub struct VendorProfile {
    pub display_name: &'static str,
    pub default_base: &'static str,
    /// Appended to the base; `{model}` is substituted.
    pub path: &'static str,
    pub auth: Auth,
    pub flavour: Flavour,
    pub default_model: Option<&'static str>,
    /// Cap on the base64 image length, checked before sending.
    pub max_base64_len: Option<usize>,
    pub extra_headers: &'static [(&'static str, &'static str)],
}

const CHAT_PATH: &str = "/chat/completions";

const fn chat(display_name: &'static str, default_base: &'static str, knobs: ChatKnobs) -> VendorProfile {
    VendorProfile {
        display_name,
        default_base,
        path: CHAT_PATH,
        auth: Auth::Bearer,
        flavour: Flavour::Chat(knobs),
        default_model: None,
        max_base64_len: None,
        extra_headers: &[],
    }
}

const OPENAI: VendorProfile = chat("OpenAI", "https://api.openai.com/v1", ChatKnobs::standard());
const XAI: VendorProfile = chat("xAI Grok", "https://api.x.ai/v1", ChatKnobs::standard());
const SILICONFLOW: VendorProfile =
    chat("SiliconFlow", "https://api.siliconflow.cn/v1", ChatKnobs::standard());
const MODELSCOPE: VendorProfile = chat(
    "ModelScope",
    "https://api-inference.modelscope.cn/v1",
    ChatKnobs::standard(),
);

const OPENROUTER: VendorProfile = VendorProfile {
    extra_headers: &[
        ("HTTP-Referer", "https://github.com/ocrbridge/ocrbridge"),
        ("X-Title", "ocrbridge"),
    ],
    ..chat(
        "OpenRouter",
        "https://openrouter.ai/api/v1",
        ChatKnobs {
            token_limit: TokenLimit::Omitted,
            ..ChatKnobs::standard()
        },
    )
};

const DOUBAO: VendorProfile = chat(
    "Doubao",
    "https://ark.cn-beijing.volces.com/api/v3",
    ChatKnobs {
        disable_thinking: true,
        ..ChatKnobs::standard()
    },
);

const ZHIPU: VendorProfile = chat(
    "Zhipu AI",
    "https://open.bigmodel.cn/api/paas/v4",
    ChatKnobs {
        disable_thinking: true,
        ..ChatKnobs::standard()
    },
);

const ALIBABA: VendorProfile = chat(
    "Alibaba Bailian",
    "https://dashscope.aliyuncs.com/compatible-mode/v1",
    ChatKnobs {
        token_limit: TokenLimit::Parameters,
        ..ChatKnobs::standard()
    },
);

const MINERU: VendorProfile = VendorProfile {
    path: "/extract/task",
    ..chat("MinerU", "https://mineru.net/api/v4", ChatKnobs::standard())
};

const GROQ: VendorProfile = VendorProfile {
    default_model: Some("meta-llama/llama-4-scout-17b-16e-instruct"),
    max_base64_len: Some(4 * 1024 * 1024),
    ..chat(
        "Groq",
        "https://api.groq.com/openai/v1",
        ChatKnobs {
            token_limit: TokenLimit::MaxCompletionTokens,
            temperature: Some(0.2),
            ..ChatKnobs::standard()
        },
    )
};

const INFINIGENCE: VendorProfile = VendorProfile {
    extra_headers: &[("Accept", "application/json, text/event-stream")],
    ..chat(
        "Infinigence",
        "https://cloud.infini-ai.com/maas/v1",
        ChatKnobs {
            temperature: Some(0.7),
            disable_stream: true,
            enable_thinking_flag: true,
            ..ChatKnobs::standard()
        },
    )
};

const MISTRAL: VendorProfile = VendorProfile {
    default_model: Some("pixtral-12b-2409"),
    ..chat(
        "Mistral",
        "https://api.mistral.ai/v1",
        ChatKnobs {
            disable_stream: true,
            ..ChatKnobs::standard()
        },
    )
};

const INTERN: VendorProfile = VendorProfile {
    default_model: Some("internvl3.5-241b-a28b"),
    ..chat(
        "Intern",
        "https://chat.intern-ai.org.cn/api/v1",
        ChatKnobs {
            disable_stream: true,
            thinking_mode_flag: true,
            ..ChatKnobs::standard()
        },
    )
};

const GEMINI: VendorProfile = VendorProfile {
    display_name: "Google Gemini",
    default_base: "https://generativelanguage.googleapis.com/v1beta",
    path: "/models/{model}:generateContent",
    auth: Auth::QueryKey,
    flavour: Flavour::GeminiContents,
    default_model: None,
    max_base64_len: None,
    extra_headers: &[],
};

const OLLAMA: VendorProfile = VendorProfile {
    display_name: "Ollama",
    default_base: "http://localhost:11434/api",
    path: "/generate",
    auth: Auth::None,
    flavour: Flavour::OllamaGenerate,
    default_model: None,
    max_base64_len: None,
    extra_headers: &[],
};

/// Supported vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Gemini,
    Xai,
    OpenRouter,
    SiliconFlow,
    Doubao,
    Alibaba,
    Zhipu,
    MinerU,
    Ollama,
    Groq,
    Infinigence,
    Mistral,
    ModelScope,
    Intern,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 15] = [
        ProviderKind::OpenAi,
        ProviderKind::Gemini,
        ProviderKind::Xai,
        ProviderKind::OpenRouter,
        ProviderKind::SiliconFlow,
        ProviderKind::Doubao,
        ProviderKind::Alibaba,
        ProviderKind::Zhipu,
        ProviderKind::MinerU,
        ProviderKind::Ollama,
        ProviderKind::Groq,
        ProviderKind::Infinigence,
        ProviderKind::Mistral,
        ProviderKind::ModelScope,
        ProviderKind::Intern,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Xai => "xai",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::SiliconFlow => "siliconflow",
            ProviderKind::Doubao => "doubao",
            ProviderKind::Alibaba => "alibaba",
            ProviderKind::Zhipu => "zhipu",
            ProviderKind::MinerU => "mineru",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Groq => "groq",
            ProviderKind::Infinigence => "infinigence",
            ProviderKind::Mistral => "mistral",
            ProviderKind::ModelScope => "modelscope",
            ProviderKind::Intern => "intern",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        ProviderKind::ALL.into_iter().find(|k| k.as_str() == s)
    }

    pub fn profile(&self) -> &'static VendorProfile {
        match self {
            ProviderKind::OpenAi => &OPENAI,
            ProviderKind::Gemini => &GEMINI,
            ProviderKind::Xai => &XAI,
            ProviderKind::OpenRouter => &OPENROUTER,
            ProviderKind::SiliconFlow => &SILICONFLOW,
            ProviderKind::Doubao => &DOUBAO,
            ProviderKind::Alibaba => &ALIBABA,
            ProviderKind::Zhipu => &ZHIPU,
            ProviderKind::MinerU => &MINERU,
            ProviderKind::Ollama => &OLLAMA,
            ProviderKind::Groq => &GROQ,
            ProviderKind::Infinigence => &INFINIGENCE,
            ProviderKind::Mistral => &MISTRAL,
            ProviderKind::ModelScope => &MODELSCOPE,
            ProviderKind::Intern => &INTERN,
        }
    }

    pub fn requires_credential(&self) -> bool {
        self.profile().auth != Auth::None
    }

    /// Environment variable consulted when no key is configured, e.g. `GROQ_API_KEY`.
    pub fn key_env_var(&self) -> String {
        format!("{}_API_KEY", self.as_str().to_uppercase())
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable per-session provider record.
#[derive(Clone)]
pub struct ProviderSpec {
    kind: ProviderKind,
    endpoint_base: String,
    model: String,
    credential: Option<String>,
}

impl fmt::Debug for ProviderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSpec")
            .field("kind", &self.kind)
            .field("endpoint_base", &self.endpoint_base)
            .field("model", &self.model)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ProviderSpec {
    /// Resolve defaults and check that the vendor can be called at all.
    pub fn new(
        kind: ProviderKind,
        model: Option<String>,
        credential: Option<String>,
        endpoint: Option<String>,
    ) -> Result<Self, OcrError> {
        let profile = kind.profile();
        let credential = credential.filter(|k| !k.trim().is_empty());
        if kind.requires_credential() && credential.is_none() {
            return Err(OcrError::Configuration(format!(
                "{} requires an API key (set provider.api_key or {})",
                profile.display_name,
                kind.key_env_var()
            )));
        }

        let model = model
            .filter(|m| !m.trim().is_empty())
            .or_else(|| profile.default_model.map(str::to_string))
            .ok_or_else(|| {
                OcrError::Configuration(format!(
                    "{} has no default model; set provider.model",
                    profile.display_name
                ))
            })?;

        let endpoint_base = endpoint
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| profile.default_base.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            kind,
            endpoint_base,
            model,
            credential,
        })
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint_base(&self) -> &str {
        &self.endpoint_base
    }

    fn path(&self) -> String {
        self.kind.profile().path.replace("{model}", &self.model)
    }

    /// Full request URL, including the key for query-key vendors.
    pub fn endpoint_url(&self) -> String {
        let url = format!("{}{}", self.endpoint_base, self.path());
        match (self.kind.profile().auth, &self.credential) {
            (Auth::QueryKey, Some(key)) => format!("{}?key={}", url, key),
            _ => url,
        }
    }

    /// URL safe to put in logs.
    pub fn display_url(&self) -> String {
        format!("{}{}", self.endpoint_base, self.path())
    }

    pub fn headers(&self) -> Vec<(String, String)> {
        let profile = self.kind.profile();
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let (Auth::Bearer, Some(key)) = (profile.auth, &self.credential) {
            headers.push(("Authorization".to_string(), format!("Bearer {}", key)));
        }
        for (name, value) in profile.extra_headers {
            headers.push((name.to_string(), value.to_string()));
        }
        headers
    }

    /// Serialized JSON body for one image.
    pub fn build_request(&self, image: &[u8], mime_type: &str, prompt: &str) -> Result<String, OcrError> {
        let image_base64 = base64::engine::general_purpose::STANDARD.encode(image);
        let profile = self.kind.profile();
        if let Some(limit) = profile.max_base64_len {
            if image_base64.len() > limit {
                return Err(OcrError::PayloadTooLarge {
                    provider: self.name().to_string(),
                    size: image_base64.len(),
                    limit,
                });
            }
        }

        payload::encode(profile, &self.model, &image_base64, mime_type, prompt).map_err(|e| {
            OcrError::Parse {
                provider: self.name().to_string(),
                message: format!("failed to encode request: {}", e),
            }
        })
    }

    /// Content value of a 2xx reply body.
    pub fn parse_reply(&self, body: &str) -> Result<Value, OcrError> {
        payload::decode(&self.kind.profile().flavour, body).map_err(|message| OcrError::Parse {
            provider: self.name().to_string(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(kind: ProviderKind, model: Option<&str>) -> ProviderSpec {
        ProviderSpec::new(kind, model.map(String::from), Some("sk-test".to_string()), None).unwrap()
    }

    fn body(spec: &ProviderSpec) -> Value {
        serde_json::from_str(&spec.build_request(b"img", "image/jpeg", "read it").unwrap()).unwrap()
    }

    #[test]
    fn test_every_kind_round_trips_name() {
        for kind in ProviderKind::ALL {
            assert_eq!(ProviderKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(ProviderKind::from_str(" Groq "), Some(ProviderKind::Groq));
        assert_eq!(ProviderKind::from_str("nope"), None);
    }

    #[test]
    fn test_gemini_url_uses_query_key() {
        let s = spec(ProviderKind::Gemini, Some("gemini-2.0-flash"));
        assert_eq!(
            s.endpoint_url(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent?key=sk-test"
        );
        assert!(!s.display_url().contains("sk-test"));
        assert!(s.headers().iter().all(|(k, _)| k != "Authorization"));
    }

    #[test]
    fn test_gemini_body_shape() {
        let b = body(&spec(ProviderKind::Gemini, Some("m")));
        assert_eq!(b["contents"][0]["parts"][0]["text"], "read it");
        assert_eq!(b["contents"][0]["parts"][1]["inline_data"]["mime_type"], "image/jpeg");
        assert_eq!(b["contents"][0]["parts"][1]["inline_data"]["data"], "aW1n");
    }

    #[test]
    fn test_groq_defaults_and_knobs() {
        let s = spec(ProviderKind::Groq, None);
        assert_eq!(s.model(), "meta-llama/llama-4-scout-17b-16e-instruct");
        assert_eq!(s.endpoint_url(), "https://api.groq.com/openai/v1/chat/completions");
        let b = body(&s);
        assert_eq!(b["max_completion_tokens"], 5000);
        assert!(b.get("max_tokens").is_none());
        assert!((b["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
        assert_eq!(
            b["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,aW1n"
        );
        assert!(s
            .headers()
            .contains(&("Authorization".to_string(), "Bearer sk-test".to_string())));
    }

    #[test]
    fn test_groq_payload_limit() {
        let s = spec(ProviderKind::Groq, None);
        let big = vec![0u8; 3 * 1024 * 1024 + 16];
        let err = s.build_request(&big, "image/jpeg", "p").unwrap_err();
        assert!(matches!(err, OcrError::PayloadTooLarge { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_vendor_knobs() {
        let b = body(&spec(ProviderKind::Doubao, Some("m")));
        assert_eq!(b["thinking"], json!({"type": "disabled"}));
        assert_eq!(b["max_tokens"], 5000);

        let b = body(&spec(ProviderKind::Alibaba, Some("m")));
        assert_eq!(b["parameters"], json!({"max_tokens": 5000}));
        assert!(b.get("max_tokens").is_none());

        let b = body(&spec(ProviderKind::Infinigence, Some("m")));
        assert_eq!(b["stream"], false);
        assert_eq!(b["enable_thinking"], false);

        let b = body(&spec(ProviderKind::Intern, None));
        assert_eq!(b["model"], "internvl3.5-241b-a28b");
        assert_eq!(b["thinking_mode"], false);

        let b = body(&spec(ProviderKind::OpenRouter, Some("m")));
        assert!(b.get("max_tokens").is_none());
        assert!(b.get("stream").is_none());
    }

    #[test]
    fn test_openrouter_extra_headers() {
        let headers = spec(ProviderKind::OpenRouter, Some("m")).headers();
        assert!(headers.iter().any(|(k, _)| k == "HTTP-Referer"));
        assert!(headers.iter().any(|(k, _)| k == "X-Title"));
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let s = ProviderSpec::new(ProviderKind::Ollama, Some("llava".into()), None, None).unwrap();
        assert_eq!(s.endpoint_url(), "http://localhost:11434/api/generate");
        let b: Value = serde_json::from_str(&s.build_request(b"img", "image/png", "p").unwrap()).unwrap();
        assert_eq!(b, json!({"model": "llava", "prompt": "p", "images": ["aW1n"], "stream": false}));
    }

    #[test]
    fn test_missing_key_and_model_rejected() {
        let err = ProviderSpec::new(ProviderKind::OpenAi, Some("gpt".into()), None, None).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
        let err = ProviderSpec::new(ProviderKind::OpenAi, None, Some("k".into()), None).unwrap_err();
        assert!(matches!(err, OcrError::Configuration(_)));
    }

    #[test]
    fn test_endpoint_override_trims_slash() {
        let s = ProviderSpec::new(
            ProviderKind::MinerU,
            Some("m".into()),
            Some("k".into()),
            Some("http://proxy.local/v4/".into()),
        )
        .unwrap();
        assert_eq!(s.endpoint_url(), "http://proxy.local/v4/extract/task");
    }

    #[test]
    fn test_parse_chat_reply() {
        let s = spec(ProviderKind::Mistral, None);
        let reply = r#"{"choices": [{"message": {"content": "hello"}}]}"#;
        assert_eq!(s.parse_reply(reply).unwrap(), json!("hello"));
        let reply = r#"{"choices": [{"message": {"content": null}}]}"#;
        assert_eq!(s.parse_reply(reply).unwrap(), json!(""));
    }

    #[test]
    fn test_parse_error_object() {
        let s = spec(ProviderKind::Groq, None);
        let err = s
            .parse_reply(r#"{"error": {"message": "model not found"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("model not found"));
        assert!(s.parse_reply("   ").is_err());
        assert!(s.parse_reply("<html>").is_err());
    }

    #[test]
    fn test_parse_gemini_parts_concatenated() {
        let s = spec(ProviderKind::Gemini, Some("m"));
        let reply = r#"{"candidates": [{"content": {"parts": [{"text": "ab"}, {"text": "cd"}]}}]}"#;
        assert_eq!(s.parse_reply(reply).unwrap(), json!("abcd"));
    }

    #[test]
    fn test_parse_ollama() {
        let s = ProviderSpec::new(ProviderKind::Ollama, Some("llava".into()), None, None).unwrap();
        assert_eq!(s.parse_reply(r#"{"response": "x", "done": true}"#).unwrap(), json!("x"));
    }

    #[test]
    fn test_debug_redacts_key() {
        let s = spec(ProviderKind::OpenAi, Some("gpt"));
        assert!(!format!("{:?}", s).contains("sk-test"));
    }
}
