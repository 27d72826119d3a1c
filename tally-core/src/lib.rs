use {
    std::collections::HashMap,
    serde::{Serialize, Deserialize},
};

pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_ALLOW_ORIGIN: &str = "Access-Control-Allow-Origin";
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Opaque invocation event. The handler never inspects its contents.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Trigger {
    pub payload: Option<Vec<u8>>,
}

impl Trigger {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_payload(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: Some(payload.into()),
        }
    }
}

/// Structured response returned to the hosting layer for every invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl Envelope {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            headers: HashMap::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

/// Success payload carried inside `Envelope::body`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CountBody {
    pub count: u64,
}

/// Failure payload carried inside `Envelope::body`.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageBody {
    pub message: String,
}
