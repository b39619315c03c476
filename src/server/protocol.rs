//! Line-delimited JSON messages of the query endpoint.
//!
//! Every line on stdin is one [`ClientMessage`]; every line on stdout one [`ServerMessage`].

use serde::{Deserialize, Serialize};

/// Error kind reported for lines that are not valid requests
pub const INVALID_REQUEST: &str = "InvalidRequest";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Ask a question; the server generates an id when none is given
    Ask {
        #[serde(default)]
        id: Option<String>,
        question: String,
    },
    /// Cancel an in-flight question
    Cancel { id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Answer fragment; an empty `data` ends the answer
    Fragment { id: String, data: String },
    Error {
        id: Option<String>,
        kind: String,
        message: String,
    },
    Cancelled { id: String },
}

impl ServerMessage {
    #[inline]
    pub fn fragment(id: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Fragment {
            id: id.into(),
            data: data.into(),
        }
    }

    #[inline]
    pub fn error(id: Option<String>, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            id,
            kind: kind.into(),
            message: message.into(),
        }
    }

    #[inline]
    pub fn invalid_request(id: Option<String>, message: impl Into<String>) -> Self {
        Self::error(id, INVALID_REQUEST, message)
    }
}

/// Parse one input line
#[inline]
pub fn parse_client_message(line: &str) -> Result<ClientMessage, String> {
    serde_json::from_str(line).map_err(|e| format!("Invalid request: {}", e))
}
