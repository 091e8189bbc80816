use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug)]
pub struct Health {
    pub status: &'static str,
}

/// JSON error envelope returned by HTTP handlers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorBody {
    pub code: u16,
    pub error: String,
}

impl ErrorBody {
    pub fn new(code: u16, error: impl Into<String>) -> Self {
        Self { code, error: error.into() }
    }
}
