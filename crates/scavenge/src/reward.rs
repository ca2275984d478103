use super::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionReceipt {
    pub crypto_receipt: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermsResponse {
    pub version: String,
    pub content: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationReceipt {
    #[serde(rename = "registrationReceipt")]
    pub registration_receipt: Value,
}

/// Error body returned by the reward API on non-2xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(rename = "statusCode", default)]
    pub status_code: Option<u16>,
}

impl ApiErrorBody {
    /// Best human-readable reason, preferring `message` over `error`.
    pub fn reason(&self) -> Option<&str> {
        self.message.as_deref().or(self.error.as_deref())
    }
}
