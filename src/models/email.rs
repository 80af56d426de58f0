use serde::{Deserialize, Serialize};

/// Outbound email handed to the mail subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    pub to_email: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_name: Option<String>,

    pub subject: String,
    pub body: String,
    pub is_html: bool,
}

impl EmailMessage {
    pub fn html(to_email: String, to_name: Option<String>, subject: String, body: String) -> Self {
        Self {
            to_email,
            to_name,
            subject,
            body,
            is_html: true,
        }
    }

    pub fn plain(to_email: String, to_name: Option<String>, subject: String, body: String) -> Self {
        Self {
            to_email,
            to_name,
            subject,
            body,
            is_html: false,
        }
    }
}
