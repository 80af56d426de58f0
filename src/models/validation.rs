use anyhow::{Result, anyhow};

use crate::models::message::AdminNotificationMessage;

pub const MAX_SUBJECT_LENGTH: usize = 150;

pub fn validate_email_address(address: &str) -> Result<()> {
    if address.trim().is_empty() {
        return Err(anyhow!("Email address cannot be empty"));
    }

    let (local, domain) = address
        .split_once('@')
        .ok_or_else(|| anyhow!("Email address is missing '@'"))?;

    if local.is_empty() || domain.is_empty() {
        return Err(anyhow!("Email address must have a local part and a domain"));
    }

    if domain.contains('@') || address.chars().any(char::is_whitespace) {
        return Err(anyhow!("Email address contains invalid characters"));
    }

    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(anyhow!("Email domain '{}' is not valid", domain));
    }

    Ok(())
}

pub fn validate_admin_notification(message: &AdminNotificationMessage) -> Result<()> {
    validate_email_address(&message.admin_email)
        .map_err(|e| anyhow!("Invalid admin email: {}", e))?;

    if message.subject.trim().is_empty() {
        return Err(anyhow!("Subject cannot be empty"));
    }

    if message.subject.chars().count() > MAX_SUBJECT_LENGTH {
        return Err(anyhow!(
            "Subject too long (maximum {} characters)",
            MAX_SUBJECT_LENGTH
        ));
    }

    if message.body.trim().is_empty() {
        return Err(anyhow!("Body cannot be empty"));
    }

    Ok(())
}
