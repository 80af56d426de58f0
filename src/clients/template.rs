use std::collections::HashMap;

use anyhow::{Error, Result, anyhow};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::models::booking::Booking;

const DATE_FORMAT: &str = "%B %-d, %Y";
const NO_DESTINATIONS: &str = "Not specified";

const BOOKING_CONFIRMATION_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8" />
    <title>Booking Confirmation</title>
</head>
<body style="margin:0;padding:0;background-color:#0b1412;font-family:'Segoe UI',Arial,sans-serif;color:#f8fafc;">
    <table role="presentation" cellpadding="0" cellspacing="0" width="560" align="center" style="padding:40px 36px;">
        <tr><td>
            <p style="margin:0 0 12px;font-size:14px;text-transform:uppercase;color:#9ae6b4;">Booking Confirmed</p>
            <h1 style="margin:0 0 16px;font-size:28px;">Thank you, {{user_name}}!</h1>
            <p style="margin:0 0 28px;font-size:16px;color:#e2e8f0;">We're thrilled to confirm your stay. Below are the details of your upcoming experience.</p>
            <table role="presentation" cellpadding="0" cellspacing="0" width="100%" style="font-size:15px;line-height:24px;">
                <tr><td><strong>Booking ID</strong></td><td>#{{booking_id}}</td></tr>
                <tr><td><strong>Destinations</strong></td><td>{{destinations}}</td></tr>
                <tr><td><strong>Check-in</strong></td><td>{{start_date}}</td></tr>
                <tr><td><strong>Check-out</strong></td><td>{{end_date}}</td></tr>
                <tr><td><strong>Nights</strong></td><td>{{nights}}</td></tr>
                <tr><td><strong>Guests</strong></td><td>{{guests}}</td></tr>
                <tr><td><strong>Total</strong></td><td>${{total_price}}</td></tr>
            </table>
        </td></tr>
    </table>
</body>
</html>"#;

const RESCHEDULE_CONFIRMATION_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8" />
    <title>Trip Rescheduled</title>
</head>
<body style="margin:0;padding:0;background-color:#0b1412;font-family:'Segoe UI',Arial,sans-serif;color:#f8fafc;">
    <table role="presentation" cellpadding="0" cellspacing="0" width="560" align="center" style="padding:40px 36px;">
        <tr><td>
            <p style="margin:0 0 12px;font-size:14px;text-transform:uppercase;color:#9ae6b4;">Trip Rescheduled</p>
            <h1 style="margin:0 0 16px;font-size:28px;">Your new dates are confirmed, {{user_name}}</h1>
            <p style="margin:0 0 28px;font-size:16px;color:#e2e8f0;">Your trip has been moved successfully. Here is your updated itinerary.</p>
            <table role="presentation" cellpadding="0" cellspacing="0" width="100%" style="font-size:15px;line-height:24px;">
                <tr><td><strong>Booking ID</strong></td><td>#{{booking_id}}</td></tr>
                <tr><td><strong>Destinations</strong></td><td>{{destinations}}</td></tr>
                <tr><td><strong>New start date</strong></td><td>{{start_date}}</td></tr>
                <tr><td><strong>New end date</strong></td><td>{{end_date}}</td></tr>
                <tr><td><strong>Nights</strong></td><td>{{nights}}</td></tr>
                <tr><td><strong>Guests</strong></td><td>{{guests}}</td></tr>
            </table>
        </td></tr>
    </table>
</body>
</html>"#;

/// Renders notification bodies from booking state.
pub trait TemplateBuilder: Send + Sync {
    fn booking_confirmation(
        &self,
        user_name: &str,
        booking: &Booking,
        destination_names: &[String],
    ) -> Result<String, Error>;

    fn reschedule_confirmation(&self, booking: &Booking) -> Result<String, Error>;
}

#[derive(Debug, Default, Clone)]
pub struct HtmlTemplateBuilder;

impl HtmlTemplateBuilder {
    pub fn new() -> Self {
        Self
    }

    fn booking_variables(
        user_name: &str,
        booking: &Booking,
        destination_names: &[String],
    ) -> HashMap<String, Value> {
        let destinations: Vec<&str> = destination_names
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .collect();

        let destinations = if destinations.is_empty() {
            NO_DESTINATIONS.to_string()
        } else {
            destinations.join(", ")
        };

        HashMap::from([
            ("user_name".to_string(), json!(user_name)),
            ("booking_id".to_string(), json!(booking.booking_id)),
            ("destinations".to_string(), json!(destinations)),
            (
                "start_date".to_string(),
                json!(booking.start_date.format(DATE_FORMAT).to_string()),
            ),
            (
                "end_date".to_string(),
                json!(booking.end_date().format(DATE_FORMAT).to_string()),
            ),
            ("nights".to_string(), json!(booking.nights)),
            ("guests".to_string(), json!(booking.guests)),
            (
                "total_price".to_string(),
                json!(format!("{:.2}", booking.total_price)),
            ),
        ])
    }
}

impl TemplateBuilder for HtmlTemplateBuilder {
    fn booking_confirmation(
        &self,
        user_name: &str,
        booking: &Booking,
        destination_names: &[String],
    ) -> Result<String, Error> {
        debug!(booking_id = booking.booking_id, "Rendering booking confirmation");

        let variables = Self::booking_variables(user_name, booking, destination_names);
        replace_variables(BOOKING_CONFIRMATION_TEMPLATE, &variables)
    }

    fn reschedule_confirmation(&self, booking: &Booking) -> Result<String, Error> {
        debug!(booking_id = booking.booking_id, "Rendering reschedule confirmation");

        let variables =
            Self::booking_variables(&booking.user.name, booking, &booking.destination_names());
        replace_variables(RESCHEDULE_CONFIRMATION_TEMPLATE, &variables)
    }
}

/// Substitutes `{{key}}` placeholders with HTML-escaped values.
///
/// Fails if any placeholder is left unreplaced.
pub fn replace_variables(template: &str, variables: &HashMap<String, Value>) -> Result<String, Error> {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);

        let replacement = match value {
            Value::String(s) => escape_html(s),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            _ => {
                return Err(anyhow!("Unsupported variable type for key '{}'", key));
            }
        };

        result = result.replace(&placeholder, &replacement);
    }

    if let Some(start) = result.find("{{")
        && let Some(len) = result[start..].find("}}")
    {
        let missing_var = &result[start..start + len + 2];

        warn!(
            missing_variable = %missing_var,
            "Template contains unreplaced variable"
        );

        return Err(anyhow!("Missing variable in template: {}", missing_var));
    }

    Ok(result)
}

pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());

    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }

    escaped
}
