//! Built-in transports and their plugins.

pub mod email;
pub mod push;
pub mod sms;

use crate::error::DeliveryError;
use crate::utils::{truncate_string, MAX_ERROR_LENGTH};
use crate::SendReceipt;
use propwatch_common::types::ChannelType;
use serde::Deserialize;

/// Checks that `recipient` has the address format `channel` expects.
///
/// ```
/// use propwatch_common::types::ChannelType;
/// use propwatch_notify::channels::validate_recipient;
///
/// assert!(validate_recipient(ChannelType::Email, "pm@sunset.example").is_ok());
/// assert!(validate_recipient(ChannelType::Sms, "+1 555-000-1234").is_ok());
/// assert!(validate_recipient(ChannelType::Sms, "pm@sunset.example").is_err());
/// ```
pub fn validate_recipient(channel: ChannelType, recipient: &str) -> Result<(), DeliveryError> {
    let ok = match channel {
        ChannelType::Email => is_email(recipient),
        ChannelType::Sms => is_phone(recipient),
        ChannelType::Push => is_device_token(recipient),
    };
    if ok {
        Ok(())
    } else {
        Err(DeliveryError::Rejected(format!(
            "'{recipient}' is not a valid {} recipient",
            channel.recipient_kind()
        )))
    }
}

fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !s.chars().any(char::is_whitespace)
}

/// E.164-style: optional `+`, 7 to 15 digits, spaces and dashes ignored.
fn is_phone(s: &str) -> bool {
    let compact: String = s.chars().filter(|c| !matches!(c, ' ' | '-')).collect();
    let digits = compact.strip_prefix('+').unwrap_or(&compact);
    (7..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

fn is_device_token(s: &str) -> bool {
    !s.is_empty() && s.len() <= 4096 && !s.chars().any(char::is_whitespace)
}

/// Acknowledgement body returned by the SMS and push gateways.
#[derive(Debug, Default, Deserialize)]
struct GatewayAck {
    #[serde(default, alias = "message_id")]
    id: Option<String>,
}

/// Shared response handling for the HTTP gateways.
pub(crate) async fn gateway_response(
    result: reqwest::Result<reqwest::Response>,
) -> Result<SendReceipt, DeliveryError> {
    let resp = result.map_err(|e| DeliveryError::Transient(e.to_string()))?;
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();

    if !status.is_success() {
        return Err(DeliveryError::from_http_status(
            status.as_u16(),
            &truncate_string(&body, MAX_ERROR_LENGTH),
        ));
    }

    let ack: GatewayAck = serde_json::from_str(&body).unwrap_or_default();
    Ok(SendReceipt {
        provider_message_id: ack.id,
    })
}
