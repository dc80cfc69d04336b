//! Utility helpers shared by the webhook-style channels.

use serde_json::Value;

use crate::error::{NotifyError, Result};

/// Maximum length for an upstream response body carried in an error detail.
pub const MAX_BODY_LENGTH: usize = 4000;

/// Truncate a string to the specified maximum length.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}... [truncated]", &s[..max_len])
    }
}

/// POST a JSON payload and map a non-2xx response to [`NotifyError::Api`].
pub(crate) async fn post_json(
    client: &reqwest::Client,
    service: &'static str,
    url: &str,
    payload: &Value,
) -> Result<()> {
    let resp = client.post(url).json(payload).send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp
            .text()
            .await
            .unwrap_or_else(|e| format!("[failed to read response body: {e}]"));
        return Err(NotifyError::Api {
            service,
            status: status.as_u16(),
            body: truncate_string(&body, MAX_BODY_LENGTH),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("hello", 10), "hello");
        assert_eq!(truncate_string("hello world", 5), "hello... [truncated]");
    }
}
