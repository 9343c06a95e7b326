//! Push notifications through an ntfy server.

use std::time::Duration;

use bmcfan_traits::{BoxError, Notifier, Priority};

use crate::error::HwError;

pub struct NtfyNotifier {
    client: reqwest::blocking::Client,
    url: String,
    token: Option<String>,
    timeout: Duration,
}

/// `https://<host>/<topic>`, unless `host` already carries a scheme.
pub fn topic_url(host: &str, topic: &str) -> String {
    let host = host.trim_end_matches('/');
    let topic = topic.trim_start_matches('/');
    if host.contains("://") {
        format!("{host}/{topic}")
    } else {
        format!("https://{host}/{topic}")
    }
}

impl NtfyNotifier {
    pub fn new(
        host: &str,
        topic: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, HwError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HwError::Http(e.to_string()))?;
        Ok(Self {
            client,
            url: topic_url(host, topic),
            token: token.filter(|t| !t.is_empty()),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Notifier for NtfyNotifier {
    fn send(&mut self, title: &str, body: &str, priority: Priority) -> Result<(), BoxError> {
        let mut req = self
            .client
            .post(&self.url)
            .header("Title", title)
            .header("Priority", priority.level().to_string())
            .body(body.to_owned());
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().map_err(|e| {
            if e.is_timeout() {
                HwError::Timeout {
                    program: "ntfy".into(),
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                }
            } else {
                HwError::Http(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(Box::new(HwError::Http(format!("HTTP {status}: {}", text.trim()))));
        }
        tracing::debug!(url = %self.url, %status, "ntfy accepted message");
        Ok(())
    }
}

/// Stand-in used when push notifications are disabled: every message is
/// written to the log instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&mut self, title: &str, body: &str, priority: Priority) -> Result<(), BoxError> {
        match priority {
            Priority::High | Priority::Urgent => {
                tracing::warn!(title, body, priority = priority.level(), "notification");
            }
            _ => tracing::info!(title, body, priority = priority.level(), "notification"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ntfy.sh", "bmcfan", "https://ntfy.sh/bmcfan")]
    #[case("ntfy.example.org/", "/fans", "https://ntfy.example.org/fans")]
    #[case("http://10.0.0.2:8080", "r720", "http://10.0.0.2:8080/r720")]
    fn builds_topic_url(#[case] host: &str, #[case] topic: &str, #[case] url: &str) {
        assert_eq!(topic_url(host, topic), url);
    }

    #[test]
    fn empty_token_is_dropped() {
        let n = NtfyNotifier::new("ntfy.sh", "t", Some(String::new()), Duration::from_secs(1))
            .unwrap();
        assert!(n.token.is_none());
        assert_eq!(n.url(), "https://ntfy.sh/t");
    }

    #[test]
    fn unreachable_server_is_an_error_not_a_panic() {
        // Port 9 on localhost is discard/closed on any sane test box.
        let mut n = NtfyNotifier::new("http://127.0.0.1:9", "t", None, Duration::from_millis(500))
            .unwrap();
        assert!(n.send("title", "body", Priority::Low).is_err());
    }
}
