use std::time::Duration;

use super::SendError;

/// Default per-request transport timeout.
pub(crate) const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

// Everything the server might recover from is transient; remaining 4xx
// mean the payload itself is unacceptable.
pub(crate) fn classify_status(code: u16, url: &str) -> SendError {
    if code == 429 || code >= 500 {
        SendError::Transient(format!("{url} returned {code}"))
    } else {
        SendError::Fatal(format!("{url} returned {code}"))
    }
}

/// Shared blocking HTTP plumbing for the JSON endpoints.
pub(crate) struct HttpTransport {
    agent: ureq::Agent,
    headers: Vec<(&'static str, String)>,
}

impl HttpTransport {
    pub(crate) fn new(timeout: Duration, headers: Vec<(&'static str, String)>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            headers,
        }
    }

    pub(crate) fn post_json(&self, url: &str, body: &[u8]) -> Result<(), SendError> {
        let mut request = self
            .agent
            .post(url)
            .set("Content-Type", "application/json");
        for (name, value) in &self.headers {
            request = request.set(name, value);
        }
        match request.send_bytes(body) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, _)) => Err(classify_status(code, url)),
            Err(err @ ureq::Error::Transport(_)) => Err(SendError::Transient(err.to_string())),
        }
    }
}

// Joins a base URL and an absolute path without doubling the slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}{path}", base.trim_end_matches('/'))
}
