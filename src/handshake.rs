use std::sync::{Arc, Mutex};

use tokio_tungstenite::tungstenite::handshake::server::{Callback, ErrorResponse, Request, Response};

/// websocket upgrade callback that pulls an optional subdomain-encoded
/// session hint out of the `Host` header, so a client dialing
/// `s1.example.com` auto-joins session `s1` once connected.
///
/// unlike the reference server's `Guarder` (`service/signaling/src/guarder.rs`),
/// this performs no authentication — end-user auth is out of scope for this
/// core — it only extracts a hint and always accepts the upgrade.
pub struct SubdomainHint {
    hint: Arc<Mutex<Option<String>>>,
}

impl SubdomainHint {
    pub fn new() -> (Self, Arc<Mutex<Option<String>>>) {
        let hint = Arc::new(Mutex::new(None));
        (Self { hint: hint.clone() }, hint)
    }
}

impl Callback for SubdomainHint {
    fn on_request(self, request: &Request, response: Response) -> Result<Response, ErrorResponse> {
        if let Some(host) = request.headers().get(http::header::HOST).and_then(|v| v.to_str().ok()) {
            if let Some(label) = subdomain_label(host) {
                *self.hint.lock().unwrap() = Some(label);
            }
        }

        Ok(response)
    }
}

/// first label of a host header, if the host has more than the bare
/// `example.tld` (so `s1.example.com` yields `Some("s1")` and
/// `example.com` yields `None`).
fn subdomain_label(host: &str) -> Option<String> {
    let host = host.split(':').next().unwrap_or(host);
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() > 2 {
        Some(labels[0].to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::subdomain_label;

    #[test]
    fn extracts_leading_label() {
        assert_eq!(subdomain_label("s1.example.com"), Some("s1".to_string()));
        assert_eq!(subdomain_label("s1.example.com:8765"), Some("s1".to_string()));
    }

    #[test]
    fn bare_domain_has_no_hint() {
        assert_eq!(subdomain_label("example.com"), None);
        assert_eq!(subdomain_label("localhost"), None);
    }
}
