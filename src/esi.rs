use crate::{
    error::LookupError,
    resolver::{NameLookup, NamedId},
};
use std::time::Duration;

pub const DEFAULT_NAMES_ENDPOINT: &str =
    "https://esi.evetech.net/latest/universe/names/?datasource=tranquility";
const USER_AGENT: &str = concat!("podsmith/", env!("CARGO_PKG_VERSION"));

/// Anonymous client for the public bulk id -> name endpoint.
pub struct EsiClient {
    agent: ureq::Agent,
    endpoint: String,
}

impl EsiClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout.min(Duration::from_secs(5)))
            .timeout(timeout)
            .build();
        Self {
            agent,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl NameLookup for EsiClient {
    fn lookup(&self, ids: &[u64]) -> Result<Vec<NamedId>, LookupError> {
        let response = self
            .agent
            .post(&self.endpoint)
            .set("User-Agent", USER_AGENT)
            .set("Accept", "application/json")
            .send_json(ids);

        match response {
            Ok(response) => response
                .into_json::<Vec<NamedId>>()
                .map_err(|err| LookupError::Malformed(err.to_string())),
            Err(ureq::Error::Status(status, _)) => Err(classify_status(status)),
            Err(ureq::Error::Transport(transport)) => {
                Err(LookupError::Transport(transport.to_string()))
            }
        }
    }
}

/// 420 is the service's error-limit throttle; treat it like a 5xx so it is retried.
fn classify_status(status: u16) -> LookupError {
    match status {
        420 | 429 | 500..=599 => LookupError::Server { status },
        _ => LookupError::Rejected { status },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io::{BufRead, BufReader, Read, Write},
        net::TcpListener,
        sync::mpsc,
        thread,
    };

    /// Answers exactly one HTTP request and hands back the request body.
    fn serve_once(status: &'static str, body: &'static str) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).expect("header");
                let trimmed = line.trim_end();
                if trimmed.is_empty() {
                    break;
                }
                if let Some((name, value)) = trimmed.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                }
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).expect("body");
            let _ = tx.send(String::from_utf8_lossy(&request_body).to_string());

            let mut stream = stream;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).expect("respond");
        });
        (format!("http://{addr}/universe/names/"), rx)
    }

    #[test]
    fn posts_ids_and_decodes_names() {
        let (url, requests) = serve_once(
            "200 OK",
            r#"[{"category":"character","id":2114794365,"name":"CCP Falcon"}]"#,
        );
        let client = EsiClient::new(url, Duration::from_secs(5));

        let names = client.lookup(&[2114794365, 42]).expect("lookup");

        assert_eq!(
            names,
            vec![NamedId {
                id: 2114794365,
                name: "CCP Falcon".to_string()
            }]
        );
        assert_eq!(requests.recv().expect("request"), "[2114794365,42]");
    }

    #[test]
    fn not_found_is_a_rejection() {
        let (url, _requests) = serve_once(
            "404 Not Found",
            r#"{"error":"Ensure all IDs are valid before resolving."}"#,
        );
        let client = EsiClient::new(url, Duration::from_secs(5));

        let err = client.lookup(&[1]).expect_err("rejected");
        assert!(matches!(err, LookupError::Rejected { status: 404 }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn server_errors_are_retryable() {
        let (url, _requests) = serve_once("503 Service Unavailable", "{}");
        let client = EsiClient::new(url, Duration::from_secs(5));

        let err = client.lookup(&[1]).expect_err("server error");
        assert!(matches!(err, LookupError::Server { status: 503 }));
        assert!(err.is_retryable());
    }

    #[test]
    fn malformed_body_is_reported() {
        let (url, _requests) = serve_once("200 OK", r#"{"unexpected":true}"#);
        let client = EsiClient::new(url, Duration::from_secs(5));

        let err = client.lookup(&[1]).expect_err("malformed");
        assert!(matches!(err, LookupError::Malformed(_)));
    }

    #[test]
    fn unreachable_service_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let client = EsiClient::new(format!("http://{addr}/"), Duration::from_secs(2));

        let err = client.lookup(&[1]).expect_err("transport");
        assert!(matches!(err, LookupError::Transport(_)));
    }

    #[test]
    fn throttling_counts_as_server_side() {
        assert!(classify_status(420).is_retryable());
        assert!(!classify_status(400).is_retryable());
    }
}
