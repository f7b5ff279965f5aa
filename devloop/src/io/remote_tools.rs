//! Tool calls forwarded to a tool server over HTTP.
//!
//! Each call is `POST {endpoint}/tools/{name}` with the call's parameters as
//! the JSON body; the reply text is read from `content[*].text`. When the
//! server cannot be reached the call is simulated locally and the reply is
//! marked [`ToolReply::Degraded`].

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::io::config::ToolsConfig;
use crate::io::toolbox::{ToolCall, ToolReply, Toolbox};

#[derive(Debug, Deserialize)]
struct ToolResponse {
    #[serde(default)]
    content: Vec<ContentItem>,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(default)]
    text: String,
}

impl ToolResponse {
    fn into_text(self) -> String {
        self.content
            .into_iter()
            .map(|item| item.text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// HTTP client for a tool server.
pub struct HttpToolbox {
    endpoint: String,
    agent: ureq::Agent,
    /// Used by simulated directory listings.
    workspace: PathBuf,
}

impl HttpToolbox {
    pub fn new(endpoint: &str, timeout: Duration, workspace: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            workspace: workspace.into(),
        }
    }

    pub fn from_config(cfg: &ToolsConfig, workspace: impl Into<PathBuf>) -> Self {
        Self::new(
            &cfg.endpoint,
            Duration::from_secs(cfg.request_timeout_secs),
            workspace,
        )
    }

    fn url(&self, call: &ToolCall) -> String {
        format!("{}/tools/{}", self.endpoint, call.name())
    }

    /// Stand-in text for a call the server could not take.
    fn simulate(&self, call: &ToolCall) -> String {
        match call {
            ToolCall::ListDirectory { path, .. } => {
                let dir = self.workspace.join(path);
                match fs::read_dir(&dir) {
                    Ok(entries) => {
                        let mut names: Vec<String> = entries
                            .filter_map(Result::ok)
                            .map(|entry| {
                                let kind = if entry.path().is_dir() { "[DIR]" } else { "[FILE]" };
                                format!("{kind} {}", entry.file_name().to_string_lossy())
                            })
                            .collect();
                        names.sort();
                        names.join("\n")
                    }
                    Err(_) => format!("Directory {path} is empty or does not exist yet"),
                }
            }
            ToolCall::ReadFile { path } => format!("Simulated content of {path}"),
            ToolCall::WriteFile { path, .. } => format!("File {path} written (simulated)"),
            ToolCall::MoveFile { from, to } => format!("Moved {from} to {to} (simulated)"),
            ToolCall::RunCommand { command, .. } => {
                format!("Command executed (simulated): {command}")
            }
            ToolCall::CommitPush { .. } => "Changes committed (simulated)".to_string(),
            ToolCall::ScanProject { path } => format!("Scanned {path} (simulated)"),
            ToolCall::UpdateFeature { id, progress, .. } => {
                format!("Feature {id} at {progress}% (simulated)")
            }
        }
    }
}

impl Toolbox for HttpToolbox {
    #[instrument(skip_all, fields(tool = call.name()))]
    fn invoke(&self, call: &ToolCall) -> Result<ToolReply> {
        let url = self.url(call);
        debug!(url = %url, "calling tool server");
        match self.agent.post(&url).send_json(call.params()) {
            Ok(response) => {
                let body: ToolResponse = response
                    .into_json()
                    .with_context(|| format!("decode response from {url}"))?;
                Ok(ToolReply::Nominal(body.into_text()))
            }
            Err(ureq::Error::Status(code, response)) => {
                let detail = response.into_string().unwrap_or_default();
                Err(anyhow!(
                    "tool {} failed with HTTP {code}: {}",
                    call.name(),
                    detail.trim()
                ))
            }
            Err(ureq::Error::Transport(transport)) => {
                warn!(error = %transport, "tool server unreachable, simulating");
                Ok(ToolReply::Degraded(self.simulate(call)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve one HTTP request with `status` and `body`, returning the request
    /// line and JSON body that were received.
    fn serve_once(status: &str, body: &str) -> (String, thread::JoinHandle<(String, String)>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = format!("http://{}", listener.local_addr().expect("addr"));
        let status = status.to_string();
        let body = body.to_string();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut request_line = String::new();
            reader.read_line(&mut request_line).expect("request line");
            let mut content_length = 0usize;
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).expect("header");
                let header = header.trim_end();
                if header.is_empty() {
                    break;
                }
                if let Some((name, value)) = header.split_once(':')
                    && name.eq_ignore_ascii_case("content-length")
                {
                    content_length = value.trim().parse().expect("length");
                }
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).expect("body");
            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .expect("respond");
            (
                request_line.trim_end().to_string(),
                String::from_utf8(request_body).expect("utf8"),
            )
        });
        (addr, handle)
    }

    #[test]
    fn posts_params_and_reads_content_text() {
        let (addr, server) = serve_once("200 OK", r#"{"content":[{"type":"text","text":"ok"}]}"#);
        let tools = HttpToolbox::new(&addr, Duration::from_secs(5), ".");
        let reply = tools
            .invoke(&ToolCall::RunCommand {
                command: "pytest".to_string(),
                workdir: "code".to_string(),
            })
            .expect("invoke");
        assert_eq!(reply, ToolReply::Nominal("ok".to_string()));

        let (request_line, body) = server.join().expect("server");
        assert!(request_line.starts_with("POST /tools/run_command "));
        let body: serde_json::Value = serde_json::from_str(&body).expect("json body");
        assert_eq!(body, serde_json::json!({"command": "pytest", "workdir": "code"}));
    }

    #[test]
    fn http_error_status_is_an_error() {
        let (addr, server) = serve_once("500 Internal Server Error", r#"{"error":"boom"}"#);
        let tools = HttpToolbox::new(&addr, Duration::from_secs(5), ".");
        let err = tools
            .invoke(&ToolCall::ReadFile {
                path: "code/a.py".to_string(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 500"));
        server.join().expect("server");
    }

    #[test]
    fn unreachable_server_degrades_to_simulation() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = format!("http://{}", listener.local_addr().expect("addr"));
        drop(listener);

        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("code").join("pkg")).expect("mkdir");
        fs::write(temp.path().join("code").join("app.py"), "").expect("write");
        let tools = HttpToolbox::new(&addr, Duration::from_secs(2), temp.path());

        let listing = tools
            .invoke(&ToolCall::ListDirectory {
                path: "code".to_string(),
                recursive: true,
            })
            .expect("invoke");
        assert!(listing.is_degraded());
        assert_eq!(listing.text(), "[DIR] pkg\n[FILE] app.py");

        let run = tools
            .invoke(&ToolCall::RunCommand {
                command: "pytest".to_string(),
                workdir: "code".to_string(),
            })
            .expect("invoke");
        assert_eq!(
            run,
            ToolReply::Degraded("Command executed (simulated): pytest".to_string())
        );
    }
}
