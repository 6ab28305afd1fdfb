//!
//! HTTP client for the remote ledger extract endpoint.
//!
//! The [`LedgerApi`] trait is the seam the sync engine depends on; [`TallyLedgerClient`] is the
//! `reqwest` implementation used in production. Per-request timeouts are enforced by the
//! engine's retry wrapper, not by the client, so the transport has no timeout of its own.

use super::types::*;
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

/// Remote ledger endpoint returning voucher batches for a tenant and date range.
#[async_trait]
pub trait LedgerApi: Send + Sync {
	/// Issue one extract call.
	async fn extract(&self, request: &ExtractRequest) -> Result<ExtractResponse, LedgerError>;
}

/// `reqwest` client for `POST {base_url}/extract`.
#[derive(Clone)]
pub struct TallyLedgerClient {
	/// The underlying HTTP client.
	http_client: Client,
	/// Base URL of the connector API, without a trailing slash.
	base_url: String,
	/// Optional bearer token forwarded on every request.
	auth_token: Option<String>,
}

impl TallyLedgerClient {
	/// Create a new ledger client.
	///
	/// # Arguments
	/// * `base_url` - The connector API root, e.g. `https://connector.example.com/api/tally`.
	pub fn new(base_url: impl Into<String>) -> Result<Self, LedgerError> {
		let http_client = Client::builder().build()?;
		Ok(Self {
			http_client,
			base_url: base_url.into().trim_end_matches('/').to_string(),
			auth_token: None,
		})
	}

	/// Attach a bearer token to every request.
	pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
		self.auth_token = Some(token.into());
		self
	}

	fn extract_url(&self) -> String {
		format!("{}/extract", self.base_url)
	}
}

#[async_trait]
impl LedgerApi for TallyLedgerClient {
	async fn extract(&self, request: &ExtractRequest) -> Result<ExtractResponse, LedgerError> {
		debug!(
			"POST {} ({} -> {}, serverslice={:?}, lastaltid={:?})",
			self.extract_url(),
			request.fromdate,
			request.todate,
			request.serverslice,
			request.lastaltid
		);

		let mut builder = self
			.http_client
			.post(self.extract_url())
			.header("Content-Type", "application/json")
			.json(request);
		if let Some(token) = &self.auth_token {
			builder = builder.bearer_auth(token);
		}

		let response = builder.send().await?;
		let status = response.status();
		let body = response.text().await?;

		if !status.is_success() {
			return Err(LedgerError::Status {
				status: status.as_u16(),
				body,
			});
		}

		Ok(serde_json::from_str::<ExtractResponse>(&body)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::io::{AsyncReadExt, AsyncWriteExt};
	use tokio::net::TcpListener;

	/// Serve exactly one canned HTTP response and hand back the raw request.
	async fn serve_once(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();

		let handle = tokio::spawn(async move {
			let (mut socket, _) = listener.accept().await.unwrap();
			let mut buffer = Vec::new();
			let mut chunk = [0u8; 4096];
			loop {
				let n = socket.read(&mut chunk).await.unwrap();
				if n == 0 {
					break;
				}
				buffer.extend_from_slice(&chunk[..n]);
				let text = String::from_utf8_lossy(&buffer);
				if let Some(header_end) = text.find("\r\n\r\n") {
					let content_length = text[..header_end]
						.lines()
						.find_map(|line| {
							let lower = line.to_ascii_lowercase();
							lower
								.strip_prefix("content-length:")
								.and_then(|v| v.trim().parse::<usize>().ok())
						})
						.unwrap_or(0);
					if buffer.len() >= header_end + 4 + content_length {
						break;
					}
				}
			}

			let response = format!(
				"{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
				status_line,
				body.len(),
				body
			);
			socket.write_all(response.as_bytes()).await.unwrap();
			socket.shutdown().await.ok();
			String::from_utf8_lossy(&buffer).to_string()
		});

		(format!("http://{}", addr), handle)
	}

	fn request() -> ExtractRequest {
		ExtractRequest {
			tallyloc_id: 12,
			company: "Acme Traders".to_string(),
			guid: "5f0c-guid".to_string(),
			fromdate: "20240401".to_string(),
			todate: "20240405".to_string(),
			serverslice: ServerSlice::No,
			lastaltid: Some(900),
		}
	}

	#[tokio::test]
	async fn posts_extract_body_and_decodes_vouchers() {
		let (base_url, server) = serve_once(
			"HTTP/1.1 200 OK",
			r#"{"vouchers":[{"masterid":"1","alterid":901,"vouchernumber":"S/9","date":"20240402"}]}"#,
		)
		.await;

		let client = TallyLedgerClient::new(format!("{}/", base_url))
			.unwrap()
			.with_auth_token("secret");
		let response = client.extract(&request()).await.unwrap();
		let records = response.voucher_records().unwrap();
		assert_eq!(records.len(), 1);
		assert_eq!(records[0].alter_id, Some(901));

		let raw_request = server.await.unwrap();
		assert!(raw_request.starts_with("POST /extract "));
		assert!(raw_request.to_ascii_lowercase().contains("authorization: bearer secret"));
		assert!(raw_request.contains(r#""lastaltid":900"#));
		assert!(raw_request.contains(r#""fromdate":"20240401""#));
	}

	#[tokio::test]
	async fn non_success_status_carries_body() {
		let (base_url, server) =
			serve_once("HTTP/1.1 503 Service Unavailable", r#"{"error":"busy"}"#).await;

		let client = TallyLedgerClient::new(base_url).unwrap();
		let err = client.extract(&request()).await.unwrap_err();
		match &err {
			LedgerError::Status { status, body } => {
				assert_eq!(*status, 503);
				assert!(body.contains("busy"));
			}
			other => panic!("unexpected error: {other:?}"),
		}
		assert!(err.is_transient());
		server.await.unwrap();
	}
}
