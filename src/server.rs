//! Newline-delimited JSON tool server
//!
//! Reads one [`ToolRequest`] per line and writes one [`ToolResponse`] per
//! line. Requests run concurrently against the shared cache, so responses
//! come back in completion order; callers match them up by the `id` they
//! sent. Malformed lines get an error response. The server stops once input
//! is exhausted and every accepted request has been answered.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::service::WeatherService;
use crate::tools::{self, ToolRequest, ToolResponse};

/// Longest request line accepted
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Requests handled at once; further lines wait to be read
pub const MAX_IN_FLIGHT: usize = 32;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error on tool channel: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Serves requests from `reader` until it is exhausted
pub async fn serve<R, W>(
    service: Arc<WeatherService>,
    reader: R,
    writer: W,
) -> Result<(), ServerError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (tx, rx) = mpsc::unbounded_channel();

    info!("tool server ready");

    let (read, written) = tokio::join!(read_requests(service, reader, tx), write_responses(writer, rx));
    let accepted = read?;
    let written = written?;

    info!(accepted, written, "input closed, tool server stopping");
    Ok(())
}

/// Parses lines and dispatches each request to its own task
async fn read_requests<R>(
    service: Arc<WeatherService>,
    mut reader: R,
    tx: mpsc::UnboundedSender<ToolResponse>,
) -> Result<usize, ServerError>
where
    R: AsyncBufRead + Unpin,
{
    let permits = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
    let mut raw = Vec::new();
    let mut accepted = 0usize;

    loop {
        raw.clear();
        let n = reader.read_until(b'\n', &mut raw).await?;
        if n == 0 {
            break;
        }

        if n > MAX_REQUEST_BYTES {
            warn!(bytes = n, limit = MAX_REQUEST_BYTES, "request too large");
            let message = format!("request too large: {} bytes (limit {})", n, MAX_REQUEST_BYTES);
            let _ = tx.send(ToolResponse::failure(message));
            continue;
        }

        let trimmed = match std::str::from_utf8(&raw) {
            Ok(s) => s.trim(),
            Err(_) => {
                let _ = tx.send(ToolResponse::failure("request is not valid UTF-8"));
                continue;
            }
        };

        if trimmed.is_empty() {
            continue;
        }

        let (id, request) = match parse_request(trimmed) {
            Ok(parsed) => parsed,
            Err(response) => {
                let _ = tx.send(response);
                continue;
            }
        };

        let permit = match Arc::clone(&permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let service = Arc::clone(&service);
        let tx = tx.clone();
        accepted += 1;

        tokio::spawn(async move {
            let response = tools::handle(&service, request).await.with_id(id);
            drop(permit);
            // The writer only goes away when output has failed
            let _ = tx.send(response);
        });
    }

    Ok(accepted)
}

/// Splits off the optional `id` and decodes the rest as a request
fn parse_request(line: &str) -> Result<(Option<Value>, ToolRequest), ToolResponse> {
    let mut value: Value = serde_json::from_str(line).map_err(|e| {
        debug!(error = %e, "rejecting malformed request");
        ToolResponse::failure(format!("invalid request: {}", e))
    })?;

    let id = value.as_object_mut().and_then(|fields| fields.remove("id"));

    match serde_json::from_value::<ToolRequest>(value) {
        Ok(request) => Ok((id, request)),
        Err(e) => {
            debug!(error = %e, "rejecting unknown request");
            Err(ToolResponse::failure(format!("invalid request: {}", e)).with_id(id))
        }
    }
}

/// Writes responses until every sender, spawned handlers included, is gone
async fn write_responses<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<ToolResponse>,
) -> Result<usize, ServerError>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0usize;
    while let Some(response) = rx.recv().await {
        write_response(&mut writer, &response).await?;
        written += 1;
    }
    Ok(written)
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &ToolResponse,
) -> Result<(), ServerError> {
    let out = serde_json::to_string(response)?;
    writer.write_all(out.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::{service_with, FakeSource};
    use crate::service::FetchStrategy;
    use std::sync::atomic::Ordering;

    async fn run_with(service: WeatherService, input: &str) -> Vec<Value> {
        let mut output = Vec::new();
        serve(Arc::new(service), input.as_bytes(), &mut output)
            .await
            .unwrap();

        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    async fn run(input: &str) -> Vec<Value> {
        let (service, _source, _clock) = service_with(FetchStrategy::LastWriteWins);
        run_with(service, input).await
    }

    fn by_id(responses: &[Value], id: i64) -> &Value {
        responses
            .iter()
            .find(|r| r["id"] == id)
            .unwrap_or_else(|| panic!("no response with id {}", id))
    }

    fn slow_service(strategy: FetchStrategy) -> (WeatherService, Arc<FakeSource>) {
        let (service, source, _clock) = service_with(strategy);
        source.weather_slow.store(true, Ordering::SeqCst);
        (service, source)
    }

    #[tokio::test]
    async fn test_one_response_per_request() {
        let input = concat!(
            r#"{"id": 1, "tool": "current_weather", "arguments": {"location": "London"}}"#,
            "\n",
            r#"{"id": 2, "tool": "forecast", "arguments": {"location": "Paris", "days": 2}}"#,
            "\n",
            r#"{"id": "three", "tool": "cache_status"}"#,
            "\n",
        );

        let responses = run(input).await;

        assert_eq!(responses.len(), 3);
        assert_eq!(by_id(&responses, 1)["origin"], "fresh");
        assert_eq!(
            by_id(&responses, 2)["data"]["days"].as_array().unwrap().len(),
            2
        );
        let status = responses.iter().find(|r| r["id"] == "three").unwrap();
        assert_eq!(status["ok"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_lookup_does_not_hold_up_later_requests() {
        let (service, _source) = slow_service(FetchStrategy::LastWriteWins);
        let input = concat!(
            r#"{"id": 1, "tool": "current_weather", "arguments": {"location": "London"}}"#,
            "\n",
            r#"{"id": 2, "tool": "cache_status"}"#,
            "\n",
        );

        let responses = run_with(service, input).await;

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 2);
        assert_eq!(responses[1]["id"], 1);
        assert_eq!(responses[1]["ok"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_coalescing_server_shares_concurrent_lookups() {
        let (service, source) = slow_service(FetchStrategy::Coalesce);
        let input: String = (1..=4)
            .map(|id| {
                format!(
                    "{{\"id\": {}, \"tool\": \"current_weather\", \"arguments\": {{\"location\": \"London\"}}}}\n",
                    id
                )
            })
            .collect();

        let responses = run_with(service, &input).await;

        assert_eq!(responses.len(), 4);
        assert!(responses.iter().all(|r| r["ok"] == true));
        assert_eq!(source.locate_calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.current_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_write_wins_server_fetches_per_request() {
        let (service, source) = slow_service(FetchStrategy::LastWriteWins);
        let input: String = (1..=3)
            .map(|id| {
                format!(
                    "{{\"id\": {}, \"tool\": \"current_weather\", \"arguments\": {{\"location\": \"London\"}}}}\n",
                    id
                )
            })
            .collect();

        let responses = run_with(service, &input).await;

        assert_eq!(responses.len(), 3);
        assert_eq!(source.current_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_malformed_lines_get_error_responses() {
        let input = "not json\n\n{\"id\": 9, \"tool\": \"teleport\"}\n";

        let responses = run(input).await;

        // The blank line is skipped
        assert_eq!(responses.len(), 2);
        assert!(responses.iter().all(|r| r["ok"] == false));
        assert!(responses[0]["error"]
            .as_str()
            .unwrap()
            .starts_with("invalid request"));
        assert_eq!(responses[1]["id"], 9);
    }

    #[tokio::test]
    async fn test_last_line_without_newline_is_handled() {
        let responses = run(r#"{"tool": "cache_status"}"#).await;
        assert_eq!(responses.len(), 1);
        assert!(responses[0].get("id").is_none());
        assert_eq!(responses[0]["data"]["entries"], Value::Array(vec![]));
    }

    #[tokio::test]
    async fn test_oversized_request_is_rejected() {
        let mut input = "x".repeat(MAX_REQUEST_BYTES + 1);
        input.push('\n');

        let responses = run(&input).await;

        assert_eq!(responses.len(), 1);
        assert!(responses[0]["error"].as_str().unwrap().contains("too large"));
    }
}
