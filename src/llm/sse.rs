//! Minimal SSE reader over a reqwest byte stream
//!
//! Yields the payload of each `data:` field, buffering partial lines
//! across network chunks. Comment lines and other fields are skipped.

use crate::error::{LlmError, Result};
use async_stream::try_stream;
use futures::stream::BoxStream;
use futures::StreamExt;

/// Turn an event-stream HTTP response into a stream of `data:` payloads.
pub fn data_events(response: reqwest::Response) -> BoxStream<'static, Result<String>> {
    let stream = try_stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer = String::new();
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| LlmError::Stream(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                let line = line.trim_end_matches(['\n', '\r']);
                if let Some(data) = line.strip_prefix("data:") {
                    yield data.trim_start().to_string();
                }
            }
        }
        // trailing data line without a final newline
        let line = buffer.trim_end_matches(['\n', '\r']);
        if let Some(data) = line.strip_prefix("data:") {
            yield data.trim_start().to_string();
        }
    };
    stream.boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_data_events_parsing() {
        let server = MockServer::start().await;
        let body = ": comment\n\ndata: {\"a\":1}\n\ndata: [DONE]\n\n";
        Mock::given(method("GET"))
            .and(path("/stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let response = reqwest::get(format!("{}/stream", server.uri())).await.unwrap();
        let events: Vec<String> = data_events(response)
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(events, vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
    }
}
