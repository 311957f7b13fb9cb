//! Server-sent event framing for streaming provider responses.
//!
//! Both providers stream completions as SSE: newline-delimited frames
//! where `data:` lines carry payloads and everything else (`event:`,
//! `id:`, comments, blank keep-alives) is ignored. Chunk boundaries do
//! not align with line boundaries, so bytes are buffered until a full
//! line is available.

use async_stream::try_stream;
use bytes::BytesMut;
use futures::Stream;
use tokio_stream::StreamExt;

use crate::error::LlmError;

const DATA_PREFIX: &str = "data:";

/// Yields the payload of each `data:` line in the response body.
///
/// The final line is flushed even when the body does not end with a
/// newline. Transport failures and non-UTF-8 bytes end the stream with
/// an error.
pub fn data_lines(response: reqwest::Response) -> impl Stream<Item = Result<String, LlmError>> {
    try_stream! {
        let mut body = response.bytes_stream();
        let mut buf = BytesMut::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| LlmError::StreamFailed(e.to_string()))?;
            buf.extend_from_slice(&chunk);

            while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line = buf.split_to(pos + 1);
                if let Some(data) = parse_data_line(&line)? {
                    yield data;
                }
            }
        }

        if !buf.is_empty() {
            let line = buf.split_to(buf.len());
            if let Some(data) = parse_data_line(&line)? {
                yield data;
            }
        }
    }
}

fn parse_data_line(raw: &[u8]) -> Result<Option<String>, LlmError> {
    let line = std::str::from_utf8(raw)
        .map_err(|e| LlmError::StreamFailed(format!("invalid UTF-8 in stream: {e}")))?;
    let line = line.trim_end();
    let Some(data) = line.strip_prefix(DATA_PREFIX) else {
        return Ok(None);
    };
    Ok(Some(data.trim_start().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_line_is_extracted() {
        let data = parse_data_line(b"data: {\"x\":1}\n").unwrap();

        assert_eq!(data, Some("{\"x\":1}".to_string()));
    }

    #[test]
    fn prefix_without_space_is_accepted() {
        let data = parse_data_line(b"data:[DONE]\n").unwrap();

        assert_eq!(data, Some("[DONE]".to_string()));
    }

    #[test]
    fn crlf_line_endings_are_stripped() {
        let data = parse_data_line(b"data: hello\r\n").unwrap();

        assert_eq!(data, Some("hello".to_string()));
    }

    #[test]
    fn non_data_lines_are_ignored() {
        assert_eq!(parse_data_line(b"event: ping\n").unwrap(), None);
        assert_eq!(parse_data_line(b"id: 7\n").unwrap(), None);
        assert_eq!(parse_data_line(b": keep-alive\n").unwrap(), None);
        assert_eq!(parse_data_line(b"\n").unwrap(), None);
    }

    #[test]
    fn invalid_utf8_is_an_error() {
        let err = parse_data_line(&[0x64, 0x61, 0x74, 0x61, 0x3a, 0xff, 0x0a]).unwrap_err();

        assert!(matches!(err, LlmError::StreamFailed(_)));
    }
}
