use super::models::{ListenRequest, ListenResponse};
use super::{FirebaseFirestore, FirestoreError};
use crate::core::parse_error_response;
use bytes::{Buf, Bytes, BytesMut};
use futures::stream::{self, Stream};
use std::pin::Pin;
use std::task::{Context, Poll};

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// A stream of `ListenResponse` messages.
///
/// The REST listen endpoint streams a JSON array of responses; elements may be split
/// across chunks, so bytes are buffered until a complete object is available.
pub struct ListenStream {
    inner: ByteStream,
    buffer: BytesMut,
}

impl ListenStream {
    pub fn new(inner: ByteStream) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
        }
    }
}

impl Stream for ListenStream {
    type Item = Result<ListenResponse, FirestoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            // Array framing between elements carries no data.
            let skip = leading_separators(&self.buffer);
            self.buffer.advance(skip);

            if let Some(len) = find_json_boundary(&self.buffer) {
                let bytes = self.buffer.split_to(len);
                return Poll::Ready(Some(
                    serde_json::from_slice::<ListenResponse>(&bytes)
                        .map_err(FirestoreError::SerializationError),
                ));
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buffer.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(FirestoreError::RequestError(e))));
                }
                Poll::Ready(None) => {
                    if !self.buffer.is_empty() {
                        self.buffer.clear();
                        return Poll::Ready(Some(Err(FirestoreError::ApiError(
                            "Stream ended with incomplete JSON".into(),
                        ))));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

fn leading_separators(buf: &[u8]) -> usize {
    buf.iter()
        .take_while(|b| b.is_ascii_whitespace() || matches!(b, b'[' | b']' | b','))
        .count()
}

/// Finds the length of the first complete JSON object at the start of the buffer.
fn find_json_boundary(buf: &[u8]) -> Option<usize> {
    if buf.first() != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (i, &b) in buf.iter().enumerate() {
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }

    None
}

pub(crate) async fn listen_request(
    db: &FirebaseFirestore,
    request: &ListenRequest,
) -> Result<ListenStream, FirestoreError> {
    let response = db
        .client()
        .post(db.rpc_url("listen"))
        .json(request)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(FirestoreError::ApiError(
            parse_error_response(response, "Listen failed").await,
        ));
    }

    let stream = stream::unfold(response, |mut resp| async move {
        match resp.chunk().await {
            Ok(Some(bytes)) => Some((Ok(bytes), resp)),
            Ok(None) => None,
            Err(e) => Some((Err(e), resp)),
        }
    });

    Ok(ListenStream::new(Box::pin(stream)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::models::TargetChangeType;
    use futures::StreamExt;

    #[test]
    fn test_find_json_boundary() {
        // Simple object
        assert_eq!(find_json_boundary(br#"{"a":1}"#), Some(7));

        // Nested object
        assert_eq!(find_json_boundary(br#"{"a":{"b":2}}"#), Some(13));

        // Incomplete
        assert_eq!(find_json_boundary(br#"{"a":1"#), None);

        // String with braces
        assert_eq!(find_json_boundary(br#"{"a":"}"}"#), Some(9));

        // Escaped quote
        assert_eq!(find_json_boundary(br#"{"a":"\"}"}"#), Some(11));

        // Array inside the object
        assert_eq!(find_json_boundary(br#"{"a":[1,2]}"#), Some(11));

        // Multiple objects (should find first)
        assert_eq!(find_json_boundary(br#"{"a":1}{"b":2}"#), Some(7));
    }

    #[test]
    fn test_leading_separators() {
        assert_eq!(leading_separators(b"[\n{"), 2);
        assert_eq!(leading_separators(b" ,\r\n{"), 4);
        assert_eq!(leading_separators(b"{"), 0);
    }

    #[tokio::test]
    async fn test_stream_reassembles_split_array_elements() {
        let chunks: Vec<Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::from_static(b"[{\"targetChange\": {\"targetChange")),
            Ok(Bytes::from_static(b"Type\": \"ADD\", \"targetIds\": [1]}}\n,")),
            Ok(Bytes::from_static(b"{\"targetChange\": {\"targetChangeType\": \"CURRENT\"}}")),
            Ok(Bytes::from_static(b"\n]")),
        ];
        let mut listen = ListenStream::new(Box::pin(stream::iter(chunks)));

        let first = listen.next().await.unwrap().unwrap();
        let change = first.target_change.unwrap();
        assert_eq!(change.target_change_type, TargetChangeType::Add);
        assert_eq!(change.target_ids, vec![1]);

        let second = listen.next().await.unwrap().unwrap();
        assert_eq!(
            second.target_change.unwrap().target_change_type,
            TargetChangeType::Current
        );

        assert!(listen.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_reports_truncated_json() {
        let chunks: Vec<Result<Bytes, reqwest::Error>> =
            vec![Ok(Bytes::from_static(b"[{\"targetChange\": {"))];
        let mut listen = ListenStream::new(Box::pin(stream::iter(chunks)));

        assert!(matches!(
            listen.next().await,
            Some(Err(FirestoreError::ApiError(_)))
        ));
        assert!(listen.next().await.is_none());
    }
}
