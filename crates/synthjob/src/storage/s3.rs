//! S3 object store backend.
//!
//! Buckets and keys map one to one onto S3 buckets and object keys. Works
//! against AWS and S3-compatible services (endpoint URL + path-style
//! addressing). Writes are conditional (`If-None-Match: *`) so an existing
//! key is never replaced.

use std::io::{Cursor, Read, Seek, SeekFrom};

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;

use super::{validate_address, Blob, ObjectStore, StorageObject};
use crate::config::StorageConfig;
use crate::error::StorageError;

const PRECONDITION_FAILED: u16 = 412;

pub struct S3Store {
    client: S3Client,
}

impl S3Store {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }

    /// Builds a client from the default AWS credential chain, applying the
    /// optional region and endpoint overrides from the configuration.
    pub async fn connect(config: &StorageConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(ref region) = config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(ref endpoint) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }
        builder = builder.force_path_style(config.force_path_style);

        Self::new(S3Client::from_conf(builder.build()))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn create(&self, bucket: &str, path: &str, blob: Blob) -> Result<u64, StorageError> {
        validate_address(bucket, path)?;

        let (len, body) = tokio::task::spawn_blocking(move || read_remaining(blob))
            .await?
            .map_err(|e| StorageError::io(bucket, path, e))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(path)
            .content_length(len as i64)
            .content_type(
                mime_guess::from_path(path)
                    .first_or_octet_stream()
                    .essence_str(),
            )
            .if_none_match("*")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                let exists = e
                    .raw_response()
                    .map(|r| r.status().as_u16() == PRECONDITION_FAILED)
                    .unwrap_or(false);
                if exists {
                    StorageError::AlreadyExists {
                        bucket: bucket.to_string(),
                        path: path.to_string(),
                    }
                } else {
                    StorageError::Backend {
                        bucket: bucket.to_string(),
                        path: path.to_string(),
                        message: DisplayErrorContext(&e).to_string(),
                    }
                }
            })?;

        tracing::debug!(bucket, path, size = len, "Uploaded object to S3");
        Ok(len)
    }

    async fn get(&self, bucket: &str, path: &str) -> Result<StorageObject, StorageError> {
        validate_address(bucket, path)?;

        let response = match self.client.get_object().bucket(bucket).key(path).send().await {
            Ok(response) => response,
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                return Err(if missing {
                    StorageError::NotFound {
                        bucket: bucket.to_string(),
                        path: path.to_string(),
                    }
                } else {
                    StorageError::Backend {
                        bucket: bucket.to_string(),
                        path: path.to_string(),
                        message: DisplayErrorContext(&e).to_string(),
                    }
                });
            }
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Backend {
                bucket: bucket.to_string(),
                path: path.to_string(),
                message: e.to_string(),
            })?
            .into_bytes()
            .to_vec();

        Ok(StorageObject {
            bucket: bucket.to_string(),
            path: path.to_string(),
            size_bytes: data.len() as u64,
            blob: Box::new(Cursor::new(data)),
        })
    }
}

/// Measures the blob from its current position to its end, rewinds, then
/// reads exactly that many bytes.
fn read_remaining(mut blob: Blob) -> std::io::Result<(u64, Vec<u8>)> {
    let start = blob.stream_position()?;
    let end = blob.seek(SeekFrom::End(0))?;
    blob.seek(SeekFrom::Start(start))?;

    let len = end.saturating_sub(start);
    let mut body = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
    blob.take(len).read_to_end(&mut body)?;
    if body.len() as u64 != len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("blob shrank while reading: expected {} bytes, got {}", len, body.len()),
        ));
    }
    Ok((len, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    type Objects = Arc<Mutex<HashMap<String, Vec<u8>>>>;

    /// Minimal path-style S3 endpoint: conditional PUT and GET on an
    /// in-memory map keyed by `/bucket/key`.
    async fn start_s3_endpoint() -> (String, Objects) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let objects = Objects::default();
        let shared = objects.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let objects = shared.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(stream, objects).await;
                });
            }
        });
        (format!("http://{}", addr), objects)
    }

    async fn serve_connection(stream: TcpStream, objects: Objects) -> std::io::Result<()> {
        let mut reader = BufReader::new(stream);
        loop {
            let mut request_line = String::new();
            if reader.read_line(&mut request_line).await? == 0 {
                return Ok(());
            }
            let mut parts = request_line.split_whitespace();
            let method = parts.next().unwrap_or_default().to_string();
            let target = parts.next().unwrap_or_default();
            let key = target.split('?').next().unwrap_or_default().to_string();

            let mut headers = HashMap::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).await?;
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
                }
            }
            let header = |name: &str| headers.get(name).map(String::as_str).unwrap_or_default();

            if header("expect").eq_ignore_ascii_case("100-continue") {
                reader.get_mut().write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
            }
            let mut body = if header("transfer-encoding").contains("chunked") {
                read_chunked(&mut reader).await?
            } else {
                let len = header("content-length").parse().unwrap_or(0);
                let mut body = vec![0; len];
                reader.read_exact(&mut body).await?;
                body
            };
            if header("content-encoding").contains("aws-chunked") {
                let decoded = read_chunked(&mut BufReader::new(&body[..])).await?;
                body = decoded;
            }

            let (status, payload) = {
                let mut objects = objects.lock().unwrap();
                match method.as_str() {
                    "PUT" if header("if-none-match") == "*" && objects.contains_key(&key) => {
                        ("412 Precondition Failed", error_body("PreconditionFailed"))
                    }
                    "PUT" => {
                        objects.insert(key, body);
                        ("200 OK", Vec::new())
                    }
                    "GET" => match objects.get(&key) {
                        Some(bytes) => ("200 OK", bytes.clone()),
                        None => ("404 Not Found", error_body("NoSuchKey")),
                    },
                    _ => ("405 Method Not Allowed", Vec::new()),
                }
            };
            let head = format!(
                "HTTP/1.1 {}\r\ncontent-length: {}\r\netag: \"0\"\r\n\r\n",
                status,
                payload.len()
            );
            let stream = reader.get_mut();
            stream.write_all(head.as_bytes()).await?;
            stream.write_all(&payload).await?;
            stream.flush().await?;
        }
    }

    /// Decodes `size[;ext]\r\ndata\r\n ... 0\r\n[trailers]\r\n` framing.
    async fn read_chunked<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
        let mut body = Vec::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await?;
            let size = line.trim().split(';').next().unwrap_or_default();
            let size = usize::from_str_radix(size, 16)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            if size == 0 {
                loop {
                    let mut trailer = String::new();
                    if reader.read_line(&mut trailer).await? == 0 || trailer.trim().is_empty() {
                        return Ok(body);
                    }
                }
            }
            let mut chunk = vec![0; size + 2];
            reader.read_exact(&mut chunk).await?;
            body.extend_from_slice(&chunk[..size]);
        }
    }

    fn error_body(code: &str) -> Vec<u8> {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Error><Code>{}</Code><Message>{}</Message></Error>",
            code, code
        )
        .into_bytes()
    }

    fn store_for(endpoint: &str) -> S3Store {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .credentials_provider(aws_sdk_s3::config::Credentials::new(
                "synthjob", "secret", None, None, "test",
            ))
            .endpoint_url(endpoint)
            .force_path_style(true)
            .build();
        S3Store::new(S3Client::from_conf(config))
    }

    #[tokio::test]
    async fn test_create_then_get_round_trip() {
        let (endpoint, objects) = start_s3_endpoint().await;
        let store = store_for(&endpoint);

        let size = store
            .create(
                "synth",
                "jobs/rid/score/song.musicxml",
                Box::new(Cursor::new(b"<score-partwise/>".to_vec())),
            )
            .await
            .unwrap();
        assert_eq!(size, 17);
        assert!(objects
            .lock()
            .unwrap()
            .contains_key("/synth/jobs/rid/score/song.musicxml"));

        let object = store
            .get("synth", "jobs/rid/score/song.musicxml")
            .await
            .unwrap();
        assert_eq!(object.size_bytes, 17);
        assert_eq!(object.into_bytes().unwrap(), b"<score-partwise/>");
    }

    #[tokio::test]
    async fn test_create_keeps_existing_key() {
        let (endpoint, _objects) = start_s3_endpoint().await;
        let store = store_for(&endpoint);
        store
            .create("synth", "jobs/rid/process.log", Box::new(Cursor::new(b"first".to_vec())))
            .await
            .unwrap();

        let err = store
            .create("synth", "jobs/rid/process.log", Box::new(Cursor::new(b"second".to_vec())))
            .await
            .unwrap_err();
        assert!(err.is_already_exists(), "unexpected error: {err}");

        let object = store.get("synth", "jobs/rid/process.log").await.unwrap();
        assert_eq!(object.into_bytes().unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_get_missing_key_is_not_found() {
        let (endpoint, _objects) = start_s3_endpoint().await;
        let store = store_for(&endpoint);
        let err = store.get("synth", "jobs/none.wav").await.unwrap_err();
        assert!(err.is_not_found(), "unexpected error: {err}");
    }

    #[test]
    fn test_read_remaining_measures_from_position() {
        let mut cursor = Cursor::new(b"0123456789".to_vec());
        cursor.seek(SeekFrom::Start(4)).unwrap();
        let (len, body) = read_remaining(Box::new(cursor)).unwrap();
        assert_eq!(len, 6);
        assert_eq!(body, b"456789");
    }

    #[test]
    fn test_read_remaining_empty() {
        let (len, body) = read_remaining(Box::new(Cursor::new(Vec::new()))).unwrap();
        assert_eq!(len, 0);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_address_rejected_before_network() {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .build();
        let store = S3Store::new(S3Client::from_conf(config));
        let err = store.get("synth", "../escape").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidAddress { .. }));
    }
}
