use serde::{Deserialize, Serialize};

use super::{EmbeddingError, EmbeddingModel};

/// Default local Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
/// Default embedding model pulled into Ollama.
pub const DEFAULT_OLLAMA_MODEL: &str = "all-minilm";

/// Embedding model served by a local Ollama instance (`/api/embed`).
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
    dimension: usize,
}

/// Request body for Ollama /api/embed
#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

/// Response body from Ollama /api/embed
#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    /// Connect to `base_url` and learn the model's dimension from one probe
    /// embedding.
    pub fn connect(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self, EmbeddingError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::ModelInit(format!("HTTP client: {e}")))?;

        let mut embedder = Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            timeout_secs,
            dimension: 0,
        };

        let probe = embedder.request(&["dimension probe"])?;
        embedder.dimension = match probe.first() {
            Some(vector) if !vector.is_empty() => vector.len(),
            _ => {
                return Err(EmbeddingError::ModelInit(format!(
                    "Ollama model {model} returned an empty embedding"
                )))
            }
        };

        tracing::info!(
            base_url = %embedder.base_url,
            model = %embedder.model,
            dimension = embedder.dimension,
            "Ollama embedder connected"
        );

        Ok(embedder)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/api/embed", self.base_url);
        let body = OllamaEmbedRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    EmbeddingError::Connection(self.base_url.clone())
                } else if e.is_timeout() {
                    EmbeddingError::Embedding(format!(
                        "Request timed out after {}s",
                        self.timeout_secs
                    ))
                } else {
                    EmbeddingError::Embedding(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EmbeddingError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaEmbedResponse = response
            .json()
            .map_err(|e| EmbeddingError::Embedding(format!("Response parsing: {e}")))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(EmbeddingError::Embedding(format!(
                "Ollama returned {} embeddings for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            )));
        }

        Ok(parsed.embeddings)
    }
}

impl EmbeddingModel for OllamaEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.request(&[text])?
            .pop()
            .ok_or_else(|| EmbeddingError::Embedding("empty Ollama response".into()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;

    /// Serve `responses.len()` HTTP requests with canned JSON bodies.
    fn fake_ollama(responses: Vec<(u16, String)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        std::thread::spawn(move || {
            for (status, body) in responses {
                let (stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());

                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                    if line == "\r\n" || line.is_empty() {
                        break;
                    }
                    if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                        content_length = value.trim().parse().unwrap();
                    }
                }
                let mut request_body = vec![0u8; content_length];
                reader.read_exact(&mut request_body).unwrap();

                let mut stream = stream;
                write!(
                    stream,
                    "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                )
                .unwrap();
            }
        });

        format!("http://{addr}")
    }

    #[test]
    fn request_body_shape() {
        let body = OllamaEmbedRequest {
            model: "all-minilm",
            input: &["chest pain", "MI"],
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"model":"all-minilm","input":["chest pain","MI"]}"#);
    }

    #[test]
    fn connect_learns_dimension_and_embeds_batches() {
        let url = fake_ollama(vec![
            (200, r#"{"embeddings":[[0.1,0.2,0.3]]}"#.to_string()),
            (200, r#"{"embeddings":[[1.0,0.0,0.0],[0.0,1.0,0.0]]}"#.to_string()),
        ]);

        let embedder = OllamaEmbedder::connect(&format!("{url}/"), "all-minilm", 5).unwrap();
        assert_eq!(embedder.dimension(), 3);
        assert_eq!(embedder.base_url(), url);

        let vectors = embedder.embed_batch(&["a", "b"]).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
    }

    #[test]
    fn service_error_is_reported_with_status() {
        let url = fake_ollama(vec![(404, r#"{"error":"model not found"}"#.to_string())]);

        let err = OllamaEmbedder::connect(&url, "missing-model", 5).err().unwrap();
        assert!(matches!(err, EmbeddingError::Service { status: 404, .. }));
    }

    #[test]
    fn mismatched_embedding_count_is_error() {
        let url = fake_ollama(vec![(200, r#"{"embeddings":[]}"#.to_string())]);

        let err = OllamaEmbedder::connect(&url, "all-minilm", 5).err().unwrap();
        assert!(matches!(err, EmbeddingError::Embedding(_)));
    }

    #[test]
    fn unreachable_server_is_connection_error() {
        // Bind then drop to get a port with nothing listening.
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();

        let err = OllamaEmbedder::connect(&format!("http://127.0.0.1:{port}"), "all-minilm", 2)
            .err()
            .unwrap();
        assert!(matches!(err, EmbeddingError::Connection(_)));
    }
}
