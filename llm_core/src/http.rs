use async_stream::stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{FragmentStream, GenerationError, Result, TextGenerator};

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// One line of Ollama's streaming `/api/generate` response.
#[derive(Debug, Deserialize, PartialEq)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Splits a byte stream into newline-delimited JSON records.
#[derive(Default)]
struct NdjsonDecoder {
    pending: Vec<u8>,
}

impl NdjsonDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<Result<GenerateChunk>> {
        self.pending.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(chunk) = Self::decode(&line) {
                out.push(chunk);
            }
        }
        out
    }

    fn finish(&mut self) -> Option<Result<GenerateChunk>> {
        let rest = std::mem::take(&mut self.pending);
        Self::decode(&rest)
    }

    fn decode(line: &[u8]) -> Option<Result<GenerateChunk>> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        Some(
            serde_json::from_str(line)
                .map_err(|e| GenerationError::Malformed(format!("{e}: {line}"))),
        )
    }
}

/// Streams tokens from an Ollama server over HTTP. Each token is one fragment.
#[derive(Debug, Clone)]
pub struct OllamaHttpGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaHttpGenerator {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }
}

impl TextGenerator for OllamaHttpGenerator {
    fn generate(&self, prompt: &str) -> Result<FragmentStream> {
        let url = format!("{}/api/generate", self.base_url);
        let request = self.client.post(url).json(&GenerateRequest {
            model: &self.model,
            prompt,
            stream: true,
        });

        Ok(Box::pin(stream! {
            let response = match request.send().await.and_then(|r| r.error_for_status()) {
                Ok(response) => response,
                Err(e) => {
                    yield Err(GenerationError::Http(e));
                    return;
                }
            };

            let mut body = response.bytes_stream();
            let mut decoder = NdjsonDecoder::default();
            let mut finished = false;
            while let Some(bytes) = body.next().await {
                let bytes = match bytes {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(GenerationError::Http(e));
                        return;
                    }
                };
                for chunk in decoder.push(&bytes) {
                    match chunk {
                        Ok(GenerateChunk { error: Some(message), .. }) => {
                            yield Err(GenerationError::Malformed(message));
                            return;
                        }
                        Ok(chunk) => {
                            if !chunk.response.is_empty() {
                                yield Ok(chunk.response);
                            }
                            if chunk.done {
                                finished = true;
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
                if finished {
                    break;
                }
            }

            if !finished {
                match decoder.finish() {
                    Some(Ok(chunk)) if !chunk.response.is_empty() => yield Ok(chunk.response),
                    Some(Err(e)) => yield Err(e),
                    _ => {}
                }
            }
            debug!("ollama http generation finished");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_records_split_across_reads() {
        let mut decoder = NdjsonDecoder::default();
        assert!(decoder.push(br#"{"response":"Hel"#).is_empty());

        let out = decoder.push(b"lo\",\"done\":false}\n{\"response\":\" there.\",\"done\":true}\n");
        let chunks: Vec<GenerateChunk> = out.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(
            chunks,
            vec![
                GenerateChunk { response: "Hello".into(), done: false, error: None },
                GenerateChunk { response: " there.".into(), done: true, error: None },
            ]
        );
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn trailing_record_without_newline_is_kept() {
        let mut decoder = NdjsonDecoder::default();
        assert!(decoder.push(br#"{"response":"tail"}"#).is_empty());
        assert_eq!(decoder.finish().unwrap().unwrap().response, "tail");
    }

    #[test]
    fn garbage_is_malformed() {
        let mut decoder = NdjsonDecoder::default();
        let out = decoder.push(b"not json\n");
        assert!(matches!(out[0], Err(GenerationError::Malformed(_))));
    }

    #[test]
    fn error_records_carry_message() {
        let mut decoder = NdjsonDecoder::default();
        let out = decoder.push(b"{\"error\":\"model not found\"}\n");
        assert_eq!(out[0].as_ref().unwrap().error.as_deref(), Some("model not found"));
    }
}
