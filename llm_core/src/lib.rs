//! Text generation for the relay.
//!
//! A [`TextGenerator`] turns a prompt into a stream of text fragments. The
//! stream ends when the generator has nothing more to say; dropping it early
//! stops generation (the child process is killed, the HTTP body is dropped).

use std::pin::Pin;

use futures::Stream;
use thiserror::Error;

mod http;
mod process;
pub mod prompt;

pub use http::OllamaHttpGenerator;
pub use process::ProcessGenerator;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("could not launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` is not installed or not in PATH")]
    NotInstalled { program: String },

    #[error("generation output failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("generation process exited with {status}: {stderr}")]
    Exited { status: String, stderr: String },

    #[error("generation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed generation output: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, GenerationError>;

/// Ordered fragments of one response; the stream ends at end of output.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Producer of response text for a prompt.
///
/// `generate` launches generation and returns immediately; launch failures
/// surface as `Err`, later failures as `Err` items in the stream.
pub trait TextGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<FragmentStream>;
}

/// Which generator backs the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    /// `ollama run <model>` as a child process.
    Ollama,
    /// Ollama's streaming `/api/generate` endpoint.
    OllamaHttp,
}

impl LlmProvider {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" | "ollama_cli" => Some(LlmProvider::Ollama),
            "ollama_http" | "ollama-http" => Some(LlmProvider::OllamaHttp),
            _ => None,
        }
    }
}
