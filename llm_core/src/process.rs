use std::process::Stdio;

use async_stream::stream;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{FragmentStream, GenerationError, Result, TextGenerator};

/// Runs a command per prompt: the prompt is written to its stdin, and every
/// line it prints on stdout becomes one fragment (newline included).
///
/// The child is killed if the stream is dropped before it finishes.
#[derive(Debug, Clone)]
pub struct ProcessGenerator {
    program: String,
    args: Vec<String>,
}

impl ProcessGenerator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `ollama run <model>`
    pub fn ollama(binary: impl Into<String>, model: &str) -> Self {
        Self::new(binary, vec!["run".to_string(), model.to_string()])
    }
}

impl TextGenerator for ProcessGenerator {
    fn generate(&self, prompt: &str) -> Result<FragmentStream> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| match source.kind() {
                std::io::ErrorKind::NotFound => GenerationError::NotInstalled {
                    program: self.program.clone(),
                },
                _ => GenerationError::Launch {
                    program: self.program.clone(),
                    source,
                },
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GenerationError::Malformed("child stdout was not captured".into()))?;
        let stdin = child.stdin.take();
        let stderr = child.stderr.take();
        let prompt = format!("{prompt}\n");
        let program = self.program.clone();

        debug!(program = %program, "generation process started");

        Ok(Box::pin(stream! {
            // Drain stderr concurrently so a chatty child never blocks on a full pipe.
            let stderr_task = stderr.map(|mut stderr| {
                tokio::spawn(async move {
                    let mut text = String::new();
                    let _ = stderr.read_to_string(&mut text).await;
                    text
                })
            });

            if let Some(mut stdin) = stdin {
                let written = async {
                    stdin.write_all(prompt.as_bytes()).await?;
                    stdin.shutdown().await
                }
                .await;
                match written {
                    Ok(()) => {}
                    // The child exited without reading its input; its output and exit status still count.
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                        debug!(program = %program, "generation process closed stdin early");
                    }
                    Err(e) => {
                        yield Err(GenerationError::Io(e));
                        return;
                    }
                }
            }

            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => yield Ok(line.clone()),
                    Err(e) => {
                        yield Err(GenerationError::Io(e));
                        return;
                    }
                }
            }

            let status = match child.wait().await {
                Ok(status) => status,
                Err(e) => {
                    yield Err(GenerationError::Io(e));
                    return;
                }
            };
            let stderr_text = match stderr_task {
                Some(task) => task.await.unwrap_or_default(),
                None => String::new(),
            };

            if !status.success() {
                yield Err(GenerationError::Exited {
                    status: status.to_string(),
                    stderr: stderr_text.trim().to_string(),
                });
            } else if stderr_text.to_lowercase().contains("error") {
                warn!(program = %program, stderr = %stderr_text.trim(), "generation process reported errors");
            }
        }))
    }
}
