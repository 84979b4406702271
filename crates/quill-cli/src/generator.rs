//! Generators backed by external processes.

use std::process::Stdio;

use async_trait::async_trait;
use quill_core::{ChatMessage, FragmentStream, GenerationError, Generator};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

const READ_CHUNK: usize = 4096;

/// Runs `command`, writes the conversation to its stdin as a JSON array of
/// `{role, content}` objects and streams its stdout as response fragments.
#[derive(Debug, Clone)]
pub struct ProcessGenerator {
    command: Vec<String>,
}

impl ProcessGenerator {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Generator for ProcessGenerator {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<FragmentStream, GenerationError> {
        let Some((exe, args)) = self.command.split_first() else {
            return Err(GenerationError::Unavailable(
                "no generator command configured".into(),
            ));
        };

        let mut child = Command::new(exe)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GenerationError::Unavailable(format!("{exe}: {e}")))?;

        let payload = serde_json::to_vec(messages)
            .map_err(|e| GenerationError::Unavailable(format!("encode conversation: {e}")))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| GenerationError::Unavailable("generator stdin not captured".into()))?;
        // Written concurrently with reading stdout so neither pipe can fill up.
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&payload).await {
                debug!(event = "generator.stdin_closed", error = %e);
            }
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GenerationError::Unavailable("generator stdout not captured".into()))?;

        let reader = OutputReader {
            child,
            stdout,
            pending: Vec::new(),
            done: false,
        };
        Ok(Box::pin(futures::stream::unfold(reader, OutputReader::next)))
    }
}

/// Decode everything but an incomplete trailing sequence. Invalid bytes
/// become U+FFFD.
fn take_decoded(pending: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        let (valid, invalid) = match std::str::from_utf8(pending) {
            Ok(text) => (text.len(), None),
            Err(e) => (e.valid_up_to(), e.error_len()),
        };
        out.push_str(&String::from_utf8_lossy(&pending[..valid]));
        match invalid {
            Some(len) => {
                out.push(char::REPLACEMENT_CHARACTER);
                pending.drain(..valid + len);
            }
            None => {
                pending.drain(..valid);
                return out;
            }
        }
    }
}

struct OutputReader {
    child: Child,
    stdout: ChildStdout,
    /// Bytes of a UTF-8 sequence split across reads.
    pending: Vec<u8>,
    done: bool,
}

impl OutputReader {
    async fn next(mut self) -> Option<(Result<String, GenerationError>, Self)> {
        if self.done {
            return None;
        }
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match self.stdout.read(&mut buf).await {
                Ok(0) => {
                    self.done = true;
                    return match self.child.wait().await {
                        Ok(status) if status.success() => {
                            if self.pending.is_empty() {
                                None
                            } else {
                                let rest = String::from_utf8_lossy(&self.pending).into_owned();
                                self.pending.clear();
                                Some((Ok(rest), self))
                            }
                        }
                        Ok(status) => Some((
                            Err(GenerationError::Interrupted(format!(
                                "generator exited with {status}"
                            ))),
                            self,
                        )),
                        Err(e) => Some((Err(GenerationError::Interrupted(e.to_string())), self)),
                    };
                }
                Ok(n) => {
                    self.pending.extend_from_slice(&buf[..n]);
                    let text = take_decoded(&mut self.pending);
                    if text.is_empty() {
                        continue;
                    }
                    return Some((Ok(text), self));
                }
                Err(e) => {
                    self.done = true;
                    return Some((Err(GenerationError::Interrupted(e.to_string())), self));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn empty_command_is_unavailable() {
        let generator = ProcessGenerator::new(Vec::new());
        assert!(matches!(
            generator.generate(&[]).await,
            Err(GenerationError::Unavailable(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streams_process_stdout() {
        let generator = ProcessGenerator::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "cat > /dev/null; printf '<quill-delete path=\"a\"/>'".to_string(),
        ]);
        let stream = generator
            .generate(&[ChatMessage::user("remove a")])
            .await
            .unwrap();
        let parts: Vec<_> = stream.collect().await;
        let text: String = parts.into_iter().map(|p| p.unwrap()).collect();
        assert_eq!(text, "<quill-delete path=\"a\"/>");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_process_interrupts_stream() {
        let generator = ProcessGenerator::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "cat > /dev/null; printf partial; exit 3".to_string(),
        ]);
        let stream = generator.generate(&[]).await.unwrap();
        let parts: Vec<_> = stream.collect().await;
        assert_eq!(parts.first(), Some(&Ok("partial".to_string())));
        assert!(matches!(
            parts.last(),
            Some(Err(GenerationError::Interrupted(_)))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn invalid_utf8_is_replaced_without_stalling() {
        let generator = ProcessGenerator::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "printf 'ok\\377more'; sleep 5".to_string(),
        ]);
        let mut stream = generator.generate(&[]).await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(3), stream.next())
            .await
            .expect("fragment arrives before the process exits")
            .unwrap()
            .unwrap();
        assert_eq!(first, "ok\u{FFFD}more");
    }

    #[test]
    fn split_sequences_wait_for_their_tail() {
        let e_acute = "é".as_bytes();
        let mut pending = vec![b'a', e_acute[0]];
        assert_eq!(take_decoded(&mut pending), "a");
        assert_eq!(pending, [e_acute[0]]);
        pending.push(e_acute[1]);
        assert_eq!(take_decoded(&mut pending), "é");
        assert!(pending.is_empty());
    }

    #[test]
    fn invalid_bytes_are_replaced_and_drained() {
        let mut pending = b"a\xffb\xc3".to_vec();
        assert_eq!(take_decoded(&mut pending), "a\u{FFFD}b");
        assert_eq!(pending, [0xc3]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn large_conversation_does_not_block_early_output() {
        let generator = ProcessGenerator::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "head -c 200000 /dev/zero | tr '\\0' a; cat > /dev/null".to_string(),
        ]);
        let conversation = [ChatMessage::user("x".repeat(1 << 20))];
        let stream = generator.generate(&conversation).await.unwrap();
        let parts: Vec<_> = tokio::time::timeout(Duration::from_secs(10), stream.collect())
            .await
            .expect("generator finished");
        let text: String = parts.into_iter().map(|p| p.unwrap()).collect();
        assert_eq!(text.len(), 200000);
    }
}
