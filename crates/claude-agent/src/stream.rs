use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::process::ClaudeProcess;
use crate::types::Message;
use crate::Result;

// ─── QueryStream ──────────────────────────────────────────────────────────

/// An async stream of [`Message`]s from one Claude subprocess turn.
///
/// Backed by a Tokio mpsc channel. A background task owns the
/// [`ClaudeProcess`], writes the prompt, and forwards messages until the
/// terminal `Result` message or process exit. Dropping `QueryStream` closes
/// the receiver; the task notices on its next send, exits, and the process
/// is killed when dropped.
pub struct QueryStream {
    rx: mpsc::Receiver<Result<Message>>,
}

impl QueryStream {
    /// Drive `process` with `prompt`. Must be called from within a Tokio runtime.
    pub fn new(mut process: ClaudeProcess, prompt: String) -> Self {
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            if let Err(e) = process.send_prompt(&prompt).await {
                // A process that died while idle shows up as a broken pipe;
                // its exit status says more than the write error does.
                let err = process.wait_exit_error().await.unwrap_or(e);
                let _ = tx.send(Err(err)).await;
                return;
            }

            let mut got_result = false;
            loop {
                match process.next_message().await {
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                    Ok(None) => break, // EOF, process exited
                    Ok(Some(msg)) => {
                        let is_terminal = matches!(msg, Message::Result(_));
                        if is_terminal {
                            got_result = true;
                        }
                        if tx.send(Ok(msg)).await.is_err() {
                            break; // Receiver dropped
                        }
                        if is_terminal {
                            break;
                        }
                    }
                }
            }

            // Exited without a Result: surface a non-zero exit with its stderr.
            if !got_result {
                if let Some(exit_err) = process.wait_exit_error().await {
                    let _ = tx.send(Err(exit_err)).await;
                }
            }

            process.kill().await;
        });

        QueryStream { rx }
    }
}

impl Stream for QueryStream {
    type Item = Result<Message>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
