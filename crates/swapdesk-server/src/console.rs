use anyhow::Result;
use swapdesk_bot::ChatTransport;
use swapdesk_types::{InboundEvent, OutgoingMessage};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::Mutex;
use tracing::warn;

/// Transport over JSON lines: one `OutgoingMessage` per line on the writer.
pub struct ConsoleTransport<W = Stdout> {
    out: Mutex<W>,
    admins: Vec<String>,
}

impl ConsoleTransport<Stdout> {
    pub fn stdout(admins: Vec<String>) -> Self {
        Self::new(tokio::io::stdout(), admins)
    }
}

impl<W> ConsoleTransport<W> {
    /// Every chat reports the same `admins`.
    pub fn new(out: W, admins: Vec<String>) -> Self {
        Self {
            out: Mutex::new(out),
            admins,
        }
    }
}

impl<W: AsyncWrite + Unpin + Send + 'static> ChatTransport for ConsoleTransport<W> {
    async fn send(&self, message: OutgoingMessage) -> Result<()> {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        let mut out = self.out.lock().await;
        out.write_all(&line).await?;
        out.flush().await?;
        Ok(())
    }

    async fn chat_administrators(&self, _chat_id: i64) -> Result<Vec<String>> {
        Ok(self.admins.clone())
    }
}

/// Reads one `InboundEvent` per line and hands each to `on_event`. Malformed
/// lines are logged and skipped. Returns at end of input.
pub async fn read_events<R, F>(input: R, mut on_event: F) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    F: FnMut(InboundEvent),
{
    let mut lines = BufReader::new(input).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<InboundEvent>(line) {
            Ok(event) => on_event(event),
            Err(e) => warn!("Skipping malformed event: {}", e),
        }
    }
    Ok(())
}
