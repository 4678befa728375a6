//! # Output Streamer
//!
//! Forwards the device shell's output to the transport one line at a time, as soon as
//! each line completes. A shell prompt or a long-running command gives no message
//! boundary, so bytes are read as they arrive (`fill_buf`/`consume`) and reassembled by
//! a [`LineAssembler`] per stream.
//!
//! One streamer task exists per subprocess. It stops when its cancellation token
//! fires, when both stdout and stderr reach EOF, or on a read error.

use crate::transport::OutputSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Longest line held back; a longer run without a terminator is forwarded in pieces.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Accumulates bytes until `\n` or `\r`, yielding trimmed non-empty lines.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buffer: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completed, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' || byte == b'\r' {
                if let Some(line) = self.take_line() {
                    lines.push(line);
                }
            } else {
                self.buffer.push(byte);
                if self.buffer.len() >= MAX_LINE_BYTES
                    && let Some(line) = self.take_line()
                {
                    lines.push(line);
                }
            }
        }
        lines
    }

    /// Drain whatever is left without a terminator.
    pub fn finish(&mut self) -> Option<String> {
        self.take_line()
    }

    fn take_line(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&raw);
        let trimmed = line.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

/// Why a streamer task stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    Cancelled,
    Eof,
    ReadError(String),
}

/// Handle to a running streamer task.
pub struct OutputStreamer {
    cancel: CancellationToken,
    task: JoinHandle<StreamEnd>,
}

impl OutputStreamer {
    /// Start streaming `stdout` and `stderr` into `sink`.
    ///
    /// With `flush_partial`, a trailing line without a terminator is forwarded when its
    /// stream reaches EOF; otherwise it is dropped.
    pub fn spawn<O, E>(
        stdout: O,
        stderr: Option<E>,
        sink: Arc<dyn OutputSink>,
        cancel: CancellationToken,
        flush_partial: bool,
    ) -> Self
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let task = tokio::spawn(stream_lines(
            stdout,
            stderr,
            sink,
            cancel.clone(),
            flush_partial,
        ));
        Self { cancel, task }
    }

    /// Cancel and wait for the task.
    pub async fn stop(self) -> StreamEnd {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for the task without cancelling it.
    pub async fn join(self) -> StreamEnd {
        match self.task.await {
            Ok(end) => end,
            Err(e) => StreamEnd::ReadError(format!("streamer task failed: {e}")),
        }
    }

    /// Let the task drain for up to `drain`, then cancel it.
    pub async fn finish(mut self, drain: Duration) -> StreamEnd {
        match tokio::time::timeout(drain, &mut self.task).await {
            Ok(Ok(end)) => end,
            Ok(Err(e)) => StreamEnd::ReadError(format!("streamer task failed: {e}")),
            Err(_) => self.stop().await,
        }
    }
}

enum Chunk {
    Stdout(std::io::Result<Vec<u8>>),
    Stderr(std::io::Result<Vec<u8>>),
}

/// Read whatever is buffered (at least one byte), or an empty vec at EOF.
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> std::io::Result<Vec<u8>> {
    let available = reader.fill_buf().await?;
    let chunk = available.to_vec();
    reader.consume(chunk.len());
    Ok(chunk)
}

async fn stream_lines<O, E>(
    stdout: O,
    stderr: Option<E>,
    sink: Arc<dyn OutputSink>,
    cancel: CancellationToken,
    flush_partial: bool,
) -> StreamEnd
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    let mut stdout = BufReader::new(stdout);
    let mut stderr = stderr.map(BufReader::new);
    let mut stdout_open = true;
    let mut stderr_open = stderr.is_some();
    let mut stdout_lines = LineAssembler::new();
    let mut stderr_lines = LineAssembler::new();

    while stdout_open || stderr_open {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Output streamer cancelled");
                return StreamEnd::Cancelled;
            }
            read = read_chunk(&mut stdout), if stdout_open => Chunk::Stdout(read),
            read = async {
                match stderr.as_mut() {
                    Some(reader) => read_chunk(reader).await,
                    None => Ok(Vec::new()),
                }
            }, if stderr_open => Chunk::Stderr(read),
        };

        let (read, assembler, open, label) = match chunk {
            Chunk::Stdout(read) => (read, &mut stdout_lines, &mut stdout_open, "stdout"),
            Chunk::Stderr(read) => (read, &mut stderr_lines, &mut stderr_open, "stderr"),
        };

        match read {
            Ok(bytes) if bytes.is_empty() => {
                *open = false;
                debug!(stream = label, "Device output reached EOF");
                if flush_partial && let Some(line) = assembler.finish() {
                    forward(&sink, line).await;
                }
            }
            Ok(bytes) => {
                for line in assembler.push(&bytes) {
                    forward(&sink, line).await;
                }
            }
            Err(e) => {
                warn!(stream = label, "Error reading device output: {}", e);
                return StreamEnd::ReadError(e.to_string());
            }
        }
    }

    StreamEnd::Eof
}

async fn forward(sink: &Arc<dyn OutputSink>, line: String) {
    if let Err(e) = sink.send_output(line).await {
        warn!("Dropping device output line: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::channel_sink;
    use tokio::io::AsyncWriteExt;
    use tokio::time::{Duration, timeout};

    #[test]
    fn test_assembler_splits_on_both_terminators() {
        let mut asm = LineAssembler::new();
        assert_eq!(asm.push(b"one\ntwo\rthree\r\n"), vec!["one", "two", "three"]);
        assert_eq!(asm.finish(), None);
    }

    #[test]
    fn test_assembler_suppresses_blank_lines() {
        let mut asm = LineAssembler::new();
        assert_eq!(asm.push(b"\n\n   \r\n\tx \n"), vec!["x"]);
    }

    #[test]
    fn test_assembler_keeps_partial_across_chunks() {
        let mut asm = LineAssembler::new();
        assert!(asm.push(b"hel").is_empty());
        assert!(asm.push(b"lo wo").is_empty());
        assert_eq!(asm.push(b"rld\npart"), vec!["hello world"]);
        assert_eq!(asm.finish().as_deref(), Some("part"));
        assert_eq!(asm.finish(), None);
    }

    #[test]
    fn test_assembler_caps_unterminated_output() {
        let mut asm = LineAssembler::new();
        let flood = vec![b'x'; MAX_LINE_BYTES * 2 + 10];

        let lines = asm.push(&flood);

        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|line| line.len() == MAX_LINE_BYTES));
        assert_eq!(asm.finish().map(|rest| rest.len()), Some(10));
    }

    #[test]
    fn test_assembler_handles_invalid_utf8() {
        let mut asm = LineAssembler::new();
        let lines = asm.push(b"ok \xff\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ok"));
    }

    #[tokio::test]
    async fn test_streamer_forwards_lines_and_flushes_tail() {
        let (sink, mut rx) = channel_sink();
        let (mut writer, reader) = tokio::io::duplex(64);

        let streamer = OutputStreamer::spawn(
            reader,
            None::<tokio::io::DuplexStream>,
            sink,
            CancellationToken::new(),
            true,
        );

        writer.write_all(b"first\r\nsecond\ntail").await.unwrap();
        drop(writer);

        let end = timeout(Duration::from_secs(2), streamer.join()).await.unwrap();
        assert_eq!(end, StreamEnd::Eof);

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        assert_eq!(lines, vec!["first", "second", "tail"]);
    }

    #[tokio::test]
    async fn test_streamer_drops_tail_without_flush() {
        let (sink, mut rx) = channel_sink();
        let (mut writer, reader) = tokio::io::duplex(64);

        let streamer = OutputStreamer::spawn(
            reader,
            None::<tokio::io::DuplexStream>,
            sink,
            CancellationToken::new(),
            false,
        );

        writer.write_all(b"kept\nlost").await.unwrap();
        drop(writer);
        timeout(Duration::from_secs(2), streamer.join()).await.unwrap();

        assert_eq!(rx.try_recv().unwrap(), "kept");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_streamer_reads_both_streams() {
        let (sink, mut rx) = channel_sink();
        let (mut out_w, out_r) = tokio::io::duplex(64);
        let (mut err_w, err_r) = tokio::io::duplex(64);

        let streamer =
            OutputStreamer::spawn(out_r, Some(err_r), sink, CancellationToken::new(), true);

        out_w.write_all(b"from stdout\n").await.unwrap();
        let first = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        err_w.write_all(b"from stderr\n").await.unwrap();
        let second = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();

        assert_eq!(first.as_deref(), Some("from stdout"));
        assert_eq!(second.as_deref(), Some("from stderr"));

        drop(out_w);
        drop(err_w);
        assert_eq!(
            timeout(Duration::from_secs(2), streamer.join()).await.unwrap(),
            StreamEnd::Eof
        );
    }

    #[tokio::test]
    async fn test_streamer_stops_on_cancel() {
        let (sink, mut rx) = channel_sink();
        let (_writer, reader) = tokio::io::duplex(64);

        let streamer = OutputStreamer::spawn(
            reader,
            None::<tokio::io::DuplexStream>,
            sink,
            CancellationToken::new(),
            true,
        );

        let end = timeout(Duration::from_secs(2), streamer.stop()).await.unwrap();
        assert_eq!(end, StreamEnd::Cancelled);
        assert!(rx.try_recv().is_err());
    }
}
