/// Bounded output collection for prover stdout/stderr
///
/// Each stream is drained by its own task until EOF. Bytes past the
/// per-stream limit are read and discarded so the prover never blocks on a
/// full pipe.
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Output limits configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputLimits {
    /// Per-stream stdout limit (bytes)
    pub stdout_limit: usize,
    /// Per-stream stderr limit (bytes)
    pub stderr_limit: usize,
    /// Grace period for drains after the prover exits (milliseconds)
    pub collection_timeout_ms: u64,
}

impl OutputLimits {
    pub fn collection_timeout(&self) -> Duration {
        Duration::from_millis(self.collection_timeout_ms)
    }
}

impl Default for OutputLimits {
    fn default() -> Self {
        OutputLimits {
            stdout_limit: 64 * 1024 * 1024, // 64 MB stdout
            stderr_limit: 4 * 1024 * 1024,  // 4 MB stderr
            collection_timeout_ms: 5000,    // 5 seconds
        }
    }
}

/// Output integrity classification
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutputIntegrity {
    #[default]
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "truncated_by_limit")]
    TruncatedByLimit,
    #[serde(rename = "read_error")]
    ReadError,
    /// Drain did not reach EOF within the collection grace period
    #[serde(rename = "abandoned")]
    Abandoned,
}

impl std::fmt::Display for OutputIntegrity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputIntegrity::Complete => write!(f, "complete"),
            OutputIntegrity::TruncatedByLimit => write!(f, "truncated_by_limit"),
            OutputIntegrity::ReadError => write!(f, "read_error"),
            OutputIntegrity::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Bytes captured from one stream
#[derive(Debug, Clone, Default)]
pub struct CapturedStream {
    pub data: Vec<u8>,
    pub integrity: OutputIntegrity,
    /// Total bytes the prover wrote, including discarded ones
    pub total_bytes: usize,
}

impl CapturedStream {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Drain a stream to EOF keeping at most `limit` bytes.
///
/// Stops early when `stop` fires, keeping what was read so far and marking
/// the capture `Abandoned`.
pub async fn collect_stream<R>(mut stream: R, limit: usize, stop: CancellationToken) -> CapturedStream
where
    R: AsyncRead + Unpin,
{
    let mut captured = CapturedStream::default();
    let mut chunk = [0u8; 8192];

    loop {
        let read = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                captured.integrity = OutputIntegrity::Abandoned;
                break;
            }
            read = stream.read(&mut chunk) => read,
        };

        match read {
            Ok(0) => break,
            Ok(n) => {
                captured.total_bytes += n;
                let room = limit.saturating_sub(captured.data.len());
                if room >= n {
                    captured.data.extend_from_slice(&chunk[..n]);
                } else {
                    captured.data.extend_from_slice(&chunk[..room]);
                    captured.integrity = OutputIntegrity::TruncatedByLimit;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("Output stream read failed: {}", e);
                captured.integrity = OutputIntegrity::ReadError;
                break;
            }
        }
    }

    captured
}

/// A running drain task
pub struct Collector {
    handle: JoinHandle<CapturedStream>,
    stop: CancellationToken,
}

/// Spawn a drain task for an optional stream
pub fn spawn_collector<R>(stream: Option<R>, limit: usize) -> Option<Collector>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream.map(|s| {
        let stop = CancellationToken::new();
        Collector {
            handle: tokio::spawn(collect_stream(s, limit, stop.clone())),
            stop,
        }
    })
}

/// Await a drain task; after `grace` it is told to stop and hands back
/// whatever it captured.
pub async fn finish_collector(collector: Option<Collector>, grace: Duration) -> CapturedStream {
    let Some(Collector { mut handle, stop }) = collector else {
        return CapturedStream::default();
    };

    let joined = match tokio::time::timeout(grace, &mut handle).await {
        Ok(joined) => joined,
        Err(_) => {
            log::warn!("Output collector did not reach EOF within {:?}", grace);
            stop.cancel();
            handle.await
        }
    };

    joined.unwrap_or_else(|join_error| {
        log::warn!("Output collector task failed: {}", join_error);
        CapturedStream {
            integrity: OutputIntegrity::ReadError,
            ..CapturedStream::default()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_limits_default() {
        let limits = OutputLimits::default();
        assert_eq!(limits.stdout_limit, 64 * 1024 * 1024);
        assert_eq!(limits.stderr_limit, 4 * 1024 * 1024);
        assert_eq!(limits.collection_timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_collect_small_output() {
        let captured = collect_stream(&b"{\"env\": 0}"[..], 1024, CancellationToken::new()).await;
        assert_eq!(captured.data, b"{\"env\": 0}");
        assert_eq!(captured.integrity, OutputIntegrity::Complete);
        assert_eq!(captured.total_bytes, 10);
    }

    #[tokio::test]
    async fn test_collect_truncates_but_drains() {
        let input = vec![b'x'; 20_000];
        let captured = collect_stream(&input[..], 100, CancellationToken::new()).await;
        assert_eq!(captured.data.len(), 100);
        assert_eq!(captured.total_bytes, 20_000);
        assert_eq!(captured.integrity, OutputIntegrity::TruncatedByLimit);
    }

    #[tokio::test]
    async fn test_missing_stream_is_empty() {
        let handle = spawn_collector::<tokio::io::Empty>(None, 10);
        let captured = finish_collector(handle, Duration::from_millis(10)).await;
        assert!(captured.data.is_empty());
        assert_eq!(captured.integrity, OutputIntegrity::Complete);
    }

    #[tokio::test]
    async fn test_stalled_stream_is_abandoned() {
        let (_writer, reader) = tokio::io::duplex(64);
        let handle = spawn_collector(Some(reader), 10);
        let captured = finish_collector(handle, Duration::from_millis(20)).await;
        assert_eq!(captured.integrity, OutputIntegrity::Abandoned);
    }

    #[tokio::test]
    async fn test_abandoned_stream_keeps_captured_bytes() {
        use tokio::io::AsyncWriteExt;

        let (mut writer, reader) = tokio::io::duplex(64);
        writer.write_all(b"{\"env\": 0}\n").await.unwrap();
        let handle = spawn_collector(Some(reader), 1024);

        // Writer stays open, as a detached descendant would keep it.
        let captured = finish_collector(handle, Duration::from_millis(100)).await;
        assert_eq!(captured.integrity, OutputIntegrity::Abandoned);
        assert_eq!(captured.data, b"{\"env\": 0}\n");
        assert_eq!(captured.total_bytes, 11);
        drop(writer);
    }

    #[test]
    fn test_output_integrity_display() {
        assert_eq!(format!("{}", OutputIntegrity::Complete), "complete");
        assert_eq!(format!("{}", OutputIntegrity::TruncatedByLimit), "truncated_by_limit");
        assert_eq!(format!("{}", OutputIntegrity::ReadError), "read_error");
        assert_eq!(format!("{}", OutputIntegrity::Abandoned), "abandoned");
    }
}
