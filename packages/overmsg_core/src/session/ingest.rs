//! Reads newline-delimited frames off the persistent channel and feeds the
//! delivery queue.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::Notice;
use crate::metrics::SessionMetrics;
use crate::protocol::{Frame, InboundMessage, decode_frame};

/// Why the ingest loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The server closed the connection.
    Closed,
    /// A read error ended the connection.
    ReadFailed(String),
    /// The supervisor retired the link.
    Cancelled,
    /// The delivery queue's consumer went away.
    ConsumerGone,
}

/// Run until EOF, a read error, cancellation, or the consumer dropping the
/// queue. A full queue blocks the loop; nothing is dropped.
pub(crate) async fn run_ingest<R>(
    reader: R,
    delivery: mpsc::Sender<InboundMessage>,
    notices: broadcast::Sender<Notice>,
    metrics: &SessionMetrics,
    cancel: CancellationToken,
) -> IngestOutcome
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(1024);

    loop {
        buf.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => return IngestOutcome::Cancelled,
            r = reader.read_until(b'\n', &mut buf) => r,
        };

        match read {
            Ok(0) => {
                debug!("persistent channel closed by server");
                return IngestOutcome::Closed;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "persistent channel read failed");
                return IngestOutcome::ReadFailed(e.to_string());
            }
        }

        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            continue;
        }

        match decode_frame(line) {
            Frame::Message(msg) => {
                trace!(from = %msg.from, len = msg.body.len(), "inbound message");
                tokio::select! {
                    _ = cancel.cancelled() => return IngestOutcome::Cancelled,
                    sent = delivery.send(msg) => {
                        if sent.is_err() {
                            debug!("delivery queue closed");
                            return IngestOutcome::ConsumerGone;
                        }
                        metrics.message_delivered();
                    }
                }
            }
            Frame::RemoteError { from, error } => {
                warn!(from = %from, error = %error, "server reported message error");
                metrics.remote_error();
                let _ = notices.send(Notice::RemoteError { from, error });
            }
            Frame::Ack => trace!("liveness ack"),
            Frame::Ignored { kind } => {
                debug!(kind = kind.as_deref().unwrap_or("<none>"), "skipping frame");
            }
            Frame::Malformed { raw, reason } => {
                warn!(reason = %reason, len = raw.len(), "malformed frame");
                metrics.malformed_frame();
                let _ = notices.send(Notice::IngestError { raw, reason });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn channels() -> (
        mpsc::Sender<InboundMessage>,
        mpsc::Receiver<InboundMessage>,
        broadcast::Sender<Notice>,
        broadcast::Receiver<Notice>,
    ) {
        let (tx, rx) = mpsc::channel(64);
        let (ntx, nrx) = broadcast::channel(64);
        (tx, rx, ntx, nrx)
    }

    #[tokio::test]
    async fn delivers_burst_in_order() {
        let (tx, mut rx, ntx, _nrx) = channels();
        let metrics = SessionMetrics::new();

        let mut script = String::new();
        for i in 0..20 {
            script.push_str(&format!(
                "{{\"type\":\"message\",\"from_name\":\"bob\",\"message\":\"m{i}\"}}\n"
            ));
        }
        let reader = tokio_test::io::Builder::new().read(script.as_bytes()).build();

        let outcome = run_ingest(reader, tx, ntx, &metrics, CancellationToken::new()).await;
        assert_eq!(outcome, IngestOutcome::Closed);

        for i in 0..20 {
            let msg = rx.recv().await.unwrap();
            assert_eq!(msg.from, "bob");
            assert_eq!(msg.body, format!("m{i}"));
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(metrics.snapshot().messages_delivered, 20);
    }

    #[tokio::test]
    async fn frames_split_across_reads() {
        let (tx, mut rx, ntx, _nrx) = channels();
        let metrics = SessionMetrics::new();
        let reader = tokio_test::io::Builder::new()
            .read(b"{\"type\":\"mess")
            .read(b"age\",\"from_name\":\"al\",\"message\":\"hey\"}\r")
            .read(b"\n")
            .build();

        run_ingest(reader, tx, ntx, &metrics, CancellationToken::new()).await;
        let msg = rx.recv().await.unwrap();
        assert_eq!((msg.from.as_str(), msg.body.as_str()), ("al", "hey"));
    }

    #[tokio::test]
    async fn unknown_kind_and_ack_are_skipped() {
        let (tx, mut rx, ntx, mut nrx) = channels();
        let metrics = SessionMetrics::new();
        let reader = tokio_test::io::Builder::new()
            .read(b"{\"type\":\"typing\",\"from_name\":\"bob\"}\n")
            .read(b"success\n")
            .read(b"\n")
            .read(b"{\"type\":\"message\",\"from_name\":\"bob\",\"message\":\"after\"}\n")
            .build();

        let outcome = run_ingest(reader, tx, ntx, &metrics, CancellationToken::new()).await;
        assert_eq!(outcome, IngestOutcome::Closed);
        assert_eq!(rx.recv().await.unwrap().body, "after");
        assert!(rx.try_recv().is_err());
        assert!(nrx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_frame_is_reported_and_loop_continues() {
        let (tx, mut rx, ntx, mut nrx) = channels();
        let metrics = SessionMetrics::new();
        let reader = tokio_test::io::Builder::new()
            .read(b"not json at all\n")
            .read(b"{\"type\":\"message\",\"from_name\":\"bob\",\"message\":\"ok\"}\n")
            .build();

        run_ingest(reader, tx, ntx, &metrics, CancellationToken::new()).await;

        assert_eq!(rx.recv().await.unwrap().body, "ok");
        match nrx.try_recv().unwrap() {
            Notice::IngestError { raw, .. } => assert_eq!(raw, "not json at all"),
            other => panic!("expected ingest error, got {other:?}"),
        }
        assert_eq!(metrics.snapshot().malformed_frames, 1);
    }

    #[tokio::test]
    async fn error_frame_is_not_delivered() {
        let (tx, mut rx, ntx, mut nrx) = channels();
        let metrics = SessionMetrics::new();
        let reader = tokio_test::io::Builder::new()
            .read(b"{\"type\":\"message\",\"from_name\":\"bob\",\"message\":\"\",\"error\":\"peer offline\"}\n")
            .build();

        run_ingest(reader, tx, ntx, &metrics, CancellationToken::new()).await;

        assert!(rx.try_recv().is_err());
        match nrx.try_recv().unwrap() {
            Notice::RemoteError { from, error } => {
                assert_eq!(from, "bob");
                assert_eq!(error, "peer offline");
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn read_error_ends_loop() {
        let (tx, _rx, ntx, _nrx) = channels();
        let metrics = SessionMetrics::new();
        let reader = tokio_test::io::Builder::new()
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))
            .build();

        let outcome = run_ingest(reader, tx, ntx, &metrics, CancellationToken::new()).await;
        assert!(matches!(outcome, IngestOutcome::ReadFailed(_)));
    }

    #[tokio::test]
    async fn full_queue_blocks_instead_of_dropping() {
        let (tx, mut rx) = mpsc::channel(1);
        let (ntx, _nrx) = broadcast::channel(8);
        let (mut server, client) = tokio::io::duplex(1024);

        let task = tokio::spawn(async move {
            let metrics = SessionMetrics::new();
            run_ingest(client, tx, ntx, &metrics, CancellationToken::new()).await
        });

        for i in 0..3 {
            let line = format!("{{\"type\":\"message\",\"from_name\":\"a\",\"message\":\"{i}\"}}\n");
            server.write_all(line.as_bytes()).await.unwrap();
        }

        // Only one slot: the loop is parked on the second send.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        drop(server);
        for i in 0..3 {
            assert_eq!(rx.recv().await.unwrap().body, i.to_string());
        }
        assert_eq!(task.await.unwrap(), IngestOutcome::Closed);
    }

    #[tokio::test]
    async fn cancellation_stops_an_idle_loop() {
        let (tx, _rx, ntx, _nrx) = channels();
        let (_server, client) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();

        let child = cancel.clone();
        let task = tokio::spawn(async move {
            let metrics = SessionMetrics::new();
            run_ingest(client, tx, ntx, &metrics, child).await
        });
        cancel.cancel();
        assert_eq!(task.await.unwrap(), IngestOutcome::Cancelled);
    }

    #[tokio::test]
    async fn dropped_consumer_ends_loop() {
        let (tx, rx, ntx, _nrx) = channels();
        drop(rx);
        let metrics = SessionMetrics::new();
        let reader = tokio_test::io::Builder::new()
            .read(b"{\"type\":\"message\",\"from_name\":\"bob\",\"message\":\"x\"}\n")
            .build();

        let outcome = run_ingest(reader, tx, ntx, &metrics, CancellationToken::new()).await;
        assert_eq!(outcome, IngestOutcome::ConsumerGone);
    }
}
