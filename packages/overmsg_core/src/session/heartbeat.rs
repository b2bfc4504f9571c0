use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::supervisor::Event;
use crate::control::ControlChannel;
use crate::metrics::SessionMetrics;
use crate::token::Token;

/// Send a liveness beacon every `period` and report each result to the
/// supervisor, tagged with the link generation it belongs to.
pub(crate) async fn run_heartbeat(
    control: Arc<dyn ControlChannel>,
    token: Token,
    period: Duration,
    generation: u64,
    events: mpsc::Sender<Event>,
    metrics: Arc<SessionMetrics>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            r = control.heartbeat(&token) => r,
        };

        let event = match result {
            Ok(()) => Event::HeartbeatOk { generation },
            Err(error) => {
                metrics.heartbeat_failed();
                warn!(generation, error = %error, "heartbeat failed");
                Event::HeartbeatFailed { generation, error }
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = events.send(event) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    debug!(generation, "heartbeat stopped");
}
