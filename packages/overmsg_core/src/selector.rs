//! Server selection: probe every candidate host and keep the fastest.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tracing::{debug, info, warn};

use crate::config::SelectorConfig;
use crate::error::{ClientError, Result};

/// Control URL and persistent-channel address of the chosen server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedEndpoint {
    pub host: String,
    pub control_url: String,
    pub stream_addr: String,
}

impl SelectedEndpoint {
    pub fn new(host: &str, control_port: u16, stream_port: u16) -> Self {
        Self {
            host: host.to_string(),
            control_url: format!("http://{host}:{control_port}"),
            stream_addr: format!("{host}:{stream_port}"),
        }
    }
}

/// A lightweight liveness check against one candidate host.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, host: &str) -> Result<()>;
}

/// Probes the control channel root over HTTP. Any response counts as alive.
#[derive(Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    control_port: u16,
}

impl HttpProbe {
    pub fn new(control_port: u16, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::from_reqwest)?;
        Ok(Self {
            client,
            control_port,
        })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, host: &str) -> Result<()> {
        let url = format!("http://{host}:{}", self.control_port);
        self.client
            .get(&url)
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;
        Ok(())
    }
}

/// Picks the lowest-latency reachable server from a candidate list.
pub struct ServerSelector {
    probe: Arc<dyn Probe>,
    config: SelectorConfig,
}

impl ServerSelector {
    pub fn new(probe: Arc<dyn Probe>, config: SelectorConfig) -> Self {
        Self { probe, config }
    }

    /// Selector using [`HttpProbe`] on the configured control port.
    pub fn http(config: SelectorConfig) -> Result<Self> {
        let probe = HttpProbe::new(config.control_port, config.probe_timeout)?;
        Ok(Self::new(Arc::new(probe), config))
    }

    /// Probe all candidates concurrently and return the fastest responder.
    ///
    /// Every probe runs to completion (or its own timeout) so that a slow
    /// early answer cannot win over a faster later one. Latencies are
    /// compared in whole milliseconds; ties go to the candidate listed first.
    /// Answers arriving after the overall deadline are discarded.
    pub async fn select(&self, candidates: &[String]) -> Result<SelectedEndpoint> {
        let deadline = tokio::time::Instant::now() + self.config.deadline;
        let per_probe = self.config.probe_timeout.min(self.config.deadline);

        let mut probes: FuturesUnordered<_> = candidates
            .iter()
            .enumerate()
            .map(|(index, host)| {
                let probe = self.probe.clone();
                async move {
                    let start = Instant::now();
                    let outcome = tokio::time::timeout(per_probe, probe.probe(host)).await;
                    let latency = start.elapsed();
                    let outcome = match outcome {
                        Ok(result) => result,
                        Err(_) => Err(ClientError::timed_out("probe", per_probe)),
                    };
                    (index, host, latency, outcome)
                }
            })
            .collect();

        let mut best: Option<(Duration, usize, &String)> = None;
        loop {
            let polled = tokio::time::timeout_at(deadline, probes.next()).await;
            let next = match polled {
                Ok(Some(next)) => next,
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        pending = probes.len(),
                        "selection deadline elapsed, ignoring outstanding probes"
                    );
                    break;
                }
            };

            let (index, host, latency, outcome) = next;
            match outcome {
                Ok(()) => {
                    debug!(host = %host, latency_ms = latency.as_millis() as u64, "probe ok");
                    // Millisecond resolution, so near-equal answers tie on list order
                    let better = match best {
                        None => true,
                        Some((best_latency, best_index, _)) => {
                            (latency.as_millis(), index) < (best_latency.as_millis(), best_index)
                        }
                    };
                    if better {
                        best = Some((latency, index, host));
                    }
                }
                Err(e) => {
                    debug!(host = %host, error = %e, "probe failed");
                }
            }
        }

        let (latency, _, host) = best.ok_or(ClientError::NoServerAvailable)?;
        info!(
            host = %host,
            latency_ms = latency.as_millis() as u64,
            "selected server"
        );
        Ok(SelectedEndpoint::new(
            host,
            self.config.control_port,
            self.config.stream_port,
        ))
    }
}
