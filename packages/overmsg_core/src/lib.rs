//! Session and connection core for the overmsg chat client.
//!
//! Leaves first:
//!
//! - [`selector`] probes candidate hosts and picks the fastest reachable one
//! - [`control`] holds the request/response calls (auth, send, presence,
//!   sign-out, heartbeat)
//! - [`session`] owns the persistent channel, the heartbeat watchdog and
//!   the reconnect state machine, and feeds the delivery queue
//!
//! Everything the presentation layer needs comes out of a
//! [`SessionManager`]: a [`DeliveryQueue`] of messages, a watch channel of
//! [`SessionState`], and a broadcast of [`Notice`]s.

pub mod config;
pub mod control;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod selector;
pub mod session;
pub mod token;

pub use config::{ClientConfig, ConfigError, ConfigStore, SelectorConfig, SessionConfig};
pub use control::{ControlChannel, ControlClient, Presence};
pub use error::{CallKind, ClientError, Result};
pub use metrics::{MetricsSnapshot, SessionMetrics};
pub use protocol::{Frame, InboundMessage, decode_frame};
pub use selector::{HttpProbe, Probe, SelectedEndpoint, ServerSelector};
pub use session::{
    DeliveryQueue, Dialer, IngestOutcome, Link, Notice, SessionManager, SessionState, TcpDialer,
};
pub use token::{Credential, Token};
