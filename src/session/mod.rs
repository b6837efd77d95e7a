//! Device sessions and the candidate-configuration transaction protocol.
//!
//! A [`Session`] is one lease of a device channel bound to a single resource
//! operation. It owns sending CLI commands, loading `set`/`delete` lines into
//! the candidate configuration and the lock/commit/clear sequence of a
//! [`ConfigTransaction`].
//!
//! # Main Components
//!
//! - [`SessionManager`] - Opens sessions and hands out the configuration-writer lock
//! - [`Session`] - One leased channel with the device identity captured at start
//! - [`DeviceChannel`] / [`Connector`] - Transport contract, NETCONF over SSH by default
//! - [`ConfigTransaction`] - Lock, apply, commit and clear of the candidate configuration
//! - [`SessionRecorder`] / [`SessionReplayer`] - Command log and offline replay

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_ssh2_tokio::Config;
use async_ssh2_tokio::client::{AuthMethod, Client};
use async_trait::async_trait;
use log::{debug, trace, warn};
use russh::ChannelMsg;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_util::sync::CancellationToken;

use crate::config::ProviderConfig;
use crate::device::{Capability, DeviceIdentity};
use crate::error::JunosError;
use crate::lock::{GLOBAL_LOCK, LockGuard, LockManager};
use crate::netconf::{self, RpcReply};

pub use channel::{Connector, DeviceChannel, NetconfSshChannel, NetconfSshConnector};
pub use recording::{
    NormalizeOptions, SessionEvent, SessionRecordEntry, SessionRecordLevel, SessionRecorder,
    SessionReplayer,
};
pub use transaction::{ConfigTransaction, TxState};

/// One leased device channel, created and closed per resource operation.
pub struct Session {
    backend: Backend,
    identity: DeviceIdentity,
    device_addr: String,
    config: Arc<ProviderConfig>,
    cancel: CancellationToken,
    recorder: Option<SessionRecorder>,
    tx_state: TxState,
    closed: bool,
}

enum Backend {
    /// Live channel to a device.
    Netconf(Box<dyn DeviceChannel>),
    /// No device: lines go to the command log and optionally a set file.
    Offline { set_file: Option<PathBuf> },
}

/// Opens sessions for one provider instance.
///
/// Sessions share the manager's [`LockManager`]; by default this is the
/// process-wide [`GLOBAL_LOCK`], tests inject their own per simulated device.
#[derive(Clone)]
pub struct SessionManager {
    config: Arc<ProviderConfig>,
    connector: Arc<dyn Connector>,
    lock: Arc<LockManager>,
    recorder: Option<SessionRecorder>,
}

/// Result of a successful commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CommitOutcome {
    /// Advisory device messages; never fatal.
    pub warnings: Vec<String>,
    pub confirmed: bool,
}

mod channel;
mod client;
mod manager;
mod recording;
mod transaction;
