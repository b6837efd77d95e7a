use super::*;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Session recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionRecordLevel {
    /// Disable recording.
    Off,
    /// Record transaction milestones and command outputs.
    KeyEventsOnly,
    /// Also record every raw RPC exchange, enough to replay a session.
    #[default]
    Full,
}

/// A single recorded session event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Options for normalizing JSONL recordings into stable fixtures.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeOptions {
    /// Keep raw RPC exchanges.
    pub keep_rpc_exchanges: bool,
    /// Keep timestamps; otherwise they are replaced by sequence numbers.
    pub keep_timestamps: bool,
}

/// Supported recorded event types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted {
        device_addr: String,
        #[serde(default)]
        host_name: String,
        #[serde(default)]
        hardware_model: String,
        #[serde(default)]
        offline: bool,
    },
    SessionClosed {
        reason: String,
    },
    CommandOutput {
        command: String,
        success: bool,
        output: String,
    },
    ConfigLocked {
        attempts: u32,
    },
    ConfigLockFailed {
        reason: String,
    },
    /// Lines loaded into the candidate, or written to the set file offline.
    ConfigLines {
        lines: Vec<String>,
    },
    ConfigSetFailed {
        lines: Vec<String>,
        reason: String,
    },
    CommitSucceeded {
        comment: String,
        #[serde(default)]
        warnings: Vec<String>,
    },
    CommitFailed {
        comment: String,
        reason: String,
    },
    ConfigCleared {
        #[serde(default)]
        errors: Vec<String>,
    },
    RpcExchange {
        request: String,
        reply: String,
    },
}

/// In-memory session recorder.
///
/// Clones share the same entries, so one recorder can be handed to a
/// [`SessionManager`] and inspected after the sessions it opened are gone.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

impl SessionRecorder {
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    /// Record a key-level event.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), JunosError> {
        if self.level == SessionRecordLevel::Off {
            return Ok(());
        }
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| JunosError::InternalServerError(format!("record lock error: {e}")))?;
        guard.push(SessionRecordEntry {
            ts_ms: now_ms(),
            event,
        });
        Ok(())
    }

    /// Record a raw RPC exchange when the level is [`SessionRecordLevel::Full`].
    pub fn record_rpc(&self, request: &str, reply: &str) -> Result<(), JunosError> {
        if self.level != SessionRecordLevel::Full {
            return Ok(());
        }
        self.record_event(SessionEvent::RpcExchange {
            request: request.to_string(),
            reply: reply.to_string(),
        })
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, JunosError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| JunosError::InternalServerError(format!("record lock error: {e}")))?;
        Ok(guard.clone())
    }

    /// Every line loaded into a candidate (or the offline log), in order.
    pub fn config_lines(&self) -> Result<Vec<String>, JunosError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter_map(|entry| match entry.event {
                SessionEvent::ConfigLines { lines } => Some(lines),
                _ => None,
            })
            .flatten()
            .collect())
    }

    pub fn clear(&self) -> Result<(), JunosError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| JunosError::InternalServerError(format!("record lock error: {e}")))?;
        guard.clear();
        Ok(())
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> Result<String, JunosError> {
        let entries = self.entries()?;
        let mut lines = Vec::with_capacity(entries.len());
        for entry in entries {
            let line = serde_json::to_string(&entry).map_err(|e| {
                JunosError::InternalServerError(format!("record encode error: {e}"))
            })?;
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    /// Restore a recorder from JSONL lines.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, JunosError> {
        let mut parsed = Vec::new();
        for line in jsonl.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: SessionRecordEntry = serde_json::from_str(line).map_err(|e| {
                JunosError::InternalServerError(format!("record decode error: {e}"))
            })?;
            parsed.push(entry);
        }
        Ok(Self {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(parsed)),
        })
    }

    /// Normalize JSONL recording content into a stable fixture representation.
    ///
    /// Events are ordered by timestamp (ties keep file order) and raw RPC
    /// exchanges are dropped unless requested.
    pub fn normalize_jsonl(jsonl: &str, options: NormalizeOptions) -> Result<String, JunosError> {
        let recorder = Self::from_jsonl(jsonl)?;
        let mut indexed = recorder
            .entries()?
            .into_iter()
            .enumerate()
            .collect::<Vec<(usize, SessionRecordEntry)>>();

        indexed
            .sort_by(|(idx_a, a), (idx_b, b)| a.ts_ms.cmp(&b.ts_ms).then_with(|| idx_a.cmp(idx_b)));

        let filtered = indexed
            .into_iter()
            .filter_map(|(_, entry)| match &entry.event {
                SessionEvent::RpcExchange { .. } if !options.keep_rpc_exchanges => None,
                _ => Some(entry),
            })
            .enumerate()
            .map(|(seq, mut entry)| {
                if !options.keep_timestamps {
                    entry.ts_ms = seq as u128;
                }
                entry
            })
            .collect::<Vec<_>>();

        let normalized = SessionRecorder {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(filtered)),
        };
        normalized.to_jsonl()
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(SessionRecordLevel::Full)
    }
}

/// Offline device channel backed by a recording.
///
/// Requests are matched in order against recorded
/// [`SessionEvent::RpcExchange`] entries, so a recorded resource operation
/// can be run again without a device. Clones share the replay cursor, which
/// lets consecutive sessions opened through the [`Connector`] impl pick up
/// where the previous one stopped.
#[derive(Debug, Clone)]
pub struct SessionReplayer {
    entries: Arc<Vec<SessionRecordEntry>>,
    cursor: Arc<Mutex<usize>>,
    closed: bool,
}

impl SessionReplayer {
    pub fn from_recorder(recorder: &SessionRecorder) -> Self {
        let entries = recorder.entries().unwrap_or_default();
        Self {
            entries: Arc::new(entries),
            cursor: Arc::new(Mutex::new(0)),
            closed: false,
        }
    }

    pub fn from_jsonl(jsonl: &str) -> Result<Self, JunosError> {
        let recorder = SessionRecorder::from_jsonl(jsonl)?;
        Ok(Self::from_recorder(&recorder))
    }

    /// Device address of the first recorded session, if any.
    pub fn device_addr(&self) -> Option<&str> {
        self.entries.iter().find_map(|entry| match &entry.event {
            SessionEvent::SessionStarted { device_addr, .. } => Some(device_addr.as_str()),
            _ => None,
        })
    }

    /// Next recorded output of a CLI command.
    pub fn replay_command(&mut self, command: &str) -> Result<String, JunosError> {
        let (success, output) = self
            .advance_to(|event| match event {
                SessionEvent::CommandOutput {
                    command: recorded,
                    success,
                    output,
                } if recorded == command => Some((*success, output.clone())),
                _ => None,
            })?
            .ok_or_else(|| {
                JunosError::ReplayMismatch(format!(
                    "no replayable output found for command '{command}'"
                ))
            })?;
        if !success {
            return Err(JunosError::Command {
                command: command.to_string(),
                reason: output,
            });
        }
        Ok(output)
    }

    fn replay_rpc(&mut self, request: &str) -> Result<String, JunosError> {
        self.advance_to(|event| match event {
            SessionEvent::RpcExchange {
                request: recorded,
                reply,
            } if recorded == request => Some(reply.clone()),
            _ => None,
        })?
        .ok_or_else(|| JunosError::ReplayMismatch(format!("no recorded reply for rpc '{request}'")))
    }

    /// Moves the shared cursor past the first event `pick` accepts.
    fn advance_to<T>(
        &self,
        pick: impl Fn(&SessionEvent) -> Option<T>,
    ) -> Result<Option<T>, JunosError> {
        let mut cursor = self
            .cursor
            .lock()
            .map_err(|e| JunosError::InternalServerError(format!("replay cursor error: {e}")))?;
        while *cursor < self.entries.len() {
            let entry = &self.entries[*cursor];
            *cursor += 1;
            if let Some(found) = pick(&entry.event) {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl DeviceChannel for SessionReplayer {
    async fn exec_rpc(&mut self, body: &str) -> Result<String, JunosError> {
        if self.closed {
            return Err(JunosError::ChannelDisconnect);
        }
        self.replay_rpc(body)
    }

    async fn close(&mut self) -> Result<(), JunosError> {
        self.closed = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed
    }
}

#[async_trait]
impl Connector for SessionReplayer {
    async fn connect(&self) -> Result<Box<dyn DeviceChannel>, JunosError> {
        let mut channel = self.clone();
        channel.closed = false;
        Ok(Box::new(channel))
    }

    fn describe(&self) -> String {
        self.device_addr().unwrap_or("replay").to_string()
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
