use super::*;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

impl Session {
    /// Wraps a connected channel and captures the device identity.
    pub(super) async fn open(
        channel: Box<dyn DeviceChannel>,
        config: Arc<ProviderConfig>,
        cancel: CancellationToken,
        recorder: Option<SessionRecorder>,
    ) -> Result<Session, JunosError> {
        let device_addr = config.device_addr();
        let mut session = Session {
            backend: Backend::Netconf(channel),
            identity: DeviceIdentity::default(),
            device_addr,
            config,
            cancel,
            recorder,
            tx_state: TxState::Unlocked,
            closed: false,
        };

        match session.fetch_identity().await {
            Ok(identity) => session.identity = identity,
            Err(err) => {
                let _ = session.shutdown("identity lookup failed").await;
                return Err(err);
            }
        }
        debug!(
            "{} session started on {} ({} {})",
            session.device_addr,
            session.identity.host_name,
            session.identity.hardware_model,
            session.identity.os_version
        );
        session.record(SessionEvent::SessionStarted {
            device_addr: session.device_addr.clone(),
            host_name: session.identity.host_name.clone(),
            hardware_model: session.identity.hardware_model.clone(),
            offline: false,
        });
        Ok(session)
    }

    /// Session without a device: configuration lines are only logged.
    pub(super) fn offline(
        config: Arc<ProviderConfig>,
        cancel: CancellationToken,
        recorder: Option<SessionRecorder>,
    ) -> Session {
        let set_file = config.fake_create_set_file.as_ref().map(PathBuf::from);
        let session = Session {
            backend: Backend::Offline { set_file },
            identity: DeviceIdentity::offline(),
            device_addr: "offline".to_string(),
            config,
            cancel,
            recorder,
            tx_state: TxState::Unlocked,
            closed: false,
        };
        session.record(SessionEvent::SessionStarted {
            device_addr: session.device_addr.clone(),
            host_name: session.identity.host_name.clone(),
            hardware_model: String::new(),
            offline: true,
        });
        session
    }

    async fn fetch_identity(&mut self) -> Result<DeviceIdentity, JunosError> {
        let target = self.device_addr.clone();
        let failed = |reason: String| JunosError::Connection {
            target: target.clone(),
            reason,
        };
        let reply = self
            .rpc(netconf::get_system_information())
            .await
            .map_err(|e| failed(format!("get-system-information: {e}")))?;
        if reply.has_errors() {
            return Err(failed(format!(
                "get-system-information: {}",
                reply.error_text()
            )));
        }
        DeviceIdentity::parse(&reply.body)
            .ok_or_else(|| failed("unexpected system information reply".to_string()))
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn device_addr(&self) -> &str {
        &self.device_addr
    }

    pub fn is_offline(&self) -> bool {
        matches!(self.backend, Backend::Offline { .. })
    }

    pub fn tx_state(&self) -> TxState {
        self.tx_state
    }

    /// Whether the connected device offers `capability`.
    pub fn check_compatibility(&self, capability: Capability) -> bool {
        self.identity.supports(capability)
    }

    /// Decodes a `$9$` value read from the device; `field` names it in errors.
    pub fn junos_decode(&self, raw: &str, field: &str) -> Result<String, JunosError> {
        crate::secret::junos_decode(raw).map_err(|err| match err {
            JunosError::Decode { reason, .. } => JunosError::Decode {
                field: field.to_string(),
                reason,
            },
            other => other,
        })
    }

    /// Runs a read-only CLI command and returns its text output.
    ///
    /// `show configuration` of an absent stanza returns an empty string.
    pub async fn command(&mut self, cli: &str) -> Result<String, JunosError> {
        self.ensure_active(cli)?;
        if self.is_offline() {
            return Err(JunosError::command(cli, "offline session has no device"));
        }
        let reply = self
            .rpc(&netconf::command(cli))
            .await
            .map_err(|e| JunosError::command(cli, e))?;
        if reply.has_errors() {
            let reason = reply.error_text();
            self.record(SessionEvent::CommandOutput {
                command: cli.to_string(),
                success: false,
                output: reason.clone(),
            });
            return Err(JunosError::Command {
                command: cli.to_string(),
                reason,
            });
        }
        let output = netconf::command_output(&reply.body);
        self.record(SessionEvent::CommandOutput {
            command: cli.to_string(),
            success: true,
            output: output.clone(),
        });
        Ok(output)
    }

    /// Whether `show configuration <path>` returns anything.
    pub async fn config_exists(&mut self, path: &str) -> Result<bool, JunosError> {
        let output = self.command(&crate::codec::show_set(path)).await?;
        Ok(!output.trim().is_empty())
    }

    /// Loads `set`/`delete` lines into the locked candidate.
    ///
    /// The candidate may be partially modified when the device rejects a
    /// line; the enclosing transaction's clear discards it.
    pub async fn config_set(&mut self, lines: &[String]) -> Result<(), JunosError> {
        self.ensure_active("config set")?;
        if !self.tx_state.can_apply() {
            return Err(JunosError::InternalServerError(format!(
                "config set outside of a locked candidate (state {:?})",
                self.tx_state
            )));
        }
        if lines.is_empty() {
            return Ok(());
        }
        self.tx_state = TxState::Applied;

        if let Backend::Offline { set_file } = &self.backend {
            if let Some(path) = set_file.clone() {
                append_set_file(&path, lines).await?;
            }
            debug!("offline session logged {} line(s)", lines.len());
            self.record(SessionEvent::ConfigLines {
                lines: lines.to_vec(),
            });
            return Ok(());
        }

        let reply = match self.rpc(&netconf::load_set(lines)).await {
            Ok(reply) => reply,
            Err(err) => {
                self.record_set_failure(lines, &err.to_string());
                return Err(JunosError::config_apply(err.to_string()));
            }
        };
        if reply.has_errors() {
            let reason = reply.error_text();
            self.record_set_failure(lines, &reason);
            return Err(JunosError::config_apply(reason));
        }
        for warning in reply.warning_texts() {
            warn!("{} load-configuration warning: {}", self.device_addr, warning);
        }
        self.record(SessionEvent::ConfigLines {
            lines: lines.to_vec(),
        });
        Ok(())
    }

    /// Takes the device candidate lock, retrying a refusal while
    /// `lock_wait_secs` allows it.
    pub(super) async fn lock_candidate(&mut self) -> Result<(), JunosError> {
        self.ensure_active("config lock")?;
        if self.is_offline() {
            self.record(SessionEvent::ConfigLocked { attempts: 0 });
            return Ok(());
        }

        let deadline = self.config.lock_wait().map(|wait| Instant::now() + wait);
        let interval = self.config.lock_retry_interval();
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let reason = match self.rpc(netconf::lock_candidate()).await {
                Ok(reply) if !reply.has_errors() => {
                    debug!("{} candidate locked after {attempts} attempt(s)", self.device_addr);
                    self.record(SessionEvent::ConfigLocked { attempts });
                    return Ok(());
                }
                Ok(reply) => reply.error_text(),
                Err(err) => {
                    self.record(SessionEvent::ConfigLockFailed {
                        reason: err.to_string(),
                    });
                    return Err(JunosError::Lock(err.to_string()));
                }
            };

            let retry = deadline.is_some_and(|deadline| Instant::now() + interval <= deadline);
            if !retry {
                self.record(SessionEvent::ConfigLockFailed {
                    reason: reason.clone(),
                });
                return Err(JunosError::Lock(reason));
            }
            debug!(
                "{} candidate lock refused ({reason}), retrying in {:?}",
                self.device_addr, interval
            );
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(JunosError::Cancelled("config lock".to_string()));
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Commits the candidate, confirming it afterwards when confirmed
    /// commits are enabled.
    pub(super) async fn commit_candidate(
        &mut self,
        comment: &str,
    ) -> Result<CommitOutcome, JunosError> {
        self.ensure_active("commit")?;
        if self.is_offline() {
            self.record(SessionEvent::CommitSucceeded {
                comment: comment.to_string(),
                warnings: Vec::new(),
            });
            return Ok(CommitOutcome::default());
        }

        let confirmed = self.config.commit_confirmed_minutes;
        let mut outcome = CommitOutcome {
            warnings: Vec::new(),
            confirmed: confirmed.is_some(),
        };
        let mut bodies = vec![netconf::commit(comment, confirmed)];
        if confirmed.is_some() {
            // confirming commit stops the rollback timer
            bodies.push(netconf::commit(comment, None));
        }

        for body in bodies {
            let reply = match self.rpc(&body).await {
                Ok(reply) => reply,
                Err(err) => return Err(self.commit_failed(comment, err.to_string())),
            };
            if reply.has_errors() {
                return Err(self.commit_failed(comment, reply.error_text()));
            }
            outcome.warnings.extend(reply.warning_texts());
        }

        for warning in &outcome.warnings {
            warn!("{} commit warning: {}", self.device_addr, warning);
        }
        self.record(SessionEvent::CommitSucceeded {
            comment: comment.to_string(),
            warnings: outcome.warnings.clone(),
        });
        Ok(outcome)
    }

    fn commit_failed(&self, comment: &str, reason: String) -> JunosError {
        self.record(SessionEvent::CommitFailed {
            comment: comment.to_string(),
            reason: reason.clone(),
        });
        JunosError::ConfigCommit(reason)
    }

    /// Discards the candidate (unless it was just committed) and releases
    /// the device lock. Both steps are attempted whatever the outcome of the
    /// other; cancellation is ignored.
    pub(super) async fn clear_candidate(&mut self, discard: bool) -> Vec<JunosError> {
        if self.is_offline() {
            self.record(SessionEvent::ConfigCleared { errors: Vec::new() });
            return Vec::new();
        }

        let mut steps = Vec::with_capacity(2);
        if discard {
            steps.push(("discard-changes", netconf::discard_changes()));
        }
        steps.push(("unlock", netconf::unlock_candidate()));

        let mut errors = Vec::new();
        for (step, body) in steps {
            match self.rpc(body).await {
                Ok(reply) if reply.has_errors() => {
                    errors.push(JunosError::ConfigClear(format!(
                        "{step}: {}",
                        reply.error_text()
                    )));
                }
                Ok(_) => {}
                Err(err) => errors.push(JunosError::ConfigClear(format!("{step}: {err}"))),
            }
        }
        for err in &errors {
            warn!("{} {}", self.device_addr, err);
        }
        self.record(SessionEvent::ConfigCleared {
            errors: errors.iter().map(ToString::to_string).collect(),
        });
        errors
    }

    /// Ends the session. An open candidate transaction is cleared first.
    pub async fn close(mut self) -> Result<(), JunosError> {
        self.shutdown("closed").await
    }

    async fn shutdown(&mut self, reason: &str) -> Result<(), JunosError> {
        if self.closed {
            return Ok(());
        }
        if self.tx_state.is_open() {
            warn!(
                "{} closing session with an open candidate transaction ({:?})",
                self.device_addr, self.tx_state
            );
            let discard = self.tx_state != TxState::Committed;
            self.clear_candidate(discard).await;
            self.tx_state = TxState::Cleared;
        }
        self.closed = true;
        let result = match &mut self.backend {
            Backend::Netconf(channel) => channel.close().await,
            Backend::Offline { .. } => Ok(()),
        };
        self.record(SessionEvent::SessionClosed {
            reason: reason.to_string(),
        });
        debug!("{} session {}", self.device_addr, reason);
        result
    }

    fn ensure_active(&self, call: &str) -> Result<(), JunosError> {
        if self.closed {
            return Err(JunosError::InternalServerError(format!(
                "session closed before `{call}`"
            )));
        }
        if self.cancel.is_cancelled() {
            return Err(JunosError::Cancelled(call.to_string()));
        }
        Ok(())
    }

    /// One request/reply round trip on the device channel.
    async fn rpc(&mut self, body: &str) -> Result<RpcReply, JunosError> {
        let Backend::Netconf(channel) = &mut self.backend else {
            return Err(JunosError::InternalServerError(
                "offline session has no device channel".to_string(),
            ));
        };
        let raw = channel.exec_rpc(body).await?;
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_rpc(body, &raw);
        }
        Ok(RpcReply::parse(&raw))
    }

    fn record(&self, event: SessionEvent) {
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(event);
        }
    }

    fn record_set_failure(&self, lines: &[String], reason: &str) {
        self.record(SessionEvent::ConfigSetFailed {
            lines: lines.to_vec(),
            reason: reason.to_string(),
        });
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            warn!("{} session dropped without close", self.device_addr);
        }
    }
}

async fn append_set_file(path: &std::path::Path, lines: &[String]) -> Result<(), JunosError> {
    let write_error =
        |e: std::io::Error| JunosError::config_apply(format!("write {}: {e}", path.display()));
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(write_error)?;
    let mut content = lines.join("\n");
    content.push('\n');
    file.write_all(content.as_bytes()).await.map_err(write_error)?;
    file.flush().await.map_err(write_error)?;
    Ok(())
}
