use super::*;

impl SessionManager {
    /// Creates a manager connecting over NETCONF/SSH with the process-wide
    /// [`GLOBAL_LOCK`].
    pub fn new(config: ProviderConfig) -> Result<Self, JunosError> {
        config.validate()?;
        let config = Arc::new(config);
        Ok(Self {
            connector: Arc::new(NetconfSshConnector::new(config.clone())),
            config,
            lock: GLOBAL_LOCK.clone(),
            recorder: None,
        })
    }

    /// Creates a manager using a custom transport, such as a simulated
    /// device or a [`SessionReplayer`].
    pub fn with_connector(
        config: ProviderConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, JunosError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            connector,
            lock: GLOBAL_LOCK.clone(),
            recorder: None,
        })
    }

    /// Uses a dedicated configuration-writer lock instead of [`GLOBAL_LOCK`].
    pub fn with_lock_manager(mut self, lock: Arc<LockManager>) -> Self {
        self.lock = lock;
        self
    }

    /// Records every session this manager opens into `recorder`.
    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn recorder(&self) -> Option<&SessionRecorder> {
        self.recorder.as_ref()
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock
    }

    /// Opens a device session and captures the device identity.
    pub async fn start_new_session(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Session, JunosError> {
        if cancel.is_cancelled() {
            return Err(JunosError::Cancelled("start session".to_string()));
        }
        let target = self.connector.describe();
        debug!("{} opening session", target);
        let channel = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(JunosError::Cancelled("start session".to_string()));
            }
            channel = self.connector.connect() => channel?,
        };
        Session::open(
            channel,
            self.config.clone(),
            cancel.clone(),
            self.recorder.clone(),
        )
        .await
    }

    /// Opens a session that never contacts the device.
    pub fn new_session_without_netconf(&self, cancel: &CancellationToken) -> Session {
        Session::offline(self.config.clone(), cancel.clone(), self.recorder.clone())
    }

    /// Waits for the configuration-writer lock.
    ///
    /// Release is dropping the returned guard.
    pub async fn mutex_lock(
        &self,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<LockGuard, JunosError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(JunosError::Cancelled(format!("waiting for configuration lock ({label})")))
            }
            guard = self.lock.lock(label) => Ok(guard),
        }
    }

    /// Creates are routed through offline sessions.
    pub fn fake_create(&self) -> bool {
        self.config.fake_create_set_file.is_some()
    }

    pub fn fake_update(&self) -> bool {
        self.fake_create() && self.config.fake_update_also
    }

    pub fn fake_delete(&self) -> bool {
        self.fake_create() && self.config.fake_delete_also
    }
}
