use super::*;

/// Candidate-configuration transaction state of a [`Session`].
///
/// ```text
/// Unlocked --lock--> Locked --set--> Applied --commit--> Committed
///                      |               |                     |
///                      +------------- clear -----------------+--> Cleared
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    #[default]
    Unlocked,
    Locked,
    Applied,
    Committed,
    Cleared,
}

impl TxState {
    /// The device lock is held and a clear is still owed.
    pub fn is_open(self) -> bool {
        matches!(self, TxState::Locked | TxState::Applied | TxState::Committed)
    }

    pub fn can_apply(self) -> bool {
        matches!(self, TxState::Locked | TxState::Applied)
    }

    pub fn can_commit(self) -> bool {
        matches!(self, TxState::Locked | TxState::Applied)
    }

    fn can_lock(self) -> bool {
        matches!(self, TxState::Unlocked | TxState::Cleared)
    }
}

/// Exclusive candidate-configuration transaction on one session.
///
/// Obtained from [`Session::config_lock`]; must end with
/// [`ConfigTransaction::config_clear`], whatever happened in between.
pub struct ConfigTransaction<'s> {
    session: &'s mut Session,
}

impl Session {
    /// Locks the device candidate configuration and opens a transaction.
    pub async fn config_lock(&mut self) -> Result<ConfigTransaction<'_>, JunosError> {
        if !self.tx_state.can_lock() {
            return Err(JunosError::Lock(format!(
                "candidate transaction already open (state {:?})",
                self.tx_state
            )));
        }
        self.lock_candidate().await?;
        self.tx_state = TxState::Locked;
        Ok(ConfigTransaction { session: self })
    }
}

impl ConfigTransaction<'_> {
    pub fn state(&self) -> TxState {
        self.session.tx_state
    }

    /// The session, for resource callbacks that read or write through it.
    pub fn session(&mut self) -> &mut Session {
        &mut *self.session
    }

    /// See [`Session::config_set`].
    pub async fn config_set(&mut self, lines: &[String]) -> Result<(), JunosError> {
        self.session.config_set(lines).await
    }

    /// Commits the candidate with `comment` as the commit log message.
    ///
    /// On failure the state is unchanged and the candidate keeps the applied
    /// lines until the clear.
    pub async fn commit_conf(&mut self, comment: &str) -> Result<CommitOutcome, JunosError> {
        let state = self.session.tx_state;
        if !state.can_commit() {
            return Err(JunosError::InternalServerError(format!(
                "commit in state {state:?}"
            )));
        }
        let outcome = self.session.commit_candidate(comment).await?;
        self.session.tx_state = TxState::Committed;
        Ok(outcome)
    }

    /// Discards uncommitted changes and releases the device lock.
    ///
    /// Returns the failures of either step as [`JunosError::ConfigClear`];
    /// the transaction ends regardless.
    pub async fn config_clear(self) -> Vec<JunosError> {
        let discard = self.session.tx_state != TxState::Committed;
        let errors = self.session.clear_candidate(discard).await;
        self.session.tx_state = TxState::Cleared;
        errors
    }
}

impl Drop for ConfigTransaction<'_> {
    fn drop(&mut self) {
        if self.session.tx_state.is_open() {
            warn!(
                "{} candidate transaction dropped in state {:?}, it is cleared on session close",
                self.session.device_addr, self.session.tx_state
            );
        }
    }
}
