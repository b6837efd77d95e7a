//! Generic create/read/update/delete/import of device resources.
//!
//! Resources describe themselves through [`ResourceOperations`]; the
//! [`LifecycleDriver`] wraps every write in the same envelope:
//!
//! ```text
//! session -> writer lock -> config lock -> pre-check -> set/delete
//!         -> commit -> post-check (create only) -> clear -> unlock -> close
//! ```
//!
//! The clear runs exactly once for every write that obtained the device
//! lock, whatever step failed. Nothing is retried and a committed change is
//! never reverted.

use async_trait::async_trait;
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::codec::split_id;
use crate::config::ClearFailurePolicy;
use crate::diagnostics::Diagnostics;
use crate::error::{ErrorKind, JunosError};
use crate::session::{ConfigTransaction, Session, SessionManager};

/// Per-resource behaviour consumed by [`LifecycleDriver`].
#[async_trait]
pub trait ResourceOperations: Send + Sync {
    /// Terraform type name, e.g. `junos_vlan`.
    fn type_name(&self) -> &'static str;

    /// Current identity; `None` means the resource does not exist.
    fn id(&self) -> Option<&str>;

    /// Builds the identity from the identifying fields.
    fn fill_id(&mut self);

    fn clear_id(&mut self);

    /// Identifying field values, in identity order.
    fn identity_fields(&self) -> Vec<String>;

    /// Accepted identity field count for import, as `(min, max)`.
    fn import_field_count(&self) -> (usize, usize) {
        (1, 1)
    }

    /// Reads hold the writer lock when this is true.
    fn consistent_read(&self) -> bool {
        false
    }

    /// Loads the resource's lines into the candidate.
    async fn set(&self, session: &mut Session) -> Result<(), JunosError>;

    /// Loads `delete` lines removing the resource.
    async fn del(&self, session: &mut Session) -> Result<(), JunosError>;

    /// Deletion used by update before the new lines are applied; defaults
    /// to [`del`](Self::del).
    async fn del_opts(&self, session: &mut Session) -> Result<(), JunosError> {
        self.del(session).await
    }

    /// Populates `self` from the device for the given identity fields.
    /// Returns `false` when the device has no such resource.
    async fn read(&mut self, fields: &[String], session: &mut Session)
    -> Result<bool, JunosError>;

    /// Runs before create applies anything. Returning `false` aborts; the
    /// callback reports why through `diags`.
    async fn pre_check_create(&self, _session: &mut Session, _diags: &mut Diagnostics) -> bool {
        true
    }

    /// Runs after a successful create commit.
    async fn post_check_create(&self, _session: &mut Session, _diags: &mut Diagnostics) -> bool {
        true
    }

    /// Runs on the planned state before update applies anything.
    async fn pre_check_update(&self, _session: &mut Session, _diags: &mut Diagnostics) -> bool {
        true
    }
}

/// Which write a transaction envelope runs.
enum WriteStep<'a, R> {
    Create(&'a R),
    Update { state: &'a R, plan: &'a R },
    Delete(&'a R),
}

impl<R: ResourceOperations> WriteStep<'_, R> {
    fn verb(&self) -> &'static str {
        match self {
            WriteStep::Create(_) => "create",
            WriteStep::Update { .. } => "update",
            WriteStep::Delete(_) => "delete",
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            WriteStep::Create(data) | WriteStep::Delete(data) => data.type_name(),
            WriteStep::Update { plan, .. } => plan.type_name(),
        }
    }

    /// Commit log message, e.g. `update resource junos_vlan`.
    fn comment(&self) -> String {
        format!("{} resource {}", self.verb(), self.type_name())
    }
}

/// Runs resource operations against the devices a [`SessionManager`] reaches.
#[derive(Clone)]
pub struct LifecycleDriver {
    manager: SessionManager,
}

impl LifecycleDriver {
    pub fn new(manager: SessionManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Creates the resource; on success its identity is filled.
    pub async fn create<R: ResourceOperations>(
        &self,
        data: &mut R,
        cancel: &CancellationToken,
    ) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let offline = self.manager.fake_create();
        if self
            .write(WriteStep::Create(&*data), offline, cancel, &mut diags)
            .await
        {
            data.fill_id();
        }
        diags
    }

    /// Refreshes `data` from the device. An absent resource comes back with
    /// a `None` identity, which callers treat as "remove from state".
    pub async fn read<R: ResourceOperations>(
        &self,
        data: &mut R,
        cancel: &CancellationToken,
    ) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let fields = data.identity_fields();
        self.read_fields(data, &fields, cancel, &mut diags).await;
        diags
    }

    /// Replaces `state` by `plan` in one commit: `state.del_opts`, then
    /// `plan.set`. On success the plan's identity is filled.
    pub async fn update<R: ResourceOperations>(
        &self,
        state: &R,
        plan: &mut R,
        cancel: &CancellationToken,
    ) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let offline = self.manager.fake_update();
        let step = WriteStep::Update {
            state,
            plan: &*plan,
        };
        if self.write(step, offline, cancel, &mut diags).await {
            plan.fill_id();
        }
        diags
    }

    /// Deletes the resource. Absence is not re-verified afterwards.
    pub async fn delete<R: ResourceOperations>(
        &self,
        state: &R,
        cancel: &CancellationToken,
    ) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let offline = self.manager.fake_delete();
        self.write(WriteStep::Delete(state), offline, cancel, &mut diags)
            .await;
        diags
    }

    /// Reads an existing resource by its identity string.
    pub async fn import<R: ResourceOperations + Default>(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> (Option<R>, Diagnostics) {
        let mut diags = Diagnostics::new();
        let mut data = R::default();
        let (min, max) = data.import_field_count();
        let fields = match split_id(id, min, max) {
            Ok(fields) => fields,
            Err(err) => {
                diags.push_error(&err);
                return (None, diags);
            }
        };

        self.read_fields(&mut data, &fields, cancel, &mut diags)
            .await;
        if diags.has_error() {
            return (None, diags);
        }
        if data.id().is_none() {
            diags.add_error(
                ErrorKind::Identity,
                "Not Found",
                format!("don't find {} with id '{id}'", data.type_name()),
            );
            return (None, diags);
        }
        (Some(data), diags)
    }

    async fn read_fields<R: ResourceOperations>(
        &self,
        data: &mut R,
        fields: &[String],
        cancel: &CancellationToken,
        diags: &mut Diagnostics,
    ) {
        let mut session = match self.manager.start_new_session(cancel).await {
            Ok(session) => session,
            Err(err) => {
                diags.push_error(&err);
                return;
            }
        };
        let label = format!("read resource {}", data.type_name());
        let guard = if data.consistent_read() {
            match self.manager.mutex_lock(&label, cancel).await {
                Ok(guard) => Some(guard),
                Err(err) => {
                    diags.push_error(&err);
                    close_session(session).await;
                    return;
                }
            }
        } else {
            None
        };

        match data.read(fields, &mut session).await {
            Ok(true) => data.fill_id(),
            Ok(false) => {
                debug!("{label}: {} not found", fields.join(" "));
                data.clear_id();
            }
            Err(err) => diags.push_error(&err),
        }

        drop(guard);
        close_session(session).await;
    }

    /// Transaction envelope shared by create, update and delete. Returns
    /// whether the step committed and passed its post-check.
    async fn write<R: ResourceOperations>(
        &self,
        step: WriteStep<'_, R>,
        offline: bool,
        cancel: &CancellationToken,
        diags: &mut Diagnostics,
    ) -> bool {
        let comment = step.comment();
        let mut session = if offline {
            self.manager.new_session_without_netconf(cancel)
        } else {
            match self.manager.start_new_session(cancel).await {
                Ok(session) => session,
                Err(err) => {
                    diags.push_error(&err);
                    return false;
                }
            }
        };

        // offline sessions share no device, so writers need no serialization
        let guard = if offline {
            None
        } else {
            match self.manager.mutex_lock(&comment, cancel).await {
                Ok(guard) => Some(guard),
                Err(err) => {
                    diags.push_error(&err);
                    close_session(session).await;
                    return false;
                }
            }
        };

        let committed = match session.config_lock().await {
            Ok(mut tx) => {
                let committed = run_step(&mut tx, &step, &comment, offline, diags).await;
                let clear_errors = tx.config_clear().await;
                self.report_clear(clear_errors, diags);
                committed
            }
            Err(err) => {
                diags.push_error(&err);
                false
            }
        };

        drop(guard);
        close_session(session).await;
        committed
    }

    fn report_clear(&self, errors: Vec<JunosError>, diags: &mut Diagnostics) {
        let policy = self.manager.config().clear_failure_policy;
        for err in errors {
            match policy {
                ClearFailurePolicy::Downgrade => diags.push_warning(&err),
                ClearFailurePolicy::Escalate => diags.push_error(&err),
            }
        }
    }
}

/// Pre-check, apply, commit and post-check inside a locked candidate.
async fn run_step<R: ResourceOperations>(
    tx: &mut ConfigTransaction<'_>,
    step: &WriteStep<'_, R>,
    comment: &str,
    offline: bool,
    diags: &mut Diagnostics,
) -> bool {
    let session = tx.session();
    let applied = match step {
        WriteStep::Create(data) => {
            if !offline && !checked(data.pre_check_create(session, diags).await, diags, pre_check) {
                return false;
            }
            data.set(session).await
        }
        WriteStep::Update { state, plan } => {
            if !offline && !checked(plan.pre_check_update(session, diags).await, diags, pre_check) {
                return false;
            }
            match state.del_opts(session).await {
                Ok(()) => plan.set(session).await,
                Err(err) => Err(err),
            }
        }
        WriteStep::Delete(data) => data.del(session).await,
    };
    if let Err(err) = applied {
        diags.push_error(&err);
        return false;
    }

    match tx.commit_conf(comment).await {
        Ok(outcome) => {
            for warning in outcome.warnings {
                diags.add_warning(ErrorKind::ConfigCommit, "Commit Warning", warning);
            }
        }
        Err(err) => {
            diags.push_error(&err);
            return false;
        }
    }

    if let WriteStep::Create(data) = step
        && !offline
        && !checked(
            data.post_check_create(tx.session(), diags).await,
            diags,
            || JunosError::PostCheck("post-check failed".to_string()),
        )
    {
        return false;
    }
    true
}

fn pre_check() -> JunosError {
    JunosError::PreCheck("pre-check failed".to_string())
}

/// Makes sure a failed check leaves at least one error behind.
fn checked(passed: bool, diags: &mut Diagnostics, fallback: impl FnOnce() -> JunosError) -> bool {
    if !passed && !diags.has_error() {
        diags.push_error(&fallback());
    }
    passed
}

async fn close_session(session: Session) {
    let addr = session.device_addr().to_string();
    if let Err(err) = session.close().await {
        warn!("{addr} session close failed: {err}");
    }
}
