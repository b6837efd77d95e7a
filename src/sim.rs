//! In-process Junos device for tests and dry runs.
//!
//! [`SimDevice`] answers the NETCONF RPCs a [`Session`](crate::session::Session)
//! sends with a small model of the committed and candidate configuration
//! databases and the exclusive candidate lock. Faults can be injected per RPC
//! to exercise the failure paths of the transaction protocol.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, trace};
use sha2::{Digest, Sha256};

use crate::config::ProviderConfig;
use crate::error::JunosError;
use crate::netconf::{self, escape_xml, has_tag, tag_text, unescape_xml};
use crate::session::{Connector, DeviceChannel};

/// Shared handle to one simulated device; clones see the same state.
#[derive(Debug, Clone)]
pub struct SimDevice {
    state: Arc<Mutex<SimState>>,
}

/// One successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimCommit {
    pub session_id: u64,
    pub comment: String,
    pub confirm_minutes: Option<u32>,
    pub lines: Vec<String>,
}

/// Candidate-database activity, in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    Locked(u64),
    Unlocked(u64),
    Discarded(u64),
    Committed(u64),
}

#[derive(Debug, Default)]
struct Faults {
    reject_set_containing: Option<String>,
    reject_commit: Option<String>,
    commit_warning: Option<String>,
    fail_discard: bool,
    fail_unlock: bool,
    fail_connect: bool,
    lock_held_until: Option<Instant>,
}

#[derive(Debug)]
struct SimState {
    host_name: String,
    hardware_model: String,
    os_version: String,
    committed: Vec<String>,
    candidate: Vec<String>,
    lock_holder: Option<u64>,
    next_session: u64,
    commits: Vec<SimCommit>,
    events: Vec<SimEvent>,
    faults: Faults,
    latency: Duration,
}

/// Channel of one simulated NETCONF session.
#[derive(Debug)]
pub struct SimChannel {
    device: SimDevice,
    session_id: u64,
    closed: bool,
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDevice {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                host_name: "sim-vsrx".to_string(),
                hardware_model: "vsrx".to_string(),
                os_version: "21.4R3-S1".to_string(),
                committed: Vec::new(),
                candidate: Vec::new(),
                lock_holder: None,
                next_session: 0,
                commits: Vec::new(),
                events: Vec::new(),
                faults: Faults::default(),
                latency: Duration::ZERO,
            })),
        }
    }

    /// Provider settings accepted by managers wired to a simulated device.
    pub fn provider_config() -> ProviderConfig {
        ProviderConfig {
            ip: "sim".to_string(),
            username: "netconf".to_string(),
            password: Some("netconf".to_string()),
            ..Default::default()
        }
    }

    pub fn with_hardware_model(self, model: &str) -> Self {
        self.state().hardware_model = model.to_string();
        self
    }

    /// Delay applied to every RPC, to widen interleaving windows.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state().latency = latency;
        self
    }

    /// Replaces committed and candidate configuration.
    pub fn seed<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.state();
        state.committed.clear();
        for line in lines {
            insert_line(&mut state.committed, line.as_ref().trim());
        }
        state.candidate = state.committed.clone();
    }

    pub fn committed_lines(&self) -> Vec<String> {
        self.state().committed.clone()
    }

    pub fn candidate_lines(&self) -> Vec<String> {
        self.state().candidate.clone()
    }

    /// Uncommitted changes are pending.
    pub fn candidate_dirty(&self) -> bool {
        let state = self.state();
        state.candidate != state.committed
    }

    /// SHA-256 of the committed configuration, for before/after comparisons.
    pub fn committed_digest(&self) -> String {
        let state = self.state();
        let digest = Sha256::digest(state.committed.join("\n").as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn commits(&self) -> Vec<SimCommit> {
        self.state().commits.clone()
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.state().events.clone()
    }

    pub fn lock_holder(&self) -> Option<u64> {
        self.state().lock_holder
    }

    pub fn discard_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, SimEvent::Discarded(_)))
            .count()
    }

    /// Rejects any loaded line containing `needle`.
    pub fn reject_set_containing(&self, needle: &str) {
        self.state().faults.reject_set_containing = Some(needle.to_string());
    }

    /// Rejects every commit with `message`.
    pub fn reject_commit(&self, message: &str) {
        self.state().faults.reject_commit = Some(message.to_string());
    }

    /// Adds an advisory warning to every successful commit.
    pub fn commit_warning(&self, message: &str) {
        self.state().faults.commit_warning = Some(message.to_string());
    }

    pub fn fail_discard(&self, fail: bool) {
        self.state().faults.fail_discard = fail;
    }

    pub fn fail_unlock(&self, fail: bool) {
        self.state().faults.fail_unlock = fail;
    }

    pub fn fail_connect(&self, fail: bool) {
        self.state().faults.fail_connect = fail;
    }

    /// Pretends an operator holds the candidate lock for `duration`.
    pub fn hold_lock_for(&self, duration: Duration) {
        self.state().faults.lock_held_until = Some(Instant::now() + duration);
    }

    pub fn clear_faults(&self) {
        self.state().faults = Faults::default();
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, session_id: u64, body: &str) -> String {
        let mut state = self.state();
        let body = body.trim();
        trace!("sim session {session_id} << {body}");
        if body.starts_with("<get-system-information") {
            state.system_information()
        } else if body.starts_with("<command") {
            let cli = unescape_xml(&tag_text(body, "command").unwrap_or_default());
            state.command(&cli)
        } else if body.starts_with("<load-configuration") {
            let payload = unescape_xml(&tag_text(body, "configuration-set").unwrap_or_default());
            state.load(session_id, &payload)
        } else if body.starts_with("<lock>") {
            state.lock(session_id)
        } else if body.starts_with("<unlock>") {
            state.unlock(session_id)
        } else if body.starts_with("<discard-changes") {
            state.discard(session_id)
        } else if body.starts_with("<commit-configuration") {
            let confirm_minutes = has_tag(body, "confirmed")
                .then(|| tag_text(body, "confirm-timeout"))
                .flatten()
                .and_then(|minutes| minutes.trim().parse().ok());
            let comment = unescape_xml(&tag_text(body, "log").unwrap_or_default());
            state.commit(session_id, comment, confirm_minutes)
        } else if body.starts_with("<close-session") {
            state.release(session_id);
            ok_reply()
        } else {
            error_reply("syntax error, expecting <rpc> content", None)
        }
    }
}

impl SimState {
    fn system_information(&self) -> String {
        reply(&format!(
            "<system-information><hardware-model>{}</hardware-model><os-name>junos</os-name>\
             <os-version>{}</os-version><serial-number>SIM0001</serial-number>\
             <host-name>{}</host-name></system-information>",
            escape_xml(&self.hardware_model),
            escape_xml(&self.os_version),
            escape_xml(&self.host_name)
        ))
    }

    fn command(&self, cli: &str) -> String {
        let Some(rest) = cli.trim().strip_prefix("show configuration ") else {
            return error_reply("syntax error", cli.split_whitespace().next());
        };
        let (path, pipe) = match rest.split_once(" | ") {
            Some((path, pipe)) => (path.trim(), pipe.trim()),
            None => (rest.trim(), ""),
        };
        let relative = match pipe {
            "display set" => false,
            "display set relative" => true,
            _ => return error_reply("syntax error", Some(pipe)),
        };

        let exact = format!("set {path}");
        let nested = format!("{exact} ");
        let lines: Vec<String> = self
            .committed
            .iter()
            .filter_map(|line| {
                if line == &exact {
                    Some(if relative { "set".to_string() } else { line.clone() })
                } else {
                    line.strip_prefix(&nested).map(|suffix| {
                        if relative {
                            format!("set {suffix}")
                        } else {
                            line.clone()
                        }
                    })
                }
            })
            .collect();

        let mut output = String::from("\n");
        for line in &lines {
            output.push_str(&escape_xml(line));
            output.push('\n');
        }
        reply(&format!(
            "<configuration-information><configuration-output>{output}</configuration-output></configuration-information>"
        ))
    }

    fn load(&mut self, session_id: u64, payload: &str) -> String {
        if self.locked_by_other(session_id) {
            return error_reply("configuration database locked by another user", None);
        }
        let mut warnings = Vec::new();
        for line in payload.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(needle) = &self.faults.reject_set_containing
                && line.contains(needle.as_str())
            {
                return error_reply("syntax error", Some(needle.as_str()));
            }
            if line.starts_with("set ") {
                insert_line(&mut self.candidate, line);
            } else if let Some(path) = line.strip_prefix("delete ") {
                if !delete_path(&mut self.candidate, path) {
                    warnings.push(format!("statement not found: {path}"));
                }
            } else {
                return error_reply("syntax error", line.split_whitespace().next());
            }
        }
        let mut body = String::from("<load-configuration-results>");
        for warning in warnings {
            body.push_str(&rpc_error_entry("warning", &warning, None));
        }
        body.push_str("<ok/></load-configuration-results>");
        reply(&body)
    }

    fn lock(&mut self, session_id: u64) -> String {
        if let Some(until) = self.faults.lock_held_until {
            if Instant::now() < until {
                return error_reply(
                    "configuration database locked by: admin terminal p0 (pid 4242)",
                    None,
                );
            }
            self.faults.lock_held_until = None;
        }
        match self.lock_holder {
            Some(holder) if holder == session_id => {
                error_reply("configuration database already locked by this session", None)
            }
            Some(holder) => error_reply(
                &format!("configuration database locked by session {holder}"),
                None,
            ),
            None => {
                debug!("sim session {session_id} locked candidate");
                self.lock_holder = Some(session_id);
                self.events.push(SimEvent::Locked(session_id));
                ok_reply()
            }
        }
    }

    fn unlock(&mut self, session_id: u64) -> String {
        if self.faults.fail_unlock {
            return error_reply("unlock failed: database busy", None);
        }
        if self.lock_holder != Some(session_id) {
            return error_reply("configuration database is not locked by this session", None);
        }
        debug!("sim session {session_id} unlocked candidate");
        self.lock_holder = None;
        self.events.push(SimEvent::Unlocked(session_id));
        ok_reply()
    }

    fn discard(&mut self, session_id: u64) -> String {
        if self.faults.fail_discard {
            return error_reply("discard-changes failed: database busy", None);
        }
        if self.locked_by_other(session_id) {
            return error_reply("configuration database locked by another user", None);
        }
        self.candidate = self.committed.clone();
        self.events.push(SimEvent::Discarded(session_id));
        ok_reply()
    }

    fn commit(&mut self, session_id: u64, comment: String, confirm_minutes: Option<u32>) -> String {
        if self.locked_by_other(session_id) {
            return error_reply("configuration database locked by another user", None);
        }
        if let Some(message) = &self.faults.reject_commit {
            return reply(&format!(
                "<commit-results>{}</commit-results>",
                rpc_error_entry("error", message, None)
            ));
        }
        self.committed = self.candidate.clone();
        self.commits.push(SimCommit {
            session_id,
            comment,
            confirm_minutes,
            lines: self.committed.clone(),
        });
        self.events.push(SimEvent::Committed(session_id));

        let warning = self
            .faults
            .commit_warning
            .as_ref()
            .map(|message| {
                format!(
                    r#"<xnm:warning xmlns="http://xml.juniper.net/xnm/1.1/xnm" xmlns:xnm="http://xml.juniper.net/xnm/1.1/xnm"><message>{}</message></xnm:warning>"#,
                    escape_xml(message)
                )
            })
            .unwrap_or_default();
        reply(&format!(
            "<commit-results><routing-engine><name>re0</name>{warning}<commit-success/></routing-engine></commit-results>"
        ))
    }

    /// Session ended: its lock goes and uncommitted changes with it.
    fn release(&mut self, session_id: u64) {
        if self.lock_holder == Some(session_id) {
            self.lock_holder = None;
            self.candidate = self.committed.clone();
            self.events.push(SimEvent::Unlocked(session_id));
        }
    }

    fn locked_by_other(&self, session_id: u64) -> bool {
        self.lock_holder.is_some_and(|holder| holder != session_id)
    }
}

/// Adds `line` unless it, or a more specific line below it, already exists.
fn insert_line(lines: &mut Vec<String>, line: &str) {
    let nested = format!("{line} ");
    if lines.iter().any(|l| l == line || l.starts_with(&nested)) {
        return;
    }
    // a bare stanza declaration is implied by its contents
    lines.retain(|l| !line.starts_with(&format!("{l} ")));
    lines.push(line.to_string());
}

/// Removes `path` and everything below it. Returns whether anything matched.
fn delete_path(lines: &mut Vec<String>, path: &str) -> bool {
    let exact = format!("set {}", path.trim());
    let nested = format!("{exact} ");
    let before = lines.len();
    lines.retain(|l| l != &exact && !l.starts_with(&nested));
    lines.len() != before
}

fn reply(body: &str) -> String {
    format!(r#"<rpc-reply xmlns="{}">{body}</rpc-reply>"#, netconf::NETCONF_NS)
}

fn ok_reply() -> String {
    reply("<ok/>")
}

fn error_reply(message: &str, bad_element: Option<&str>) -> String {
    reply(&rpc_error_entry("error", message, bad_element))
}

fn rpc_error_entry(severity: &str, message: &str, bad_element: Option<&str>) -> String {
    let info = bad_element
        .map(|element| {
            format!(
                "<error-info><bad-element>{}</bad-element></error-info>",
                escape_xml(element)
            )
        })
        .unwrap_or_default();
    format!(
        "<rpc-error><error-type>application</error-type><error-tag>operation-failed</error-tag>\
         <error-severity>{severity}</error-severity>{info}<error-message>{}</error-message></rpc-error>",
        escape_xml(message)
    )
}

#[async_trait]
impl Connector for SimDevice {
    async fn connect(&self) -> Result<Box<dyn DeviceChannel>, JunosError> {
        let session_id = {
            let mut state = self.state();
            if state.faults.fail_connect {
                return Err(JunosError::Connection {
                    target: "sim".to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            state.next_session += 1;
            state.next_session
        };
        debug!("sim session {session_id} opened");
        Ok(Box::new(SimChannel {
            device: self.clone(),
            session_id,
            closed: false,
        }))
    }

    fn describe(&self) -> String {
        format!("sim:{}", self.state().host_name)
    }
}

#[async_trait]
impl DeviceChannel for SimChannel {
    async fn exec_rpc(&mut self, body: &str) -> Result<String, JunosError> {
        if self.closed {
            return Err(JunosError::ChannelDisconnect);
        }
        let latency = self.device.state().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(self.device.handle(self.session_id, body))
    }

    async fn close(&mut self) -> Result<(), JunosError> {
        if !self.closed {
            self.device.handle(self.session_id, netconf::close_session());
            self.closed = true;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed
    }
}

impl Drop for SimChannel {
    fn drop(&mut self) {
        if !self.closed {
            self.device.state().release(self.session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn rpc(channel: &mut Box<dyn DeviceChannel>, body: &str) -> netconf::RpcReply {
        netconf::RpcReply::parse(&channel.exec_rpc(body).await.expect("rpc"))
    }

    #[tokio::test]
    async fn lock_is_exclusive_between_sessions() {
        let device = SimDevice::new();
        let mut first = device.connect().await.expect("first");
        let mut second = device.connect().await.expect("second");

        assert!(!rpc(&mut first, netconf::lock_candidate()).await.has_errors());
        let refused = rpc(&mut second, netconf::lock_candidate()).await;
        assert!(refused.error_text().contains("locked"));

        assert!(!rpc(&mut first, netconf::unlock_candidate()).await.has_errors());
        assert!(!rpc(&mut second, netconf::lock_candidate()).await.has_errors());
        second.close().await.expect("close");
        assert_eq!(device.lock_holder(), None);
    }

    #[tokio::test]
    async fn dropped_channel_releases_lock_and_candidate() {
        let device = SimDevice::new();
        {
            let mut channel = device.connect().await.expect("connect");
            rpc(&mut channel, netconf::lock_candidate()).await;
            rpc(
                &mut channel,
                &netconf::load_set(&["set vlans v5 vlan-id 5".to_string()]),
            )
            .await;
            assert!(device.candidate_dirty());
        }
        assert_eq!(device.lock_holder(), None);
        assert!(!device.candidate_dirty());
    }

    #[tokio::test]
    async fn delete_of_missing_statement_warns() {
        let device = SimDevice::new();
        let mut channel = device.connect().await.expect("connect");
        let reply = rpc(
            &mut channel,
            &netconf::load_set(&["delete vlans nope".to_string()]),
        )
        .await;
        assert!(!reply.has_errors());
        assert_eq!(reply.warnings.len(), 1);
    }

    #[test]
    fn stanza_declarations_merge_with_contents() {
        let mut lines = Vec::new();
        insert_line(&mut lines, "set vlans v1");
        insert_line(&mut lines, "set vlans v1 vlan-id 1");
        insert_line(&mut lines, "set vlans v1");
        assert_eq!(lines, vec!["set vlans v1 vlan-id 1".to_string()]);
        assert!(delete_path(&mut lines, "vlans v1"));
        assert!(lines.is_empty());
    }
}
