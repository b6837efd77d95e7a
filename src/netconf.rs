//! NETCONF RPC bodies and reply parsing for Junos.
//!
//! Sessions speak NETCONF 1.0 (end-of-message framing). The helpers here are
//! pure string functions so they can be shared by the SSH channel, the
//! simulated device and the replayer.

use once_cell::sync::Lazy;
use regex::Regex;

/// NETCONF 1.0 end-of-message marker.
pub const DELIMITER: &str = "]]>]]>";

/// NETCONF base namespace.
pub const NETCONF_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

/// Opening marker of the payload returned by `show configuration`.
pub const XML_START_TAG_CONFIG_OUT: &str = "<configuration-output>";
/// Closing marker of the payload returned by `show configuration`.
pub const XML_END_TAG_CONFIG_OUT: &str = "</configuration-output>";

static RPC_ERROR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<rpc-error>(.*?)</rpc-error>").expect("valid regex"));
static XNM_MESSAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<xnm:(error|warning)\b[^>]*>(.*?)</xnm:(?:error|warning)>")
        .expect("valid regex")
});
static RPC_REPLY_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*(<\?xml[^>]*\?>\s*)?<rpc-reply\b[^>]*>").expect("valid regex"));
static RPC_REPLY_MESSAGE_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<rpc-reply\b[^>]*\bmessage-id\s*=\s*["'](\d+)["']"#).expect("valid regex")
});

/// Client `<hello>` advertising base 1.0 with the candidate datastore.
pub fn client_hello() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<hello xmlns="{NETCONF_NS}">
  <capabilities>
    <capability>urn:ietf:params:netconf:base:1.0</capability>
    <capability>urn:ietf:params:netconf:capability:candidate:1.0</capability>
    <capability>urn:ietf:params:netconf:capability:confirmed-commit:1.0</capability>
  </capabilities>
</hello>{DELIMITER}"#
    )
}

/// Frames an RPC body with its message id and the end-of-message marker.
pub fn wrap_rpc(message_id: u64, body: &str) -> String {
    format!(r#"<rpc xmlns="{NETCONF_NS}" message-id="{message_id}">{body}</rpc>{DELIMITER}"#)
}

/// `message-id` echoed on the opening `<rpc-reply>` tag, if any.
pub fn reply_message_id(reply: &str) -> Option<u64> {
    RPC_REPLY_MESSAGE_ID
        .captures(reply)
        .and_then(|cap| cap[1].parse().ok())
}

/// Text-format CLI command.
pub fn command(cli: &str) -> String {
    format!(r#"<command format="text">{}</command>"#, escape_xml(cli))
}

/// Loads `set`/`delete` lines into the candidate configuration.
pub fn load_set(lines: &[String]) -> String {
    format!(
        r#"<load-configuration action="set" format="text"><configuration-set>{}</configuration-set></load-configuration>"#,
        escape_xml(&lines.join("\n"))
    )
}

pub fn lock_candidate() -> &'static str {
    "<lock><target><candidate/></target></lock>"
}

pub fn unlock_candidate() -> &'static str {
    "<unlock><target><candidate/></target></unlock>"
}

pub fn discard_changes() -> &'static str {
    "<discard-changes/>"
}

pub fn get_system_information() -> &'static str {
    "<get-system-information/>"
}

pub fn close_session() -> &'static str {
    "<close-session/>"
}

/// Commit with a log comment, optionally as a confirmed commit.
pub fn commit(comment: &str, confirmed_minutes: Option<u32>) -> String {
    let mut body = String::from("<commit-configuration>");
    if let Some(minutes) = confirmed_minutes {
        body.push_str("<confirmed/>");
        body.push_str(&format!("<confirm-timeout>{minutes}</confirm-timeout>"));
    }
    body.push_str(&format!("<log>{}</log>", escape_xml(comment)));
    body.push_str("</commit-configuration>");
    body
}

/// One `<rpc-error>` (or Junos `<xnm:error>`/`<xnm:warning>`) entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcMessage {
    pub severity: Severity,
    pub message: String,
    /// Offending statement, when the device names one.
    pub bad_element: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Parsed `<rpc-reply>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcReply {
    pub errors: Vec<RpcMessage>,
    pub warnings: Vec<RpcMessage>,
    /// Reply content with the envelope and error entries removed.
    pub body: String,
}

impl RpcReply {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim_end_matches(DELIMITER);
        let mut reply = RpcReply::default();

        for cap in RPC_ERROR.captures_iter(raw) {
            let inner = &cap[1];
            let severity = match tag_text(inner, "error-severity").as_deref() {
                Some("warning") => Severity::Warning,
                _ => Severity::Error,
            };
            let message = tag_text(inner, "error-message").unwrap_or_default();
            let bad_element = tag_text(inner, "bad-element");
            reply.push(RpcMessage {
                severity,
                message,
                bad_element,
            });
        }
        for cap in XNM_MESSAGE.captures_iter(raw) {
            let severity = if &cap[1] == "warning" {
                Severity::Warning
            } else {
                Severity::Error
            };
            let inner = &cap[2];
            reply.push(RpcMessage {
                severity,
                message: tag_text(inner, "message").unwrap_or_default(),
                bad_element: tag_text(inner, "statement"),
            });
        }

        let without_errors = RPC_ERROR.replace_all(raw, "");
        let without_errors = XNM_MESSAGE.replace_all(&without_errors, "");
        let body = RPC_REPLY_OPEN.replace(&without_errors, "");
        let body = body.trim();
        reply.body = body
            .strip_suffix("</rpc-reply>")
            .unwrap_or(body)
            .trim()
            .to_string();
        reply
    }

    fn push(&mut self, message: RpcMessage) {
        match message.severity {
            Severity::Error => self.errors.push(message),
            Severity::Warning => self.warnings.push(message),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Error messages joined the way they are shown to operators.
    pub fn error_text(&self) -> String {
        join_messages(&self.errors)
    }

    pub fn warning_texts(&self) -> Vec<String> {
        self.warnings.iter().map(RpcMessage::render).collect()
    }
}

impl RpcMessage {
    pub fn render(&self) -> String {
        match &self.bad_element {
            Some(element) if !element.is_empty() => {
                format!("{} (statement: {})", self.message.trim(), element.trim())
            }
            _ => self.message.trim().to_string(),
        }
    }
}

fn join_messages(messages: &[RpcMessage]) -> String {
    messages
        .iter()
        .map(RpcMessage::render)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Extracts the text of a command reply.
///
/// `show configuration` replies carry the payload between
/// [`XML_START_TAG_CONFIG_OUT`] and [`XML_END_TAG_CONFIG_OUT`]; operational
/// commands use `<output>`. Whitespace-only payloads become empty strings,
/// which is how an absent configuration stanza is reported.
pub fn command_output(body: &str) -> String {
    let text = tag_text(body, "configuration-output")
        .or_else(|| tag_text(body, "output"))
        .unwrap_or_else(|| body.to_string());
    let text = unescape_xml(&text);
    if text.trim().is_empty() {
        return String::new();
    }
    text.trim_matches('\n').to_string()
}

/// Inner text of the first `<tag>` element, without parsing the document.
pub fn tag_text(doc: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut from = 0;
    while let Some(pos) = doc[from..].find(&open) {
        let start = from + pos;
        let after_name = start + open.len();
        let rest = &doc[after_name..];
        match rest.chars().next() {
            Some('>') => {
                let content_start = after_name + 1;
                let end = doc[content_start..].find(&close)?;
                return Some(doc[content_start..content_start + end].to_string());
            }
            Some('/') if rest.starts_with("/>") => return Some(String::new()),
            Some(c) if c.is_whitespace() => {
                let gt = rest.find('>')?;
                if rest[..gt].ends_with('/') {
                    return Some(String::new());
                }
                let content_start = after_name + gt + 1;
                let end = doc[content_start..].find(&close)?;
                return Some(doc[content_start..content_start + end].to_string());
            }
            // longer tag sharing the prefix, e.g. <output-format>
            _ => from = after_name,
        }
    }
    None
}

/// Whether `doc` contains a `<tag>` element (empty or not).
pub fn has_tag(doc: &str, tag: &str) -> bool {
    tag_text(doc, tag).is_some()
}

pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_body_orders_confirmed_before_log() {
        let body = commit("create resource junos_vlan", Some(5));
        assert_eq!(
            body,
            "<commit-configuration><confirmed/><confirm-timeout>5</confirm-timeout>\
             <log>create resource junos_vlan</log></commit-configuration>"
        );
    }

    #[test]
    fn load_set_escapes_lines() {
        let body = load_set(&["set system login message \"a < b\"".to_string()]);
        assert!(body.contains("a &lt; b"));
        assert!(body.starts_with(r#"<load-configuration action="set" format="text">"#));
    }

    #[test]
    fn reply_splits_errors_and_warnings() {
        let raw = r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="3">
<rpc-error>
<error-severity>warning</error-severity>
<error-message>statement not found</error-message>
</rpc-error>
<rpc-error>
<error-severity>error</error-severity>
<error-path>[edit vlans]</error-path>
<error-info><bad-element>vlan-id</bad-element></error-info>
<error-message>Value must be a number</error-message>
</rpc-error>
</rpc-reply>]]>]]>"#;
        let reply = RpcReply::parse(raw);
        assert_eq!(reply.warnings.len(), 1);
        assert_eq!(reply.errors.len(), 1);
        assert_eq!(
            reply.error_text(),
            "Value must be a number (statement: vlan-id)"
        );
        assert_eq!(reply.warning_texts(), vec!["statement not found".to_string()]);
    }

    #[test]
    fn commit_warnings_in_xnm_form_are_advisory() {
        let raw = r#"<rpc-reply><commit-results><routing-engine>
<xnm:warning xmlns="http://xml.juniper.net/xnm/1.1/xnm"><message>mgd: statement has no contents; ignored</message></xnm:warning>
<commit-success/></routing-engine></commit-results></rpc-reply>"#;
        let reply = RpcReply::parse(raw);
        assert!(!reply.has_errors());
        assert_eq!(reply.warnings.len(), 1);
        assert!(has_tag(&reply.body, "commit-success"));
    }

    #[test]
    fn command_output_strips_config_markers() {
        let body = "<configuration-information><configuration-output>\nset vlan-id 100\nset description &quot;lab&quot;\n</configuration-output></configuration-information>";
        assert_eq!(
            command_output(body),
            "set vlan-id 100\nset description \"lab\""
        );
    }

    #[test]
    fn empty_configuration_output_means_absent() {
        let body =
            "<configuration-information><configuration-output>\n</configuration-output></configuration-information>";
        assert_eq!(command_output(body), "");
    }

    #[test]
    fn tag_text_skips_longer_tag_names() {
        let doc = "<output-format>x</output-format><output>y</output>";
        assert_eq!(tag_text(doc, "output").as_deref(), Some("y"));
        assert_eq!(tag_text("<a><ok/></a>", "ok").as_deref(), Some(""));
    }

    #[test]
    fn reply_message_id_reads_opening_tag() {
        let reply = r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="42"><ok/></rpc-reply>"#;
        assert_eq!(reply_message_id(reply), Some(42));
        assert_eq!(reply_message_id("<rpc-reply><ok/></rpc-reply>"), None);
        assert_eq!(reply_message_id("<hello><session-id>7</session-id></hello>"), None);
    }
}
