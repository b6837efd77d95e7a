//! Line-processing primitives shared by resource read and write paths.
//!
//! Reads go through `show configuration <path> | display set relative`,
//! whose payload is a flat list of `set ...` lines relative to `<path>`.
//! Writes produce the same shape prefixed with the absolute path.

use crate::error::JunosError;
use crate::netconf::{XML_END_TAG_CONFIG_OUT, XML_START_TAG_CONFIG_OUT};

/// Separator between the fields of a resource identity.
pub const ID_SEPARATOR: &str = "_-_";
pub const SHOW_CONFIG: &str = "show configuration ";
pub const PIPE_DISPLAY_SET: &str = " | display set";
pub const PIPE_DISPLAY_SET_RELATIVE: &str = " | display set relative";
pub const SET_LS: &str = "set ";
pub const DELETE_LS: &str = "delete ";
/// Name of the master routing instance.
pub const DEFAULT_W: &str = "default";

/// `show configuration <path> | display set relative`.
pub fn show_relative(path: &str) -> String {
    format!("{SHOW_CONFIG}{}{PIPE_DISPLAY_SET_RELATIVE}", path.trim_end())
}

/// `show configuration <path> | display set`, used as an existence probe.
pub fn show_set(path: &str) -> String {
    format!("{SHOW_CONFIG}{}{PIPE_DISPLAY_SET}", path.trim_end())
}

/// Configuration lines of a `display set` payload, `set `/`delete ` prefix
/// removed.
///
/// Marker lines are skipped and everything after the closing marker is
/// ignored, so raw and pre-extracted payloads parse the same way.
pub fn config_lines(output: &str) -> impl Iterator<Item = &str> {
    output
        .lines()
        .filter(|line| !line.contains(XML_START_TAG_CONFIG_OUT))
        .take_while(|line| !line.contains(XML_END_TAG_CONFIG_OUT))
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.strip_prefix(SET_LS)
                .or_else(|| line.strip_prefix(DELETE_LS))
                .unwrap_or(line)
        })
}

/// Picks the longest prefix of `prefixes` that `line` starts with and
/// returns it together with the remainder.
pub fn match_prefix<'a, 'p>(line: &'a str, prefixes: &[&'p str]) -> Option<(&'p str, &'a str)> {
    prefixes
        .iter()
        .filter(|prefix| line.starts_with(**prefix))
        .max_by_key(|prefix| prefix.len())
        .map(|prefix| (*prefix, &line[prefix.len()..]))
}

/// Splits off the first whitespace-delimited token, honoring double quotes.
///
/// `"my key" algorithm md5` yields `("my key", "algorithm md5")`.
pub fn first_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    if let Some(quoted) = s.strip_prefix('"')
        && let Some(end) = quoted.find('"')
    {
        return (&quoted[..end], quoted[end + 1..].trim_start());
    }
    match s.split_once(' ') {
        Some((token, rest)) => (token, rest.trim_start()),
        None => (s, ""),
    }
}

/// Wraps a value in double quotes for a `set` line.
pub fn quote(value: &str) -> String {
    format!("\"{value}\"")
}

/// Removes one pair of surrounding double quotes, if present.
pub fn trim_quotes(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .to_string()
}

/// Returns the block whose identifier is `key`, creating it if needed, after
/// moving it to the end of `items`.
///
/// Device output is grouped by block, so in practice the match is the last
/// element and nothing moves.
pub fn extract_or_create<'v, T, K>(
    items: &'v mut Vec<T>,
    key: &K,
    key_of: impl Fn(&T) -> &K,
    create: impl FnOnce() -> T,
) -> &'v mut T
where
    K: PartialEq + ?Sized,
{
    let last_matches = items.last().is_some_and(|item| key_of(item) == key);
    if !last_matches {
        let block = match items.iter().position(|item| key_of(item) == key) {
            Some(idx) => items.remove(idx),
            None => create(),
        };
        items.push(block);
    }
    let last = items.len() - 1;
    &mut items[last]
}

/// Accumulates `set` lines under a fixed absolute prefix.
#[derive(Debug, Clone)]
pub struct SetLines {
    prefix: String,
    lines: Vec<String>,
}

impl SetLines {
    /// `prefix` is the hierarchy path, without the leading `set `.
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.ends_with(' ') {
            prefix.push(' ');
        }
        Self {
            prefix,
            lines: Vec::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Adds `set <prefix><suffix>`.
    pub fn push(&mut self, suffix: impl AsRef<str>) {
        self.lines
            .push(format!("{SET_LS}{}{}", self.prefix, suffix.as_ref()));
    }

    /// Adds `set <prefix>` on its own, declaring an empty stanza.
    pub fn push_bare(&mut self) {
        self.lines
            .push(format!("{SET_LS}{}", self.prefix.trim_end()));
    }

    pub fn extend(&mut self, other: SetLines) {
        self.lines.extend(other.lines);
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

/// `delete <path>` for a whole stanza.
pub fn delete_line(path: &str) -> String {
    format!("{DELETE_LS}{}", path.trim_end())
}

/// Joins identity fields with [`ID_SEPARATOR`].
pub fn join_id<S: AsRef<str>>(fields: &[S]) -> String {
    fields
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(ID_SEPARATOR)
}

/// Splits an identity into between `min` and `max` fields.
pub fn split_id(id: &str, min: usize, max: usize) -> Result<Vec<String>, JunosError> {
    let fields: Vec<String> = id.split(ID_SEPARATOR).map(str::to_string).collect();
    if fields.iter().any(String::is_empty) {
        return Err(JunosError::InvalidIdentity {
            id: id.to_string(),
            reason: "empty field".to_string(),
        });
    }
    if fields.len() < min || fields.len() > max {
        return Err(JunosError::InvalidIdentity {
            id: id.to_string(),
            reason: format!(
                "expected {min}..={max} fields separated by {ID_SEPARATOR}, got {}",
                fields.len()
            ),
        });
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_lines_strip_markers_and_prefix() {
        let output = "\n<configuration-output>\nset vlan-id 100\nset description \"lab vlan\"\n</configuration-output>\nset ignored\n";
        let lines: Vec<&str> = config_lines(output).collect();
        assert_eq!(lines, vec!["vlan-id 100", "description \"lab vlan\""]);
    }

    #[test]
    fn config_lines_strip_delete_prefix() {
        let output = "delete vlan-id\nset vlan-id 200\nset\n";
        let lines: Vec<&str> = config_lines(output).collect();
        assert_eq!(lines, vec!["vlan-id", "vlan-id 200", "set"]);
    }

    #[test]
    fn match_prefix_prefers_most_specific() {
        let prefixes = ["vxlan ", "vxlan vni ", "vlan-id "];
        assert_eq!(
            match_prefix("vxlan vni 5000", &prefixes),
            Some(("vxlan vni ", "5000"))
        );
        assert_eq!(
            match_prefix("vxlan ingress-node-replication", &prefixes),
            Some(("vxlan ", "ingress-node-replication"))
        );
        assert_eq!(match_prefix("description x", &prefixes), None);
    }

    #[test]
    fn first_token_handles_quotes() {
        assert_eq!(first_token("\"my key\" algorithm md5"), ("my key", "algorithm md5"));
        assert_eq!(first_token("r1 match source-address 10.0.0.0/8"), ("r1", "match source-address 10.0.0.0/8"));
        assert_eq!(first_token("lonely"), ("lonely", ""));
    }

    #[derive(Debug, PartialEq)]
    struct Rule {
        name: String,
        matches: Vec<String>,
    }

    #[test]
    fn extract_or_create_groups_repeated_blocks() {
        let mut rules: Vec<Rule> = Vec::new();
        for line in ["r1 match a", "r1 match b", "r2 match c"] {
            let (name, rest) = first_token(line);
            let rule = extract_or_create(
                &mut rules,
                name,
                |r| r.name.as_str(),
                || Rule {
                    name: name.to_string(),
                    matches: Vec::new(),
                },
            );
            rule.matches.push(rest.to_string());
        }
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].matches, vec!["match a", "match b"]);
        assert_eq!(rules[1].name, "r2");
    }

    #[test]
    fn set_lines_prefix_every_line() {
        let mut lines = SetLines::new("vlans v100");
        lines.push_bare();
        lines.push("vlan-id 100");
        assert_eq!(
            lines.into_lines(),
            vec!["set vlans v100", "set vlans v100 vlan-id 100"]
        );
    }

    #[test]
    fn identity_split_checks_field_count() {
        assert_eq!(join_id(&["v100", "default"]), "v100_-_default");
        assert_eq!(
            split_id("v100_-_default", 1, 2).expect("split"),
            vec!["v100".to_string(), "default".to_string()]
        );
        assert!(matches!(
            split_id("a_-_b_-_c", 1, 2),
            Err(JunosError::InvalidIdentity { .. })
        ));
        assert!(split_id("_-_x", 1, 2).is_err());
    }
}
