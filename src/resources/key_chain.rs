use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::parse_number;
use crate::codec::{
    SetLines, config_lines, delete_line, extract_or_create, first_token, join_id, match_prefix,
    quote, show_relative, trim_quotes,
};
use crate::diagnostics::Diagnostics;
use crate::error::{ErrorKind, JunosError};
use crate::lifecycle::ResourceOperations;
use crate::secret::{is_junos_encoded, junos_encode};
use crate::session::Session;

/// `junos_system_authentication_key_chain`: a named set of rotating
/// authentication keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct KeyChain {
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    /// Clock skew tolerance, in seconds.
    pub tolerance: Option<u32>,
    #[serde(default)]
    pub keys: Vec<KeyChainKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct KeyChainKey {
    pub id: u32,
    /// Plaintext; the device stores it `$9$` encoded.
    pub secret: String,
    /// `YYYY-MM-DD.HH:MM:SS`, optionally followed by a UTC offset.
    pub start_time: String,
    pub algorithm: Option<String>,
    pub key_name: Option<String>,
    pub options: Option<String>,
}

impl KeyChain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn path(&self) -> String {
        format!("security authentication-key-chains key-chain {}", self.name)
    }

    pub fn set_lines(&self) -> Result<Vec<String>, JunosError> {
        if self.name.is_empty() {
            return Err(JunosError::config_apply("key chain name is empty").with_path("name"));
        }
        let mut set = SetLines::new(self.path());
        if let Some(description) = &self.description {
            set.push(format!("description {}", quote(description)));
        }
        if let Some(tolerance) = self.tolerance {
            set.push(format!("tolerance {tolerance}"));
        }

        let mut seen = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            if seen.contains(&key.id) {
                return Err(JunosError::config_apply(format!(
                    "multiple blocks key with the same id {}",
                    key.id
                ))
                .with_path("key"));
            }
            seen.push(key.id);
            if key.start_time.is_empty() {
                return Err(JunosError::config_apply(format!(
                    "key {} has no start_time",
                    key.id
                ))
                .with_path("key.start_time"));
            }

            let secret = if is_junos_encoded(&key.secret) {
                key.secret.clone()
            } else {
                junos_encode(&key.secret)
            };
            let prefix = format!("key {} ", key.id);
            set.push(format!("{prefix}secret {}", quote(&secret)));
            set.push(format!("{prefix}start-time {}", quote(&key.start_time)));
            if let Some(algorithm) = &key.algorithm {
                set.push(format!("{prefix}algorithm {algorithm}"));
            }
            if let Some(key_name) = &key.key_name {
                set.push(format!("{prefix}key-name {key_name}"));
            }
            if let Some(options) = &key.options {
                set.push(format!("{prefix}options {options}"));
            }
        }
        if set.is_empty() {
            set.push_bare();
        }
        Ok(set.into_lines())
    }

    fn read_lines(&mut self, output: &str, session: &Session) -> Result<(), JunosError> {
        for line in config_lines(output) {
            match match_prefix(line, &["description ", "tolerance ", "key "]) {
                Some(("description ", value)) => self.description = Some(trim_quotes(value)),
                Some(("tolerance ", value)) => {
                    self.tolerance = Some(parse_number("tolerance", value)?)
                }
                Some((_, rest)) => {
                    let (id, rest) = first_token(rest);
                    let id: u32 = parse_number("key.id", id)?;
                    let key = extract_or_create(
                        &mut self.keys,
                        &id,
                        |k| &k.id,
                        || KeyChainKey {
                            id,
                            ..KeyChainKey::default()
                        },
                    );
                    key.read_line(rest, session)?;
                }
                None => {}
            }
        }
        Ok(())
    }
}

impl KeyChainKey {
    fn read_line(&mut self, line: &str, session: &Session) -> Result<(), JunosError> {
        match match_prefix(
            line,
            &["secret ", "start-time ", "algorithm ", "key-name ", "options "],
        ) {
            Some(("secret ", value)) => {
                self.secret = session.junos_decode(&trim_quotes(value), "key.secret")?
            }
            Some(("start-time ", value)) => self.start_time = trim_quotes(value),
            Some(("algorithm ", value)) => self.algorithm = Some(value.to_string()),
            Some(("key-name ", value)) => self.key_name = Some(value.to_string()),
            Some((_, value)) => self.options = Some(value.to_string()),
            None => {}
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceOperations for KeyChain {
    fn type_name(&self) -> &'static str {
        "junos_system_authentication_key_chain"
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn fill_id(&mut self) {
        self.id = Some(join_id(&self.identity_fields()));
    }

    fn clear_id(&mut self) {
        self.id = None;
    }

    fn identity_fields(&self) -> Vec<String> {
        vec![self.name.clone()]
    }

    async fn set(&self, session: &mut Session) -> Result<(), JunosError> {
        let lines = self.set_lines()?;
        session.config_set(&lines).await
    }

    async fn del(&self, session: &mut Session) -> Result<(), JunosError> {
        session.config_set(&[delete_line(&self.path())]).await
    }

    async fn read(&mut self, fields: &[String], session: &mut Session) -> Result<bool, JunosError> {
        *self = KeyChain::new(fields.first().cloned().unwrap_or_default());
        let output = session.command(&show_relative(&self.path())).await?;
        if config_lines(&output).next().is_none() {
            return Ok(false);
        }
        self.read_lines(&output, session)?;
        Ok(true)
    }

    async fn pre_check_create(&self, session: &mut Session, diags: &mut Diagnostics) -> bool {
        match session.config_exists(&self.path()).await {
            Ok(false) => true,
            Ok(true) => {
                diags.add_error(
                    ErrorKind::PreCheck,
                    "Duplicate Configuration Error",
                    format!(
                        "security authentication-key-chains key-chain {} already exists",
                        self.name
                    ),
                );
                false
            }
            Err(err) => {
                diags.push_error(&err);
                false
            }
        }
    }

    async fn post_check_create(&self, session: &mut Session, diags: &mut Diagnostics) -> bool {
        match session.config_exists(&self.path()).await {
            Ok(true) => true,
            Ok(false) => {
                diags.add_error(
                    ErrorKind::PostCheck,
                    "Not Found Error",
                    format!(
                        "security authentication-key-chains key-chain {} does not exists after commit => check your config",
                        self.name
                    ),
                );
                false
            }
            Err(err) => {
                diags.push_error(&err);
                false
            }
        }
    }
}
