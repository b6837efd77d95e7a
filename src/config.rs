//! Provider configuration and SSH algorithm profiles.
//!
//! [`ProviderConfig`] is supplied once at provider configuration time and is
//! shared by every session the [`SessionManager`](crate::session::SessionManager)
//! opens. The algorithm tables below feed russh's `Preferred` negotiation
//! order for each [`SecurityLevel`].

use std::borrow::Cow;
use std::time::Duration;

use async_ssh2_tokio::ServerCheckMethod;
use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{Preferred, cipher, compression, kex, mac};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::JunosError;

/// Default NETCONF-over-SSH port.
pub const DEFAULT_NETCONF_PORT: u16 = 830;

/// Security level used for SSH algorithm selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Strict modern algorithms (default).
    #[default]
    Secure,
    /// Good security with broader compatibility.
    Balanced,
    /// Maximum compatibility with old Junos releases.
    LegacyCompatible,
}

/// What to do when `ConfigClear` itself fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClearFailurePolicy {
    /// Report the failure as a warning; the primary error, if any, stays fatal.
    #[default]
    Downgrade,
    /// Report the failure as an error after any primary error.
    Escalate,
}

/// Connection and transaction settings for one provider instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ProviderConfig {
    /// Device address (IP or hostname).
    pub ip: String,
    /// NETCONF port.
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    /// Private key used instead of (or before) the password.
    pub ssh_key_file: Option<String>,
    /// Passphrase of `ssh_key_file`.
    pub key_pass: Option<String>,
    pub ssh_security: SecurityLevel,
    /// Known hosts file; `None` uses the user's default file.
    pub known_hosts_file: Option<String>,
    /// Skip host key verification entirely.
    pub insecure_skip_host_check: bool,
    pub connect_timeout_secs: u64,
    /// Per-RPC timeout.
    pub cmd_timeout_secs: u64,
    /// Total time to keep retrying a refused candidate lock. `None` fails fast.
    pub lock_wait_secs: Option<u64>,
    pub lock_retry_interval_ms: u64,
    /// Use confirmed commit with this rollback timeout, then confirm it.
    pub commit_confirmed_minutes: Option<u32>,
    /// Write `set` lines of created resources to this file instead of the device.
    pub fake_create_set_file: Option<String>,
    /// Also route updates through the offline session.
    pub fake_update_also: bool,
    /// Also route deletes through the offline session.
    pub fake_delete_also: bool,
    pub clear_failure_policy: ClearFailurePolicy,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            ip: String::new(),
            port: DEFAULT_NETCONF_PORT,
            username: String::new(),
            password: None,
            ssh_key_file: None,
            key_pass: None,
            ssh_security: SecurityLevel::default(),
            known_hosts_file: None,
            insecure_skip_host_check: false,
            connect_timeout_secs: 60,
            cmd_timeout_secs: 60,
            lock_wait_secs: None,
            lock_retry_interval_ms: 1000,
            commit_confirmed_minutes: None,
            fake_create_set_file: None,
            fake_update_also: false,
            fake_delete_also: false,
            clear_failure_policy: ClearFailurePolicy::default(),
        }
    }
}

impl ProviderConfig {
    /// Parses a JSON provider block and validates it.
    pub fn from_json(json: &str) -> Result<Self, JunosError> {
        let config: ProviderConfig = serde_json::from_str(json)
            .map_err(|e| JunosError::InvalidConfig(format!("decode error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field invariants.
    pub fn validate(&self) -> Result<(), JunosError> {
        if self.fake_update_also && self.fake_create_set_file.is_none() {
            return Err(JunosError::InvalidConfig(
                "fake_update_also requires fake_create_set_file".to_string(),
            ));
        }
        if self.fake_delete_also && self.fake_create_set_file.is_none() {
            return Err(JunosError::InvalidConfig(
                "fake_delete_also requires fake_create_set_file".to_string(),
            ));
        }
        if self.cmd_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(JunosError::InvalidConfig(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if matches!(self.commit_confirmed_minutes, Some(0)) {
            return Err(JunosError::InvalidConfig(
                "commit_confirmed_minutes must be at least 1".to_string(),
            ));
        }
        if self.fake_create_set_file.is_some() && self.ip.is_empty() {
            // offline-only provider, no transport settings required
            return Ok(());
        }
        if self.ip.trim().is_empty() {
            return Err(JunosError::InvalidConfig("ip is empty".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(JunosError::InvalidConfig("username is empty".to_string()));
        }
        if self.password.is_none() && self.ssh_key_file.is_none() {
            return Err(JunosError::InvalidConfig(
                "one of password or ssh_key_file is required".to_string(),
            ));
        }
        Ok(())
    }

    /// `user@ip:port`, used as the session label in logs and recordings.
    pub fn device_addr(&self) -> String {
        format!("{}@{}:{}", self.username, self.ip, self.port)
    }

    pub fn cmd_timeout(&self) -> Duration {
        Duration::from_secs(self.cmd_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn lock_wait(&self) -> Option<Duration> {
        self.lock_wait_secs.map(Duration::from_secs)
    }

    pub fn lock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.lock_retry_interval_ms.max(1))
    }

    pub(crate) fn server_check(&self) -> ServerCheckMethod {
        if self.insecure_skip_host_check {
            return ServerCheckMethod::NoCheck;
        }
        match &self.known_hosts_file {
            Some(path) => ServerCheckMethod::KnownHostsFile(path.clone()),
            None => ServerCheckMethod::DefaultKnownHostsFile,
        }
    }
}

impl SecurityLevel {
    /// russh negotiation preferences for this level.
    pub fn preferred(self) -> Preferred {
        let profile = match self {
            SecurityLevel::Secure => &SECURE,
            SecurityLevel::Balanced => &BALANCED,
            SecurityLevel::LegacyCompatible => &LEGACY,
        };
        Preferred {
            kex: Cow::Borrowed(profile.kex),
            key: Cow::Borrowed(profile.key),
            cipher: Cow::Borrowed(profile.cipher),
            mac: Cow::Borrowed(profile.mac),
            compression: Cow::Borrowed(COMPRESSION),
        }
    }
}

struct AlgorithmProfile {
    kex: &'static [kex::Name],
    key: &'static [Algorithm],
    cipher: &'static [cipher::Name],
    mac: &'static [mac::Name],
}

const COMPRESSION: &[compression::Name] = &[compression::NONE, compression::ZLIB];

static SECURE: AlgorithmProfile = AlgorithmProfile {
    kex: &[
        kex::CURVE25519,
        kex::CURVE25519_PRE_RFC_8731,
        kex::ECDH_SHA2_NISTP256,
        kex::ECDH_SHA2_NISTP384,
        kex::ECDH_SHA2_NISTP521,
        kex::DH_G16_SHA512,
        kex::DH_G14_SHA256,
    ],
    key: &[
        Algorithm::Ed25519,
        Algorithm::Ecdsa {
            curve: EcdsaCurve::NistP256,
        },
        Algorithm::Ecdsa {
            curve: EcdsaCurve::NistP384,
        },
        Algorithm::Rsa {
            hash: Some(HashAlg::Sha512),
        },
        Algorithm::Rsa {
            hash: Some(HashAlg::Sha256),
        },
    ],
    cipher: &[
        cipher::CHACHA20_POLY1305,
        cipher::AES_256_GCM,
        cipher::AES_256_CTR,
        cipher::AES_192_CTR,
        cipher::AES_128_CTR,
    ],
    mac: &[
        mac::HMAC_SHA512_ETM,
        mac::HMAC_SHA256_ETM,
        mac::HMAC_SHA512,
        mac::HMAC_SHA256,
    ],
};

static BALANCED: AlgorithmProfile = AlgorithmProfile {
    kex: &[
        kex::CURVE25519,
        kex::CURVE25519_PRE_RFC_8731,
        kex::ECDH_SHA2_NISTP256,
        kex::ECDH_SHA2_NISTP384,
        kex::DH_G16_SHA512,
        kex::DH_G14_SHA256,
        kex::DH_GEX_SHA256,
        kex::DH_G14_SHA1,
    ],
    key: &[
        Algorithm::Ed25519,
        Algorithm::Ecdsa {
            curve: EcdsaCurve::NistP256,
        },
        Algorithm::Rsa {
            hash: Some(HashAlg::Sha256),
        },
        Algorithm::Rsa { hash: None },
    ],
    cipher: &[
        cipher::CHACHA20_POLY1305,
        cipher::AES_256_GCM,
        cipher::AES_256_CTR,
        cipher::AES_128_CTR,
        cipher::AES_256_CBC,
    ],
    mac: &[
        mac::HMAC_SHA256_ETM,
        mac::HMAC_SHA256,
        mac::HMAC_SHA512,
        mac::HMAC_SHA1,
    ],
};

static LEGACY: AlgorithmProfile = AlgorithmProfile {
    kex: &[
        kex::CURVE25519,
        kex::ECDH_SHA2_NISTP256,
        kex::DH_G14_SHA256,
        kex::DH_GEX_SHA256,
        kex::DH_GEX_SHA1,
        kex::DH_G14_SHA1,
        kex::DH_G1_SHA1,
    ],
    key: &[
        Algorithm::Ed25519,
        Algorithm::Ecdsa {
            curve: EcdsaCurve::NistP256,
        },
        Algorithm::Rsa {
            hash: Some(HashAlg::Sha256),
        },
        Algorithm::Rsa { hash: None },
        Algorithm::Dsa,
    ],
    cipher: &[
        cipher::AES_256_CTR,
        cipher::AES_128_CTR,
        cipher::AES_256_CBC,
        cipher::AES_192_CBC,
        cipher::AES_128_CBC,
    ],
    mac: &[mac::HMAC_SHA256, mac::HMAC_SHA1, mac::HMAC_SHA1_ETM],
};

#[cfg(test)]
mod tests {
    use super::*;

    fn device_config() -> ProviderConfig {
        ProviderConfig {
            ip: "192.0.2.1".to_string(),
            username: "netconf".to_string(),
            password: Some("secret".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn json_block_fills_defaults() {
        let config = ProviderConfig::from_json(
            r#"{"ip":"192.0.2.1","username":"netconf","password":"secret"}"#,
        )
        .expect("parse config");
        assert_eq!(config.port, DEFAULT_NETCONF_PORT);
        assert_eq!(config.cmd_timeout_secs, 60);
        assert_eq!(config.clear_failure_policy, ClearFailurePolicy::Downgrade);
        assert_eq!(config.device_addr(), "netconf@192.0.2.1:830");
    }

    #[test]
    fn fake_update_requires_set_file() {
        let config = ProviderConfig {
            fake_update_also: true,
            ..device_config()
        };
        let err = config.validate().expect_err("fake update without file");
        assert!(matches!(err, JunosError::InvalidConfig(_)));
    }

    #[test]
    fn credentials_are_required_for_device_sessions() {
        let config = ProviderConfig {
            password: None,
            ..device_config()
        };
        assert!(config.validate().is_err());

        let offline = ProviderConfig {
            fake_create_set_file: Some("/tmp/set.txt".to_string()),
            ..Default::default()
        };
        offline.validate().expect("offline provider needs no transport");
    }

    #[test]
    fn secure_profile_excludes_weak_algorithms() {
        let preferred = SecurityLevel::Secure.preferred();
        assert!(preferred.kex.iter().all(|alg| *alg != kex::DH_G1_SHA1));
        assert!(preferred.cipher.iter().all(|alg| *alg != cipher::AES_128_CBC));
        assert!(preferred.mac.iter().all(|alg| *alg != mac::HMAC_SHA1));
    }

    #[test]
    fn legacy_profile_keeps_sha1_key_exchange() {
        let preferred = SecurityLevel::LegacyCompatible.preferred();
        assert!(preferred.kex.contains(&kex::DH_G1_SHA1));
        assert!(preferred.key.contains(&Algorithm::Dsa));
    }
}
