//! Workspace and per-domain configuration
//!
//! Configuration lives in `workDir/getssl.cfg` (global) and
//! `workDir/<domain>/getssl.cfg` (per-domain overrides), TOML with the
//! historical uppercase key names. Values are merged domain-over-global
//! and support `${VAR}` environment expansion.

use crate::env_expand::{expand, EnvExpandError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default ACME directory base. This is the Let's Encrypt *staging*
/// environment; issued certificates are not browser-trusted. Point `CA`
/// at the production URL deliberately.
pub const DEFAULT_CA: &str = "https://acme-staging.api.letsencrypt.org";

/// Terms-of-service URL sent with `new-reg`.
pub const DEFAULT_AGREEMENT: &str =
    "https://letsencrypt.org/documents/LE-SA-v1.1.1-August-1-2016.pdf";

pub const CONFIG_FILE_NAME: &str = "getssl.cfg";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown SERVER_TYPE '{0}' (expected webserver, ldaps or a port number)")]
    UnknownServerType(String),

    #[error("ACL has {got} entries but {want} names need challenge locations (primary + SANS)")]
    AclLength { got: usize, want: usize },

    #[error("ACL is required for http-01 validation")]
    MissingAcl,

    #[error("{0} is required for dns-01 validation")]
    MissingDnsCommand(&'static str),

    #[error(transparent)]
    EnvExpand(#[from] EnvExpandError),
}

/// Domain key algorithm (`PRIVATE_KEY_ALG`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum KeyAlgorithm {
    #[default]
    #[serde(rename = "rsa")]
    Rsa,
    #[serde(rename = "prime256v1")]
    Prime256v1,
}

/// One configuration file, all keys optional so that the domain layer
/// can override the global layer field by field.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(rename = "CA")]
    ca: Option<String>,
    #[serde(rename = "AGREEMENT")]
    agreement: Option<String>,
    #[serde(rename = "ACCOUNT_EMAIL")]
    account_email: Option<String>,
    #[serde(rename = "ACCOUNT_KEY")]
    account_key: Option<String>,
    #[serde(rename = "ACCOUNT_KEY_LENGTH")]
    account_key_length: Option<u32>,
    #[serde(rename = "PRIVATE_KEY_ALG")]
    private_key_alg: Option<KeyAlgorithm>,
    #[serde(rename = "DOMAIN_KEY_LENGTH")]
    domain_key_length: Option<u32>,
    #[serde(rename = "SANS")]
    sans: Option<String>,
    #[serde(rename = "ACL")]
    acl: Option<Vec<String>>,
    #[serde(rename = "USE_SINGLE_ACL")]
    use_single_acl: Option<bool>,
    #[serde(rename = "VALIDATE_VIA_DNS")]
    validate_via_dns: Option<bool>,
    #[serde(rename = "DNS_ADD_COMMAND")]
    dns_add_command: Option<String>,
    #[serde(rename = "DNS_DEL_COMMAND")]
    dns_del_command: Option<String>,
    #[serde(rename = "DNS_EXTRA_WAIT")]
    dns_extra_wait: Option<u64>,
    #[serde(rename = "SERVER_TYPE")]
    server_type: Option<String>,
    #[serde(rename = "CHECK_REMOTE")]
    check_remote: Option<bool>,
    #[serde(rename = "RENEW_ALLOW")]
    renew_allow: Option<i64>,
    #[serde(rename = "RELOAD_CMD")]
    reload_cmd: Option<String>,
    #[serde(rename = "DOMAIN_CERT_LOCATION")]
    domain_cert_location: Option<String>,
    #[serde(rename = "DOMAIN_KEY_LOCATION")]
    domain_key_location: Option<String>,
    #[serde(rename = "CA_CERT_LOCATION")]
    ca_cert_location: Option<String>,
    #[serde(rename = "DOMAIN_CHAIN_LOCATION")]
    domain_chain_location: Option<String>,
    #[serde(rename = "DOMAIN_PEM_LOCATION")]
    domain_pem_location: Option<String>,
    #[serde(rename = "SKIP_HTTP_TOKEN_CHECK")]
    skip_http_token_check: Option<bool>,
    /// Accepted for compatibility; the built-in CSR builder needs no
    /// OpenSSL-style template.
    #[serde(rename = "SSLCONF")]
    #[allow(dead_code)]
    sslconf: Option<String>,
}

impl RawConfig {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }

    fn overlay(self, over: RawConfig) -> RawConfig {
        RawConfig {
            ca: over.ca.or(self.ca),
            agreement: over.agreement.or(self.agreement),
            account_email: over.account_email.or(self.account_email),
            account_key: over.account_key.or(self.account_key),
            account_key_length: over.account_key_length.or(self.account_key_length),
            private_key_alg: over.private_key_alg.or(self.private_key_alg),
            domain_key_length: over.domain_key_length.or(self.domain_key_length),
            sans: over.sans.or(self.sans),
            acl: over.acl.or(self.acl),
            use_single_acl: over.use_single_acl.or(self.use_single_acl),
            validate_via_dns: over.validate_via_dns.or(self.validate_via_dns),
            dns_add_command: over.dns_add_command.or(self.dns_add_command),
            dns_del_command: over.dns_del_command.or(self.dns_del_command),
            dns_extra_wait: over.dns_extra_wait.or(self.dns_extra_wait),
            server_type: over.server_type.or(self.server_type),
            check_remote: over.check_remote.or(self.check_remote),
            renew_allow: over.renew_allow.or(self.renew_allow),
            reload_cmd: over.reload_cmd.or(self.reload_cmd),
            domain_cert_location: over.domain_cert_location.or(self.domain_cert_location),
            domain_key_location: over.domain_key_location.or(self.domain_key_location),
            ca_cert_location: over.ca_cert_location.or(self.ca_cert_location),
            domain_chain_location: over.domain_chain_location.or(self.domain_chain_location),
            domain_pem_location: over.domain_pem_location.or(self.domain_pem_location),
            skip_http_token_check: over.skip_http_token_check.or(self.skip_http_token_check),
            sslconf: over.sslconf.or(self.sslconf),
        }
    }
}

/// Merged, expanded, defaulted configuration for one domain run.
#[derive(Debug, Clone)]
pub struct Config {
    pub ca: String,
    pub agreement: String,
    pub account_email: Option<String>,
    pub account_key: PathBuf,
    pub account_key_length: u32,
    pub private_key_alg: KeyAlgorithm,
    pub domain_key_length: u32,
    pub sans: Vec<String>,
    pub acl: Vec<String>,
    pub use_single_acl: bool,
    pub validate_via_dns: bool,
    pub dns_add_command: Option<String>,
    pub dns_del_command: Option<String>,
    pub dns_extra_wait: u64,
    pub server_type: String,
    pub check_remote: bool,
    pub renew_allow: i64,
    pub reload_cmd: Option<String>,
    pub domain_cert_location: Option<String>,
    pub domain_key_location: Option<String>,
    pub ca_cert_location: Option<String>,
    pub domain_chain_location: Option<String>,
    pub domain_pem_location: Option<String>,
    pub skip_http_token_check: bool,
}

impl Config {
    /// Load and merge the global and per-domain config files. Either
    /// file may be absent; defaults fill the gaps.
    pub fn load(work_dir: &Path, domain: &str) -> Result<Self, ConfigError> {
        let mut raw = RawConfig::default();

        let global = work_dir.join(CONFIG_FILE_NAME);
        if global.is_file() {
            raw = raw.overlay(RawConfig::load(&global)?);
        }
        let per_domain = work_dir.join(domain).join(CONFIG_FILE_NAME);
        if per_domain.is_file() {
            raw = raw.overlay(RawConfig::load(&per_domain)?);
        }

        Self::finish(raw, work_dir)
    }

    fn finish(raw: RawConfig, work_dir: &Path) -> Result<Self, ConfigError> {
        let expand_opt = |v: Option<String>| -> Result<Option<String>, EnvExpandError> {
            v.map(|s| expand(&s)).transpose()
        };

        let account_key = match expand_opt(raw.account_key)? {
            Some(p) => PathBuf::from(p),
            None => work_dir.join("account.key"),
        };

        let sans = raw
            .sans
            .as_deref()
            .map(split_sans)
            .unwrap_or_default();

        let acl = raw
            .acl
            .unwrap_or_default()
            .into_iter()
            .map(|s| expand(&s))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Config {
            ca: raw.ca.unwrap_or_else(|| DEFAULT_CA.to_string()),
            agreement: raw.agreement.unwrap_or_else(|| DEFAULT_AGREEMENT.to_string()),
            account_email: expand_opt(raw.account_email)?,
            account_key,
            account_key_length: raw.account_key_length.unwrap_or(4096),
            private_key_alg: raw.private_key_alg.unwrap_or_default(),
            domain_key_length: raw.domain_key_length.unwrap_or(4096),
            sans,
            acl,
            use_single_acl: raw.use_single_acl.unwrap_or(false),
            validate_via_dns: raw.validate_via_dns.unwrap_or(false),
            dns_add_command: expand_opt(raw.dns_add_command)?,
            dns_del_command: expand_opt(raw.dns_del_command)?,
            dns_extra_wait: raw.dns_extra_wait.unwrap_or(0),
            server_type: raw.server_type.unwrap_or_else(|| "webserver".to_string()),
            check_remote: raw.check_remote.unwrap_or(true),
            renew_allow: raw.renew_allow.unwrap_or(30),
            reload_cmd: expand_opt(raw.reload_cmd)?,
            domain_cert_location: expand_opt(raw.domain_cert_location)?,
            domain_key_location: expand_opt(raw.domain_key_location)?,
            ca_cert_location: expand_opt(raw.ca_cert_location)?,
            domain_chain_location: expand_opt(raw.domain_chain_location)?,
            domain_pem_location: expand_opt(raw.domain_pem_location)?,
            skip_http_token_check: raw.skip_http_token_check.unwrap_or(false),
        })
    }

    /// All names the certificate must cover: primary first, then SANS
    /// in configured order.
    pub fn names(&self, domain: &str) -> Vec<String> {
        let mut names = Vec::with_capacity(1 + self.sans.len());
        names.push(domain.to_string());
        for san in &self.sans {
            if san != domain {
                names.push(san.clone());
            }
        }
        names
    }

    /// Challenge root for the identifier at `index` in [`Config::names`]
    /// order. With `USE_SINGLE_ACL` every identifier shares `ACL[0]`.
    pub fn acl_for(&self, index: usize) -> Option<&str> {
        if self.use_single_acl {
            self.acl.first().map(String::as_str)
        } else {
            self.acl.get(index).map(String::as_str)
        }
    }

    /// Map `SERVER_TYPE` to the probe port. The probe port always
    /// follows the resolved server type.
    pub fn remote_port(&self) -> Result<u16, ConfigError> {
        match self.server_type.as_str() {
            "webserver" => Ok(443),
            "ldaps" => Ok(636),
            other => other
                .parse::<u16>()
                .map_err(|_| ConfigError::UnknownServerType(other.to_string())),
        }
    }

    /// Startup validation: server type, challenge prerequisites.
    pub fn validate(&self, domain: &str) -> Result<(), ConfigError> {
        self.remote_port()?;

        if self.validate_via_dns {
            if self.dns_add_command.is_none() {
                return Err(ConfigError::MissingDnsCommand("DNS_ADD_COMMAND"));
            }
            if self.dns_del_command.is_none() {
                return Err(ConfigError::MissingDnsCommand("DNS_DEL_COMMAND"));
            }
        } else {
            let want = self.names(domain).len();
            if self.acl.is_empty() {
                return Err(ConfigError::MissingAcl);
            }
            if !self.use_single_acl && self.acl.len() != want {
                return Err(ConfigError::AclLength {
                    got: self.acl.len(),
                    want,
                });
            }
        }
        Ok(())
    }
}

fn split_sans(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Write the global config template if absent. Returns true when a
/// file was created.
pub fn write_global_template(work_dir: &Path) -> Result<bool, ConfigError> {
    let path = work_dir.join(CONFIG_FILE_NAME);
    if path.exists() {
        return Ok(false);
    }
    let body = format!(
        "# getcert global configuration\n\
         # Uncomment CA to use the Let's Encrypt production environment.\n\
         # The default below is the STAGING environment.\n\
         CA = \"{DEFAULT_CA}\"\n\
         # CA = \"https://acme-v01.api.letsencrypt.org\"\n\
         AGREEMENT = \"{DEFAULT_AGREEMENT}\"\n\
         # ACCOUNT_EMAIL = \"me@example.com\"\n\
         ACCOUNT_KEY_LENGTH = 4096\n\
         # PRIVATE_KEY_ALG = \"rsa\"\n\
         # RENEW_ALLOW = 30\n\
         # SERVER_TYPE = \"webserver\"\n\
         # CHECK_REMOTE = true\n"
    );
    std::fs::write(&path, body).map_err(|e| ConfigError::Write {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(true)
}

/// Write the per-domain config template, seeding `SANS` from a live
/// remote certificate when one was reachable.
pub fn write_domain_template(
    work_dir: &Path,
    domain: &str,
    seeded_sans: &[String],
) -> Result<bool, ConfigError> {
    let dir = work_dir.join(domain);
    let path = dir.join(CONFIG_FILE_NAME);
    if path.exists() {
        return Ok(false);
    }
    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::Write {
        path: dir.display().to_string(),
        source: e,
    })?;

    let sans: Vec<&str> = seeded_sans
        .iter()
        .map(String::as_str)
        .filter(|s| *s != domain)
        .collect();
    let sans_line = if sans.is_empty() {
        "# SANS = \"www.example.com\"".to_string()
    } else {
        format!("SANS = \"{}\"", sans.join(","))
    };

    let body = format!(
        "# getcert configuration for {domain}\n\
         {sans_line}\n\
         # ACL = [\"/var/www/{domain}/web/.well-known/acme-challenge\"]\n\
         # USE_SINGLE_ACL = true\n\
         # VALIDATE_VIA_DNS = true\n\
         # DNS_ADD_COMMAND = \"/usr/local/bin/dns_add\"\n\
         # DNS_DEL_COMMAND = \"/usr/local/bin/dns_del\"\n\
         # RELOAD_CMD = \"systemctl reload nginx\"\n\
         # DOMAIN_CERT_LOCATION = \"ssh:server:/etc/ssl/{domain}.crt\"\n\
         # DOMAIN_KEY_LOCATION = \"ssh:server:/etc/ssl/{domain}.key\"\n\
         # CA_CERT_LOCATION = \"ssh:server:/etc/ssl/chain.crt\"\n"
    );
    std::fs::write(&path, body).map_err(|e| ConfigError::Write {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_cfg(dir: &Path, rel: &str, body: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn defaults_without_any_file() {
        let tmp = TempDir::new().unwrap();
        let cfg = Config::load(tmp.path(), "example.com").unwrap();
        assert_eq!(cfg.ca, DEFAULT_CA);
        assert_eq!(cfg.account_key_length, 4096);
        assert_eq!(cfg.renew_allow, 30);
        assert!(cfg.check_remote);
        assert_eq!(cfg.account_key, tmp.path().join("account.key"));
    }

    #[test]
    fn domain_layer_overrides_global() {
        let tmp = TempDir::new().unwrap();
        write_cfg(tmp.path(), "getssl.cfg", "RENEW_ALLOW = 10\nSANS = \"a.example.com\"\n");
        write_cfg(
            tmp.path(),
            "example.com/getssl.cfg",
            "RENEW_ALLOW = 45\n",
        );
        let cfg = Config::load(tmp.path(), "example.com").unwrap();
        assert_eq!(cfg.renew_allow, 45);
        assert_eq!(cfg.sans, vec!["a.example.com"]);
    }

    #[test]
    fn sans_splitting_trims_and_drops_empties() {
        assert_eq!(
            split_sans("www.example.com, api.example.com ,,"),
            vec!["www.example.com", "api.example.com"]
        );
        assert!(split_sans("").is_empty());
    }

    #[test]
    fn names_is_primary_plus_sans() {
        let tmp = TempDir::new().unwrap();
        write_cfg(tmp.path(), "getssl.cfg", "SANS = \"www.example.com\"\n");
        let cfg = Config::load(tmp.path(), "example.com").unwrap();
        assert_eq!(cfg.names("example.com"), vec!["example.com", "www.example.com"]);
    }

    #[test]
    fn server_type_port_mapping() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = Config::load(tmp.path(), "example.com").unwrap();
        assert_eq!(cfg.remote_port().unwrap(), 443);

        cfg.server_type = "ldaps".to_string();
        assert_eq!(cfg.remote_port().unwrap(), 636);

        cfg.server_type = "8443".to_string();
        assert_eq!(cfg.remote_port().unwrap(), 8443);

        cfg.server_type = "abc".to_string();
        assert!(matches!(
            cfg.remote_port(),
            Err(ConfigError::UnknownServerType(_))
        ));
    }

    #[test]
    fn acl_length_must_cover_every_name() {
        let tmp = TempDir::new().unwrap();
        write_cfg(
            tmp.path(),
            "getssl.cfg",
            "SANS = \"www.example.com\"\nACL = [\"/srv/a\"]\n",
        );
        let cfg = Config::load(tmp.path(), "example.com").unwrap();
        assert!(matches!(
            cfg.validate("example.com"),
            Err(ConfigError::AclLength { got: 1, want: 2 })
        ));
    }

    #[test]
    fn single_acl_waives_length_check() {
        let tmp = TempDir::new().unwrap();
        write_cfg(
            tmp.path(),
            "getssl.cfg",
            "SANS = \"www.example.com\"\nACL = [\"/srv/a\"]\nUSE_SINGLE_ACL = true\n",
        );
        let cfg = Config::load(tmp.path(), "example.com").unwrap();
        cfg.validate("example.com").unwrap();
        assert_eq!(cfg.acl_for(0), Some("/srv/a"));
        assert_eq!(cfg.acl_for(1), Some("/srv/a"));
    }

    #[test]
    fn dns_mode_requires_both_hooks() {
        let tmp = TempDir::new().unwrap();
        write_cfg(
            tmp.path(),
            "getssl.cfg",
            "VALIDATE_VIA_DNS = true\nDNS_ADD_COMMAND = \"/bin/add\"\n",
        );
        let cfg = Config::load(tmp.path(), "example.com").unwrap();
        assert!(matches!(
            cfg.validate("example.com"),
            Err(ConfigError::MissingDnsCommand("DNS_DEL_COMMAND"))
        ));
    }

    #[test]
    fn template_creation_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        assert!(write_global_template(tmp.path()).unwrap());
        assert!(!write_global_template(tmp.path()).unwrap());

        assert!(write_domain_template(tmp.path(), "example.com", &[]).unwrap());
        assert!(!write_domain_template(tmp.path(), "example.com", &[]).unwrap());
    }

    #[test]
    fn domain_template_seeds_sans() {
        let tmp = TempDir::new().unwrap();
        let sans = vec!["example.com".to_string(), "www.example.com".to_string()];
        write_domain_template(tmp.path(), "example.com", &sans).unwrap();
        let body =
            std::fs::read_to_string(tmp.path().join("example.com").join(CONFIG_FILE_NAME)).unwrap();
        assert!(body.contains("SANS = \"www.example.com\""));

        let cfg = Config::load(tmp.path(), "example.com").unwrap();
        assert_eq!(cfg.sans, vec!["www.example.com"]);
    }
}
