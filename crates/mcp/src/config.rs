//! `toolmesh.toml` loading: `${ENV}` substitution, `TOOLMESH_*` overrides
//! and validation.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    time::Duration,
};

use {
    serde::{Deserialize, Serialize},
    toolmesh_oauth::AuthSettings,
    tracing::debug,
    url::Url,
};

use crate::error::{Context, Error, Result};

pub const CONFIG_FILENAME: &str = "toolmesh.toml";

/// One remote endpoint. The first configured endpoint is the primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub auth: AuthSettings,
    pub endpoints: Vec<EndpointDescriptor>,
    /// Credential file; relative paths resolve against the executable's directory.
    pub credentials_path: PathBuf,
    pub call_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            auth: AuthSettings::default(),
            endpoints: Vec::new(),
            credentials_path: PathBuf::from("toolmesh_tokens.json"),
            call_timeout_secs: 300,
            request_timeout_secs: 300,
            connect_timeout_secs: 30,
        }
    }
}

impl AggregatorConfig {
    /// Parse TOML text, substituting `${VAR}` placeholders first.
    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(&substitute_env(raw))?)
    }

    pub fn primary(&self) -> Result<&EndpointDescriptor> {
        self.endpoints
            .first()
            .ok_or_else(|| Error::config("at least one [[endpoints]] entry is required"))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Auth settings with the issuer defaulted to the primary endpoint's origin.
    pub fn effective_auth(&self) -> Result<AuthSettings> {
        let mut auth = self.auth.clone();
        if auth.issuer.is_none() {
            let url = Url::parse(&self.primary()?.url)?;
            auth.issuer = Some(url.origin().ascii_serialization());
        }
        Ok(auth)
    }

    #[must_use]
    pub fn resolved_credentials_path(&self) -> PathBuf {
        if self.credentials_path.is_absolute() {
            return self.credentials_path.clone();
        }
        executable_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(&self.credentials_path)
    }

    pub fn validate(&self) -> Result<()> {
        self.primary()?;

        let mut names = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.name.trim().is_empty() {
                return Err(Error::config("endpoint names must not be empty"));
            }
            if !names.insert(endpoint.name.as_str()) {
                return Err(Error::config(format!(
                    "duplicate endpoint name '{}'",
                    endpoint.name
                )));
            }
            let url = Url::parse(&endpoint.url).map_err(|e| {
                Error::config(format!("endpoint '{}' has invalid url: {e}", endpoint.name))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::config(format!(
                    "endpoint '{}' must use http or https",
                    endpoint.name
                )));
            }
        }

        if !self.auth.callback_path.starts_with('/') {
            return Err(Error::config("auth.callback_path must start with '/'"));
        }
        if self.call_timeout_secs == 0 || self.auth.login_timeout_secs == 0 {
            return Err(Error::config("timeouts must be greater than zero"));
        }
        Ok(())
    }

    /// Apply `TOOLMESH_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_env_overrides_with(|name| std::env::var(name).ok())
    }

    fn apply_env_overrides_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        fn parse<T: std::str::FromStr>(name: &str, value: String) -> Result<T> {
            value
                .trim()
                .parse()
                .map_err(|_| Error::config(format!("{name} has an invalid value: {value}")))
        }

        if let Some(v) = lookup("TOOLMESH_ISSUER") {
            self.auth.issuer = Some(v);
        }
        if let Some(v) = lookup("TOOLMESH_CLIENT_ID") {
            self.auth.client_id = Some(v);
        }
        if let Some(v) = lookup("TOOLMESH_CALLBACK_PORT") {
            self.auth.callback_port = parse("TOOLMESH_CALLBACK_PORT", v)?;
        }
        if let Some(v) = lookup("TOOLMESH_LOGIN_TIMEOUT_SECS") {
            self.auth.login_timeout_secs = parse("TOOLMESH_LOGIN_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("TOOLMESH_CREDENTIALS_PATH") {
            self.credentials_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("TOOLMESH_CALL_TIMEOUT_SECS") {
            self.call_timeout_secs = parse("TOOLMESH_CALL_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("TOOLMESH_ENDPOINTS") {
            self.endpoints = parse_endpoint_list(&v)?;
        }
        Ok(())
    }
}

/// Parse `name=url,name=url`.
fn parse_endpoint_list(raw: &str) -> Result<Vec<EndpointDescriptor>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (name, url) = entry.split_once('=').ok_or_else(|| {
                Error::config(format!("TOOLMESH_ENDPOINTS entry '{entry}' is not name=url"))
            })?;
            Ok(EndpointDescriptor {
                name: name.trim().to_string(),
                url: url.trim().to_string(),
            })
        })
        .collect()
}

/// Load, override and validate the config at `path`.
pub fn load_config(path: &Path) -> Result<AggregatorConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut config = AggregatorConfig::from_toml(&raw)
        .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

/// Load from `explicit`, else `./toolmesh.toml`, else next to the executable.
///
/// Without any file the configuration comes from defaults plus `TOOLMESH_*`
/// variables alone.
pub fn discover_and_load(explicit: Option<&Path>) -> Result<AggregatorConfig> {
    if let Some(path) = explicit {
        return load_config(path);
    }
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        return load_config(&path);
    }

    debug!("no config file found, using defaults and environment");
    let mut config = AggregatorConfig::default();
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILENAME);
    if local.exists() {
        return Some(local);
    }
    executable_dir()
        .map(|dir| dir.join(CONFIG_FILENAME))
        .filter(|p| p.exists())
}

fn executable_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

/// Replace `${ENV_VAR}` placeholders; unresolvable variables are left as-is.
fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                match lookup(name) {
                    Some(val) => result.push_str(&val),
                    None => result.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            },
            _ => {
                result.push_str("${");
                rest = after;
            },
        }
    }
    result.push_str(rest);
    result
}
