use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DocsflowError, Result};

/// Which front end serves the workflow. Read once at startup; not part of
/// the workflow's runtime contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Cli,
    #[serde(rename = "devui")]
    DevUi,
    HostedAgent,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::DevUi
    }
}

impl FromStr for Mode {
    type Err = DocsflowError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "cli" => Ok(Mode::Cli),
            "devui" => Ok(Mode::DevUi),
            "hosted_agent" => Ok(Mode::HostedAgent),
            other => Err(DocsflowError::Configuration(format!(
                "unrecognized MODE `{other}` (expected cli, devui, or hosted_agent)"
            ))),
        }
    }
}

/// How requests to the inference endpoint are authenticated.
#[derive(Debug, Clone, PartialEq)]
pub enum Credential {
    ApiKey(String),
    Bearer(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InferenceConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub deployment: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub bearer_token: Option<String>,
}

impl InferenceConfig {
    /// Static API key wins over an ambient bearer token when both are set.
    pub fn credential(&self) -> Result<Credential> {
        if let Some(key) = &self.api_key {
            return Ok(Credential::ApiKey(key.clone()));
        }
        if let Some(token) = &self.bearer_token {
            return Ok(Credential::Bearer(token.clone()));
        }
        Err(DocsflowError::Configuration(
            "AZURE_OPENAI_API_KEY or AZURE_OPENAI_BEARER_TOKEN must be set".into(),
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocsSearchConfig {
    #[serde(default = "default_mcp_url")]
    pub url: String,
    #[serde(default = "default_allowed_tools")]
    pub allowed_tools: Vec<String>,
}

impl Default for DocsSearchConfig {
    fn default() -> Self {
        Self {
            url: default_mcp_url(),
            allowed_tools: default_allowed_tools(),
        }
    }
}

fn default_mcp_url() -> String {
    "https://learn.microsoft.com/api/mcp".into()
}

fn default_allowed_tools() -> Vec<String> {
    vec!["microsoft_docs_search".into()]
}

/// Process-wide configuration snapshot: loaded once, validated once, passed
/// explicitly to every component that needs it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub docs_search: DocsSearchConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|err| DocsflowError::Configuration(format!("failed to parse configuration: {err}")))?;
        Ok(cfg)
    }

    /// Environment-only snapshot, for deployments without a config file.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(mode) = env::var("MODE") {
            self.mode = mode.parse()?;
        }
        if let Ok(endpoint) = env::var("AZURE_OPENAI_ENDPOINT") {
            self.inference.endpoint = Some(endpoint);
        }
        if let Ok(deployment) = env::var("AZURE_OPENAI_RESPONSES_DEPLOYMENT_NAME") {
            self.inference.deployment = Some(deployment);
        }
        if let Ok(key) = env::var("AZURE_OPENAI_API_KEY") {
            self.inference.api_key = Some(key);
        }
        if let Ok(token) = env::var("AZURE_OPENAI_BEARER_TOKEN") {
            self.inference.bearer_token = Some(token);
        }
        if let Ok(host) = env::var("DOCSFLOW_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("DOCSFLOW_PORT") {
            let parsed = port.parse::<u16>().map_err(|_| {
                DocsflowError::Configuration(format!("DOCSFLOW_PORT `{port}` is not a port number"))
            })?;
            self.server.port = parsed;
        }
        Ok(())
    }

    /// Hard startup failure on missing endpoint or credential; nothing is
    /// built from a partial snapshot.
    pub fn validate(&self) -> Result<()> {
        match &self.inference.endpoint {
            Some(endpoint) if !endpoint.is_empty() => {}
            _ => {
                return Err(DocsflowError::Configuration(
                    "AZURE_OPENAI_ENDPOINT must be set".into(),
                ))
            }
        }
        self.inference.credential()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_file_and_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "mode='cli'\n[inference]\nendpoint='https://example.openai.azure.com'\napi_key='secret'\ndeployment='gpt-4o'"
        )
        .unwrap();

        env::set_var("DOCSFLOW_PORT", "9100");
        let cfg = AppConfig::from_env_or_file(file.path()).unwrap();
        env::remove_var("DOCSFLOW_PORT");

        assert_eq!(cfg.mode, Mode::Cli);
        assert_eq!(cfg.server.port, 9100);
        assert_eq!(
            cfg.inference.credential().unwrap(),
            Credential::ApiKey("secret".into())
        );
    }

    #[test]
    fn missing_endpoint_is_fatal() {
        let cfg = AppConfig {
            inference: InferenceConfig {
                api_key: Some("secret".into()),
                ..InferenceConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(DocsflowError::Configuration(_))
        ));
    }

    #[test]
    fn missing_credential_is_fatal() {
        let cfg = AppConfig {
            inference: InferenceConfig {
                endpoint: Some("https://example.openai.azure.com".into()),
                ..InferenceConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(DocsflowError::Configuration(_))
        ));
    }

    #[test]
    fn bearer_token_is_an_accepted_credential() {
        let cfg = InferenceConfig {
            endpoint: Some("https://example.openai.azure.com".into()),
            bearer_token: Some("ambient".into()),
            ..InferenceConfig::default()
        };
        assert_eq!(
            cfg.credential().unwrap(),
            Credential::Bearer("ambient".into())
        );
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!("repl".parse::<Mode>().is_err());
        assert_eq!("hosted_agent".parse::<Mode>().unwrap(), Mode::HostedAgent);
    }

    #[test]
    fn docs_search_defaults_target_microsoft_learn() {
        let cfg = DocsSearchConfig::default();
        assert_eq!(cfg.url, "https://learn.microsoft.com/api/mcp");
        assert_eq!(cfg.allowed_tools, vec!["microsoft_docs_search"]);
    }
}
