//! Command-line configuration and registration metadata.

use std::ffi::OsString;

use clap::Parser;

use botshadow_hub_connection::LifecycleConfig;
use botshadow_protocol::{PayloadError, RegistrationPayload};

/// Shadows a bot on the hub and relays its status updates.
#[derive(Debug, Parser)]
#[command(name = "botshadow-agent", version)]
pub struct Cli {
    /// Hub endpoint (absolute http or https URI)
    #[arg(long, env = "BOTSHADOW_HUB_URI")]
    pub hub_uri: String,

    /// Display name of the bot
    #[arg(long, env = "BOTSHADOW_NAME")]
    pub name: String,

    /// Bot type
    #[arg(long = "type", env = "BOTSHADOW_TYPE")]
    pub bot_type: String,

    /// Base URI of the local status listener (absolute http or https URI)
    #[arg(long, env = "BOTSHADOW_LISTENER_URI")]
    pub listener_uri: String,

    /// Stable bot identifier
    #[arg(long, env = "BOTSHADOW_ID")]
    pub id: String,

    /// Also re-register when the transport resumes the link by itself
    #[arg(long, env = "BOTSHADOW_REREGISTER_ON_RESUME")]
    pub reregister_on_resume: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} `{value}` is not an absolute URI: {reason}")]
    InvalidUri {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("{field} `{value}` must use http or https, not `{scheme}`")]
    UnsupportedScheme {
        field: &'static str,
        value: String,
        scheme: String,
    },

    #[error(transparent)]
    Payload(#[from] PayloadError),
}

/// Why the agent did not start.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// `--help` or `--version` was requested.
    #[error("{0}")]
    Info(clap::Error),

    /// Missing or malformed command-line parameters.
    #[error("{0}")]
    Usage(clap::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl StartupError {
    /// Process exit status: 0 after help or version output, 1 for every
    /// configuration error.
    pub fn exit_code(&self) -> u8 {
        match self {
            StartupError::Info(_) => 0,
            StartupError::Usage(_) | StartupError::Config(_) => 1,
        }
    }

    /// Prints the error the way the operator expects to see it.
    pub fn report(&self) {
        match self {
            StartupError::Info(e) | StartupError::Usage(e) => {
                let _ = e.print();
            }
            StartupError::Config(e) => tracing::error!(error = %e, "invalid configuration"),
        }
    }
}

/// Parses and validates the command line.
pub fn load<I, T>(args: I) -> Result<Config, StartupError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::try_parse_from(args).map_err(|e| {
        if e.use_stderr() {
            StartupError::Usage(e)
        } else {
            StartupError::Info(e)
        }
    })?;
    Ok(Config::from_cli(cli)?)
}

/// Validated agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub hub_uri: String,
    pub listener_uri: String,
    pub bot_id: String,
    pub payload: RegistrationPayload,
    pub lifecycle: LifecycleConfig,
}

impl Config {
    /// Validates the command line and builds the enriched registration
    /// payload. URIs are normalized here and never re-checked.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let hub_uri = validate_uri("hub URI", &cli.hub_uri)?;
        let listener_uri = validate_uri("listener URI", &cli.listener_uri)?;

        let mut payload = RegistrationPayload::new(
            hub_uri.clone(),
            cli.name.trim(),
            cli.bot_type.trim(),
            listener_uri.clone(),
            cli.id.trim(),
        )?;
        payload.enrich(&machine_hostname(), &os_version())?;

        Ok(Self {
            hub_uri,
            listener_uri,
            bot_id: payload.bot_id().to_string(),
            payload,
            lifecycle: LifecycleConfig {
                reregister_on_resume: cli.reregister_on_resume,
                ..LifecycleConfig::default()
            },
        })
    }
}

/// Accepts absolute `http`/`https` URIs and trims trailing slashes.
pub fn validate_uri(field: &'static str, value: &str) -> Result<String, ConfigError> {
    let value = value.trim();
    let url = url::Url::parse(value).map_err(|e| ConfigError::InvalidUri {
        field,
        value: value.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(ConfigError::UnsupportedScheme {
                field,
                value: value.to_string(),
                scheme: scheme.to_string(),
            });
        }
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ConfigError::InvalidUri {
            field,
            value: value.to_string(),
            reason: "missing host".into(),
        });
    }

    Ok(value.trim_end_matches('/').to_string())
}

/// Hostname of this machine.
pub fn machine_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".into())
}

/// Operating system description, e.g. `linux (x86_64)`.
pub fn os_version() -> String {
    format!("{} ({})", std::env::consts::OS, std::env::consts::ARCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(hub_uri: &str, listener_uri: &str) -> Cli {
        Cli {
            hub_uri: hub_uri.into(),
            name: "Build Bot".into(),
            bot_type: "ci".into(),
            listener_uri: listener_uri.into(),
            id: "bot-42".into(),
            reregister_on_resume: false,
        }
    }

    #[test]
    fn accepts_http_and_https() {
        assert_eq!(
            validate_uri("hub URI", "http://localhost:9944/hub/v4/g4/bots").unwrap(),
            "http://localhost:9944/hub/v4/g4/bots"
        );
        assert_eq!(
            validate_uri("hub URI", "https://example.com").unwrap(),
            "https://example.com"
        );
    }

    #[test]
    fn trims_trailing_slashes() {
        assert_eq!(
            validate_uri("listener URI", "http://localhost:8080/agent//").unwrap(),
            "http://localhost:8080/agent"
        );
    }

    #[test]
    fn rejects_non_http_and_relative() {
        let err = validate_uri("hub URI", "ftp://x").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedScheme { ref scheme, .. } if scheme == "ftp"));
        assert!(err.to_string().contains("ftp://x"));

        let err = validate_uri("hub URI", "not-a-uri").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUri { .. }));
        assert!(err.to_string().contains("not-a-uri"));
    }

    #[test]
    fn config_enriches_payload() {
        let config = Config::from_cli(cli(
            "http://localhost:9944/hub/v4/g4/bots/",
            "http://localhost:8080",
        ))
        .unwrap();

        assert_eq!(config.hub_uri, "http://localhost:9944/hub/v4/g4/bots");
        assert_eq!(config.payload.hub_uri(), config.hub_uri);
        assert_eq!(config.bot_id, "bot-42");
        assert_eq!(config.payload.get("osVersion"), Some(os_version().as_str()));
        assert!(config.payload.get("hostname").is_some());
        assert!(!config.lifecycle.reregister_on_resume);
    }

    #[test]
    fn config_rejects_empty_fields() {
        let mut bad = cli("http://hub", "http://localhost:8080");
        bad.name = "   ".into();
        assert!(matches!(
            Config::from_cli(bad),
            Err(ConfigError::Payload(PayloadError::MissingField("name")))
        ));
    }

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "botshadow-agent",
            "--hub-uri",
            "http://hub",
            "--name",
            "n",
            "--type",
            "t",
            "--listener-uri",
            "http://localhost:8080",
            "--id",
            "b",
            "--reregister-on-resume",
        ])
        .unwrap();
        assert_eq!(cli.bot_type, "t");
        assert!(cli.reregister_on_resume);
    }

    fn args(extra: &[&str]) -> Vec<String> {
        let mut all = vec![
            "botshadow-agent",
            "--hub-uri",
            "http://localhost:9944/hub/v4/g4/bots",
            "--name",
            "Build Bot",
            "--type",
            "ci",
            "--listener-uri",
            "http://localhost:8080",
            "--id",
            "bot-42",
        ];
        all.extend_from_slice(extra);
        all.into_iter().map(String::from).collect()
    }

    #[test]
    fn load_accepts_complete_command_line() {
        let config = load(args(&[])).unwrap();
        assert_eq!(config.bot_id, "bot-42");
        assert_eq!(config.listener_uri, "http://localhost:8080");
    }

    #[test]
    fn missing_parameter_exits_with_status_one() {
        let err = load(["botshadow-agent", "--name", "n"]).unwrap_err();
        assert!(matches!(err, StartupError::Usage(_)));
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("--hub-uri"));
    }

    #[test]
    fn unknown_flag_exits_with_status_one() {
        let err = load(args(&["--verbose-ish"])).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn bad_uri_exits_with_status_one() {
        let mut argv = args(&[]);
        argv[2] = "ftp://x".into();
        let err = load(argv).unwrap_err();
        assert!(matches!(
            err,
            StartupError::Config(ConfigError::UnsupportedScheme { .. })
        ));
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("ftp://x"));

        let mut argv = args(&[]);
        argv[8] = "not-a-uri".into();
        let err = load(argv).unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("not-a-uri"));
    }

    #[test]
    fn help_and_version_exit_cleanly() {
        for flag in ["--help", "--version"] {
            let err = load(["botshadow-agent", flag]).unwrap_err();
            assert!(matches!(err, StartupError::Info(_)), "{flag}");
            assert_eq!(err.exit_code(), 0, "{flag}");
        }
    }
}
