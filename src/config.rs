use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Convo coordination server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "convo-server", version, about = "Convo chat coordination server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "CONVO_PORT", default_value = "4000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "CONVO_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./convo.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "CONVO_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys)
    #[arg(long, env = "CONVO_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// TTL in seconds for broker-held presence membership records.
    /// Safety net against orphaned entries from crashed processes;
    /// normal disconnect cleanup fires long before this.
    #[arg(long, env = "CONVO_PRESENCE_TTL_SECS", default_value = "86400")]
    pub presence_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4000,
            bind_address: "0.0.0.0".to_string(),
            config: "./convo.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            presence_ttl_secs: 86400,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (CONVO_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("CONVO_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Convo Coordination Server Configuration
# Place this file at ./convo.toml or specify with --config <path>
# All settings can be overridden via environment variables (CONVO_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 4000)
# port = 4000

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for SQLite database and JWT signing key
# data_dir = "./data"

# TTL in seconds for broker-held presence records (default: 86400 = 24 hours)
# This is a crash-safety net, not a disconnect grace period.
# presence_ttl_secs = 86400
"#
    .to_string()
}
