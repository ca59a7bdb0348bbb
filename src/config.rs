//! Process-wide configuration: CLI flags plus environment variables,
//! resolved once at startup into an immutable snapshot that is threaded
//! into constructors. Nothing reads the environment after this.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

/// AI-driven SIP telephony dialog engine.
#[derive(Parser, Debug)]
#[command(name = "lingsip", version, about)]
pub struct Cli {
    /// Run mode; `server` is the only supported mode.
    #[arg(long, default_value = "server")]
    pub mode: String,

    /// Seed the built-in demo script and phone mappings, then continue.
    #[arg(long)]
    pub init: bool,

    /// Create the relational schema (postgres driver only), then continue.
    #[arg(long)]
    pub init_sql: bool,

    /// SIP bind address as ip:port; overrides SIP_BIND_IP / SIP_PORT.
    #[arg(long)]
    pub addr: Option<String>,

    /// Store back-end: memory, file or postgres.
    #[arg(long, default_value = "memory")]
    pub db_driver: String,

    /// Connection string for the relational back-end.
    #[arg(long)]
    pub dsn: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mode: String,
    pub init: bool,
    pub init_sql: bool,
    pub db_driver: String,
    pub dsn: Option<String>,

    pub sip_bind_ip: String,
    pub sip_port: u16,
    pub rtp_port: u16,
    /// Externally reachable IP for SDP/Contact; empty means "derive from
    /// the request".
    pub advertised_ip: String,
    pub max_concurrent_sessions: usize,

    pub storage_root: PathBuf,
    /// Optional directory of script JSON documents loaded at startup.
    pub script_dir: Option<PathBuf>,

    pub tts_endpoint: String,
    pub asr_endpoint: String,
    pub llm_endpoint: String,
    pub llm_api_key: String,
    pub llm_model: Option<String>,
    pub llm_refer_target: Option<String>,

    pub logging: LoggingConfig,
}

impl Config {
    pub fn resolve(cli: Cli) -> Result<Self> {
        let (mut sip_bind_ip, mut sip_port) = (
            env_string("SIP_BIND_IP", "0.0.0.0"),
            env_u16("SIP_PORT", 5060),
        );
        if let Some(addr) = cli.addr.as_deref() {
            let (ip, port) = addr
                .rsplit_once(':')
                .ok_or_else(|| anyhow::anyhow!("--addr must be ip:port, got {addr:?}"))?;
            sip_bind_ip = ip.to_string();
            sip_port = port.parse()?;
        }

        Ok(Self {
            mode: cli.mode,
            init: cli.init,
            init_sql: cli.init_sql,
            db_driver: cli.db_driver,
            dsn: cli.dsn.or_else(|| env_non_empty("DSN")),
            sip_bind_ip,
            sip_port,
            rtp_port: env_u16("RTP_PORT", 10000),
            advertised_ip: env_string("ADVERTISED_IP", ""),
            max_concurrent_sessions: env_usize("MAX_CONCURRENT_SESSIONS", 100),
            storage_root: PathBuf::from(env_string("STORAGE_ROOT", "uploads")),
            script_dir: env_non_empty("SCRIPT_DIR").map(PathBuf::from),
            tts_endpoint: env_string("TTS_ENDPOINT", "http://127.0.0.1:8081/synthesize"),
            asr_endpoint: env_string("ASR_ENDPOINT", "http://127.0.0.1:9000/transcribe"),
            llm_endpoint: env_string(
                "LLM_ENDPOINT",
                "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions",
            ),
            llm_api_key: env_string("LLM_API_KEY", ""),
            llm_model: env_non_empty("LLM_MODEL"),
            llm_refer_target: env_non_empty("LLM_REFER_TARGET"),
            logging: LoggingConfig::from_env(),
        })
    }
}

#[derive(Clone, Debug)]
pub enum LogMode {
    Stdout,
    File,
}

#[derive(Clone, Debug)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub mode: LogMode,
    pub format: LogFormat,
    pub dir: Option<String>,
    pub file_name: String,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        let dir_env = env_non_empty("LOG_DIR");
        let format = match std::env::var("LOG_FORMAT").ok().as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        let mode = match std::env::var("LOG_MODE").ok().as_deref() {
            Some("file") => LogMode::File,
            Some("stdout") => LogMode::Stdout,
            _ => {
                if dir_env.is_some() {
                    LogMode::File
                } else {
                    LogMode::Stdout
                }
            }
        };
        let dir = match mode {
            LogMode::File => Some(dir_env.unwrap_or_else(|| "logs".to_string())),
            LogMode::Stdout => None,
        };
        Self {
            mode,
            format,
            dir,
            file_name: env_string("LOG_FILE_NAME", "lingsip.log"),
        }
    }
}

fn env_string(key: &str, default_value: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default_value.to_string())
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_u16(key: &str, default_value: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default_value)
}

fn env_usize(key: &str, default_value: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default_value)
}
