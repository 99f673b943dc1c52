use serde::Deserialize;
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "campusd.json";

fn default_provider() -> String {
    // Sandbox performs no network I/O; a fresh workspace can never fire
    // real SMS traffic until a gateway is configured explicitly.
    "sandbox".to_string()
}

fn default_sms_cap() -> usize {
    100
}

fn default_send_timeout_secs() -> u64 {
    5
}

/// Per-workspace daemon configuration, read from `campusd.json` next to the
/// database. Every field has a default so a missing or partial file is fine.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotifyConfig {
    /// SMS gateway: "sandbox", "msg91" or "twilio".
    pub provider: String,
    /// Sender id / from-number passed through to the gateway.
    pub sender_id: String,
    pub msg91_auth_key: Option<String>,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    /// Default per-dispatch cap on SMS recipients; overridable per request.
    pub sms_cap: usize,
    /// Bound on each outbound gateway call.
    pub send_timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        NotifyConfig {
            provider: default_provider(),
            sender_id: "CAMPUS".to_string(),
            msg91_auth_key: None,
            twilio_account_sid: None,
            twilio_auth_token: None,
            sms_cap: default_sms_cap(),
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

impl NotifyConfig {
    /// Loads the workspace config, falling back to defaults when the file is
    /// absent. A present-but-unreadable file is an error so a typo in the
    /// config is not silently ignored.
    pub fn load(workspace: &Path) -> anyhow::Result<NotifyConfig> {
        let path = workspace.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Ok(NotifyConfig::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        let cfg: NotifyConfig = serde_json::from_str(&raw)?;
        Ok(cfg)
    }
}
