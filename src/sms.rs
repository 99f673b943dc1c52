use crate::config::NotifyConfig;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

const MSG91_SEND_URL: &str = "https://api.msg91.com/api/v2/sendsms";
const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

#[derive(Debug)]
pub enum SmsError {
    /// Provider selected but not usable; detected before any send.
    Config(String),
    /// Recipient number did not normalize to a dialable local number.
    InvalidNumber(String),
    /// Gateway rejected the send or responded with an error.
    Gateway(String),
    /// Gateway call exceeded the configured per-call bound.
    Timeout,
}

impl fmt::Display for SmsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmsError::Config(msg) => write!(f, "sms provider misconfigured: {msg}"),
            SmsError::InvalidNumber(raw) => write!(f, "invalid phone number: `{raw}`"),
            SmsError::Gateway(msg) => write!(f, "sms gateway error: {msg}"),
            SmsError::Timeout => write!(f, "sms gateway call timed out"),
        }
    }
}

impl std::error::Error for SmsError {}

/// Uniform gateway contract. Providers are selected by workspace
/// configuration, never by the caller of a dispatch.
pub trait SmsProvider {
    fn name(&self) -> &'static str;
    /// `phone` is already normalized to 10 local digits.
    fn send(&self, phone: &str, body: &str) -> Result<String, SmsError>;
}

/// Canonicalizes a raw phone field to 10 local digits. Strips separators and
/// the `+91` / `91` / leading-`0` prefixes. Returns `None` when what remains
/// is not a plausible local number.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if raw.chars().any(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let local = if digits.len() == 12 && digits.starts_with("91") {
        &digits[2..]
    } else if digits.len() == 11 && digits.starts_with('0') {
        &digits[1..]
    } else {
        digits.as_str()
    };
    if local.len() != 10 {
        return None;
    }
    // A local mobile number never starts with 0.
    if local.starts_with('0') {
        return None;
    }
    Some(local.to_string())
}

fn map_reqwest_err(e: reqwest::Error) -> SmsError {
    if e.is_timeout() {
        SmsError::Timeout
    } else {
        SmsError::Gateway(e.to_string())
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::blocking::Client, SmsError> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| SmsError::Config(e.to_string()))
}

/// MSG91 transactional route.
pub struct Msg91Provider {
    auth_key: String,
    sender_id: String,
    client: reqwest::blocking::Client,
}

impl Msg91Provider {
    fn new(cfg: &NotifyConfig) -> Result<Msg91Provider, SmsError> {
        let auth_key = cfg
            .msg91_auth_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| SmsError::Config("msg91AuthKey is not set".to_string()))?
            .to_string();
        Ok(Msg91Provider {
            auth_key,
            sender_id: cfg.sender_id.clone(),
            client: http_client(cfg.send_timeout_secs)?,
        })
    }
}

impl SmsProvider for Msg91Provider {
    fn name(&self) -> &'static str {
        "msg91"
    }

    fn send(&self, phone: &str, body: &str) -> Result<String, SmsError> {
        let payload = json!({
            "sender": self.sender_id,
            "route": "4",
            "country": "91",
            "sms": [{ "message": body, "to": [phone] }]
        });
        let resp = self
            .client
            .post(MSG91_SEND_URL)
            .header("authkey", &self.auth_key)
            .json(&payload)
            .send()
            .map_err(map_reqwest_err)?;
        let status = resp.status();
        let parsed: serde_json::Value = resp.json().unwrap_or_else(|_| json!({}));
        if !status.is_success() {
            let msg = parsed
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("request rejected");
            return Err(SmsError::Gateway(format!("{status}: {msg}")));
        }
        let request_id = parsed
            .get("data")
            .and_then(|v| v.as_str())
            .or_else(|| parsed.get("message").and_then(|v| v.as_str()))
            .unwrap_or("accepted");
        Ok(request_id.to_string())
    }
}

/// Twilio messages API. Numbers are re-prefixed to E.164 on the way out.
pub struct TwilioProvider {
    account_sid: String,
    auth_token: String,
    from: String,
    client: reqwest::blocking::Client,
}

impl TwilioProvider {
    fn new(cfg: &NotifyConfig) -> Result<TwilioProvider, SmsError> {
        let account_sid = cfg
            .twilio_account_sid
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| SmsError::Config("twilioAccountSid is not set".to_string()))?
            .to_string();
        let auth_token = cfg
            .twilio_auth_token
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| SmsError::Config("twilioAuthToken is not set".to_string()))?
            .to_string();
        Ok(TwilioProvider {
            account_sid,
            auth_token,
            from: cfg.sender_id.clone(),
            client: http_client(cfg.send_timeout_secs)?,
        })
    }
}

impl SmsProvider for TwilioProvider {
    fn name(&self) -> &'static str {
        "twilio"
    }

    fn send(&self, phone: &str, body: &str) -> Result<String, SmsError> {
        let url = format!(
            "{}/Accounts/{}/Messages.json",
            TWILIO_API_BASE, self.account_sid
        );
        let params = [
            ("To", format!("+91{phone}")),
            ("From", self.from.clone()),
            ("Body", body.to_string()),
        ];
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .map_err(map_reqwest_err)?;
        let status = resp.status();
        let parsed: serde_json::Value = resp.json().unwrap_or_else(|_| json!({}));
        if !status.is_success() {
            let msg = parsed
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("request rejected");
            return Err(SmsError::Gateway(format!("{status}: {msg}")));
        }
        let sid = parsed
            .get("sid")
            .and_then(|v| v.as_str())
            .unwrap_or("accepted");
        Ok(sid.to_string())
    }
}

/// No-network provider used in development and by the test suite. Always
/// succeeds with a generated message id.
pub struct SandboxProvider;

impl SmsProvider for SandboxProvider {
    fn name(&self) -> &'static str {
        "sandbox"
    }

    fn send(&self, _phone: &str, _body: &str) -> Result<String, SmsError> {
        Ok(format!("sandbox-{}", Uuid::new_v4()))
    }
}

/// Resolves the configured provider, validating credentials eagerly so a
/// misconfiguration fails the dispatch once instead of once per recipient.
pub fn build_provider(cfg: &NotifyConfig) -> Result<Box<dyn SmsProvider>, SmsError> {
    match cfg.provider.as_str() {
        "sandbox" => Ok(Box::new(SandboxProvider)),
        "msg91" => Ok(Box::new(Msg91Provider::new(cfg)?)),
        "twilio" => Ok(Box::new(TwilioProvider::new(cfg)?)),
        other => Err(SmsError::Config(format!("unknown provider `{other}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_accepts_common_shapes() {
        assert_eq!(
            normalize_phone("+91 98765-43210").as_deref(),
            Some("9876543210")
        );
        assert_eq!(normalize_phone("09876543210").as_deref(), Some("9876543210"));
        assert_eq!(normalize_phone("9876543210").as_deref(), Some("9876543210"));
        assert_eq!(
            normalize_phone("919876543210").as_deref(),
            Some("9876543210")
        );
    }

    #[test]
    fn normalize_rejects_bad_input() {
        assert_eq!(normalize_phone(""), None);
        assert_eq!(normalize_phone("12345"), None);
        assert_eq!(normalize_phone("not-a-number"), None);
        assert_eq!(normalize_phone("98765x43210"), None);
        // 12 digits without a 91 prefix is not a local number.
        assert_eq!(normalize_phone("129876543210"), None);
        assert_eq!(normalize_phone("0098765432"), None);
    }

    #[test]
    fn sandbox_always_succeeds_with_an_id() {
        let p = SandboxProvider;
        let id = p.send("9876543210", "hello").expect("sandbox send");
        assert!(id.starts_with("sandbox-"));
    }

    #[test]
    fn build_provider_validates_credentials_eagerly() {
        let mut cfg = NotifyConfig::default();
        cfg.provider = "msg91".to_string();
        let err = build_provider(&cfg).err().expect("missing auth key");
        assert!(matches!(err, SmsError::Config(_)));

        cfg.provider = "twilio".to_string();
        cfg.twilio_account_sid = Some("AC123".to_string());
        let err = build_provider(&cfg).err().expect("missing auth token");
        assert!(matches!(err, SmsError::Config(_)));

        cfg.provider = "carrier-pigeon".to_string();
        let err = build_provider(&cfg).err().expect("unknown provider");
        assert!(matches!(err, SmsError::Config(_)));
    }

    #[test]
    fn build_provider_defaults_to_sandbox() {
        let provider = build_provider(&NotifyConfig::default()).expect("sandbox");
        assert_eq!(provider.name(), "sandbox");
    }
}
