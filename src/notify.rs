use crate::sms::{normalize_phone, SmsError, SmsProvider};
use log::{info, warn};
use serde::Serialize;
use serde_json::json;

/// Notification event types. Parsing never fails: anything unrecognized is
/// treated as a general announcement, which carries the neutral template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    AbsenceAlert,
    WeeklyReport,
    Emergency,
    General,
}

impl EventKind {
    pub fn parse(s: &str) -> EventKind {
        match s {
            "absence_alert" => EventKind::AbsenceAlert,
            "weekly_report" => EventKind::WeeklyReport,
            "emergency" => EventKind::Emergency,
            _ => EventKind::General,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AbsenceAlert => "absence_alert",
            EventKind::WeeklyReport => "weekly_report",
            EventKind::Emergency => "emergency",
            EventKind::General => "general",
        }
    }

    pub fn priority(&self) -> &'static str {
        match self {
            EventKind::Emergency => "urgent",
            _ => "normal",
        }
    }

    pub fn action_url(&self) -> &'static str {
        match self {
            EventKind::AbsenceAlert => "/attendance",
            EventKind::WeeklyReport => "/reports/weekly",
            EventKind::Emergency => "/announcements",
            EventKind::General => "/notifications",
        }
    }
}

/// A resolved audience member. `phone` and `user_id` independently decide
/// SMS and in-app eligibility; a member may qualify for both or neither.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub student_id: String,
    pub student_name: String,
    pub phone: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub recipient: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub event_type: &'static str,
    pub date: String,
    pub total_audience: usize,
    pub sms_attempted: usize,
    pub sms_sent: usize,
    pub sms_failed: usize,
    /// Recipients cut by the per-dispatch cap; they were never attempted.
    pub sms_dropped: usize,
    pub app_notifications_sent: usize,
    pub app_failed: usize,
}

impl DispatchSummary {
    fn empty(kind: EventKind, date: &str) -> DispatchSummary {
        DispatchSummary {
            event_type: kind.as_str(),
            date: date.to_string(),
            total_audience: 0,
            sms_attempted: 0,
            sms_sent: 0,
            sms_failed: 0,
            sms_dropped: 0,
            app_notifications_sent: 0,
            app_failed: 0,
        }
    }
}

/// An in-app notification row ready for persistence.
#[derive(Debug, Clone)]
pub struct AppNotification {
    pub user_id: String,
    pub kind: &'static str,
    pub title: String,
    pub message: String,
    pub priority: &'static str,
    pub action_url: &'static str,
    pub data: serde_json::Value,
}

/// Persistence seam for the in-app channel; the daemon implements this over
/// the notifications table, tests over a recording stub.
pub trait AppChannel {
    fn insert_batch(&self, rows: &[AppNotification]) -> Result<usize, String>;
}

/// Splits the audience into the SMS-eligible and in-app-eligible lists.
/// The lists overlap when a member has both identifying fields.
pub fn partition(audience: &[Recipient]) -> (Vec<&Recipient>, Vec<&Recipient>) {
    let sms: Vec<&Recipient> = audience
        .iter()
        .filter(|r| r.phone.as_deref().is_some_and(|p| !p.trim().is_empty()))
        .collect();
    let app: Vec<&Recipient> = audience
        .iter()
        .filter(|r| {
            r.user_id
                .as_deref()
                .is_some_and(|u| !u.trim().is_empty())
        })
        .collect();
    (sms, app)
}

pub fn default_title(kind: EventKind, school_name: &str) -> String {
    match kind {
        EventKind::AbsenceAlert => "Absence alert".to_string(),
        EventKind::WeeklyReport => "Weekly attendance report".to_string(),
        EventKind::Emergency => format!("Emergency: {school_name}"),
        EventKind::General => format!("Announcement from {school_name}"),
    }
}

/// Per-recipient message body. An explicit override is used verbatim;
/// otherwise a small per-type template is filled in.
pub fn render_message(
    kind: EventKind,
    school_name: &str,
    date: &str,
    student_name: &str,
    override_message: Option<&str>,
) -> String {
    if let Some(msg) = override_message {
        return msg.to_string();
    }
    match kind {
        EventKind::AbsenceAlert => format!(
            "{student_name} was marked absent at {school_name} on {date}. \
             Please contact the school office if this is unexpected."
        ),
        EventKind::WeeklyReport => format!(
            "Weekly attendance summary for {student_name} at {school_name}, week ending {date}, is now available."
        ),
        EventKind::Emergency => format!(
            "Emergency notice from {school_name} ({date}). Please check the school portal immediately."
        ),
        EventKind::General => format!("Notice from {school_name} ({date}) regarding {student_name}."),
    }
}

pub struct DispatchArgs<'a> {
    pub kind: EventKind,
    pub school_id: &'a str,
    pub school_name: &'a str,
    pub date: &'a str,
    pub title_override: Option<&'a str>,
    pub message_override: Option<&'a str>,
    pub sms_cap: usize,
}

/// Runs one dispatch: partition the audience, fan out to both channels and
/// aggregate. Per-recipient SMS failures and a wholesale in-app failure are
/// both folded into the summary; this function never errors, and an empty
/// audience short-circuits before either channel is touched.
pub fn dispatch(
    audience: &[Recipient],
    provider: &dyn SmsProvider,
    app: &dyn AppChannel,
    args: &DispatchArgs<'_>,
) -> DispatchSummary {
    if audience.is_empty() {
        return DispatchSummary::empty(args.kind, args.date);
    }

    let (sms_list, app_list) = partition(audience);

    let (to_send, dropped) = if sms_list.len() > args.sms_cap {
        (&sms_list[..args.sms_cap], sms_list.len() - args.sms_cap)
    } else {
        (&sms_list[..], 0)
    };
    if dropped > 0 {
        warn!(
            "sms cap {} dropped {} of {} eligible recipients",
            args.sms_cap,
            dropped,
            sms_list.len()
        );
    }

    let sms_results = send_sms_batch(provider, to_send, args);

    let title = args
        .title_override
        .map(|t| t.to_string())
        .unwrap_or_else(|| default_title(args.kind, args.school_name));
    let rows: Vec<AppNotification> = app_list
        .iter()
        .map(|r| AppNotification {
            user_id: r.user_id.clone().unwrap_or_default(),
            kind: args.kind.as_str(),
            title: title.clone(),
            message: render_message(
                args.kind,
                args.school_name,
                args.date,
                &r.student_name,
                args.message_override,
            ),
            priority: args.kind.priority(),
            action_url: args.kind.action_url(),
            data: json!({
                "studentId": r.student_id,
                "schoolId": args.school_id,
                "date": args.date,
            }),
        })
        .collect();

    // The in-app batch goes out regardless of how the SMS side fared.
    let (app_sent, app_failed) = match app.insert_batch(&rows) {
        Ok(n) => (n, 0),
        Err(e) => {
            warn!("in-app channel failed for {} rows: {}", rows.len(), e);
            (0, rows.len())
        }
    };

    let sms_sent = sms_results.iter().filter(|r| r.success).count();
    let summary = DispatchSummary {
        event_type: args.kind.as_str(),
        date: args.date.to_string(),
        total_audience: audience.len(),
        sms_attempted: sms_results.len(),
        sms_sent,
        sms_failed: sms_results.len() - sms_sent,
        sms_dropped: dropped,
        app_notifications_sent: app_sent,
        app_failed,
    };
    info!(
        "dispatched {} for school {}: audience={} sms {}/{} app {}",
        summary.event_type,
        args.school_id,
        summary.total_audience,
        summary.sms_sent,
        summary.sms_attempted,
        summary.app_notifications_sent
    );
    summary
}

/// Sends one SMS per recipient, isolating failures: a bad number or a
/// gateway error becomes a failed `DeliveryResult`, never an early return.
fn send_sms_batch(
    provider: &dyn SmsProvider,
    recipients: &[&Recipient],
    args: &DispatchArgs<'_>,
) -> Vec<DeliveryResult> {
    let mut results = Vec::with_capacity(recipients.len());
    for r in recipients {
        let raw = r.phone.as_deref().unwrap_or_default();
        let body = render_message(
            args.kind,
            args.school_name,
            args.date,
            &r.student_name,
            args.message_override,
        );
        let outcome = match normalize_phone(raw) {
            Some(local) => provider.send(&local, &body).map_err(|e| e.to_string()),
            None => Err(SmsError::InvalidNumber(raw.to_string()).to_string()),
        };
        match outcome {
            Ok(message_id) => results.push(DeliveryResult {
                recipient: r.student_id.clone(),
                success: true,
                message_id: Some(message_id),
                error: None,
            }),
            Err(error) => {
                warn!(
                    "sms to student {} via {} failed: {}",
                    r.student_id,
                    provider.name(),
                    error
                );
                results.push(DeliveryResult {
                    recipient: r.student_id.clone(),
                    success: false,
                    message_id: None,
                    error: Some(error),
                });
            }
        }
    }
    results
}
