use serde::Serialize;
use std::collections::HashMap;

/// Ordered access levels. The derived `Ord` is the single subsumption rule:
/// a level grants every action at or below it, so `delete` implies `edit`
/// and `view`, and `all` implies everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessLevel {
    None,
    View,
    Edit,
    Delete,
    All,
}

impl AccessLevel {
    /// Strict parse, used for values arriving in requests.
    pub fn parse(s: &str) -> Option<AccessLevel> {
        match s {
            "none" => Some(AccessLevel::None),
            "view" => Some(AccessLevel::View),
            "edit" => Some(AccessLevel::Edit),
            "delete" => Some(AccessLevel::Delete),
            "all" => Some(AccessLevel::All),
            _ => None,
        }
    }

    /// Lenient parse, used for values read back from storage. Anything
    /// unrecognized behaves as `none` rather than failing the evaluation.
    pub fn parse_stored(s: &str) -> AccessLevel {
        AccessLevel::parse(s).unwrap_or(AccessLevel::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::None => "none",
            AccessLevel::View => "view",
            AccessLevel::Edit => "edit",
            AccessLevel::Delete => "delete",
            AccessLevel::All => "all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    SuperAdmin,
    CoAdmin,
    Faculty,
    Student,
    B2cStudent,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "super_admin" => Some(Role::SuperAdmin),
            "co_admin" => Some(Role::CoAdmin),
            "faculty" => Some(Role::Faculty),
            "student" => Some(Role::Student),
            "b2c_student" => Some(Role::B2cStudent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::CoAdmin => "co_admin",
            Role::Faculty => "faculty",
            Role::Student => "student",
            Role::B2cStudent => "b2c_student",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDecision {
    #[serde(serialize_with = "serialize_level")]
    pub level: AccessLevel,
    pub can_view: bool,
    pub can_edit: bool,
    pub can_delete: bool,
    pub has_full: bool,
}

fn serialize_level<S: serde::Serializer>(level: &AccessLevel, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(level.as_str())
}

impl AccessDecision {
    fn from_level(level: AccessLevel) -> AccessDecision {
        AccessDecision {
            level,
            can_view: level >= AccessLevel::View,
            can_edit: level >= AccessLevel::Edit,
            can_delete: level >= AccessLevel::Delete,
            has_full: level == AccessLevel::All,
        }
    }
}

/// Answers "what may this principal do on this module" from a pre-fetched
/// grant map. Pure and read-only: absent modules evaluate as `none`, and
/// `super_admin` bypasses the map entirely (deliberate universal override).
pub fn evaluate(role: Role, module: &str, map: &HashMap<String, AccessLevel>) -> AccessDecision {
    if role == Role::SuperAdmin {
        return AccessDecision::from_level(AccessLevel::All);
    }
    let level = map.get(module).copied().unwrap_or(AccessLevel::None);
    AccessDecision::from_level(level)
}

/// Baseline grants per role, expanded at provisioning time. Kept as one
/// constant table so the provisioner stays table-driven. `super_admin`
/// needs no rows (the evaluator never consults the map for it) and
/// `b2c_student` has no school modules.
pub fn default_grants(role: Role) -> &'static [(&'static str, AccessLevel)] {
    match role {
        Role::SuperAdmin => &[],
        Role::CoAdmin => &[
            ("dashboard", AccessLevel::View),
            ("students", AccessLevel::All),
            ("faculty", AccessLevel::All),
            ("attendance", AccessLevel::All),
            ("exams", AccessLevel::All),
            ("fees", AccessLevel::All),
            ("timetable", AccessLevel::All),
            ("notifications", AccessLevel::All),
            ("reports", AccessLevel::View),
            ("settings", AccessLevel::Edit),
        ],
        Role::Faculty => &[
            ("dashboard", AccessLevel::View),
            ("students", AccessLevel::View),
            ("attendance", AccessLevel::Edit),
            ("exams", AccessLevel::Edit),
            ("timetable", AccessLevel::View),
            ("notifications", AccessLevel::View),
        ],
        Role::Student => &[
            ("dashboard", AccessLevel::View),
            ("attendance", AccessLevel::View),
            ("exams", AccessLevel::View),
            ("fees", AccessLevel::View),
            ("timetable", AccessLevel::View),
            ("notifications", AccessLevel::View),
        ],
        Role::B2cStudent => &[],
    }
}
