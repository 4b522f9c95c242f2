use core::str::FromStr;

use serde::{Deserialize, Serialize};

use erpguard_core::DomainError;

/// One of the fourteen verbs a permission rule can grant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
    Create,
    Delete,
    Submit,
    Cancel,
    Amend,
    Print,
    Email,
    Import,
    Export,
    Share,
    Report,
    SetUserPermissions,
}

impl Action {
    pub const ALL: [Action; 14] = [
        Action::Read,
        Action::Write,
        Action::Create,
        Action::Delete,
        Action::Submit,
        Action::Cancel,
        Action::Amend,
        Action::Print,
        Action::Email,
        Action::Import,
        Action::Export,
        Action::Share,
        Action::Report,
        Action::SetUserPermissions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Create => "create",
            Action::Delete => "delete",
            Action::Submit => "submit",
            Action::Cancel => "cancel",
            Action::Amend => "amend",
            Action::Print => "print",
            Action::Email => "email",
            Action::Import => "import",
            Action::Export => "export",
            Action::Share => "share",
            Action::Report => "report",
            Action::SetUserPermissions => "set_user_permissions",
        }
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = DomainError;

    /// Accepts `set_user_permissions`, `setUserPermissions` and
    /// `SetUserPermissions` alike.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();

        Action::ALL
            .into_iter()
            .find(|a| a.as_str().replace('_', "") == folded)
            .ok_or_else(|| DomainError::validation(format!("unknown action '{s}'")))
    }
}

/// Numeric sensitivity tier, 0 (document level) through 9.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct PermissionLevel(u8);

impl PermissionLevel {
    pub const DOCUMENT: PermissionLevel = PermissionLevel(0);
    pub const MAX: PermissionLevel = PermissionLevel(9);

    pub fn new(level: i64) -> Result<Self, DomainError> {
        match u8::try_from(level) {
            Ok(v) if v <= Self::MAX.0 => Ok(Self(v)),
            _ => Err(DomainError::validation(format!(
                "permission level {level} out of range 0..=9"
            ))),
        }
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    pub fn is_document_level(&self) -> bool {
        self.0 == 0
    }
}

impl TryFrom<i64> for PermissionLevel {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PermissionLevel> for i64 {
    fn from(value: PermissionLevel) -> Self {
        i64::from(value.0)
    }
}

impl core::fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// The boolean grant flags carried by a rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub delete: bool,
    pub submit: bool,
    pub cancel: bool,
    pub amend: bool,
    pub print: bool,
    pub email: bool,
    pub import: bool,
    pub export: bool,
    pub share: bool,
    pub report: bool,
    pub set_user_permissions: bool,
}

impl ActionFlags {
    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::Read => self.read,
            Action::Write => self.write,
            Action::Create => self.create,
            Action::Delete => self.delete,
            Action::Submit => self.submit,
            Action::Cancel => self.cancel,
            Action::Amend => self.amend,
            Action::Print => self.print,
            Action::Email => self.email,
            Action::Import => self.import,
            Action::Export => self.export,
            Action::Share => self.share,
            Action::Report => self.report,
            Action::SetUserPermissions => self.set_user_permissions,
        }
    }

    pub fn set(&mut self, action: Action, value: bool) {
        let slot = match action {
            Action::Read => &mut self.read,
            Action::Write => &mut self.write,
            Action::Create => &mut self.create,
            Action::Delete => &mut self.delete,
            Action::Submit => &mut self.submit,
            Action::Cancel => &mut self.cancel,
            Action::Amend => &mut self.amend,
            Action::Print => &mut self.print,
            Action::Email => &mut self.email,
            Action::Import => &mut self.import,
            Action::Export => &mut self.export,
            Action::Share => &mut self.share,
            Action::Report => &mut self.report,
            Action::SetUserPermissions => &mut self.set_user_permissions,
        };
        *slot = value;
    }

    /// Builder-style helper used by seeds and tests.
    pub fn with(mut self, actions: &[Action]) -> Self {
        for a in actions {
            self.set(*a, true);
        }
        self
    }

    pub fn granted(&self) -> impl Iterator<Item = Action> + '_ {
        Action::ALL.into_iter().filter(|a| self.allows(*a))
    }

    /// True when anything other than read/write is granted.
    pub fn has_non_field_grants(&self) -> bool {
        self.granted()
            .any(|a| !matches!(a, Action::Read | Action::Write))
    }
}
