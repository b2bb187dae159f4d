use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier wrapper for loan applications under query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

/// Identifier of a query, unique within its owning application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub String);

macro_rules! display_id {
    ($($name:ident),*) => {
        $(impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        })*
    };
}

display_id!(ApplicationId, QueryId, RequestId, EventId);

/// Input validation failures, raised before any state is touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("query text must not be empty")]
    EmptyQueryText,
    #[error("a revert must state a reason")]
    MissingReason,
    #[error("message text must not be empty")]
    EmptyMessage,
    #[error("malformed request body: {0}")]
    MalformedBody(String),
    #[error("invalid value '{value}' for `{field}`")]
    InvalidValue { field: &'static str, value: String },
    #[error("application {app_no} is already routed to {current}; team targeting cannot change")]
    TeamRetargeting {
        app_no: String,
        current: TeamTargets,
    },
}

fn invalid(field: &'static str, value: &str) -> ValidationError {
    ValidationError::InvalidValue {
        field,
        value: value.to_string(),
    }
}

/// Downstream teams a query can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Sales,
    Credit,
}

impl Team {
    pub const fn label(self) -> &'static str {
        match self {
            Team::Sales => "sales",
            Team::Credit => "credit",
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Team {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sales" => Ok(Team::Sales),
            "credit" => Ok(Team::Credit),
            _ => Err(invalid("team", value)),
        }
    }
}

/// Set of teams an application is routed to. Also used as the Management view preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamTargets {
    Sales,
    Credit,
    Both,
}

impl TeamTargets {
    pub const fn includes(self, team: Team) -> bool {
        matches!(
            (self, team),
            (TeamTargets::Both, _)
                | (TeamTargets::Sales, Team::Sales)
                | (TeamTargets::Credit, Team::Credit)
        )
    }

    pub fn overlaps(self, other: TeamTargets) -> bool {
        self.teams().any(|team| other.includes(team))
    }

    pub fn teams(self) -> impl Iterator<Item = Team> {
        [Team::Sales, Team::Credit]
            .into_iter()
            .filter(move |team| self.includes(*team))
    }

    pub const fn label(self) -> &'static str {
        match self {
            TeamTargets::Sales => "sales",
            TeamTargets::Credit => "credit",
            TeamTargets::Both => "both",
        }
    }
}

impl fmt::Display for TeamTargets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TeamTargets {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sales" => Ok(TeamTargets::Sales),
            "credit" => Ok(TeamTargets::Credit),
            "both" | "sales,credit" | "credit,sales" => Ok(TeamTargets::Both),
            _ => Err(invalid("team_targets", value)),
        }
    }
}

/// Organisational role of the acting principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Operations,
    Sales,
    Credit,
    Management,
}

impl Role {
    pub const fn label(self) -> &'static str {
        match self {
            Role::Operations => "operations",
            Role::Sales => "sales",
            Role::Credit => "credit",
            Role::Management => "management",
        }
    }

    /// Downstream team the role belongs to, if any.
    pub const fn team(self) -> Option<Team> {
        match self {
            Role::Sales => Some(Team::Sales),
            Role::Credit => Some(Team::Credit),
            Role::Operations | Role::Management => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "operations" | "ops" => Ok(Role::Operations),
            "sales" => Ok(Role::Sales),
            "credit" => Ok(Role::Credit),
            "management" => Ok(Role::Management),
            _ => Err(invalid("role", value)),
        }
    }
}

/// Calling principal as resolved by the identity port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub assigned_branches: BTreeSet<String>,
    /// Team preference layered on Management visibility; ignored for other roles.
    #[serde(default = "default_view")]
    pub management_view: TeamTargets,
}

fn default_view() -> TeamTargets {
    TeamTargets::Both
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            assigned_branches: BTreeSet::new(),
            management_view: TeamTargets::Both,
        }
    }

    pub fn with_branches<I, S>(mut self, branches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assigned_branches = branches.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_view(mut self, view: TeamTargets) -> Self {
        self.management_view = view;
        self
    }

    /// Branch codes compare case-insensitively, matching the listing filter.
    pub fn serves_branch(&self, branch_code: &str) -> bool {
        let branch_code = branch_code.trim();
        self.assigned_branches
            .iter()
            .any(|branch| branch.trim().eq_ignore_ascii_case(branch_code))
    }
}

/// Status of a single query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Pending,
    Approved,
    Deferred,
    Otc,
    /// Part of the status vocabulary, but no documented transition produces it on a query.
    Resolved,
}

impl QueryStatus {
    pub const fn is_terminal(self) -> bool {
        !matches!(self, QueryStatus::Pending)
    }

    pub const fn label(self) -> &'static str {
        match self {
            QueryStatus::Pending => "pending",
            QueryStatus::Approved => "approved",
            QueryStatus::Deferred => "deferred",
            QueryStatus::Otc => "otc",
            QueryStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Aggregate status of an application, always derived from its queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Resolved,
}

impl ApplicationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for ApplicationStatus {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ApplicationStatus::Pending),
            "resolved" => Ok(ApplicationStatus::Resolved),
            _ => Err(invalid("status", value)),
        }
    }
}

/// Team decision applied to a query, either directly or through an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Approve,
    Deferral,
    Otc,
}

impl ActionKind {
    pub const fn terminal_status(self) -> QueryStatus {
        match self {
            ActionKind::Approve => QueryStatus::Approved,
            ActionKind::Deferral => QueryStatus::Deferred,
            ActionKind::Otc => QueryStatus::Otc,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            ActionKind::Approve => "approve",
            ActionKind::Deferral => "deferral",
            ActionKind::Otc => "otc",
        }
    }

    pub(crate) const fn past_tense(self) -> &'static str {
        match self {
            ActionKind::Approve => "approved",
            ActionKind::Deferral => "deferred",
            ActionKind::Otc => "marked OTC on",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ActionKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.strip_prefix("request-").unwrap_or(&normalized) {
            "approve" | "approved" => Ok(ActionKind::Approve),
            "deferral" | "defer" | "deferred" => Ok(ActionKind::Deferral),
            "otc" => Ok(ActionKind::Otc),
            _ => Err(invalid("action", value)),
        }
    }
}

/// Normalise an optional free-text field: blank input is treated as absent.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

pub(crate) fn require(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::MissingField(field))
    } else {
        Ok(())
    }
}
