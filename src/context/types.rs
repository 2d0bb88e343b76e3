use std::fmt;

/// Logical category of a cluster in a topology
///
/// Public clusters accept incoming links; private clusters dial out to them.
/// The role says nothing about security posture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Public,
    Private,
}

impl Role {
    /// Both roles, in topology build order
    pub const ALL: [Role; 2] = [Role::Public, Role::Private];

    /// Prefix used when naming the role's namespaces
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Role::Public => "public",
            Role::Private => "private",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Namespace for the slot `(role, index)`: `<role-prefix>-<namespace_id>-<index>`
#[must_use]
pub fn namespace_for(role: Role, namespace_id: &str, index: usize) -> String {
    format!("{}-{}-{}", role.prefix(), namespace_id, index)
}

/// Lifecycle state of a Job as observed through its status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "Pending",
            JobState::Running => "Running",
            JobState::Succeeded => "Succeeded",
            JobState::Failed => "Failed",
        };
        f.write_str(s)
    }
}
