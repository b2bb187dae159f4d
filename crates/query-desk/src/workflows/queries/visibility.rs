use super::aggregate::Application;
use super::domain::{Principal, Role};

/// Whether `principal` may see `application`.
///
/// Evaluated fresh on every call against the principal's current branch assignments.
/// - Operations see every application.
/// - Sales and Credit see applications targeted at their team in one of their branches.
/// - Management see applications whose targeting overlaps their view preference; the
///   branch rule applies only when they carry branch assignments.
pub fn can_view(application: &Application, principal: &Principal) -> bool {
    match principal.role {
        Role::Operations => true,
        Role::Sales | Role::Credit => {
            let team_match = principal
                .role
                .team()
                .is_some_and(|team| application.team_targets.includes(team));
            team_match && principal.serves_branch(&application.branch_code)
        }
        Role::Management => {
            let branch_match = principal.assigned_branches.is_empty()
                || principal.serves_branch(&application.branch_code);
            branch_match && principal.management_view.overlaps(application.team_targets)
        }
    }
}

/// Keep only the applications `principal` may see, preserving order.
pub fn visible<'a, I>(
    applications: I,
    principal: &'a Principal,
) -> impl Iterator<Item = Application> + 'a
where
    I: IntoIterator<Item = Application>,
    I::IntoIter: 'a,
{
    applications
        .into_iter()
        .filter(move |application| can_view(application, principal))
}
