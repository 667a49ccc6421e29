//! Role/permission decisions for content and account management.
//!
//! The policy is a flat table keyed by [`Role`]. Callers hand in the role
//! parsed from the session or the store; a role string outside the known set
//! parses to `None` and is denied everything.

use crate::models::{ContentStatus, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    EditContent,
    DeleteContent,
    ChangeStatus,
    ManageUsers,
}

const ADMIN_ACTIONS: &[Action] = &[Action::EditContent, Action::DeleteContent, Action::ChangeStatus];

const SUPER_ADMIN_ACTIONS: &[Action] = &[
    Action::EditContent,
    Action::DeleteContent,
    Action::ChangeStatus,
    Action::ManageUsers,
];

/// When true, `admin` may only edit/delete/publish content it authored.
/// Every admin can currently act on any content.
pub const ADMIN_OWN_CONTENT_ONLY: bool = false;

pub fn permitted_actions(role: Role) -> &'static [Action] {
    match role {
        Role::Admin => ADMIN_ACTIONS,
        Role::SuperAdmin => SUPER_ADMIN_ACTIONS,
    }
}

pub fn is_permitted(role: Option<Role>, action: Action) -> bool {
    role.map_or(false, |r| permitted_actions(r).contains(&action))
}

fn content_action_allowed(role: Option<Role>, action: Action, actor_id: i64, author_id: Option<i64>) -> bool {
    if !is_permitted(role, action) {
        return false;
    }
    match role {
        Some(Role::Admin) if ADMIN_OWN_CONTENT_ONLY => author_id == Some(actor_id),
        _ => true,
    }
}

pub fn can_edit_content(role: Option<Role>, actor_id: i64, author_id: Option<i64>) -> bool {
    content_action_allowed(role, Action::EditContent, actor_id, author_id)
}

pub fn can_delete_content(role: Option<Role>, actor_id: i64, author_id: Option<i64>) -> bool {
    content_action_allowed(role, Action::DeleteContent, actor_id, author_id)
}

/// `requested` is `None` when the caller asked for a status name outside
/// `draft`/`published`. Both directions between the two are allowed.
pub fn can_change_status(
    role: Option<Role>,
    _current: ContentStatus,
    requested: Option<ContentStatus>,
    actor_id: i64,
    author_id: Option<i64>,
) -> bool {
    match requested {
        Some(target) if ContentStatus::ALL.contains(&target) => {
            content_action_allowed(role, Action::ChangeStatus, actor_id, author_id)
        }
        _ => false,
    }
}

/// Only super admins manage accounts, including other super admins. The
/// "last super admin" guard lives in `admin_helpers`, not here.
pub fn can_manage_user(manager_role: Option<Role>, _target_role: Option<Role>) -> bool {
    is_permitted(manager_role, Action::ManageUsers)
}

pub fn role_display_name(role: Option<Role>) -> &'static str {
    match role {
        Some(Role::Admin) => "Admin",
        Some(Role::SuperAdmin) => "Super Admin",
        None => "Unknown",
    }
}
