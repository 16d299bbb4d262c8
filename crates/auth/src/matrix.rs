//! Static role/action permission matrix.
//!
//! Every mutating engine operation consults this table before dispatching a
//! command. The table is the single source of truth; no permission checks
//! live anywhere else.

use cardflow_core::UserId;

use crate::{Action, Role};

const ALL: &[Role] = &[Role::Admin, Role::Manager, Role::Member];
const ELEVATED: &[Role] = &[Role::Admin, Role::Manager];
const ADMIN_ONLY: &[Role] = &[Role::Admin];

/// Allow-list: action name -> roles granted.
///
/// An action absent from this table is a configuration defect, denied and
/// logged at `warn`.
static MATRIX: &[(&str, &[Role])] = &[
    ("batches.create", ALL),
    ("batches.arrive_row", ALL),
    ("batches.resolve_row", ALL),
    ("batches.finish", ALL),
    ("batches.close", ELEVATED),
    ("cards.mark_available", ALL),
    ("cards.update", ALL),
    ("cards.ship_ops", ALL),
    ("cards.delete", ADMIN_ONLY),
    ("streams.create", ALL),
    ("streams.add_item", ALL),
    ("streams.remove_item", ALL),
    ("streams.lock", ELEVATED),
    ("streams.finalize", ELEVATED),
    ("payouts.approve", ELEVATED),
    ("payouts.mark_paid", ELEVATED),
    ("payouts.return", ELEVATED),
    ("consignors.manage", ELEVATED),
];

/// Actions where resource ownership grants access on top of the role grant.
///
/// Ownership only ever *adds* access; it never restricts an action below the
/// role-based grant. Currently stream locking is the only such action.
const OWNER_GRANTABLE: &[&str] = &["streams.lock"];

/// Pure role-based check: is `action` granted to `role`?
pub fn has_permission(role: Role, action: &Action) -> bool {
    match MATRIX.iter().find(|(name, _)| *name == action.as_str()) {
        Some((_, roles)) => roles.contains(&role),
        None => {
            tracing::warn!(
                action = action.as_str(),
                role = role.as_str(),
                "permission check against unknown action; denying"
            );
            false
        }
    }
}

/// Role-based check with the ownership exception.
///
/// Grants when the role grant holds, or when the action is owner-grantable
/// and the caller owns the resource. All other actions ignore ownership
/// entirely.
pub fn can_access_own_resource(
    role: Role,
    action: &Action,
    owner_id: UserId,
    user_id: UserId,
) -> bool {
    if has_permission(role, action) {
        return true;
    }
    OWNER_GRANTABLE.contains(&action.as_str()) && owner_id == user_id
}
