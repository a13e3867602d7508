//! Which users' data a request may see.
//!
//! Admins see everyone unless they narrow the view. Affiliates see
//! themselves and their direct sub-accounts, and an `affiliate_id` filter can
//! only narrow that set, never widen it.

use std::collections::HashSet;

use crate::db::{DbPool, User};

/// Resolved set of visible users
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserScope {
    /// No restriction
    All,
    Only(Vec<String>),
}

impl UserScope {
    /// Ids for a SQL filter; `None` means unrestricted
    pub fn user_ids(&self) -> Option<Vec<String>> {
        match self {
            UserScope::All => None,
            UserScope::Only(ids) => Some(ids.clone()),
        }
    }
}

/// Split a comma-separated filter into ids. `None` means "no filter".
fn requested_ids(filter: Option<&str>) -> Option<Vec<String>> {
    let filter = filter.map(str::trim).unwrap_or("");
    if filter.is_empty() || filter.eq_ignore_ascii_case("all") {
        return None;
    }

    let mut seen = HashSet::new();
    let ids: Vec<String> = filter
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(id.to_string()))
        .map(str::to_string)
        .collect();

    if ids.is_empty() {
        None
    } else {
        Some(ids)
    }
}

/// Scope for `user`, given its direct children and the raw filter
pub fn resolve_scope(user: &User, child_ids: &[String], filter: Option<&str>) -> UserScope {
    let requested = requested_ids(filter);

    if user.is_admin() {
        return match requested {
            None => UserScope::All,
            Some(ids) => UserScope::Only(ids),
        };
    }

    let mut allowed = Vec::with_capacity(child_ids.len() + 1);
    allowed.push(user.id.clone());
    allowed.extend(child_ids.iter().filter(|id| **id != user.id).cloned());

    match requested {
        None => UserScope::Only(allowed),
        Some(ids) => {
            let visible: Vec<String> = ids.into_iter().filter(|id| allowed.contains(id)).collect();
            if visible.is_empty() {
                UserScope::Only(vec![user.id.clone()])
            } else {
                UserScope::Only(visible)
            }
        }
    }
}

/// Load the user's children and resolve the scope
pub async fn scope_for(
    db: &DbPool,
    user: &User,
    filter: Option<&str>,
) -> Result<UserScope, sqlx::Error> {
    let children = if user.is_admin() {
        Vec::new()
    } else {
        User::child_ids(db, &user.id).await?
    };
    Ok(resolve_scope(user, &children, filter))
}
