use axum::extract::Query;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::err::Error;
use crate::permissions::{Permission, Role};
use crate::session::{AuthContext, MaybeAuthenticated, LOGIN_PATH};
use crate::{proceeds, Payload};

pub const UNAUTHORIZED_PATH: &str = "/unauthorized";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GuardDecision {
    Allow,
    RedirectLogin { to: String, from: String },
    RedirectUnauthorized { to: String, from: String },
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allow)
    }

    pub fn into_result(self) -> Result<(), Error> {
        match self {
            GuardDecision::Allow => Ok(()),
            GuardDecision::RedirectLogin { to, from } => Err(Error::Unauthenticated {
                redirect_to: to,
                from,
            }),
            GuardDecision::RedirectUnauthorized { to, from } => Err(Error::Unauthorized {
                redirect_to: to,
                from,
            }),
        }
    }
}

/// Session first, then role, then permissions. An empty `roles` slice means
/// any role will do.
pub fn guard(
    auth: Option<&AuthContext>,
    roles: &[Role],
    permissions: &[Permission],
    from: &str,
) -> GuardDecision {
    guard_with_login(auth, roles, permissions, from, LOGIN_PATH)
}

fn guard_with_login(
    auth: Option<&AuthContext>,
    roles: &[Role],
    permissions: &[Permission],
    from: &str,
    login_path: &str,
) -> GuardDecision {
    let auth = match auth {
        Some(auth) => auth,
        None => {
            return GuardDecision::RedirectLogin {
                to: login_path.to_string(),
                from: from.to_string(),
            }
        }
    };
    let unauthorized = || GuardDecision::RedirectUnauthorized {
        to: UNAUTHORIZED_PATH.to_string(),
        from: from.to_string(),
    };
    if !roles.is_empty() && !auth.has_any_role(roles) {
        log::warn!(
            "{} denied {}: role {} not in {:?}",
            auth.user_id(),
            from,
            auth.role,
            roles
        );
        return unauthorized();
    }
    if !auth.permissions.allows_all(permissions) {
        log::warn!("{} denied {}: missing one of {:?}", auth.user_id(), from, permissions);
        return unauthorized();
    }
    GuardDecision::Allow
}

/// Guard for API handlers; a denial becomes the error response.
pub fn require(
    auth: &AuthContext,
    roles: &[Role],
    permissions: &[Permission],
    from: &str,
) -> Result<(), Error> {
    guard(Some(auth), roles, permissions, from).into_result()
}

#[derive(Debug, Clone)]
pub struct RouteRule {
    pub prefix: &'static str,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
    /// Where anonymous visitors are sent.
    pub login_path: &'static str,
}

impl RouteRule {
    /// Whole-segment prefix match, ignoring ASCII case like the client router.
    fn matches(&self, path: &str) -> bool {
        let n = self.prefix.len();
        path.get(..n)
            .map_or(false, |head| head.eq_ignore_ascii_case(self.prefix))
            && matches!(path.as_bytes().get(n), None | Some(b'/'))
    }

    pub fn check(&self, auth: Option<&AuthContext>, path: &str) -> GuardDecision {
        guard_with_login(auth, &self.roles, &self.permissions, path, self.login_path)
    }
}

lazy_static! {
    /// Protected areas of the web client.
    pub static ref PROTECTED_ROUTES: Vec<RouteRule> = vec![
        RouteRule {
            prefix: "/admin",
            roles: vec![Role::Admin],
            permissions: vec![Permission::ManageUsers, Permission::ManageContent],
            login_path: UNAUTHORIZED_PATH,
        },
        RouteRule {
            prefix: "/doctor",
            roles: vec![Role::Doctor],
            permissions: vec![Permission::ViewDashboard, Permission::ManageAppointments],
            login_path: LOGIN_PATH,
        },
        RouteRule {
            prefix: "/patient",
            roles: vec![Role::Patient],
            permissions: vec![Permission::ViewDashboard],
            login_path: LOGIN_PATH,
        },
        RouteRule {
            prefix: "/profile",
            roles: vec![],
            permissions: vec![],
            login_path: LOGIN_PATH,
        },
        RouteRule {
            prefix: "/book-appointment",
            roles: vec![],
            permissions: vec![Permission::ManageAppointments],
            login_path: LOGIN_PATH,
        },
    ];
}

/// Drops query and fragment, trailing slashes and rewrites legacy paths.
pub fn normalize_path(raw: &str) -> String {
    let path = raw.split(|c| c == '?' || c == '#').next().unwrap_or("");
    let path = path.trim_end_matches('/');
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    if path.eq_ignore_ascii_case("/book") {
        "/book-appointment".to_string()
    } else {
        path
    }
}

pub fn rule_for(path: &str) -> Option<&'static RouteRule> {
    PROTECTED_ROUTES.iter().find(|rule| rule.matches(path))
}

pub fn check_path(auth: Option<&AuthContext>, raw_path: &str) -> (String, GuardDecision) {
    let path = normalize_path(raw_path);
    let decision = match rule_for(&path) {
        Some(rule) => rule.check(auth, &path),
        None => GuardDecision::Allow,
    };
    (path, decision)
}

#[derive(Debug, Deserialize)]
pub struct GuardQuery {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct GuardAnswer {
    pub path: String,
    pub decision: GuardDecision,
}

pub async fn check_route(
    Query(query): Query<GuardQuery>,
    MaybeAuthenticated(auth): MaybeAuthenticated,
) -> Payload<GuardAnswer> {
    let (path, decision) = check_path(auth.as_ref(), &query.path);
    proceeds(GuardAnswer { path, decision })
}
