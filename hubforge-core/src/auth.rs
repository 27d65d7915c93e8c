//! Caller identity, authorization policies and user-id resolution.
//!
//! How a connection gets its [`Identity`] is up to the transport layer (for
//! example [`HubServer::identify`](crate::server::HubServer::identify)
//! inspects the upgrade request). The hub core only consumes it:
//!
//! - an [`Authorizer`] decides whether an identity satisfies a named policy
//!   attached to a hub or a method;
//! - a [`UserIdProvider`] maps a connection to the user id that
//!   `send_to_user` targets.

use crate::connection::ConnectionInfo;
use async_trait::async_trait;

/// Who is on the other end of a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// Authenticated name, `None` for anonymous callers.
    pub name: Option<String>,
    /// Roles granted to the caller.
    pub roles: Vec<String>,
}

impl Identity {
    /// An anonymous identity.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A named identity without roles.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            roles: Vec::new(),
        }
    }

    /// Adds a role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Returns `true` when the identity has a name.
    pub fn is_authenticated(&self) -> bool {
        self.name.is_some()
    }

    /// Returns `true` when the identity holds `role`.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Decides whether an identity satisfies a policy.
#[async_trait]
pub trait Authorizer: Send + Sync + 'static {
    /// Returns `true` if `identity` satisfies `policy`.
    async fn authorize(&self, identity: &Identity, policy: &str) -> bool;
}

/// Policy name satisfied by any named identity.
pub const AUTHENTICATED: &str = "authenticated";

/// Default authorizer.
///
/// [`AUTHENTICATED`] requires a named identity; every other policy name is
/// treated as a role the identity must hold.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleAuthorizer;

#[async_trait]
impl Authorizer for RoleAuthorizer {
    async fn authorize(&self, identity: &Identity, policy: &str) -> bool {
        if policy == AUTHENTICATED {
            identity.is_authenticated()
        } else {
            identity.has_role(policy)
        }
    }
}

/// Resolves the user id of a newly negotiated connection.
pub trait UserIdProvider: Send + Sync + 'static {
    /// The user id, or `None` when the connection belongs to no user.
    fn user_id(&self, info: &ConnectionInfo) -> Option<String>;
}

/// Uses the identity name as the user id.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameUserIdProvider;

impl UserIdProvider for NameUserIdProvider {
    fn user_id(&self, info: &ConnectionInfo) -> Option<String> {
        info.identity.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_authenticated_policy() {
        let authorizer = RoleAuthorizer;
        assert!(!authorizer.authorize(&Identity::anonymous(), AUTHENTICATED).await);
        assert!(authorizer.authorize(&Identity::named("alice"), AUTHENTICATED).await);
    }

    #[tokio::test]
    async fn test_role_policy() {
        let authorizer = RoleAuthorizer;
        let admin = Identity::named("root").with_role("admin");
        assert!(authorizer.authorize(&admin, "admin").await);
        assert!(!authorizer.authorize(&Identity::named("bob"), "admin").await);
    }

    #[test]
    fn test_user_id_from_name() {
        let info = ConnectionInfo::new(None, Identity::named("alice"));
        assert_eq!(NameUserIdProvider.user_id(&info), Some("alice".to_string()));

        let anon = ConnectionInfo::new(None, Identity::anonymous());
        assert_eq!(NameUserIdProvider.user_id(&anon), None);
    }
}
