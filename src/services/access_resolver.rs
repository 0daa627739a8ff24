use futures_util::future::BoxFuture;
use moka::future::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::models::{AccessRole, User};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolverError {
    #[error("access store unavailable: {0}")]
    Unavailable(String),
}

/// Resolves session tokens to users and users to project roles.
///
/// Implemented against the persistent store; the relay only consumes it.
pub trait AccessResolver: Send + Sync {
    fn resolve_user<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Option<User>, ResolverError>>;

    /// `AccessRole::None` means the user has no role on the project
    fn resolve_role<'a>(&'a self, user: &'a User, project_id: &'a str) -> BoxFuture<'a, Result<AccessRole, ResolverError>>;

    /// Whether a backing store is configured at all
    fn is_available(&self) -> bool {
        true
    }
}

/// In-memory resolver for tests and local development
#[derive(Debug, Clone, Default)]
pub struct StaticAccessResolver {
    sessions: HashMap<String, User>,
    roles: HashMap<(String, String), AccessRole>,
}

impl StaticAccessResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, token: impl Into<String>, user: User) -> Self {
        self.sessions.insert(token.into(), user);
        self
    }

    pub fn with_role(mut self, user_id: impl Into<String>, project_id: impl Into<String>, role: AccessRole) -> Self {
        self.roles.insert((user_id.into(), project_id.into()), role);
        self
    }
}

impl AccessResolver for StaticAccessResolver {
    fn resolve_user<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Option<User>, ResolverError>> {
        Box::pin(async move { Ok(self.sessions.get(token).cloned()) })
    }

    fn resolve_role<'a>(&'a self, user: &'a User, project_id: &'a str) -> BoxFuture<'a, Result<AccessRole, ResolverError>> {
        Box::pin(async move {
            Ok(self
                .roles
                .get(&(user.id.clone(), project_id.to_string()))
                .copied()
                .unwrap_or(AccessRole::None))
        })
    }
}

/// Stand-in used when no access store is configured. Every lookup fails,
/// so scoped rooms stay closed.
#[derive(Debug, Clone, Default)]
pub struct UnavailableAccessResolver;

impl AccessResolver for UnavailableAccessResolver {
    fn resolve_user<'a>(&'a self, _token: &'a str) -> BoxFuture<'a, Result<Option<User>, ResolverError>> {
        Box::pin(async { Err(ResolverError::Unavailable("no access store configured".to_string())) })
    }

    fn resolve_role<'a>(&'a self, _user: &'a User, _project_id: &'a str) -> BoxFuture<'a, Result<AccessRole, ResolverError>> {
        Box::pin(async { Err(ResolverError::Unavailable("no access store configured".to_string())) })
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// Caches definite answers of another resolver. Errors are never cached.
pub struct CachedAccessResolver {
    inner: Arc<dyn AccessResolver>,
    users: Cache<String, Option<User>>,
    roles: Cache<(String, String), AccessRole>,
}

impl CachedAccessResolver {
    /// Answers are kept for at most `time_to_live` after they were fetched,
    /// however often they are read, so expired sessions and revoked roles
    /// stop resolving within that window.
    pub fn new(inner: Arc<dyn AccessResolver>, time_to_live: Duration) -> Self {
        let users = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(time_to_live)
            .build();
        let roles = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(time_to_live)
            .build();
        info!("Access cache initialized (time to live {:?})", time_to_live);
        Self { inner, users, roles }
    }
}

impl AccessResolver for CachedAccessResolver {
    fn resolve_user<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Option<User>, ResolverError>> {
        Box::pin(async move {
            if let Some(user) = self.users.get(token).await {
                return Ok(user);
            }
            debug!("Session cache miss, asking access store");
            let user = self.inner.resolve_user(token).await?;
            self.users.insert(token.to_string(), user.clone()).await;
            Ok(user)
        })
    }

    fn resolve_role<'a>(&'a self, user: &'a User, project_id: &'a str) -> BoxFuture<'a, Result<AccessRole, ResolverError>> {
        Box::pin(async move {
            let key = (user.id.clone(), project_id.to_string());
            if let Some(role) = self.roles.get(&key).await {
                return Ok(role);
            }
            debug!("Role cache miss for user {} on project {}", user.id, project_id);
            let role = self.inner.resolve_role(user, project_id).await?;
            self.roles.insert(key, role).await;
            Ok(role)
        })
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts lookups and can be switched into an outage
    #[derive(Default)]
    struct CountingResolver {
        lookups: AtomicUsize,
        down: std::sync::atomic::AtomicBool,
    }

    impl AccessResolver for CountingResolver {
        fn resolve_user<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Option<User>, ResolverError>> {
            Box::pin(async move {
                self.lookups.fetch_add(1, Ordering::SeqCst);
                if self.down.load(Ordering::SeqCst) {
                    return Err(ResolverError::Unavailable("down".to_string()));
                }
                Ok((token == "good").then(|| User::new("u1")))
            })
        }

        fn resolve_role<'a>(&'a self, _user: &'a User, _project_id: &'a str) -> BoxFuture<'a, Result<AccessRole, ResolverError>> {
            Box::pin(async move {
                self.lookups.fetch_add(1, Ordering::SeqCst);
                Ok(AccessRole::Viewer)
            })
        }
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticAccessResolver::new()
            .with_session("t1", User::new("alice"))
            .with_role("alice", "p1", AccessRole::Owner);

        let alice = resolver.resolve_user("t1").await.unwrap().unwrap();
        assert_eq!(alice.id, "alice");
        assert!(resolver.resolve_user("nope").await.unwrap().is_none());
        assert_eq!(resolver.resolve_role(&alice, "p1").await.unwrap(), AccessRole::Owner);
        assert_eq!(resolver.resolve_role(&alice, "p2").await.unwrap(), AccessRole::None);
    }

    #[tokio::test]
    async fn test_unavailable_resolver_errors() {
        let resolver = UnavailableAccessResolver;
        assert!(!resolver.is_available());
        assert!(resolver.resolve_user("t1").await.is_err());
        assert!(resolver.resolve_role(&User::new("u"), "p").await.is_err());
    }

    #[tokio::test]
    async fn test_cache_serves_repeated_lookups() {
        let inner = Arc::new(CountingResolver::default());
        let cached = CachedAccessResolver::new(inner.clone(), Duration::from_secs(60));

        let user = cached.resolve_user("good").await.unwrap().unwrap();
        cached.resolve_user("good").await.unwrap();
        assert!(cached.resolve_user("bad").await.unwrap().is_none());
        cached.resolve_user("bad").await.unwrap();
        assert_eq!(inner.lookups.load(Ordering::SeqCst), 2);

        cached.resolve_role(&user, "p1").await.unwrap();
        assert_eq!(cached.resolve_role(&user, "p1").await.unwrap(), AccessRole::Viewer);
        assert_eq!(inner.lookups.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cached_session_expires_while_in_use() {
        let inner = Arc::new(CountingResolver::default());
        let cached = CachedAccessResolver::new(inner.clone(), Duration::from_millis(200));
        assert!(cached.resolve_user("good").await.unwrap().is_some());

        // The store now refuses the session, keep reading it more often than the ttl
        inner.down.store(true, Ordering::SeqCst);
        let mut refused = false;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if cached.resolve_user("good").await.is_err() {
                refused = true;
                break;
            }
        }
        assert!(refused);
        assert!(inner.lookups.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_cache_does_not_remember_outages() {
        let inner = Arc::new(CountingResolver::default());
        inner.down.store(true, Ordering::SeqCst);
        let cached = CachedAccessResolver::new(inner.clone(), Duration::from_secs(60));

        assert!(cached.resolve_user("good").await.is_err());
        inner.down.store(false, Ordering::SeqCst);
        assert!(cached.resolve_user("good").await.unwrap().is_some());
    }
}
