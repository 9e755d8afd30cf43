use async_trait::async_trait;
use procdeck_core::{AccessControlList, AccessProvider};
use std::collections::HashMap;
use tracing::debug;

/// ACL déclarées dans la section `users` de la config kernel
pub struct ConfigAccessProvider {
    users: HashMap<String, AccessControlList>,
}

impl ConfigAccessProvider {
    pub fn new(users: HashMap<String, AccessControlList>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl AccessProvider for ConfigAccessProvider {
    async fn get_acl(&self, session_user: &str) -> Option<AccessControlList> {
        let acl = self.users.get(session_user).cloned();
        if acl.is_none() {
            debug!(user = session_user, "no ACL for session user");
        }
        acl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_user_has_no_acl() {
        let provider = ConfigAccessProvider::new(HashMap::from([(
            "alice".to_string(),
            AccessControlList::owner(),
        )]));

        assert!(provider.get_acl("alice").await.unwrap().is_superuser());
        assert!(provider.get_acl("mallory").await.is_none());
        assert!(provider.get_acl("").await.is_none());
    }
}
