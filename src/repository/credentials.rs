use serde::{Deserialize, Serialize};

/// Who opens a session: a user name and the groups the user belongs to.
///
/// The session's principals are the user followed by its groups. System
/// credentials carry no principal and bypass every security check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    user: Option<String>,
    #[serde(default)]
    groups: Vec<String>,
}

impl Credentials {
    pub fn new(user: &str) -> Self {
        Self {
            user: Some(user.to_string()),
            groups: Vec::new(),
        }
    }

    pub fn system() -> Self {
        Self::default()
    }

    pub fn group(mut self, group: &str) -> Self {
        self.groups.push(group.to_string());
        self
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn is_system(&self) -> bool {
        self.user.is_none()
    }

    pub fn principals(&self) -> Vec<String> {
        match &self.user {
            Some(user) => std::iter::once(user.clone()).chain(self.groups.iter().cloned()).collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principals() {
        let credentials = Credentials::new("bob").group("members").group("editors");
        assert_eq!(credentials.principals(), vec!["bob", "members", "editors"]);
        assert!(!credentials.is_system());
        assert!(Credentials::system().principals().is_empty());
    }
}
