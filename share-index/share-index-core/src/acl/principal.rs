use std::collections::HashSet;

use crate::config::AdaptorConfig;

/// Decides which principals may appear in a published ACL.
///
/// Built-in accounts (those starting with the configured prefix) survive only
/// when allow-listed. Everything else is published as-is.
#[derive(Clone, Debug)]
pub struct PrincipalFilter {
    supported: HashSet<String>,
    builtin_prefix: String,
}

impl PrincipalFilter {
    pub fn new<I, S>(supported: I, builtin_prefix: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            supported: supported.into_iter().map(Into::into).collect(),
            builtin_prefix: builtin_prefix.into(),
        }
    }

    pub fn from_config(config: &AdaptorConfig) -> Self {
        Self::new(
            config.supported_accounts.iter().cloned(),
            config.builtin_prefix.clone(),
        )
    }

    pub fn is_publishable(&self, principal: &str) -> bool {
        self.supported.contains(principal) || !principal.starts_with(&self.builtin_prefix)
    }
}
