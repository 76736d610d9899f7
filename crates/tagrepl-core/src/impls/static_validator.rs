//! StaticValidator - 固定ルールの validity oracle
//!
//! 本物の oracle はネットワーク越しの問い合わせですが、デモやテストでは
//! 「全部 OK」「全部 NG」「特定の宛先・タグだけ NG」で十分です。

use std::collections::HashSet;

use async_trait::async_trait;

use crate::domain::ValidatorError;
use crate::ports::RemoteValidator;

/// Validator answering from fixed rules.
#[derive(Debug, Clone, Default)]
pub struct StaticValidator {
    reject_all: bool,
    rejected_destinations: HashSet<String>,
    rejected_tags: HashSet<String>,
}

impl StaticValidator {
    pub fn accept_all() -> Self {
        Self::default()
    }

    pub fn reject_all() -> Self {
        Self {
            reject_all: true,
            ..Self::default()
        }
    }

    /// Reject tasks targeting any of `destinations` (e.g. decommissioned clusters).
    pub fn rejecting_destinations<I, S>(mut self, destinations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rejected_destinations
            .extend(destinations.into_iter().map(Into::into));
        self
    }

    /// Reject tasks for any of `tags` (e.g. deleted tags).
    pub fn rejecting_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rejected_tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl RemoteValidator for StaticValidator {
    async fn valid(&self, tag: &str, destination: &str) -> Result<bool, ValidatorError> {
        Ok(!self.reject_all
            && !self.rejected_destinations.contains(destination)
            && !self.rejected_tags.contains(tag))
    }
}
