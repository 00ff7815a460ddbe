//! Extension-process side of the content blocker.
//!
//! The extension cannot call back into the host. On every invocation it
//! first looks at the activity-test flag in the shared settings store; if
//! the host raised it, the extension clears it and aborts with the sentinel
//! error, which the host observes on its reload completion. Otherwise it
//! serves the merged ruleset from the shared list cache.

use std::sync::Arc;

use crate::host::HostError;
use crate::store::{ListCache, Settings};
use crate::types::RULESET_FILE_NAME;

/// Platform error code for "no ruleset has been built yet".
pub const MISSING_RULESET_ERROR_CODE: i64 = 2;

/// Platform error code for an unreadable shared container.
pub const STORAGE_ERROR_CODE: i64 = 3;

/// Read the shared flag; if raised, lower it and report that the current
/// invocation is an activity test.
pub fn should_abort_for_activity_test(settings: &Settings) -> bool {
    match settings.activity_test_flag() {
        Ok(true) => {
            if let Err(e) = settings.set_activity_test_flag(false) {
                log::warn!("Failed to clear activity test flag: {}", e);
            }
            true
        }
        Ok(false) => false,
        Err(e) => {
            log::warn!("Failed to read activity test flag: {}", e);
            false
        }
    }
}

/// Handles one content-blocker load request inside the extension.
pub struct ExtensionRequestHandler {
    settings: Settings,
    cache: Arc<dyn ListCache>,
}

impl ExtensionRequestHandler {
    pub fn new(settings: Settings, cache: Arc<dyn ListCache>) -> Self {
        Self { settings, cache }
    }

    /// Produce the ruleset to load, or abort with the activity-test
    /// sentinel before touching any rules.
    pub fn begin_request(&self) -> Result<String, HostError> {
        if should_abort_for_activity_test(&self.settings) {
            log::debug!("Activity test detected, aborting request");
            return Err(HostError::activity_test());
        }

        match self.cache.read(RULESET_FILE_NAME) {
            Ok(Some(ruleset)) => Ok(ruleset),
            Ok(None) => Err(HostError::platform(
                MISSING_RULESET_ERROR_CODE,
                "No ruleset has been built yet",
            )),
            Err(e) => Err(HostError::platform(STORAGE_ERROR_CODE, e.to_string())),
        }
    }
}
