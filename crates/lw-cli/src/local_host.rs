//! In-process content-blocker host.
//!
//! Stands in for the platform: a reload invokes the extension request
//! handler against the shared store and cache, compiles what it returns and
//! installs it as the enforced ruleset. Extension errors, the activity-test
//! sentinel included, come back through the reload result exactly as the
//! platform would report them.

use std::sync::Arc;

use async_trait::async_trait;

use lw_core::extension::STORAGE_ERROR_CODE;
use lw_core::{ContentBlockerHost, ExtensionRequestHandler, HostError, ListCache, Settings};
use lw_merger::parse_rule_list;

/// File the enforced ruleset is installed to.
pub const INSTALLED_FILE_NAME: &str = "installed.json";

/// Platform error code for a ruleset that fails to compile.
pub const RULES_COMPILE_ERROR_CODE: i64 = 6;

pub struct LocalHost {
    handler: ExtensionRequestHandler,
    cache: Arc<dyn ListCache>,
}

impl LocalHost {
    pub fn new(settings: Settings, cache: Arc<dyn ListCache>) -> Self {
        Self {
            handler: ExtensionRequestHandler::new(settings, cache.clone()),
            cache,
        }
    }

    /// Rule count of the enforced ruleset, if one was ever installed.
    pub fn installed_rule_count(&self) -> Result<Option<usize>, String> {
        let Some(ruleset) = self.cache.read(INSTALLED_FILE_NAME).map_err(|e| e.to_string())? else {
            return Ok(None);
        };
        parse_rule_list(&ruleset)
            .map(|rules| Some(rules.len()))
            .map_err(|e| format!("Installed ruleset is unreadable: {}", e))
    }
}

#[async_trait]
impl ContentBlockerHost for LocalHost {
    async fn reload(&self, identifier: &str) -> Result<(), HostError> {
        let ruleset = self.handler.begin_request()?;

        let rules = parse_rule_list(&ruleset)
            .map_err(|e| HostError::platform(RULES_COMPILE_ERROR_CODE, e.to_string()))?;

        self.cache
            .write(INSTALLED_FILE_NAME, &ruleset)
            .map_err(|e| HostError::platform(STORAGE_ERROR_CODE, e.to_string()))?;

        log::info!("Loaded {} rules into {}", rules.len(), identifier);
        Ok(())
    }
}
