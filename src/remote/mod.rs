//! Transports executing single CiviCRM API calls.
//!
//! Everything above this module depends only on [`RemoteCaller`]: one named
//! operation (`entity`, `action`, parameters) in, one [`ApiReply`] out.
//!
//! - `rest`: HTTP against `extern/rest.php` or `/civicrm/ajax/rest`
//! - `shell`: `drush civicrm-api` as a subprocess
//! - `retry`: decorator retrying designated transient HTTP statuses
//! - `stats`: per-operation call counters kept by the client

pub mod config;
pub mod rest;
pub mod retry;
pub mod shell;
pub mod stats;

use crate::error::CiviResult;
use crate::fields;
use crate::models::{ApiReply, Fields};
use std::sync::Arc;

pub use config::{BasicAuth, RestConfig, RetryPolicy, ShellConfig};
pub use rest::RestCaller;
pub use retry::Retrying;
pub use shell::ShellCaller;
pub use stats::CallStats;

/// A conforming implementation of one CiviCRM API v3 call.
///
/// Transport failures (connectivity, non-200 status, undecodable body) must be
/// returned as errors. API-level failures are reported through
/// [`ApiReply::is_error`]; a reply with `count == 0` is a valid outcome.
pub trait RemoteCaller: Send + Sync {
    fn call(&self, entity: &str, action: &str, params: &Fields) -> CiviResult<ApiReply>;

    /// Cheap reachability check.
    fn probe(&self) -> bool {
        match self.call("Contact", "get", &fields! { "option.limit" => 1 }) {
            Ok(reply) => !reply.is_error,
            Err(err) => {
                log::debug!("probe failed: {}", err);
                false
            }
        }
    }
}

impl<C: RemoteCaller + ?Sized> RemoteCaller for Box<C> {
    fn call(&self, entity: &str, action: &str, params: &Fields) -> CiviResult<ApiReply> {
        (**self).call(entity, action, params)
    }

    fn probe(&self) -> bool {
        (**self).probe()
    }
}

impl<C: RemoteCaller + ?Sized> RemoteCaller for Arc<C> {
    fn call(&self, entity: &str, action: &str, params: &Fields) -> CiviResult<ApiReply> {
        (**self).call(entity, action, params)
    }

    fn probe(&self) -> bool {
        (**self).probe()
    }
}
