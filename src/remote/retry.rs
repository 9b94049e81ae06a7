use super::RemoteCaller;
use super::config::RetryPolicy;
use crate::error::CiviResult;
use crate::models::{ApiReply, Fields};
use std::thread;

/// Retries transport failures whose HTTP status the policy designates.
///
/// API-level errors and undesignated failures pass through on the first
/// attempt.
pub struct Retrying<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: RemoteCaller> Retrying<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: RemoteCaller> RemoteCaller for Retrying<C> {
    fn call(&self, entity: &str, action: &str, params: &Fields) -> CiviResult<ApiReply> {
        let mut attempt = 0;
        loop {
            match self.inner.call(entity, action, params) {
                Err(err) if attempt < self.policy.max_retries && self.policy.should_retry(&err) => {
                    attempt += 1;
                    log::warn!(
                        "{}.{} failed ({}), retry {}/{} in {:?}",
                        entity,
                        action,
                        err,
                        attempt,
                        self.policy.max_retries,
                        self.policy.delay
                    );
                    thread::sleep(self.policy.delay);
                }
                result => return result,
            }
        }
    }

    fn probe(&self) -> bool {
        self.inner.probe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CiviError;
    use crate::fields;
    use parking_lot::Mutex;
    use reqwest::StatusCode;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct Flaky {
        replies: Mutex<VecDeque<CiviResult<ApiReply>>>,
        calls: Mutex<usize>,
    }

    impl Flaky {
        fn new(replies: Vec<CiviResult<ApiReply>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            }
        }
    }

    impl RemoteCaller for Flaky {
        fn call(&self, _: &str, _: &str, _: &Fields) -> CiviResult<ApiReply> {
            *self.calls.lock() += 1;
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(ApiReply::empty()))
        }
    }

    fn gateway() -> CiviResult<ApiReply> {
        Err(CiviError::status(StatusCode::BAD_GATEWAY, String::new()))
    }

    #[test]
    fn retries_designated_status_until_success() {
        let policy = RetryPolicy::new(3, Duration::ZERO).unwrap();
        let caller = Retrying::new(Flaky::new(vec![gateway(), gateway()]), policy);

        let reply = caller.call("Contact", "get", &fields! {}).unwrap();
        assert_eq!(reply.count, 0);
        assert_eq!(*caller.into_inner().calls.lock(), 3);
    }

    #[test]
    fn gives_up_after_max_retries() {
        let policy = RetryPolicy::new(1, Duration::ZERO).unwrap();
        let caller = Retrying::new(Flaky::new(vec![gateway(), gateway(), gateway()]), policy);

        let err = caller.call("Contact", "get", &fields! {}).unwrap_err();
        assert_eq!(err.status_code(), Some(502));
        assert_eq!(*caller.into_inner().calls.lock(), 2);
    }

    #[test]
    fn client_errors_are_not_retried() {
        let policy = RetryPolicy::new(5, Duration::ZERO).unwrap();
        let not_found = Err(CiviError::status(StatusCode::NOT_FOUND, String::new()));
        let caller = Retrying::new(Flaky::new(vec![not_found]), policy);

        assert!(caller.call("Contact", "get", &fields! {}).is_err());
        assert_eq!(*caller.into_inner().calls.lock(), 1);
    }
}
