pub mod cache;
pub mod client;
mod contact_details;
pub(crate) mod config;
pub mod entity;
pub mod error;
pub mod import;
pub mod lookup;
pub mod models;
pub mod remote;

pub use crate::cache::LookupCache;
pub use crate::client::{Civi, DEFAULT_PRIMARY, Reconciled};
pub use crate::entity::{Entity, StoreHooks, UpdatePolicy};
pub use crate::error::{CiviError, CiviResult};
pub use crate::models::{ApiReply, Fields, Value};
pub use crate::remote::RemoteCaller;

use env_logger::{Env, Target};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Once;
use std::thread;

static LOGGER: Once = Once::new();

/// Initialise `env_logger` (default filter `info`) once per process.
///
/// With `log_file`, records are appended to that file as
/// `timestamp;level;target;thread;message` lines instead of going to stderr.
pub fn init_logger(log_file: Option<&Path>) -> CiviResult<()> {
    let file = match log_file {
        Some(path) => Some(OpenOptions::new().create(true).append(true).open(path)?),
        None => None,
    };

    LOGGER.call_once(move || {
        let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
        if let Some(file) = file {
            builder.target(Target::Pipe(Box::new(file))).format(|buf, record| {
                writeln!(
                    buf,
                    "{};{};{};{};{}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                    record.level(),
                    record.target(),
                    thread::current().name().unwrap_or("main"),
                    record.args()
                )
            });
        }
        // a logger installed by the embedding application wins
        let _ = builder.try_init();
    });
    Ok(())
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use crate::error::CiviResult;
    use crate::models::{ApiReply, Fields, Value};
    use crate::remote::RemoteCaller;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;

    /// Route test logs through the test harness.
    pub fn init_test_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// One call received by [`MockCaller`].
    #[derive(Debug, Clone, PartialEq)]
    pub struct RecordedCall {
        pub entity: String,
        pub action: String,
        pub params: Fields,
    }

    type Handler = Arc<dyn Fn(&Fields) -> CiviResult<ApiReply> + Send + Sync>;
    type Route = (String, String);

    struct Script {
        queued: HashMap<Route, VecDeque<CiviResult<ApiReply>>>,
        handlers: HashMap<Route, Handler>,
        calls: Vec<RecordedCall>,
        next_id: i64,
    }

    /// Scripted in-memory [`RemoteCaller`].
    ///
    /// Replies are looked up per `(entity, action)`: queued replies first,
    /// then a registered handler, then the defaults. By default `get` finds
    /// nothing and `create` echoes its parameters with a fresh id. Clones
    /// share the script, so a test can keep one handle while a `Civi` owns
    /// the other.
    #[derive(Clone)]
    pub struct MockCaller {
        script: Arc<Mutex<Script>>,
    }

    impl Default for MockCaller {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockCaller {
        pub fn new() -> Self {
            Self {
                script: Arc::new(Mutex::new(Script {
                    queued: HashMap::new(),
                    handlers: HashMap::new(),
                    calls: Vec::new(),
                    next_id: 1000,
                })),
            }
        }

        /// Queue one reply for the next matching call.
        pub fn reply(&self, entity: &str, action: &str, reply: ApiReply) -> &Self {
            self.queue(entity, action, Ok(reply))
        }

        /// Queue a reply carrying `records`.
        pub fn records(&self, entity: &str, action: &str, records: Vec<Fields>) -> &Self {
            self.reply(entity, action, ApiReply::with_values(records))
        }

        pub fn queue(&self, entity: &str, action: &str, result: CiviResult<ApiReply>) -> &Self {
            self.script
                .lock()
                .queued
                .entry((entity.to_string(), action.to_string()))
                .or_default()
                .push_back(result);
            self
        }

        /// Answer every unqueued matching call with `handler`.
        pub fn respond<F>(&self, entity: &str, action: &str, handler: F) -> &Self
        where
            F: Fn(&Fields) -> CiviResult<ApiReply> + Send + Sync + 'static,
        {
            self.script
                .lock()
                .handlers
                .insert((entity.to_string(), action.to_string()), Arc::new(handler));
            self
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.script.lock().calls.clone()
        }

        pub fn calls_to(&self, entity: &str, action: &str) -> Vec<RecordedCall> {
            self.script
                .lock()
                .calls
                .iter()
                .filter(|call| call.entity == entity && call.action == action)
                .cloned()
                .collect()
        }

        pub fn call_count(&self) -> usize {
            self.script.lock().calls.len()
        }
    }

    impl RemoteCaller for MockCaller {
        fn call(&self, entity: &str, action: &str, params: &Fields) -> CiviResult<ApiReply> {
            let route = (entity.to_string(), action.to_string());
            let handler = {
                let mut script = self.script.lock();
                script.calls.push(RecordedCall {
                    entity: entity.to_string(),
                    action: action.to_string(),
                    params: params.clone(),
                });
                if let Some(queued) = script.queued.get_mut(&route).and_then(VecDeque::pop_front) {
                    return queued;
                }
                match script.handlers.get(&route) {
                    Some(handler) => Arc::clone(handler),
                    None if action == "create" => {
                        let mut record = params.clone();
                        if !record.contains_key("id") {
                            script.next_id += 1;
                            record.insert("id".into(), Value::Int(script.next_id));
                        }
                        return Ok(ApiReply::with_values(vec![record]));
                    }
                    None => return Ok(ApiReply::empty()),
                }
            };
            handler(params)
        }
    }
}
