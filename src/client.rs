//! The `Civi` session: one remote caller plus the state shared by everything
//! created through it (lookup caches, store hooks and call statistics).

use crate::cache::LookupCache;
use crate::entity::{Entity, StoreHooks, UpdatePolicy};
use crate::error::{CiviError, CiviResult};
use crate::fields;
use crate::models::{ApiReply, Fields, Value};
use crate::remote::{
    CallStats, RemoteCaller, RestCaller, RestConfig, RetryPolicy, Retrying, ShellCaller,
    ShellConfig,
};
use std::time::Instant;

/// Identifying attributes used when the caller names none.
pub const DEFAULT_PRIMARY: [&str; 2] = ["id", "external_identifier"];

/// What the reconciler did with a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    Created,
    /// Matched an existing record; carries the submitted changed-set, empty
    /// when nothing differed.
    Updated(Fields),
}

/// Session façade over a [`RemoteCaller`].
pub struct Civi {
    caller: Box<dyn RemoteCaller>,
    pub(crate) ids: LookupCache<i64>,
    pub(crate) values: LookupCache<Value>,
    hooks: StoreHooks,
    stats: CallStats,
}

impl Civi {
    pub fn new(caller: impl RemoteCaller + 'static) -> Self {
        Self {
            caller: Box::new(caller),
            ids: LookupCache::new(),
            values: LookupCache::new(),
            hooks: StoreHooks::default(),
            stats: CallStats::new(),
        }
    }

    /// Wrap `caller` in the retry layer when a policy is given.
    pub fn with_retry(caller: impl RemoteCaller + 'static, retry: Option<RetryPolicy>) -> Self {
        match retry {
            Some(policy) => Self::new(Retrying::new(caller, policy)),
            None => Self::new(caller),
        }
    }

    pub fn rest(config: RestConfig, retry: Option<RetryPolicy>) -> CiviResult<Self> {
        Ok(Self::with_retry(RestCaller::connect(config)?, retry))
    }

    pub fn drush(config: ShellConfig) -> Self {
        Self::new(ShellCaller::new(config))
    }

    /// REST session configured from `CIVI_*` environment variables.
    pub fn from_env() -> CiviResult<Self> {
        Self::rest(RestConfig::from_env()?, RetryPolicy::from_env())
    }

    pub fn with_hooks(mut self, hooks: StoreHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn hooks(&self) -> &StoreHooks {
        &self.hooks
    }

    pub fn stats(&self) -> &CallStats {
        &self.stats
    }

    pub fn id_cache(&self) -> &LookupCache<i64> {
        &self.ids
    }

    pub fn value_cache(&self) -> &LookupCache<Value> {
        &self.values
    }

    /// Perform one API call. API-reported failures become [`CiviError::Api`].
    pub fn call(&self, entity: &str, action: &str, params: &Fields) -> CiviResult<ApiReply> {
        self.call_raw(entity, action, params)?.into_result()
    }

    /// [`Civi::call`] that hands `is_error` replies back for inspection.
    pub fn call_raw(&self, entity: &str, action: &str, params: &Fields) -> CiviResult<ApiReply> {
        let started = Instant::now();
        let result = self.caller.call(entity, action, params);
        let elapsed = started.elapsed();

        let failed = result.as_ref().map_or(true, |reply| reply.is_error);
        self.stats.record(entity, action, elapsed, failed);

        let id = params.get("id").map(ToString::to_string).unwrap_or_default();
        match &result {
            Ok(reply) if reply.is_error => log::error!(
                "{}.{} [{}] API error after {:?}: {}",
                entity,
                action,
                id,
                elapsed,
                reply.error_message.as_deref().unwrap_or("unknown")
            ),
            Ok(reply) => log::debug!(
                "{}.{} [{}] returned {} after {:?}",
                entity,
                action,
                id,
                reply.count,
                elapsed
            ),
            Err(err) => log::error!("{}.{} [{}] failed after {:?}: {}", entity, action, id, elapsed, err),
        }

        result
    }

    pub fn probe(&self) -> bool {
        self.caller.probe()
    }

    /// Remote fields of one record by id.
    pub fn fetch(&self, entity_type: &str, id: i64) -> CiviResult<Option<Fields>> {
        let reply = self.call(entity_type, "get", &fields! { "id" => id })?;
        Ok(reply.values.into_iter().next())
    }

    pub fn load(&self, entity_type: &str, id: i64) -> CiviResult<Option<Entity<'_>>> {
        Ok(self
            .fetch(entity_type, id)?
            .map(|record| Entity::new(self, entity_type, record)))
    }

    /// The single record matching the identifying attributes.
    ///
    /// `None` without a remote call when no identifying attribute is present.
    pub fn get_entity(
        &self,
        entity_type: &str,
        attributes: &Fields,
        primary: &[&str],
    ) -> CiviResult<Option<Entity<'_>>> {
        let query = lookup_query(attributes, primary);
        if query.is_empty() {
            log::debug!("no identifying attribute for {} in {:?}", entity_type, attributes);
            return Ok(None);
        }
        let record = self.find_unique(entity_type, &query)?;
        Ok(record.map(|record| Entity::new(self, entity_type, record)))
    }

    pub fn get_entities(
        &self,
        entity_type: &str,
        attributes: &Fields,
        primary: &[&str],
    ) -> CiviResult<Vec<Entity<'_>>> {
        let query = lookup_query(attributes, primary);
        if query.is_empty() {
            log::warn!("no identifying attribute for {} in {:?}", entity_type, attributes);
            return Ok(Vec::new());
        }
        let reply = self.call(entity_type, "get", &query)?;
        log::debug!("{} {} entities found", reply.values.len(), entity_type);
        Ok(reply
            .values
            .into_iter()
            .map(|record| Entity::new(self, entity_type, record))
            .collect())
    }

    pub fn create_entity(&self, entity_type: &str, attributes: &Fields) -> CiviResult<Entity<'_>> {
        let reply = self.call(entity_type, "create", attributes)?;
        Ok(Entity::new(self, entity_type, created_fields(attributes, reply)))
    }

    /// Get-or-create: update the single match with `policy`, or create.
    pub fn create_or_update(
        &self,
        entity_type: &str,
        attributes: &Fields,
        policy: UpdatePolicy,
        primary: &[&str],
    ) -> CiviResult<Entity<'_>> {
        self.reconcile(entity_type, attributes, policy, primary)
            .map(|(entity, _)| entity)
    }

    /// [`Civi::create_or_update`] that also reports which branch was taken.
    pub fn reconcile(
        &self,
        entity_type: &str,
        attributes: &Fields,
        policy: UpdatePolicy,
        primary: &[&str],
    ) -> CiviResult<(Entity<'_>, Reconciled)> {
        let query = lookup_query(attributes, primary);
        let existing = if query.is_empty() {
            None
        } else {
            self.find_unique(entity_type, &query)?
        };

        match existing {
            Some(record) => {
                let mut entity = Entity::new(self, entity_type, record);
                let changed = entity.apply(policy, attributes, true)?;
                if changed.is_empty() {
                    log::debug!("{} is up to date", entity);
                }
                Ok((entity, Reconciled::Updated(changed)))
            }
            None => {
                let mut params = query;
                params.extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
                let entity = self.create_entity(entity_type, &params)?;
                Ok((entity, Reconciled::Created))
            }
        }
    }

    /// Create the record unless a match exists; `None` when one does.
    pub fn create_if_not_exists(
        &self,
        entity_type: &str,
        attributes: &Fields,
        primary: &[&str],
    ) -> CiviResult<Option<Entity<'_>>> {
        let query = lookup_query(attributes, primary);
        if !query.is_empty() {
            let reply = self.call(entity_type, "get", &query)?;
            if reply.count > 0 || !reply.values.is_empty() {
                log::debug!("{} matching {:?} already exists", entity_type, query);
                return Ok(None);
            }
        }
        self.create_entity(entity_type, attributes).map(Some)
    }

    pub fn delete_entity(&self, entity_type: &str, id: i64) -> CiviResult<()> {
        self.call(entity_type, "delete", &fields! { "id" => id })?;
        log::info!("{} [{}] deleted", entity_type, id);
        Ok(())
    }

    /// `get` that must match at most one record.
    pub(crate) fn find_unique(&self, entity_type: &str, query: &Fields) -> CiviResult<Option<Fields>> {
        let reply = self.call(entity_type, "get", query)?;
        let matches = reply.count.max(reply.values.len());
        if matches > 1 {
            log::warn!("query for {} not unique: {:?}", entity_type, query);
            return Err(CiviError::Ambiguous {
                entity_type: entity_type.to_string(),
                query: describe_query(query),
                count: matches,
            });
        }
        Ok(reply.values.into_iter().next())
    }
}

/// The identifying attributes present in `attributes`, in `primary` order.
pub fn lookup_query(attributes: &Fields, primary: &[&str]) -> Fields {
    primary
        .iter()
        .filter_map(|key| {
            attributes
                .get(*key)
                .map(|value| ((*key).to_string(), value.clone()))
        })
        .collect()
}

pub(crate) fn describe_query(query: &Fields) -> String {
    query
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Fields of a freshly created record: what was sent, overlaid with what the
/// server echoed, with the reply id as a fallback.
fn created_fields(sent: &Fields, reply: ApiReply) -> Fields {
    let mut fields = sent.clone();
    let reply_id = reply.id.clone();
    if let Some(record) = reply.values.into_iter().next() {
        fields.extend(record);
    }
    if !fields.contains_key("id") {
        if let Some(id) = reply_id {
            fields.insert("id".into(), id);
        }
    }
    fields
}
