//! Local mirrors of remote records.
//!
//! An [`Entity`] holds the type tag and the attribute map of one CiviCRM
//! record and borrows the [`Civi`] session it was produced by. Its id is read
//! from `fields["id"]`, so the two can never disagree.
//!
//! Two distinct write paths exist:
//! - `update`/`fill`/`replace` diff a proposal against the *local* fields and
//!   submit the changed-set when asked to.
//! - `store` fetches the *remote* state and submits whatever differs locally.

pub mod hooks;

use crate::client::Civi;
use crate::error::{CiviError, CiviResult};
use crate::fields;
use crate::models::{Fields, Value};
use std::fmt;
use std::str::FromStr;

pub use hooks::{StoreHook, StoreHooks};

/// How a proposal is merged into existing fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Overwrite every proposed key.
    #[default]
    Update,
    /// Only set keys that are not present yet.
    Fill,
    /// Only overwrite keys that are already present.
    Replace,
}

impl UpdatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdatePolicy::Update => "update",
            UpdatePolicy::Fill => "fill",
            UpdatePolicy::Replace => "replace",
        }
    }

    /// Merge `proposal` into `fields`, returning the keys that changed.
    pub fn merge(&self, fields: &mut Fields, proposal: &Fields) -> Fields {
        let mut changed = Fields::new();
        for (key, value) in proposal {
            let write = match (self, fields.get(key)) {
                (UpdatePolicy::Update, Some(current)) => !current.same_as(value),
                (UpdatePolicy::Update, None) => true,
                (UpdatePolicy::Fill, current) => current.is_none(),
                (UpdatePolicy::Replace, Some(current)) => !current.same_as(value),
                (UpdatePolicy::Replace, None) => false,
            };
            if write {
                fields.insert(key.clone(), value.clone());
                changed.insert(key.clone(), value.clone());
            }
        }
        changed
    }
}

impl FromStr for UpdatePolicy {
    type Err = CiviError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "update" => Ok(UpdatePolicy::Update),
            "fill" => Ok(UpdatePolicy::Fill),
            "replace" => Ok(UpdatePolicy::Replace),
            other => Err(CiviError::InvalidUpdatePolicy(other.to_string())),
        }
    }
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One remote record and its session.
pub struct Entity<'c> {
    civi: &'c Civi,
    entity_type: String,
    fields: Fields,
}

impl<'c> Entity<'c> {
    pub(crate) fn new(civi: &'c Civi, entity_type: impl Into<String>, fields: Fields) -> Self {
        Self {
            civi,
            entity_type: entity_type.into(),
            fields,
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Remote id; `None` until the record has been created.
    pub fn id(&self) -> Option<i64> {
        self.fields.get("id").and_then(Value::as_i64)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.fields.get(key).and_then(Value::as_i64)
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }

    pub fn update(&mut self, proposal: &Fields, store: bool) -> CiviResult<Fields> {
        self.apply(UpdatePolicy::Update, proposal, store)
    }

    pub fn fill(&mut self, proposal: &Fields, store: bool) -> CiviResult<Fields> {
        self.apply(UpdatePolicy::Fill, proposal, store)
    }

    pub fn replace(&mut self, proposal: &Fields, store: bool) -> CiviResult<Fields> {
        self.apply(UpdatePolicy::Replace, proposal, store)
    }

    /// Merge `proposal` with `policy`; when `store` is set, submit the
    /// changed-set. An empty changed-set never reaches the remote side.
    ///
    /// The id of a persisted entity is never merged: a proposal naming a
    /// different id is rejected before anything changes.
    pub fn apply(
        &mut self,
        policy: UpdatePolicy,
        proposal: &Fields,
        store: bool,
    ) -> CiviResult<Fields> {
        let changed = match self.id() {
            Some(id) => {
                if let Some(proposed) = proposal.get("id") {
                    if !proposed.same_as(&Value::Int(id)) {
                        return Err(CiviError::record(format!(
                            "refusing to retarget {self} to id {proposed}"
                        )));
                    }
                }
                let mut proposal = proposal.clone();
                proposal.remove("id");
                policy.merge(&mut self.fields, &proposal)
            }
            None => policy.merge(&mut self.fields, proposal),
        };
        if store && !changed.is_empty() {
            self.submit(changed.clone())?;
        }
        Ok(changed)
    }

    /// Replace local fields with the remote state.
    pub fn reload(&mut self) -> CiviResult<()> {
        let id = self.require_id("reload")?;
        match self.civi.fetch(&self.entity_type, id)? {
            Some(current) => {
                self.fields = current;
                Ok(())
            }
            None => Err(CiviError::record(format!("{self} no longer exists"))),
        }
    }

    /// Submit every local field that differs from the remote state.
    ///
    /// Returns the submitted changed-set. An entity without an id is created.
    pub fn store(&mut self) -> CiviResult<Fields> {
        let Some(id) = self.id() else {
            let all = self.fields.clone();
            self.submit(all.clone())?;
            return Ok(all);
        };

        let Some(remote) = self.civi.fetch(&self.entity_type, id)? else {
            return Err(CiviError::record(format!("{self} no longer exists")));
        };
        let changes: Fields = self
            .fields
            .iter()
            .filter(|(key, value)| !remote.get(*key).is_some_and(|current| current.same_as(value)))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        if changes.is_empty() {
            log::info!("no changes, not storing {}", self);
        } else {
            self.submit(changes.clone())?;
            log::info!("stored changes to {}", self);
        }
        Ok(changes)
    }

    /// Delete the remote record.
    pub fn delete(self) -> CiviResult<()> {
        let id = self.require_id("delete")?;
        self.civi.delete_entity(&self.entity_type, id)
    }

    fn submit(&mut self, changed: Fields) -> CiviResult<()> {
        let mut params = self
            .civi
            .hooks()
            .augment(&self.entity_type, changed, &self.fields);

        match self.id() {
            Some(id) => {
                params.insert("id".into(), Value::Int(id));
                self.civi.call(&self.entity_type, "create", &params)?;
            }
            None => {
                for (key, value) in &self.fields {
                    params.entry(key.clone()).or_insert_with(|| value.clone());
                }
                let reply = self.civi.call(&self.entity_type, "create", &params)?;
                let created = reply
                    .first()
                    .and_then(|record| record.get("id"))
                    .or(reply.id.as_ref())
                    .cloned()
                    .ok_or_else(|| {
                        CiviError::record(format!("{} create returned no id", self.entity_type))
                    })?;
                self.fields.insert("id".into(), created);
            }
        }
        Ok(())
    }

    fn require_id(&self, operation: &str) -> CiviResult<i64> {
        self.id().ok_or_else(|| {
            CiviError::record(format!(
                "cannot {operation} {} entity without id",
                self.entity_type
            ))
        })
    }

    /// Parameters identifying this record.
    pub fn key(&self) -> Fields {
        match self.id() {
            Some(id) => fields! { "id" => id },
            None => Fields::new(),
        }
    }
}

impl fmt::Display for Entity<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = match self.id() {
            Some(id) => id.to_string(),
            None => "new".to_string(),
        };
        match (self.entity_type.as_str(), self.fields.get("display_name")) {
            ("Contact", Some(name)) => write!(f, "{name} [{id}]"),
            (kind, _) => write!(f, "{kind} entity [{id}]"),
        }
    }
}

impl fmt::Debug for Entity<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("entity_type", &self.entity_type)
            .field("fields", &self.fields)
            .finish()
    }
}
