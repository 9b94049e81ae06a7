//! Name→ID resolvers on [`Civi`].
//!
//! Reference data lookups go through the session caches and cache "absent"
//! as `0` (or `Value::Null` for option values). Contact and generic entity
//! lookups are not cached: those records change during an import.
//!
//! Resolvers running inside a cache never call back into the same cache, so
//! compound lookups resolve their dependencies before entering it.

use crate::client::{Civi, describe_query, lookup_query};
use crate::error::{CiviError, CiviResult};
use crate::fields;
use crate::models::{ApiReply, Fields, Value};
use std::collections::BTreeSet;

impl Civi {
    /// Contact id from the record's `id`/`contact_id` or a lookup on `primary`.
    ///
    /// With `search_deleted`, a miss is retried among deleted contacts.
    /// Returns `0` when not found.
    pub fn get_contact_id(
        &self,
        attributes: &Fields,
        primary: &[&str],
        search_deleted: bool,
    ) -> CiviResult<i64> {
        for key in ["id", "contact_id"] {
            if let Some(id) = attributes.get(key).and_then(Value::as_i64) {
                return Ok(id);
            }
        }

        let mut query = lookup_query(attributes, primary);
        if query.is_empty() {
            log::debug!("no identifying attribute for contact in {:?}", attributes);
            return Ok(0);
        }
        query.insert("return".into(), Value::from("contact_id"));

        let already_deleted = attributes
            .get("is_deleted")
            .and_then(Value::as_i64)
            .is_some_and(|flag| flag == 1);

        if let Some(id) = self.unique_id("Contact", &query, "contact_id")? {
            return Ok(id);
        }
        if search_deleted && !already_deleted {
            query.insert("is_deleted".into(), Value::Int(1));
            if let Some(id) = self.unique_id("Contact", &query, "contact_id")? {
                log::debug!("contact {} found among deleted contacts", id);
                return Ok(id);
            }
        }
        log::debug!("contact not found for {}", describe_query(&query));
        Ok(0)
    }

    /// Id of the single `entity_type` record matching `primary`, or `0`.
    pub fn get_entity_id(
        &self,
        entity_type: &str,
        attributes: &Fields,
        primary: &[&str],
    ) -> CiviResult<i64> {
        if let Some(id) = attributes.get("id").and_then(Value::as_i64) {
            return Ok(id);
        }
        let mut query = lookup_query(attributes, primary);
        if query.is_empty() {
            log::debug!("no identifying attribute for {} in {:?}", entity_type, attributes);
            return Ok(0);
        }
        query.insert("return".into(), Value::from("id"));
        Ok(self.unique_id(entity_type, &query, "id")?.unwrap_or(0))
    }

    /// Campaign id by `key` (usually `title`). Ambiguous names resolve to `0`.
    pub fn get_campaign_id(&self, value: &str, key: &str) -> CiviResult<i64> {
        self.ids.resolve(&format!("campaign.{key}"), value, || {
            self.first_id_or_zero("Campaign", fields! { key => value })
        })
    }

    pub fn get_custom_field_id(&self, label: &str) -> CiviResult<i64> {
        self.ids.resolve("custom_field", label, || {
            self.first_id_or_zero("CustomField", fields! { "label" => label })
        })
    }

    pub fn get_option_group_id(&self, name: &str) -> CiviResult<i64> {
        self.ids.resolve("option_group", name, || {
            self.first_id_or_zero("OptionGroup", fields! { "name" => name })
        })
    }

    /// Option value id; with several matches the first one wins.
    pub fn get_option_value_id(&self, option_group_id: i64, name: &str) -> CiviResult<i64> {
        let key = format!("{option_group_id}/{name}");
        self.ids.resolve("option_value_id", &key, || {
            let reply = self.query_option_value(option_group_id, name)?;
            if reply.values.len() > 1 {
                log::warn!("more than one option value named '{}', using the first", name);
            }
            Ok(reply
                .first()
                .and_then(|record| record.get("id"))
                .and_then(Value::as_i64)
                .unwrap_or(0))
        })
    }

    /// The `value` column of an option value, `Value::Null` when absent.
    pub fn get_option_value(&self, option_group_id: i64, name: &str) -> CiviResult<Value> {
        let key = format!("{option_group_id}/{name}");
        self.values.resolve("option_value", &key, || {
            let reply = self.query_option_value(option_group_id, name)?;
            Ok(single_value(&reply, name))
        })
    }

    /// Create or update an option value, returning its `value`.
    pub fn set_option_value(
        &self,
        option_group_id: i64,
        name: &str,
        attributes: &Fields,
    ) -> CiviResult<Value> {
        let mut params = attributes.clone();
        params.insert("option_group_id".into(), Value::Int(option_group_id));
        params.insert("name".into(), Value::from(name));
        let reply = self.call("OptionValue", "create", &params)?;
        Ok(reply
            .first()
            .and_then(|record| record.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Value of `label` in the option group `group_name`, created if missing.
    ///
    /// Used for prefixes and greetings. `Value::Null` when the group is unknown
    /// or the label is empty.
    pub fn get_or_create_option_value(&self, group_name: &str, label: &str) -> CiviResult<Value> {
        if label.trim().is_empty() {
            log::warn!("will not create an empty {} option", group_name);
            return Ok(Value::Null);
        }
        let group_id = self.get_option_group_id(group_name)?;
        if group_id == 0 {
            log::error!("option group '{}' not found", group_name);
            return Ok(Value::Null);
        }

        let key = format!("{group_name}/{label}");
        let value = self.values.resolve("option_value.created", &key, || {
            let existing = single_value(&self.query_option_value(group_id, label)?, label);
            if existing.is_truthy() {
                log::debug!("{} '{}' already exists [{}]", group_name, label, existing);
                return Ok(existing);
            }
            let created = self.set_option_value(group_id, label, &Fields::new())?;
            log::info!("{} '{}' created [{}]", group_name, label, created);
            Ok(created)
        })?;
        // A miss cached by get_option_value must not outlive the create.
        self.values
            .insert("option_value", &format!("{group_id}/{label}"), value.clone());
        Ok(value)
    }

    /// Location type id; more than one match is an error.
    pub fn get_location_type_id(&self, name: &str) -> CiviResult<i64> {
        self.ids.resolve("location_type", name, || {
            let id = self
                .unique_id("LocationType", &fields! { "name" => name }, "id")?
                .unwrap_or(0);
            if id == 0 {
                log::error!("location type '{}' not found", name);
            }
            Ok(id)
        })
    }

    /// Membership status id; more than one match is an error.
    pub fn get_membership_status_id(&self, name: &str) -> CiviResult<i64> {
        self.ids.resolve("membership_status", name, || {
            Ok(self
                .unique_id("MembershipStatus", &fields! { "name" => name }, "id")?
                .unwrap_or(0))
        })
    }

    pub fn get_or_create_tag_id(&self, name: &str, description: Option<&str>) -> CiviResult<i64> {
        self.ids.resolve("tag", name, || {
            let query = fields! { "name" => name };
            if let Some(id) = self.unique_id("Tag", &query, "id")? {
                return Ok(id);
            }
            let mut params = query;
            if let Some(description) = description {
                params.insert("description".into(), Value::from(description));
            }
            let id = self.created_id("Tag", &params)?;
            log::info!("tag '{}' created [{}]", name, id);
            Ok(id)
        })
    }

    /// Group id by title; missing groups are created as mailing groups.
    pub fn get_or_create_group_id(
        &self,
        title: &str,
        description: Option<&str>,
    ) -> CiviResult<i64> {
        self.ids.resolve("group", title, || {
            let query = fields! { "title" => title };
            if let Some(id) = self.unique_id("Group", &query, "id")? {
                return Ok(id);
            }
            let mut params = query;
            params.insert("group_type".into(), Value::from("[2]"));
            if let Some(description) = description {
                params.insert("description".into(), Value::from(description));
            }
            let id = self.created_id("Group", &params)?;
            log::info!("group '{}' created [{}]", title, id);
            Ok(id)
        })
    }

    /// Write a custom field by label. `false` when the field does not exist.
    pub fn set_custom_field_value(
        &self,
        entity_id: i64,
        label: &str,
        value: impl Into<Value>,
    ) -> CiviResult<bool> {
        let field_id = self.get_custom_field_id(label)?;
        if field_id == 0 {
            log::warn!("custom field '{}' does not exist", label);
            return Ok(false);
        }
        let value: Value = value.into();
        let params = fields! {
            "entity_id" => entity_id,
            format!("custom_{field_id}") => value,
        };
        self.call("CustomValue", "create", &params)?;
        log::debug!("custom field '{}' set for entity {}", label, entity_id);
        Ok(true)
    }

    pub fn get_entity_tag_ids(&self, entity_id: i64, entity_table: &str) -> CiviResult<BTreeSet<i64>> {
        let reply = self.call(
            "EntityTag",
            "get",
            &fields! { "entity_id" => entity_id, "entity_table" => entity_table },
        )?;
        distinct_ids(&reply, "tag_id", "tag")
    }

    /// Add (`on`) or remove a tag. Returns whether anything changed remotely.
    pub fn tag_entity(
        &self,
        entity_id: i64,
        entity_table: &str,
        tag_id: i64,
        on: bool,
    ) -> CiviResult<bool> {
        let params = fields! {
            "entity_id" => entity_id,
            "entity_table" => entity_table,
            "tag_id" => tag_id,
        };
        let reply = self.call("EntityTag", toggle_action(on), &params)?;
        Ok(log_toggle(&reply, "tag", tag_id, entity_id))
    }

    pub fn get_contact_group_ids(&self, contact_id: i64) -> CiviResult<BTreeSet<i64>> {
        let reply = self.call("GroupContact", "get", &fields! { "contact_id" => contact_id })?;
        distinct_ids(&reply, "group_id", "group")
    }

    pub fn set_group_membership(&self, contact_id: i64, group_id: i64, on: bool) -> CiviResult<bool> {
        let params = fields! { "contact_id" => contact_id, "group_id" => group_id };
        let reply = self.call("GroupContact", toggle_action(on), &params)?;
        Ok(log_toggle(&reply, "group", group_id, contact_id))
    }

    fn query_option_value(&self, option_group_id: i64, name: &str) -> CiviResult<ApiReply> {
        self.call(
            "OptionValue",
            "get",
            &fields! { "option_group_id" => option_group_id, "name" => name },
        )
    }

    /// Id of the only match, `0` for none or several.
    fn first_id_or_zero(&self, entity_type: &str, query: Fields) -> CiviResult<i64> {
        let reply = self.call(entity_type, "get", &query)?;
        match reply.values.as_slice() {
            [record] => Ok(record.get("id").and_then(Value::as_i64).unwrap_or(0)),
            [] => {
                log::debug!("no {} found for {}", entity_type, describe_query(&query));
                Ok(0)
            }
            _ => {
                log::warn!("more than one {} found for {}", entity_type, describe_query(&query));
                Ok(0)
            }
        }
    }

    /// `column` of the only match; several matches are an error.
    fn unique_id(&self, entity_type: &str, query: &Fields, column: &str) -> CiviResult<Option<i64>> {
        Ok(self
            .find_unique(entity_type, query)?
            .and_then(|record| record.get(column).or_else(|| record.get("id")).and_then(Value::as_i64)))
    }

    fn created_id(&self, entity_type: &str, params: &Fields) -> CiviResult<i64> {
        let reply = self.call(entity_type, "create", params)?;
        reply
            .first()
            .and_then(|record| record.get("id"))
            .or(reply.id.as_ref())
            .and_then(Value::as_i64)
            .ok_or_else(|| CiviError::record(format!("{entity_type} create returned no id")))
    }
}

fn single_value(reply: &ApiReply, name: &str) -> Value {
    match reply.values.as_slice() {
        [record] => record.get("value").cloned().unwrap_or(Value::Null),
        [] => Value::Null,
        _ => {
            log::warn!("more than one option value named '{}'", name);
            Value::Null
        }
    }
}

fn toggle_action(on: bool) -> &'static str {
    if on { "create" } else { "delete" }
}

fn log_toggle(reply: &ApiReply, kind: &str, member_id: i64, entity_id: i64) -> bool {
    if reply.flag("added") {
        log::info!("added {} {} to entity {}", kind, member_id, entity_id);
        true
    } else if reply.flag("removed") {
        log::info!("removed {} {} from entity {}", kind, member_id, entity_id);
        true
    } else {
        log::debug!("no {} changed for entity {}", kind, entity_id);
        false
    }
}

/// Collect `column` ids, verifying that the reply count matches.
fn distinct_ids(reply: &ApiReply, column: &str, kind: &str) -> CiviResult<BTreeSet<i64>> {
    let ids: BTreeSet<i64> = reply
        .values
        .iter()
        .filter_map(|record| record.get(column).and_then(Value::as_i64))
        .collect();
    if ids.len() != reply.count {
        return Err(CiviError::record(format!(
            "{kind} count {} does not match {} delivered {kind} ids",
            reply.count,
            ids.len()
        )));
    }
    Ok(ids)
}
