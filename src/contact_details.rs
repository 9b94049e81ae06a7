//! Email addresses, phone numbers and websites of a contact.
//!
//! These records hang off a contact and are keyed by a type (location type
//! for emails and phones, website type for websites) rather than by any
//! identifier of their own, so they get dedicated accessors on [`Civi`].

use crate::client::Civi;
use crate::entity::Entity;
use crate::error::CiviResult;
use crate::fields;
use crate::models::{Fields, Value};

impl Civi {
    /// Email addresses of a contact, optionally of one location type.
    pub fn get_emails(&self, contact_id: i64, location_type_id: Option<i64>) -> CiviResult<Vec<Entity<'_>>> {
        self.details_of("Email", contact_id, "location_type_id", location_type_id)
    }

    /// The email of one location type; the first one when there are several.
    pub fn get_email(&self, contact_id: i64, location_type_id: i64) -> CiviResult<Option<Entity<'_>>> {
        let query = fields! { "contact_id" => contact_id, "location_type_id" => location_type_id };
        self.first_detail("Email", query)
    }

    pub fn create_email(&self, contact_id: i64, location_type_id: i64, email: &str) -> CiviResult<Entity<'_>> {
        self.create_entity(
            "Email",
            &fields! {
                "contact_id" => contact_id,
                "location_type_id" => location_type_id,
                "email" => email,
            },
        )
    }

    /// Phone numbers of a contact, optionally of one location type.
    pub fn get_phone_numbers(
        &self,
        contact_id: i64,
        location_type_id: Option<i64>,
    ) -> CiviResult<Vec<Entity<'_>>> {
        self.details_of("Phone", contact_id, "location_type_id", location_type_id)
    }

    /// The phone number of one location and phone type; the first one when
    /// there are several.
    pub fn get_phone_number(
        &self,
        contact_id: i64,
        location_type_id: i64,
        phone_type_id: &Value,
    ) -> CiviResult<Option<Entity<'_>>> {
        let query = fields! {
            "contact_id" => contact_id,
            "location_type_id" => location_type_id,
            "phone_type_id" => phone_type_id.clone(),
        };
        self.first_detail("Phone", query)
    }

    pub fn create_phone_number(&self, attributes: &Fields) -> CiviResult<Entity<'_>> {
        self.create_entity("Phone", attributes)
    }

    /// Websites of a contact, optionally of one website type.
    pub fn get_websites(&self, contact_id: i64, website_type_id: Option<&Value>) -> CiviResult<Vec<Entity<'_>>> {
        let mut query = fields! { "contact_id" => contact_id };
        if let Some(website_type_id) = website_type_id {
            query.insert("website_type_id".into(), website_type_id.clone());
        }
        self.all_details("Website", query)
    }

    pub fn create_website(&self, attributes: &Fields) -> CiviResult<Entity<'_>> {
        self.create_entity("Website", attributes)
    }

    fn details_of(
        &self,
        entity_type: &str,
        contact_id: i64,
        type_key: &str,
        type_id: Option<i64>,
    ) -> CiviResult<Vec<Entity<'_>>> {
        let mut query = fields! { "contact_id" => contact_id };
        if let Some(type_id) = type_id {
            query.insert(type_key.to_string(), Value::Int(type_id));
        }
        self.all_details(entity_type, query)
    }

    fn all_details(&self, entity_type: &str, query: Fields) -> CiviResult<Vec<Entity<'_>>> {
        let reply = self.call(entity_type, "get", &query)?;
        log::debug!(
            "found {} {} record(s) for contact {}",
            reply.values.len(),
            entity_type,
            query.get("contact_id").map(ToString::to_string).unwrap_or_default()
        );
        Ok(reply
            .values
            .into_iter()
            .map(|record| Entity::new(self, entity_type, record))
            .collect())
    }

    fn first_detail(&self, entity_type: &str, query: Fields) -> CiviResult<Option<Entity<'_>>> {
        let reply = self.call(entity_type, "get", &query)?;
        if reply.values.len() > 1 {
            log::warn!(
                "contact {} has {} matching {} records, using the first",
                query.get("contact_id").map(ToString::to_string).unwrap_or_default(),
                reply.values.len(),
                entity_type
            );
        }
        Ok(reply
            .values
            .into_iter()
            .next()
            .map(|record| Entity::new(self, entity_type, record)))
    }
}
