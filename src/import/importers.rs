//! Per-record importers.
//!
//! Each importer resolves the record's human-readable references into ids,
//! then reconciles it with CiviCRM. A record that cannot be resolved is
//! skipped with a reason rather than failed.

use super::params::{ImportParameters, NoteMode, entity_table};
use super::source::Record;
use crate::client::{Civi, DEFAULT_PRIMARY, Reconciled};
use crate::entity::{Entity, UpdatePolicy};
use crate::error::{CiviError, CiviResult};
use crate::fields;
use crate::models::{Fields, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Cell contents that switch a tag or group on.
pub const TRUTHY_CELLS: [&str; 7] = ["true", "1", "x", "yes", "y", "ja", "j"];

/// Result of importing one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Something was created, changed or deleted remotely.
    Written(i64),
    Unchanged,
    Skipped(String),
}

impl Outcome {
    fn skipped(reason: impl Into<String>) -> Self {
        Outcome::Skipped(reason.into())
    }

    fn from_reconciled(entity: &Entity<'_>, reconciled: &Reconciled) -> Self {
        match (reconciled, entity.id()) {
            (Reconciled::Updated(changed), _) if changed.is_empty() => Outcome::Unchanged,
            (_, Some(id)) => Outcome::Written(id),
            (_, None) => Outcome::Written(0),
        }
    }

    fn from_changes(entity: &Entity<'_>, changed: &Fields) -> Self {
        if changed.is_empty() {
            log::info!("nothing changed for {}", entity);
            Outcome::Unchanged
        } else {
            log::info!("updated {}", entity);
            Outcome::Written(entity.id().unwrap_or(0))
        }
    }

    fn created(entity: &Entity<'_>) -> Self {
        log::info!("created {}", entity);
        Outcome::Written(entity.id().unwrap_or(0))
    }
}

/// A resolved reference, or the outcome that ends the record early.
type Resolved<T> = Result<T, Outcome>;

/// Importers selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Importer {
    Entities,
    ContactsWithDupeCheck,
    Contributions,
    RecurringContributions,
    Campaigns,
    Notes,
    Addresses,
    Emails,
    Phones,
    Websites,
    Prefixes,
    Greetings,
    Memberships,
    EntityTags,
    ContactGroups,
    DeleteEntity,
}

impl Importer {
    pub const ALL: [Importer; 16] = [
        Importer::Entities,
        Importer::ContactsWithDupeCheck,
        Importer::Contributions,
        Importer::RecurringContributions,
        Importer::Campaigns,
        Importer::Notes,
        Importer::Addresses,
        Importer::Emails,
        Importer::Phones,
        Importer::Websites,
        Importer::Prefixes,
        Importer::Greetings,
        Importer::Memberships,
        Importer::EntityTags,
        Importer::ContactGroups,
        Importer::DeleteEntity,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Importer::Entities => "entities",
            Importer::ContactsWithDupeCheck => "contacts-dupe-check",
            Importer::Contributions => "contributions",
            Importer::RecurringContributions => "recurring-contributions",
            Importer::Campaigns => "campaigns",
            Importer::Notes => "notes",
            Importer::Addresses => "addresses",
            Importer::Emails => "emails",
            Importer::Phones => "phones",
            Importer::Websites => "websites",
            Importer::Prefixes => "prefixes",
            Importer::Greetings => "greetings",
            Importer::Memberships => "memberships",
            Importer::EntityTags => "entity-tags",
            Importer::ContactGroups => "contact-groups",
            Importer::DeleteEntity => "delete",
        }
    }

    pub fn import(&self, civi: &Civi, record: Record, params: &ImportParameters) -> CiviResult<Outcome> {
        match self {
            Importer::Entities => import_entities(civi, record, params),
            Importer::ContactsWithDupeCheck => import_contacts_with_dupe_check(civi, record, params),
            Importer::Contributions => import_contributions(civi, record, params),
            Importer::RecurringContributions => import_recurring_contributions(civi, record, params),
            Importer::Campaigns => import_campaigns(civi, record, params),
            Importer::Notes => import_notes(civi, record, params),
            Importer::Addresses => import_contact_addresses(civi, record, params),
            Importer::Emails => import_contact_emails(civi, record, params),
            Importer::Phones => import_contact_phones(civi, record, params),
            Importer::Websites => import_contact_websites(civi, record, params),
            Importer::Prefixes => import_contact_prefixes(civi, record, params),
            Importer::Greetings => import_contact_greetings(civi, record, params),
            Importer::Memberships => import_memberships(civi, record, params),
            Importer::EntityTags => import_entity_tags(civi, record, params),
            Importer::ContactGroups => import_contact_groups(civi, record, params),
            Importer::DeleteEntity => import_delete_entity(civi, record, params),
        }
    }
}

impl FromStr for Importer {
    type Err = CiviError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Importer::ALL
            .into_iter()
            .find(|importer| importer.name() == s)
            .ok_or_else(|| {
                let known: Vec<_> = Importer::ALL.iter().map(Importer::name).collect();
                CiviError::Config(format!("unknown importer '{s}', expected one of {}", known.join(", ")))
            })
    }
}

impl fmt::Display for Importer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Generic create-or-update of `entity_type` (default `Contact`).
pub fn import_entities(civi: &Civi, record: Record, params: &ImportParameters) -> CiviResult<Outcome> {
    let entity_type = params.entity_type_or("Contact");
    let identifiers = params.identifiers_or(&DEFAULT_PRIMARY);
    let (entity, reconciled) = civi.reconcile(entity_type, &record, params.policy(), &identifiers)?;
    log::info!("wrote {}", entity);
    Ok(Outcome::from_reconciled(&entity, &reconciled))
}

/// Create contacts with CiviCRM's own duplicate check.
///
/// A single duplicate is updated with the import policy (default `fill`),
/// as is a record whose id or external identifier already exists. Several
/// duplicates skip the record.
pub fn import_contacts_with_dupe_check(
    civi: &Civi,
    mut record: Record,
    params: &ImportParameters,
) -> CiviResult<Outcome> {
    let entity_type = params.entity_type_or("Contact");
    let policy = params.policy_or(UpdatePolicy::Fill);

    let mut query = record.clone();
    query.insert("dupe_check".into(), Value::Int(1));
    let reply = civi.call_raw(entity_type, "create", &query)?;

    if !reply.is_error {
        let id = reply
            .first()
            .and_then(|created| created.get("id"))
            .or(reply.id.as_ref())
            .and_then(Value::as_i64)
            .unwrap_or(0);
        log::info!("created {} [{}]", entity_type, id);
        return Ok(Outcome::Written(id));
    }

    let primary: &[&str] = if reply.error_code.as_deref() == Some("duplicate") {
        let duplicates = reply.id_list("ids");
        let [duplicate] = duplicates.as_slice() else {
            return Ok(Outcome::skipped(format!(
                "{} possible duplicates: {:?}",
                duplicates.len(),
                duplicates
            )));
        };
        record.insert("id".into(), Value::Int(*duplicate));
        &["id"]
    } else if reply.error_message.as_deref() == Some("DB Error: already exists") {
        &DEFAULT_PRIMARY
    } else {
        return Err(CiviError::Api {
            message: reply
                .error_message
                .unwrap_or_else(|| "unknown API error".to_string()),
            code: reply.error_code,
        });
    };

    let (entity, reconciled) = civi.reconcile(entity_type, &record, policy, primary)?;
    log::info!("existing {} identified and updated", entity);
    Ok(Outcome::from_reconciled(&entity, &reconciled))
}

/// Contributions with contact, payment instrument, campaign and status
/// given by name.
pub fn import_contributions(
    civi: &Civi,
    mut record: Record,
    params: &ImportParameters,
) -> CiviResult<Outcome> {
    if let Err(skip) = resolve_contribution_references(civi, &mut record, params)? {
        return Ok(skip);
    }
    let entity_type = params.entity_type_or("Contribution");
    let identifiers = params.identifiers_or(&["id", "trxn_id"]);
    let (entity, reconciled) = civi.reconcile(entity_type, &record, params.policy(), &identifiers)?;
    log::info!("wrote contribution {}", entity);
    Ok(Outcome::from_reconciled(&entity, &reconciled))
}

/// Recurring contributions, resolved like contributions and identified by
/// `id` unless other identifiers are given.
pub fn import_recurring_contributions(
    civi: &Civi,
    mut record: Record,
    params: &ImportParameters,
) -> CiviResult<Outcome> {
    if let Err(skip) = resolve_contribution_references(civi, &mut record, params)? {
        return Ok(skip);
    }
    let entity_type = params.entity_type_or("ContributionRecur");
    let identifiers = params.identifiers_or(&["id"]);
    let (entity, reconciled) = civi.reconcile(entity_type, &record, params.policy(), &identifiers)?;
    log::info!("wrote recurring contribution {}", entity);
    Ok(Outcome::from_reconciled(&entity, &reconciled))
}

/// Campaigns with type and status given by name.
pub fn import_campaigns(civi: &Civi, mut record: Record, params: &ImportParameters) -> CiviResult<Outcome> {
    if let Some(kind) = take_truthy(&mut record, "campaign_type") {
        let group_id = civi.get_option_group_id("campaign_type")?;
        record.insert("campaign_type_id".into(), civi.get_option_value(group_id, &kind)?);
    }
    if !is_set(&record, "campaign_type_id") {
        return Ok(Outcome::skipped("no valid campaign type"));
    }

    if let Some(status) = take_truthy(&mut record, "status") {
        let group_id = civi.get_option_group_id("campaign_status")?;
        let status_id = civi.get_option_value(group_id, &status)?;
        if !status_id.is_truthy() {
            return Ok(Outcome::skipped(format!("unknown campaign status '{status}'")));
        }
        record.insert("status_id".into(), status_id);
    }

    let entity_type = params.entity_type_or("Campaign");
    let identifiers = params.identifiers_or(&DEFAULT_PRIMARY);
    let (campaign, reconciled) = civi.reconcile(entity_type, &record, params.policy(), &identifiers)?;
    log::info!("wrote campaign {}", campaign);
    Ok(Outcome::from_reconciled(&campaign, &reconciled))
}

/// Notes attached to `entity_table`/`entity_id`.
///
/// The target may instead be looked up through the `lookup_type`,
/// `lookup_identifier_key` and `lookup_identifier_value` columns.
pub fn import_notes(civi: &Civi, mut record: Record, params: &ImportParameters) -> CiviResult<Outcome> {
    let lookup = (
        record.remove("lookup_type"),
        record.remove("lookup_identifier_key"),
        record.remove("lookup_identifier_value"),
    );
    if let (Some(kind), Some(key), Some(value)) = lookup {
        let (kind, key) = (kind.to_string(), key.to_string());
        log::debug!("looking up {} with {}='{}'", kind, key, value);
        let query = fields! { key.as_str() => value.clone() };
        match civi.get_entity(&kind, &query, &[key.as_str()])? {
            Some(target) => {
                record.insert("entity_table".into(), Value::from(entity_table(&kind)));
                record.insert("entity_id".into(), target.id().map_or(Value::Null, Value::Int));
            }
            None => return Ok(Outcome::skipped(format!("no {kind} with {key}='{value}'"))),
        }
    }
    if !is_set(&record, "entity_id") || !is_set(&record, "entity_table") {
        return Ok(Outcome::skipped("note needs entity_id and entity_table"));
    }

    let primary: &[&str] = match params.note_mode {
        NoteMode::Add => &["id"],
        NoteMode::ReplaceSubject => &["id", "entity_id", "entity_table", "subject"],
    };
    let length = record.get("note").map_or(0, |note| note.to_string().len());
    let (note, reconciled) = civi
        .reconcile("Note", &record, UpdatePolicy::Update, primary)
        .inspect_err(|err| {
            if matches!(err, CiviError::RequestTooLong) {
                log::error!(
                    "a note of {} bytes exceeds the server's request limits, try CIVI_FORCE_POST",
                    length
                );
            }
        })?;
    log::info!("wrote note {}", note);
    Ok(Outcome::from_reconciled(&note, &reconciled))
}

/// Address per contact and location type.
pub fn import_contact_addresses(
    civi: &Civi,
    mut record: Record,
    params: &ImportParameters,
) -> CiviResult<Outcome> {
    let contact_id = resolve_contact(civi, &mut record)?;
    if contact_id == 0 {
        return Ok(Outcome::skipped("contact not found"));
    }
    if let Err(skip) = resolve_location_type(civi, &mut record, params)? {
        return Ok(skip);
    }

    let primary = ["contact_id", "location_type_id"];
    if params.no_update {
        return match civi.create_if_not_exists("Address", &record, &primary)? {
            Some(address) => {
                log::info!("wrote contact address {}", address);
                Ok(Outcome::Written(address.id().unwrap_or(0)))
            }
            None => {
                log::info!("address for contact {} exists and was not updated", contact_id);
                Ok(Outcome::Unchanged)
            }
        };
    }

    let (address, reconciled) = civi.reconcile("Address", &record, params.policy(), &primary)?;
    log::info!("wrote contact address {}", address);
    Ok(Outcome::from_reconciled(&address, &reconciled))
}

/// Email address per contact and location type, or any number of them
/// with `multiple`.
pub fn import_contact_emails(
    civi: &Civi,
    mut record: Record,
    params: &ImportParameters,
) -> CiviResult<Outcome> {
    let contact_id = resolve_contact(civi, &mut record)?;
    if contact_id == 0 {
        return Ok(skip_unidentified("Contact", &record, params));
    }
    strip_identification(&mut record);
    let location_type_id = match resolve_location_type(civi, &mut record, params)? {
        Ok(id) => id,
        Err(skip) => return Ok(skip),
    };
    let Some(address) = text_of(&record, "email") else {
        return Ok(Outcome::skipped("no email address"));
    };

    if params.multiple {
        let emails = civi.get_emails(contact_id, Some(location_type_id))?;
        if emails.iter().any(|email| same_text(email.get("email"), &address)) {
            log::info!("email {} already present for contact {}", address, contact_id);
            return Ok(Outcome::Unchanged);
        }
        let email = civi.create_email(contact_id, location_type_id, &address)?;
        return Ok(Outcome::created(&email));
    }

    match civi.get_email(contact_id, location_type_id)? {
        Some(email) if params.no_update => {
            log::info!("{} exists and was not updated", email);
            Ok(Outcome::Unchanged)
        }
        Some(mut email) => {
            record.remove("location_type_id");
            let changed = email.update(&record, true)?;
            Ok(Outcome::from_changes(&email, &changed))
        }
        None => {
            let email = civi.create_email(contact_id, location_type_id, &address)?;
            Ok(Outcome::created(&email))
        }
    }
}

/// Phone number per contact, location type and phone type, or any number
/// of them with `multiple`.
pub fn import_contact_phones(
    civi: &Civi,
    mut record: Record,
    params: &ImportParameters,
) -> CiviResult<Outcome> {
    let contact_id = resolve_contact(civi, &mut record)?;
    if contact_id == 0 {
        return Ok(skip_unidentified("Contact", &record, params));
    }
    strip_identification(&mut record);
    let location_type_id = match resolve_location_type(civi, &mut record, params)? {
        Ok(id) => id,
        Err(skip) => return Ok(skip),
    };

    let phone_type_id = match record.remove("phone_type_id").filter(Value::is_truthy) {
        Some(id) => id,
        None => {
            let name = take_truthy(&mut record, "phone_type").unwrap_or_else(|| params.phone_type.clone());
            let group_id = civi.get_option_group_id("phone_type")?;
            let id = civi.get_option_value(group_id, &name)?;
            if !id.is_truthy() {
                return Ok(Outcome::skipped(format!("unknown phone type '{name}'")));
            }
            id
        }
    };
    record.remove("phone_type");
    record.insert("phone_type_id".into(), phone_type_id.clone());
    let Some(number) = text_of(&record, "phone") else {
        return Ok(Outcome::skipped("no phone number"));
    };

    if params.multiple {
        let phones = civi.get_phone_numbers(contact_id, Some(location_type_id))?;
        if phones.iter().any(|phone| same_text(phone.get("phone"), &number)) {
            log::info!("phone number {} already present for contact {}", number, contact_id);
            return Ok(Outcome::Unchanged);
        }
        let phone = civi.create_phone_number(&record)?;
        return Ok(Outcome::created(&phone));
    }

    match civi.get_phone_number(contact_id, location_type_id, &phone_type_id)? {
        Some(phone) if params.no_update => {
            log::info!("{} exists and was not updated", phone);
            Ok(Outcome::Unchanged)
        }
        Some(mut phone) => {
            record.remove("location_type_id");
            let changed = phone.update(&record, true)?;
            Ok(Outcome::from_changes(&phone, &changed))
        }
        None => {
            let phone = civi.create_phone_number(&record)?;
            Ok(Outcome::created(&phone))
        }
    }
}

/// Website per contact and website type, or any number of them with
/// `multiple`.
pub fn import_contact_websites(
    civi: &Civi,
    mut record: Record,
    params: &ImportParameters,
) -> CiviResult<Outcome> {
    let contact_id = resolve_contact(civi, &mut record)?;
    if contact_id == 0 {
        return Ok(skip_unidentified("Contact", &record, params));
    }
    strip_identification(&mut record);

    let website_type_id = match record.remove("website_type_id").filter(Value::is_truthy) {
        Some(id) => id,
        None => {
            let Some(name) = take_truthy(&mut record, "website_type") else {
                return Ok(Outcome::skipped("no website type"));
            };
            let group_id = civi.get_option_group_id("website_type")?;
            let id = civi.get_option_value(group_id, &name)?;
            if !id.is_truthy() {
                return Ok(Outcome::skipped(format!("unknown website type '{name}'")));
            }
            id
        }
    };
    record.remove("website_type");
    record.insert("website_type_id".into(), website_type_id.clone());
    let Some(url) = text_of(&record, "url") else {
        return Ok(Outcome::skipped("no url"));
    };

    let sites = civi.get_websites(contact_id, Some(&website_type_id))?;
    if params.multiple {
        if sites.iter().any(|site| same_text(site.get("url"), &url)) {
            log::info!("website {} already present for contact {}", url, contact_id);
            return Ok(Outcome::Unchanged);
        }
        let site = civi.create_website(&record)?;
        return Ok(Outcome::created(&site));
    }

    let count = sites.len();
    match sites.into_iter().next() {
        Some(mut site) => {
            if count > 1 {
                log::warn!("contact {} has {} websites of this type, updating the first", contact_id, count);
            }
            let changed = site.update(&record, true)?;
            Ok(Outcome::from_changes(&site, &changed))
        }
        None => {
            let site = civi.create_website(&record)?;
            Ok(Outcome::created(&site))
        }
    }
}

/// Individual prefix of a contact; unknown prefixes are created.
///
/// With `no_update` an existing prefix is kept.
pub fn import_contact_prefixes(
    civi: &Civi,
    mut record: Record,
    params: &ImportParameters,
) -> CiviResult<Outcome> {
    let contact_id = civi.get_contact_id(&record, &["external_identifier"], true)?;
    if contact_id == 0 {
        return Ok(skip_unidentified("Contact", &record, params));
    }
    let Some(mut contact) = civi.load("Contact", contact_id)? else {
        return Ok(Outcome::skipped(format!("contact {contact_id} does not exist")));
    };

    let prefix_id = match record.remove("prefix_id").filter(Value::is_truthy) {
        Some(id) => id,
        None => {
            let Some(label) = take_truthy(&mut record, "prefix") else {
                return Ok(Outcome::skipped("no prefix"));
            };
            let id = civi.get_or_create_option_value("individual_prefix", &label)?;
            if !id.is_truthy() {
                return Ok(Outcome::skipped(format!("prefix '{label}' could not be resolved")));
            }
            id
        }
    };

    let policy = if params.no_update {
        UpdatePolicy::Fill
    } else {
        UpdatePolicy::Update
    };
    let changed = contact.apply(policy, &fields! { "prefix_id" => prefix_id }, true)?;
    Ok(Outcome::from_changes(&contact, &changed))
}

/// Postal and email greeting settings of a contact.
pub fn import_contact_greetings(
    civi: &Civi,
    record: Record,
    params: &ImportParameters,
) -> CiviResult<Outcome> {
    let identifiers = params.identifiers_or(&DEFAULT_PRIMARY);
    let Some(mut contact) = civi.get_entity("Contact", &record, &identifiers)? else {
        return Ok(skip_unidentified("Contact", &record, params));
    };

    let mut proposal = Fields::new();
    for greeting in ["postal_greeting", "email_greeting"] {
        if let Some(label) = text_of(&record, greeting) {
            let group_id = civi.get_option_group_id(greeting)?;
            let value = civi.get_option_value(group_id, &label)?;
            if value.is_truthy() {
                proposal.insert(format!("{greeting}_id"), value);
            } else {
                log::warn!("{} '{}' does not exist", greeting, label);
            }
        }
        let custom = format!("{greeting}_custom");
        if let Some(text) = record.get(&custom).filter(|text| text.is_truthy()) {
            proposal.insert(custom, text.clone());
        }
    }

    let changed = contact.update(&proposal, true)?;
    Ok(Outcome::from_changes(&contact, &changed))
}

/// Memberships with the status given by name and written as-is.
pub fn import_memberships(
    civi: &Civi,
    mut record: Record,
    params: &ImportParameters,
) -> CiviResult<Outcome> {
    let contact_id = resolve_contact(civi, &mut record)?;
    if contact_id == 0 {
        return Ok(Outcome::skipped("contact not found"));
    }
    record.insert("is_override".into(), Value::Int(1));

    if let Some(status) = record.remove("status") {
        let status_id = civi.get_membership_status_id(&status.to_string())?;
        if status_id == 0 {
            return Ok(Outcome::skipped(format!("membership status '{status}' does not exist")));
        }
        record.insert("status_id".into(), Value::Int(status_id));
    }

    let mut primary = vec!["contact_id"];
    if params.multiple {
        primary.extend(["membership_type_id", "membership_type"]);
    }
    let (membership, reconciled) =
        civi.reconcile("Membership", &record, params.policy(), &primary)?;
    log::info!("wrote membership {} for contact {}", membership, contact_id);
    Ok(Outcome::from_reconciled(&membership, &reconciled))
}

/// Toggle tags: every non-identifying column names a tag, its cell says
/// whether the entity should carry it.
pub fn import_entity_tags(civi: &Civi, record: Record, params: &ImportParameters) -> CiviResult<Outcome> {
    let entity_type = params.entity_type_or("Contact");
    let entity_table = params.entity_table_for(entity_type);
    let key_fields = params.identifiers_or(&DEFAULT_PRIMARY);

    let entity_id = resolve_entity_id(civi, entity_type, &record, &key_fields)?;
    if entity_id == 0 {
        return Ok(skip_unidentified(entity_type, &record, params));
    }

    let desired = desired_memberships(&record, &key_fields, |name| civi.get_or_create_tag_id(name, None))?;
    let current = civi.get_entity_tag_ids(entity_id, &entity_table)?;

    let mut changed = false;
    for (tag_id, on) in desired {
        if current.contains(&tag_id) != on {
            changed |= civi.tag_entity(entity_id, &entity_table, tag_id, on)?;
        }
    }
    Ok(written_or_unchanged(changed, entity_id, "tags", entity_type))
}

/// Toggle group memberships of a contact, one group per column.
pub fn import_contact_groups(civi: &Civi, record: Record, params: &ImportParameters) -> CiviResult<Outcome> {
    let key_fields = params.identifiers_or(&DEFAULT_PRIMARY);
    let contact_id = civi.get_contact_id(&record, &key_fields, true)?;
    if contact_id == 0 {
        return Ok(skip_unidentified("Contact", &record, params));
    }

    let desired = desired_memberships(&record, &key_fields, |title| {
        civi.get_or_create_group_id(title, None)
    })?;
    let current = civi.get_contact_group_ids(contact_id)?;

    let mut changed = false;
    for (group_id, on) in desired {
        if current.contains(&group_id) != on {
            changed |= civi.set_group_membership(contact_id, group_id, on)?;
        }
    }
    Ok(written_or_unchanged(changed, contact_id, "groups", "Contact"))
}

/// Delete the entity the record identifies.
///
/// External identifiers resolve to `contact_id`, a `location_type` name to its
/// id. Contacts not found are looked up once more among deleted contacts.
pub fn import_delete_entity(
    civi: &Civi,
    mut record: Record,
    params: &ImportParameters,
) -> CiviResult<Outcome> {
    let entity_type = params.entity_type_or("Contact");
    let mut identifiers: Vec<String> = params
        .identifiers_or(&DEFAULT_PRIMARY)
        .into_iter()
        .map(str::to_string)
        .collect();

    for column in ["contact_external_identifier", "external_identifier"] {
        let Some(external) = record.remove(column) else {
            continue;
        };
        if let Some(position) = identifiers.iter().position(|name| name == column) {
            identifiers[position] = "contact_id".to_string();
        }
        let contact_id = if external.is_truthy() {
            civi.get_contact_id(
                &fields! { "external_identifier" => external },
                &["external_identifier"],
                true,
            )?
        } else {
            0
        };
        if contact_id == 0 {
            return Ok(skip_unidentified(entity_type, &record, params));
        }
        record.insert("contact_id".into(), Value::Int(contact_id));
    }

    if !record.contains_key("location_type_id") {
        if let Some(location) = record.remove("location_type") {
            let location_type_id = civi.get_location_type_id(&location.to_string())?;
            record.insert("location_type_id".into(), Value::Int(location_type_id));
            if let Some(position) = identifiers.iter().position(|name| name == "location_type") {
                identifiers[position] = "location_type_id".to_string();
            }
        }
    }

    let mut primary: Vec<&str> = identifiers.iter().map(String::as_str).collect();
    let mut entity = civi.get_entity(entity_type, &record, &primary)?;
    if entity.is_none() && entity_type == "Contact" {
        record.insert("is_deleted".into(), Value::Int(1));
        primary.push("is_deleted");
        entity = civi.get_entity(entity_type, &record, &primary)?;
    }

    match entity {
        Some(entity) => {
            let id = entity.id().unwrap_or(0);
            entity.delete()?;
            Ok(Outcome::Written(id))
        }
        None => Ok(skip_unidentified(entity_type, &record, params)),
    }
}

/// Id of the entity a tagging record refers to, `0` if unknown.
fn resolve_entity_id(civi: &Civi, entity_type: &str, record: &Record, key_fields: &[&str]) -> CiviResult<i64> {
    if entity_type == "Contact" {
        civi.get_contact_id(record, key_fields, true)
    } else {
        civi.get_entity_id(entity_type, record, key_fields)
    }
}

/// Look up the record's contact and store it as `contact_id`; `0` if unknown.
fn resolve_contact(civi: &Civi, record: &mut Record) -> CiviResult<i64> {
    let contact_id = civi.get_contact_id(record, &["external_identifier"], true)?;
    if contact_id != 0 {
        record.insert("contact_id".into(), Value::Int(contact_id));
    }
    Ok(contact_id)
}

/// Drop the columns that identified the contact so they are not mistaken
/// for attributes of the contact's email, phone or website.
fn strip_identification(record: &mut Record) {
    record.remove("id");
    record.remove("external_identifier");
}

/// Set `location_type_id` from the `location_type` column, falling back to
/// the import's default location type.
fn resolve_location_type(
    civi: &Civi,
    record: &mut Record,
    params: &ImportParameters,
) -> CiviResult<Resolved<i64>> {
    let location_name = record.remove("location_type");
    if let Some(id) = record.get("location_type_id").and_then(Value::as_i64) {
        return Ok(Ok(id));
    }
    let name = location_name
        .filter(Value::is_truthy)
        .map(|value| value.to_string())
        .unwrap_or_else(|| params.location_type.clone());
    let location_type_id = civi.get_location_type_id(&name)?;
    if location_type_id == 0 {
        return Ok(Err(Outcome::skipped(format!("unknown location type '{name}'"))));
    }
    record.insert("location_type_id".into(), Value::Int(location_type_id));
    Ok(Ok(location_type_id))
}

/// Contact, payment instrument, campaign and status of a (recurring)
/// contribution.
fn resolve_contribution_references(
    civi: &Civi,
    record: &mut Record,
    params: &ImportParameters,
) -> CiviResult<Resolved<()>> {
    if let Some(external) = record.remove("contact_external_identifier") {
        if external.is_truthy() {
            let contact_id = civi.get_contact_id(
                &fields! { "external_identifier" => external },
                &["external_identifier"],
                true,
            )?;
            record.insert("contact_id".into(), Value::Int(contact_id));
        }
    }
    if !is_set(record, "contact_id") {
        match params.fallback_contact {
            Some(fallback) => {
                log::info!("contact not found, attributing contribution to fallback contact {}", fallback);
                record.insert("contact_id".into(), Value::Int(fallback));
            }
            None => return Ok(Err(Outcome::skipped("contact not found and no fallback contact"))),
        }
    }

    if let Some(instrument) = take_truthy(record, "payment_instrument") {
        let group_id = civi.get_option_group_id("payment_instrument")?;
        record.insert("payment_instrument_id".into(), civi.get_option_value(group_id, &instrument)?);
    }
    if !is_set(record, "payment_instrument_id") {
        return Ok(Err(Outcome::skipped("no valid payment instrument")));
    }

    if let Some(campaign) = take_truthy(record, "contribution_campaign") {
        let campaign_id = civi.get_campaign_id(&campaign, &params.campaign_identifier)?;
        if campaign_id == 0 {
            log::warn!("campaign '{}' not found", campaign);
        } else {
            record.insert("contribution_campaign_id".into(), Value::Int(campaign_id));
        }
    }

    if let Some(status) = take_truthy(record, "contribution_status") {
        let group_id = civi.get_option_group_id("contribution_status")?;
        record.insert("contribution_status_id".into(), civi.get_option_value(group_id, &status)?);
    }
    if !is_set(record, "contribution_status_id") {
        return Ok(Err(Outcome::skipped("no valid contribution status")));
    }
    Ok(Ok(()))
}

/// Member id per non-key column and whether the cell asks for membership.
fn desired_memberships<F>(record: &Record, key_fields: &[&str], resolve: F) -> CiviResult<BTreeMap<i64, bool>>
where
    F: Fn(&str) -> CiviResult<i64>,
{
    let mut desired = BTreeMap::new();
    for (column, cell) in record {
        if key_fields.contains(&column.as_str()) {
            continue;
        }
        let id = resolve(column)?;
        if id == 0 {
            log::warn!("'{}' could not be resolved", column);
            continue;
        }
        desired.insert(id, is_truthy_cell(cell));
    }
    Ok(desired)
}

pub fn is_truthy_cell(cell: &Value) -> bool {
    let text = cell.to_string().trim().to_lowercase();
    TRUTHY_CELLS.contains(&text.as_str())
}

fn is_set(record: &Record, key: &str) -> bool {
    record.get(key).is_some_and(Value::is_truthy)
}

/// Remove `key` and return its text when it carries a value.
fn take_truthy(record: &mut Record, key: &str) -> Option<String> {
    record
        .remove(key)
        .filter(Value::is_truthy)
        .map(|value| value.to_string())
}

/// Text of a non-blank cell.
fn text_of(record: &Record, key: &str) -> Option<String> {
    record
        .get(key)
        .filter(|value| value.is_truthy())
        .map(|value| value.to_string())
}

/// Case-insensitive comparison of a stored value with imported text.
fn same_text(stored: Option<&Value>, text: &str) -> bool {
    stored.is_some_and(|value| value.to_string().trim().to_lowercase() == text.trim().to_lowercase())
}

fn skip_unidentified(entity_type: &str, record: &Fields, params: &ImportParameters) -> Outcome {
    if params.silent {
        log::debug!("could not identify {} from {:?}", entity_type, record);
    } else {
        log::warn!("could not identify {} from {:?}", entity_type, record);
    }
    Outcome::skipped(format!("{entity_type} not found"))
}

fn written_or_unchanged(changed: bool, id: i64, what: &str, entity_type: &str) -> Outcome {
    if changed {
        log::info!("modified {} for {} [{}]", what, entity_type, id);
        Outcome::Written(id)
    } else {
        log::info!("{} are up to date for {} [{}]", what, entity_type, id);
        Outcome::Unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn importer_names_round_trip() {
        for importer in Importer::ALL {
            assert_eq!(importer.name().parse::<Importer>().unwrap(), importer);
        }
        assert!("contacts".parse::<Importer>().is_err());
    }

    #[test]
    fn truthy_cells_follow_spreadsheet_habits() {
        for cell in ["x", "X", " yes ", "Ja", "1", "TRUE"] {
            assert!(is_truthy_cell(&Value::from(cell)), "{cell}");
        }
        for cell in ["", "0", "no", "nein", "false"] {
            assert!(!is_truthy_cell(&Value::from(cell)), "{cell}");
        }
        assert!(is_truthy_cell(&Value::Int(1)));
    }

    #[test]
    fn take_truthy_drops_blank_cells() {
        let mut record = fields! { "payment_instrument" => "", "contribution_status" => "Completed" };
        assert_eq!(take_truthy(&mut record, "payment_instrument"), None);
        assert!(!record.contains_key("payment_instrument"));
        assert_eq!(take_truthy(&mut record, "contribution_status").as_deref(), Some("Completed"));
    }
}
