use crate::entity::UpdatePolicy;
use crate::error::CiviError;
use std::fmt;
use std::str::FromStr;

/// How imported notes meet existing ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NoteMode {
    /// Every record adds a note unless it names a note id.
    #[default]
    Add,
    /// A note with the same subject on the same entity is overwritten.
    ReplaceSubject,
}

impl FromStr for NoteMode {
    type Err = CiviError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(NoteMode::Add),
            "replace-subject" | "replace_subject" => Ok(NoteMode::ReplaceSubject),
            other => Err(CiviError::Config(format!(
                "unknown note mode '{other}', expected 'add' or 'replace-subject'"
            ))),
        }
    }
}

impl fmt::Display for NoteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NoteMode::Add => "add",
            NoteMode::ReplaceSubject => "replace-subject",
        })
    }
}

/// Settings shared by all records of one import run.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportParameters {
    /// Entity kind; each importer has its own default.
    pub entity_type: Option<String>,
    /// Merge policy; `update` unless an importer says otherwise.
    pub update_policy: Option<UpdatePolicy>,
    /// Identifying columns; each importer has its own default.
    pub identifiers: Option<Vec<String>>,
    /// Contact id contributions fall back to when their contact is unknown.
    pub fallback_contact: Option<i64>,
    /// Campaign attribute matched against the `contribution_campaign` column.
    pub campaign_identifier: String,
    /// Location type used when a record names none.
    pub location_type: String,
    /// Phone type used when a record names none.
    pub phone_type: String,
    /// Entity table for tagging, derived from `entity_type` when unset.
    pub entity_table: Option<String>,
    /// Never touch existing addresses, emails, phones or prefixes.
    pub no_update: bool,
    /// Allow several memberships, emails, phones or websites per contact
    /// and type.
    pub multiple: bool,
    pub note_mode: NoteMode,
    /// Do not warn about records that identify nothing.
    pub silent: bool,
}

impl Default for ImportParameters {
    fn default() -> Self {
        Self {
            entity_type: None,
            update_policy: None,
            identifiers: None,
            fallback_contact: None,
            campaign_identifier: "title".to_string(),
            location_type: "Main".to_string(),
            phone_type: "Phone".to_string(),
            entity_table: None,
            no_update: false,
            multiple: false,
            note_mode: NoteMode::Add,
            silent: false,
        }
    }
}

impl ImportParameters {
    pub fn entity_type_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.entity_type.as_deref().unwrap_or(default)
    }

    pub fn policy_or(&self, default: UpdatePolicy) -> UpdatePolicy {
        self.update_policy.unwrap_or(default)
    }

    pub fn policy(&self) -> UpdatePolicy {
        self.policy_or(UpdatePolicy::Update)
    }

    pub fn identifiers_or<'a>(&'a self, default: &[&'a str]) -> Vec<&'a str> {
        match &self.identifiers {
            Some(identifiers) => identifiers.iter().map(String::as_str).collect(),
            None => default.to_vec(),
        }
    }

    /// `civicrm_<snake_case>` table for the entity type.
    pub fn entity_table_for(&self, entity_type: &str) -> String {
        if let Some(table) = &self.entity_table {
            return table.clone();
        }
        entity_table(entity_type)
    }
}

/// `civicrm_<snake_case>` table name of an entity type.
pub fn entity_table(entity_type: &str) -> String {
    let mut table = String::from("civicrm");
    for ch in entity_type.chars() {
        if ch.is_ascii_uppercase() {
            table.push('_');
        }
        table.push(ch.to_ascii_lowercase());
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_tables_are_snake_case() {
        let params = ImportParameters::default();
        assert_eq!(params.entity_table_for("Contact"), "civicrm_contact");
        assert_eq!(params.entity_table_for("ContributionRecur"), "civicrm_contribution_recur");

        let explicit = ImportParameters {
            entity_table: Some("civicrm_value_custom".into()),
            ..ImportParameters::default()
        };
        assert_eq!(explicit.entity_table_for("Contact"), "civicrm_value_custom");
    }

    #[test]
    fn identifier_defaults_apply_until_overridden() {
        let params = ImportParameters::default();
        assert_eq!(params.identifiers_or(&["id", "trxn_id"]), vec!["id", "trxn_id"]);

        let custom = ImportParameters {
            identifiers: Some(vec!["email".into()]),
            ..ImportParameters::default()
        };
        assert_eq!(custom.identifiers_or(&["id"]), vec!["email"]);
        assert_eq!(custom.entity_type_or("Contact"), "Contact");
    }

    #[test]
    fn policy_defaults_per_importer() {
        let params = ImportParameters::default();
        assert_eq!(params.policy(), UpdatePolicy::Update);
        assert_eq!(params.policy_or(UpdatePolicy::Fill), UpdatePolicy::Fill);

        let explicit = ImportParameters {
            update_policy: Some(UpdatePolicy::Replace),
            ..ImportParameters::default()
        };
        assert_eq!(explicit.policy_or(UpdatePolicy::Fill), UpdatePolicy::Replace);
    }

    #[test]
    fn note_modes_parse() {
        assert_eq!("replace-subject".parse::<NoteMode>().unwrap(), NoteMode::ReplaceSubject);
        assert_eq!(NoteMode::default().to_string(), "add");
        assert!("merge".parse::<NoteMode>().is_err());
    }
}
