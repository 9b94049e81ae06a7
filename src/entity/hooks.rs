//! Per-kind augmentation of a changed-set before it is submitted.
//!
//! Some entity kinds reset omitted fields on a partial update. A hook sees the
//! changed-set and the entity's current fields and returns the set that is
//! actually sent.

use crate::models::Fields;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type StoreHook = Arc<dyn Fn(&Fields, &Fields) -> Fields + Send + Sync>;

/// Fields a Contribution update must always carry, or CiviCRM falls back to
/// its defaults for them.
pub const CONTRIBUTION_COMPANIONS: [&str; 2] = ["currency", "contribution_status_id"];

/// Hook table keyed by entity kind.
#[derive(Clone)]
pub struct StoreHooks {
    by_kind: HashMap<String, Vec<StoreHook>>,
}

impl StoreHooks {
    /// Table without any hooks.
    pub fn empty() -> Self {
        Self {
            by_kind: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, entity_type: &str, hook: F) -> &mut Self
    where
        F: Fn(&Fields, &Fields) -> Fields + Send + Sync + 'static,
    {
        self.by_kind
            .entry(entity_type.to_string())
            .or_default()
            .push(Arc::new(hook));
        self
    }

    pub fn has_hooks(&self, entity_type: &str) -> bool {
        self.by_kind
            .get(entity_type)
            .is_some_and(|hooks| !hooks.is_empty())
    }

    /// Run the kind's hooks in registration order.
    pub fn augment(&self, entity_type: &str, changed: Fields, current: &Fields) -> Fields {
        match self.by_kind.get(entity_type) {
            Some(hooks) => hooks
                .iter()
                .fold(changed, |changed, hook| hook(&changed, current)),
            None => changed,
        }
    }
}

impl Default for StoreHooks {
    fn default() -> Self {
        let mut hooks = Self::empty();
        hooks.register("Contribution", resubmit_companions(&CONTRIBUTION_COMPANIONS));
        hooks
    }
}

impl fmt::Debug for StoreHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self
            .by_kind
            .iter()
            .map(|(kind, hooks)| (kind.as_str(), hooks.len()))
            .collect();
        kinds.sort_unstable();
        f.debug_struct("StoreHooks").field("by_kind", &kinds).finish()
    }
}

/// Hook adding the listed fields from the current state when present there.
pub fn resubmit_companions(
    keys: &'static [&'static str],
) -> impl Fn(&Fields, &Fields) -> Fields + Send + Sync + 'static {
    move |changed: &Fields, current: &Fields| {
        let mut augmented = changed.clone();
        for key in keys {
            if let Some(value) = current.get(*key) {
                augmented
                    .entry((*key).to_string())
                    .or_insert_with(|| value.clone());
            }
        }
        augmented
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;
    use crate::models::Value;

    #[test]
    fn contribution_changes_carry_currency_and_status() {
        let hooks = StoreHooks::default();
        let current = fields! {
            "id" => 5,
            "total_amount" => "20.00",
            "currency" => "EUR",
            "contribution_status_id" => "1",
        };
        let changed = fields! { "total_amount" => "25.00" };

        let sent = hooks.augment("Contribution", changed, &current);
        assert_eq!(
            sent,
            fields! {
                "total_amount" => "25.00",
                "currency" => "EUR",
                "contribution_status_id" => "1",
            }
        );
    }

    #[test]
    fn changed_companion_keeps_new_value() {
        let hooks = StoreHooks::default();
        let current = fields! { "currency" => "USD", "contribution_status_id" => "2" };
        let changed = fields! { "currency" => "USD" };
        let sent = hooks.augment("Contribution", changed, &current);
        assert_eq!(sent["currency"], Value::from("USD"));
        assert_eq!(sent.len(), 2);
    }

    #[test]
    fn other_kinds_pass_through() {
        let hooks = StoreHooks::default();
        let current = fields! { "currency" => "EUR" };
        let changed = fields! { "street_address" => "Main St 1" };
        assert_eq!(hooks.augment("Address", changed.clone(), &current), changed);
        assert!(!hooks.has_hooks("Address"));
    }

    #[test]
    fn hooks_compose_in_order() {
        let mut hooks = StoreHooks::empty();
        hooks
            .register("Note", |changed, _| {
                let mut next = changed.clone();
                next.insert("step".into(), "one".into());
                next
            })
            .register("Note", |changed, _| {
                let mut next = changed.clone();
                next.insert("step".into(), "two".into());
                next
            });
        let sent = hooks.augment("Note", fields! {}, &fields! {});
        assert_eq!(sent["step"], Value::from("two"));
    }
}
