use civicrm_client::{Fields, UpdatePolicy, Value};
use proptest::collection::btree_map;
use proptest::prelude::*;

fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1000i64..1000).prop_map(Value::Int),
        "[a-z0-9]{0,6}".prop_map(Value::String),
    ]
}

fn record() -> impl Strategy<Value = Fields> {
    btree_map("[a-e]", value(), 0..5)
}

proptest! {
    #[test]
    fn update_twice_changes_nothing_the_second_time(mut fields in record(), proposal in record()) {
        UpdatePolicy::Update.merge(&mut fields, &proposal);
        let again = UpdatePolicy::Update.merge(&mut fields, &proposal);
        prop_assert!(again.is_empty());
    }

    #[test]
    fn update_leaves_every_proposed_value_in_place(mut fields in record(), proposal in record()) {
        UpdatePolicy::Update.merge(&mut fields, &proposal);
        for (key, value) in &proposal {
            prop_assert!(fields[key].same_as(value));
        }
    }

    #[test]
    fn fill_never_touches_present_keys(mut fields in record(), proposal in record()) {
        let before = fields.clone();
        let changed = UpdatePolicy::Fill.merge(&mut fields, &proposal);
        for (key, value) in &before {
            prop_assert_eq!(&fields[key], value);
        }
        for key in changed.keys() {
            prop_assert!(!before.contains_key(key));
        }
    }

    #[test]
    fn replace_keeps_the_key_set(mut fields in record(), proposal in record()) {
        let keys: Vec<String> = fields.keys().cloned().collect();
        let changed = UpdatePolicy::Replace.merge(&mut fields, &proposal);
        prop_assert_eq!(fields.keys().cloned().collect::<Vec<_>>(), keys);
        for key in changed.keys() {
            prop_assert!(fields.contains_key(key));
        }
    }

    #[test]
    fn changed_set_is_part_of_the_proposal(fields in record(), proposal in record()) {
        for policy in [UpdatePolicy::Update, UpdatePolicy::Fill, UpdatePolicy::Replace] {
            let changed = policy.merge(&mut fields.clone(), &proposal);
            for (key, value) in &changed {
                prop_assert_eq!(proposal.get(key), Some(value));
            }
        }
    }
}
