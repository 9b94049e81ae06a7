use civicrm_client::test_support::{MockCaller, init_test_logger};
use civicrm_client::{ApiReply, Civi, CiviError, Value, fields};
use std::collections::BTreeSet;

fn session() -> (Civi, MockCaller) {
    init_test_logger();
    let mock = MockCaller::new();
    (Civi::new(mock.clone()), mock)
}

fn toggled(flag: &str) -> ApiReply {
    let mut reply = ApiReply::empty();
    reply.extra.insert(flag.to_string(), Value::Int(1));
    reply
}

#[test]
fn contact_id_prefers_explicit_ids() {
    let (civi, mock) = session();
    let id = civi
        .get_contact_id(&fields! { "contact_id" => "17", "external_identifier" => "X" }, &["external_identifier"], true)
        .expect("lookup succeeds");
    assert_eq!(id, 17);
    assert_eq!(mock.call_count(), 0);
}

#[test]
fn contact_id_retries_among_deleted_contacts() {
    let (civi, mock) = session();
    mock.records("Contact", "get", vec![]);
    mock.records("Contact", "get", vec![fields! { "contact_id" => "23" }]);

    let id = civi
        .get_contact_id(&fields! { "external_identifier" => "X9" }, &["external_identifier"], true)
        .expect("lookup succeeds");

    assert_eq!(id, 23);
    let gets = mock.calls_to("Contact", "get");
    assert_eq!(gets.len(), 2);
    assert_eq!(gets[0].params.get("is_deleted"), None);
    assert_eq!(gets[1].params.get("is_deleted"), Some(&Value::Int(1)));
    assert_eq!(gets[1].params.get("return"), Some(&Value::from("contact_id")));
}

#[test]
fn contact_id_is_zero_when_unknown() {
    let (civi, mock) = session();
    let id = civi
        .get_contact_id(&fields! { "external_identifier" => "nobody" }, &["external_identifier"], false)
        .expect("lookup succeeds");
    assert_eq!(id, 0);
    assert_eq!(mock.calls_to("Contact", "get").len(), 1);

    let id = civi
        .get_contact_id(&fields! { "first_name" => "Ann" }, &["external_identifier"], true)
        .expect("nothing to look up");
    assert_eq!(id, 0);
    assert_eq!(mock.call_count(), 1);
}

#[test]
fn reference_lookups_are_cached_including_misses() {
    let (civi, mock) = session();
    mock.records("OptionGroup", "get", vec![fields! { "id" => 31, "name" => "payment_instrument" }]);

    for _ in 0..3 {
        assert_eq!(civi.get_option_group_id("payment_instrument").expect("lookup"), 31);
        assert_eq!(civi.get_custom_field_id("Shoe size").expect("lookup"), 0);
    }

    assert_eq!(mock.calls_to("OptionGroup", "get").len(), 1);
    assert_eq!(mock.calls_to("CustomField", "get").len(), 1);
    assert!(civi.id_cache().contains("custom_field", "Shoe size"));
}

#[test]
fn resolver_errors_are_not_cached() {
    let (civi, mock) = session();
    mock.reply("Campaign", "get", ApiReply::error("temporarily unavailable"));
    mock.records("Campaign", "get", vec![fields! { "id" => 4, "title" => "Spring" }]);

    assert!(civi.get_campaign_id("Spring", "title").is_err());
    assert_eq!(civi.get_campaign_id("Spring", "title").expect("second attempt"), 4);
    assert_eq!(civi.get_campaign_id("Spring", "title").expect("cached"), 4);
    assert_eq!(mock.calls_to("Campaign", "get").len(), 2);
}

#[test]
fn campaigns_are_cached_per_identifying_attribute() {
    let (civi, mock) = session();
    mock.records("Campaign", "get", vec![fields! { "id" => 4 }]);
    mock.records("Campaign", "get", vec![fields! { "id" => 5 }]);

    assert_eq!(civi.get_campaign_id("2024", "title").expect("by title"), 4);
    assert_eq!(civi.get_campaign_id("2024", "external_identifier").expect("by external id"), 5);

    let gets = mock.calls_to("Campaign", "get");
    assert_eq!(gets[0].params, fields! { "title" => "2024" });
    assert_eq!(gets[1].params, fields! { "external_identifier" => "2024" });
}

#[test]
fn option_values_resolve_to_their_value_column() {
    let (civi, mock) = session();
    mock.records("OptionValue", "get", vec![fields! { "id" => 90, "name" => "Cash", "value" => "3" }]);

    assert_eq!(civi.get_option_value(31, "Cash").expect("lookup"), Value::from("3"));
    assert_eq!(civi.get_option_value(31, "Cash").expect("cached"), Value::from("3"));
    assert_eq!(civi.get_option_value(31, "Barter").expect("lookup"), Value::Null);
    assert_eq!(mock.calls_to("OptionValue", "get").len(), 2);
}

#[test]
fn missing_prefix_options_are_created_once() {
    let (civi, mock) = session();
    mock.records("OptionGroup", "get", vec![fields! { "id" => 6, "name" => "individual_prefix" }]);
    mock.records("OptionValue", "create", vec![fields! { "id" => 200, "value" => "7" }]);

    for _ in 0..2 {
        let value = civi
            .get_or_create_option_value("individual_prefix", "Prof.")
            .expect("get or create");
        assert_eq!(value, Value::from("7"));
    }

    let creates = mock.calls_to("OptionValue", "create");
    assert_eq!(creates.len(), 1);
    assert_eq!(
        creates[0].params,
        fields! { "option_group_id" => 6, "name" => "Prof." }
    );
    assert_eq!(
        civi.get_or_create_option_value("individual_prefix", "  ").expect("blank label"),
        Value::Null
    );
}

#[test]
fn created_options_replace_a_cached_miss() {
    let (civi, mock) = session();
    mock.records("OptionGroup", "get", vec![fields! { "id" => 6, "name" => "individual_prefix" }]);
    mock.records("OptionValue", "create", vec![fields! { "id" => 201, "value" => "8" }]);

    assert_eq!(civi.get_option_value(6, "Dr.").expect("lookup"), Value::Null);
    assert_eq!(
        civi.get_or_create_option_value("individual_prefix", "Dr.").expect("create"),
        Value::from("8")
    );
    assert_eq!(civi.get_option_value(6, "Dr.").expect("cached"), Value::from("8"));

    assert_eq!(mock.calls_to("OptionValue", "get").len(), 2);
    assert_eq!(civi.value_cache().get("option_value", "6/Dr."), Some(Value::from("8")));
}

#[test]
fn ambiguous_location_types_are_errors() {
    let (civi, mock) = session();
    mock.records("LocationType", "get", vec![fields! { "id" => 1 }, fields! { "id" => 2 }]);

    assert!(matches!(
        civi.get_location_type_id("Main"),
        Err(CiviError::Ambiguous { count: 2, .. })
    ));
    assert!(!civi.id_cache().contains("location_type", "Main"));
}

#[test]
fn tags_and_groups_are_created_when_missing() {
    let (civi, mock) = session();
    mock.records("Tag", "get", vec![fields! { "id" => 3, "name" => "Donor" }]);

    assert_eq!(civi.get_or_create_tag_id("Donor", None).expect("existing tag"), 3);
    let created = civi
        .get_or_create_tag_id("Volunteer", Some("imported"))
        .expect("new tag");
    assert!(created > 0);
    assert_eq!(
        mock.calls_to("Tag", "create")[0].params,
        fields! { "name" => "Volunteer", "description" => "imported" }
    );

    let group = civi.get_or_create_group_id("Newsletter", None).expect("new group");
    assert_eq!(civi.get_or_create_group_id("Newsletter", None).expect("cached"), group);
    assert_eq!(
        mock.calls_to("Group", "create")[0].params,
        fields! { "title" => "Newsletter", "group_type" => "[2]" }
    );
    assert_eq!(mock.calls_to("Group", "get").len(), 1);
}

#[test]
fn custom_field_values_are_written_by_label() {
    let (civi, mock) = session();
    mock.records("CustomField", "get", vec![fields! { "id" => 12, "label" => "Shoe size" }]);

    assert!(civi.set_custom_field_value(5, "Shoe size", 44).expect("write"));
    assert!(!civi.set_custom_field_value(5, "Hat size", 7).expect("unknown field"));

    let writes = mock.calls_to("CustomValue", "create");
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].params, fields! { "entity_id" => 5, "custom_12" => 44 });
}

#[test]
fn tag_and_group_toggles_report_remote_changes() {
    let (civi, mock) = session();
    mock.reply("EntityTag", "create", toggled("added"));
    mock.reply("EntityTag", "delete", ApiReply::empty());
    mock.reply("GroupContact", "delete", toggled("removed"));

    assert!(civi.tag_entity(5, "civicrm_contact", 3, true).expect("tag"));
    assert!(!civi.tag_entity(5, "civicrm_contact", 3, false).expect("untag"));
    assert!(civi.set_group_membership(5, 8, false).expect("leave group"));
}

#[test]
fn membership_listings_must_be_complete() {
    let (civi, mock) = session();
    mock.records("EntityTag", "get", vec![
        fields! { "tag_id" => "3" },
        fields! { "tag_id" => "4" },
    ]);
    let mut truncated = ApiReply::with_values(vec![fields! { "group_id" => 8 }]);
    truncated.count = 2;
    mock.reply("GroupContact", "get", truncated);

    assert_eq!(
        civi.get_entity_tag_ids(5, "civicrm_contact").expect("tags"),
        BTreeSet::from([3, 4])
    );
    assert!(matches!(civi.get_contact_group_ids(5), Err(CiviError::Record(_))));
}

#[test]
fn option_value_ids_take_the_first_of_several() {
    let (civi, mock) = session();
    mock.records("OptionValue", "get", vec![
        fields! { "id" => 41, "name" => "Completed" },
        fields! { "id" => 42, "name" => "Completed" },
    ]);

    assert_eq!(civi.get_option_value_id(32, "Completed").expect("lookup"), 41);
    assert_eq!(civi.get_option_value_id(32, "Completed").expect("cached"), 41);
    assert_eq!(mock.calls_to("OptionValue", "get").len(), 1);
}

#[test]
fn generic_entity_ids_are_looked_up_uncached() {
    let (civi, mock) = session();
    mock.records("Event", "get", vec![fields! { "id" => "61" }]);

    let attributes = fields! { "title" => "Gala 2026", "start_date" => "2026-11-01" };
    assert_eq!(civi.get_entity_id("Event", &attributes, &["title"]).expect("lookup"), 61);
    assert_eq!(civi.get_entity_id("Event", &attributes, &["title"]).expect("second lookup"), 0);

    let gets = mock.calls_to("Event", "get");
    assert_eq!(gets.len(), 2);
    assert_eq!(gets[0].params, fields! { "title" => "Gala 2026", "return" => "id" });
}
