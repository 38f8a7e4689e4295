use bci_launcher::triggers::TriggerDef;

#[test]
fn parses_names_in_file_order() {
    let def = TriggerDef::parse(
        "# markers\nINIT 1\n\nLEFT_HAND 10   # imagined left hand\nRIGHT_HAND 11\n",
    )
    .unwrap();
    assert_eq!(def.len(), 3);
    assert_eq!(def.names(), ["INIT", "LEFT_HAND", "RIGHT_HAND"]);
    assert_eq!(def.by_name("LEFT_HAND"), Some(10));
    assert_eq!(def.by_value(11), Some("RIGHT_HAND"));
    assert_eq!(def.by_name("FEET"), None);
}

#[test]
fn first_name_wins_for_shared_values() {
    let def = TriggerDef::parse("A 1\nB 1\n").unwrap();
    assert_eq!(def.by_value(1), Some("A"));
    assert_eq!(def.by_name("B"), Some(1));
}

#[test]
fn reports_the_failing_line() {
    let err = TriggerDef::parse("A 1\nB two\n").unwrap_err();
    assert!(err.to_string().contains("line 2"), "{}", err);

    assert!(TriggerDef::parse("A 1 2\n").is_err());
    assert!(TriggerDef::parse("A 1\nA 2\n").is_err());
    assert!(TriggerDef::parse("").unwrap().is_empty());
}

#[test]
fn loads_shipped_trigger_file() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config_files/mi/template_files/triggers.txt");
    let def = TriggerDef::load(&path).unwrap();
    assert_eq!(def.by_name("INIT"), Some(1));
    assert!(def.names().iter().any(|n| n == "LEFT_HAND"));
}
