use serde_json::json;

use super::*;

fn app_with_units(name: &str, units: &[(&str, &str)]) -> Application {
    Application {
        name: name.to_string(),
        units: units
            .iter()
            .map(|(unit, machine)| Unit::new(*unit, *machine))
            .collect(),
        ..Application::default()
    }
}

#[test]
fn test_empty_model() {
    let model = Model::default();
    assert!(model.get_application("foo").is_none());
    assert!(!model.has_relation("a", "b", "c", "d"));
    assert!(model.unit_machines_without_app("foo", "bar", "").is_empty());
}

#[test]
fn test_machine_id_helpers() {
    assert_eq!(top_level_machine("0"), "0");
    assert_eq!(top_level_machine("2/lxd/0"), "2");
    assert_eq!(top_level_machine("2/lxd/0/kvm/1"), "2");
    assert_eq!(container_type("0"), None);
    assert_eq!(container_type("2/lxd/0"), Some("lxd"));
    assert_eq!(container_type("2/lxd/0/kvm/1"), Some("kvm"));
    assert_eq!(parent_machine("0"), "0");
    assert_eq!(parent_machine("2/lxd/0"), "2");
    assert_eq!(parent_machine("2/lxd/0/kvm/1"), "2/lxd/0");
}

#[test]
fn test_has_charm_is_exact() {
    let mut model = Model::default();
    model.applications.insert(
        String::from("foo"),
        Application {
            name: String::from("foo"),
            charm: String::from("cs:foo"),
            ..Application::default()
        },
    );
    assert!(!model.has_charm("foo"));
    assert!(model.has_charm("cs:foo"));
}

#[test]
fn test_has_relation_either_order() {
    let model = Model {
        relations: vec![Relation::new("django", "pgsql", "postgresql", "db")],
        ..Model::default()
    };
    assert!(model.has_relation("django", "pgsql", "postgresql", "db"));
    assert!(model.has_relation("postgresql", "db", "django", "pgsql"));
    assert!(!model.has_relation("django", "pgsql", "mysql", "db"));
}

#[test]
fn test_unit_machines_without_app_source_no_target() {
    let mut model = Model::default();
    model.applications.insert(
        String::from("django"),
        app_with_units(
            "django",
            &[("django/0", "0"), ("django/1", "10"), ("django/2", "2")],
        ),
    );
    // Also checks natural sorting of the result.
    assert_eq!(
        model.unit_machines_without_app("django", "nginx", ""),
        vec!["0", "2", "10"]
    );
}

#[test]
fn test_unit_machines_without_app_source_all_target() {
    let mut model = Model::default();
    model.applications.insert(
        String::from("django"),
        app_with_units(
            "django",
            &[("django/0", "0"), ("django/1", "1"), ("django/2", "2")],
        ),
    );
    model.applications.insert(
        String::from("nginx"),
        app_with_units(
            "nginx",
            &[
                ("nginx/0", "0"),
                ("nginx/1", "1"),
                ("nginx/2", "2"),
                ("nginx/3", "3"),
            ],
        ),
    );
    assert!(model
        .unit_machines_without_app("django", "nginx", "")
        .is_empty());
}

#[test]
fn test_unit_machines_without_app_target_in_container() {
    let mut model = Model::default();
    model.applications.insert(
        String::from("django"),
        app_with_units(
            "django",
            &[("django/0", "0"), ("django/1", "1"), ("django/2", "2")],
        ),
    );
    model.applications.insert(
        String::from("nginx"),
        app_with_units(
            "nginx",
            &[("nginx/0", "0"), ("nginx/2", "2/lxd/0"), ("nginx/3", "3")],
        ),
    );
    // Machine 2 remains: its nginx unit is in a container, not next to the
    // django unit.
    assert_eq!(
        model.unit_machines_without_app("django", "nginx", ""),
        vec!["1", "2"]
    );
}

#[test]
fn test_unit_machines_without_app_container_scope() {
    let mut model = Model::default();
    model.applications.insert(
        String::from("django"),
        app_with_units(
            "django",
            &[
                ("django/0", "0"),
                ("django/1", "1"),
                ("django/2", "2"),
                ("django/3", "3"),
                ("django/4", "4"),
                ("django/5", "4"),
            ],
        ),
    );
    model.applications.insert(
        String::from("nginx"),
        app_with_units(
            "nginx",
            &[
                ("nginx/0", "0"),
                ("nginx/1", "1/lxd/3"),
                ("nginx/2", "2/lxd/0"),
                ("nginx/3", "1/lxd/2"),
                ("nginx/4", "3/kvm/2"),
            ],
        ),
    );
    assert_eq!(
        model.unit_machines_without_app("django", "nginx", "lxd"),
        vec!["0", "3", "4"]
    );
}

#[test]
fn test_machine_has_app() {
    let mut model = Model::default();
    model.applications.insert(
        String::from("django"),
        app_with_units("django", &[("django/0", "0")]),
    );
    model.applications.insert(
        String::from("nginx"),
        app_with_units("nginx", &[("nginx/0", "0/lxd/3"), ("nginx/2", "2/kvm/2")]),
    );

    assert!(model.machine_has_app("0", "django", ""));
    assert!(!model.machine_has_app("0", "django", "lxd"));
    assert!(!model.machine_has_app("4", "django", ""));

    assert!(!model.machine_has_app("0", "nginx", ""));
    assert!(model.machine_has_app("0", "nginx", "lxd"));
    assert!(!model.machine_has_app("0", "nginx", "kvm"));

    assert!(!model.machine_has_app("2", "nginx", ""));
    assert!(!model.machine_has_app("2", "nginx", "lxd"));
    assert!(model.machine_has_app("2", "nginx", "kvm"));
}

#[test]
fn test_unsatisfied_machine_and_unit_placements() {
    let mut model = Model::default();
    model.applications.insert(
        String::from("django"),
        app_with_units(
            "django",
            &[
                ("django/0", "0/lxd/0"),
                ("django/1", "1/lxd/0"),
                ("django/2", "2/lxd/0"),
            ],
        ),
    );
    model.applications.insert(
        String::from("nginx"),
        app_with_units(
            "nginx",
            &[("nginx/0", "0"), ("nginx/2", "2"), ("nginx/3", "3")],
        ),
    );

    let check = |app: &str, placements: &[&str], expected: &[&str]| {
        let input: Vec<String> = placements.iter().map(ToString::to_string).collect();
        let result = model.unsatisfied_machine_and_unit_placements(app, &input);
        assert_eq!(result, expected, "{app}: {placements:?}");
    };

    let all = ["other-app", "new", "lxd:new", "lxd:app-name"];
    check("unknown", &all, &all);
    check("nginx", &all, &all);
    check("nginx", &["0", "2", "3"], &[]);
    check("nginx", &["lxd:0", "lxd:2", "lxd:3"], &["lxd:0", "lxd:2", "lxd:3"]);
    check("nginx", &["0", "1", "2"], &["1"]);
    check("nginx", &["0", "5", "4", "2"], &["5", "4"]);
    check("django", &["0", "1", "2"], &["0", "1", "2"]);
    check("django", &["lxd:0", "lxd:1", "lxd:2"], &[]);
    check("django", &["lxd:0", "lxd:4", "lxd:2"], &["lxd:4"]);
    check(
        "django",
        &["lxd:nginx/0", "lxd:nginx/1", "lxd:nginx/2"],
        &["lxd:nginx/1"],
    );
    check(
        "django",
        &["lxd:nginx/0", "lxd:nginx/2", "lxd:nginx/3"],
        &["lxd:nginx/3"],
    );
}

#[test]
fn test_bundle_machine_mapped() {
    let mut model = Model::default();
    for id in ["0", "0/lxd/0", "2"] {
        model.machines.insert(
            id.to_string(),
            Machine {
                id: id.to_string(),
                ..Machine::default()
            },
        );
    }
    model
        .machine_map
        .insert(String::from("0"), String::from("2"));
    assert_eq!(model.bundle_machine("0").map(|m| m.id.as_str()), Some("2"));
    assert!(model.bundle_machine("1").is_none());
}

#[test]
fn test_bundle_machine_identity_fallback() {
    let mut model = Model::default();
    model.machines.insert(
        String::from("0"),
        Machine {
            id: String::from("0"),
            ..Machine::default()
        },
    );
    // No machine map entry: the identically-named machine is used.
    assert_eq!(model.bundle_machine("0").map(|m| m.id.as_str()), Some("0"));
    assert!(model.bundle_machine("3").is_none());
}

fn infer_bundle() -> Bundle {
    Bundle::from_yaml(
        r#"
        applications:
            django:
                charm: cs:trusty/django-42
                num_units: 5
                to:
                    - new
                    - 4
                    - kvm:8
                    - lxc:new
        machines:
            4:
                constraints: "cpu-cores=4"
            8:
                constraints: "cpu-cores=8"
        "#,
    )
    .unwrap()
}

#[test]
fn test_infer_machine_map_empty_model() {
    let mut model = Model::default();
    model.infer_machine_map(&infer_bundle());
    assert!(model.machine_map.is_empty());
}

#[test]
fn test_infer_machine_map_supplied_mapping() {
    let mut model = Model::default();
    model
        .machine_map
        .insert(String::from("4"), String::from("0"));
    model
        .machine_map
        .insert(String::from("8"), String::from("2"));
    model.infer_machine_map(&infer_bundle());
    assert_eq!(model.machine_map.len(), 2);
    assert_eq!(model.machine_map["4"], "0");
    assert_eq!(model.machine_map["8"], "2");
}

#[test]
fn test_infer_machine_map_partial() {
    let mut model = Model::default();
    model.applications.insert(
        String::from("django"),
        app_with_units(
            "django",
            &[("django/0", "0"), ("django/1", "1"), ("django/2", "2")],
        ),
    );
    model
        .machine_map
        .insert(String::from("4"), String::from("0"));
    model.infer_machine_map(&infer_bundle());
    // Machine 8 sits at directive index 2, so it adopts the top-level
    // machine of django's third unit.
    assert_eq!(model.machine_map["4"], "0");
    assert_eq!(model.machine_map["8"], "2");
}

#[test]
fn test_infer_machine_map_deployed_units() {
    let mut model = Model::default();
    model.applications.insert(
        String::from("django"),
        app_with_units(
            "django",
            &[
                ("django/0", "0"),
                ("django/1", "1"),
                ("django/2", "2/kvm/0"),
                ("django/3", "3/lxc/0"),
                ("django/4", "4/lxc/0"),
            ],
        ),
    );
    model.infer_machine_map(&infer_bundle());
    assert_eq!(model.machine_map["4"], "1");
    assert_eq!(model.machine_map["8"], "2");
}

#[test]
fn test_changed_annotations_empty_model_side() {
    let app = Application::default();
    let wanted: BTreeMap<String, String> = [("a", "b"), ("c", "d")]
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    assert_eq!(app.changed_annotations(&wanted), wanted);
}

#[test]
fn test_changed_annotations_some_changes() {
    let mut app = Application::default();
    for (k, v) in [("a", "b"), ("c", "g"), ("f", "p")] {
        app.annotations.insert(k.to_string(), v.to_string());
    }
    let wanted: BTreeMap<String, String> = [("a", "b"), ("c", "d")]
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    let changes = app.changed_annotations(&wanted);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes["c"], "d");
}

#[test]
fn test_changed_options_narrows_json_floats() {
    let mut app = Application::default();
    app.options.insert(String::from("string"), json!("hello"));
    // Integers arrive as floats after a JSON round trip.
    app.options.insert(String::from("int"), json!(42.0));
    app.options.insert(String::from("float"), json!(2.5));
    app.options.insert(String::from("bool"), json!(true));

    let mut wanted = BTreeMap::new();
    wanted.insert(String::from("string"), json!("hello"));
    wanted.insert(String::from("int"), json!(42));
    assert!(app.changed_options(&wanted).is_empty());

    let mut wanted = BTreeMap::new();
    wanted.insert(String::from("string"), json!("world"));
    wanted.insert(String::from("int"), json!(24));
    wanted.insert(String::from("float"), json!(3.14));
    wanted.insert(String::from("bool"), json!(false));
    assert_eq!(app.changed_options(&wanted), wanted);
}

#[test]
fn test_sequence_inference() {
    let mut model = Model::default();
    model.applications.insert(
        String::from("mysql"),
        app_with_units("mysql", &[("mysql/0", "0/lxd/0"), ("mysql/3", "1")]),
    );
    for id in ["0", "1", "0/lxd/0", "0/lxd/1"] {
        model.machines.insert(
            id.to_string(),
            Machine {
                id: id.to_string(),
                ..Machine::default()
            },
        );
    }
    model.initialize_sequence();
    assert_eq!(model.next_unit("mysql"), "mysql/4");
    assert_eq!(model.next_machine(), "2");
    assert_eq!(model.next_container("0", "lxd"), "0/lxd/2");
    assert_eq!(model.next_container("1", "lxd"), "1/lxd/0");
}

#[test]
fn test_sequence_supplied_is_authoritative() {
    let mut model = Model::default();
    model.sequence.insert(String::from("machine"), 3);
    model
        .sequence
        .insert(String::from("application-django"), 2);
    model.initialize_sequence();
    assert_eq!(model.next_machine(), "3");
    assert_eq!(model.next_machine(), "4");
    assert_eq!(model.next_unit("django"), "django/2");
}
