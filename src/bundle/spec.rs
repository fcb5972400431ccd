//! Bundle specification types.
//!
//! These structs map to the bundle YAML document and fully describe the
//! desired deployment: applications, machines, relations, and a default
//! series. They are declarative inputs; the planner never mutates them.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::BundleError;

/// Machine ids appear in bundle YAML as bare numbers (`machines: {1: ...}`,
/// `to: [1, 2]`) or as strings; both normalize to strings.
#[derive(Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(untagged)]
enum IdScalar {
    Number(u64),
    Text(String),
}

impl IdScalar {
    fn into_string(self) -> String {
        match self {
            Self::Number(value) => value.to_string(),
            Self::Text(value) => value,
        }
    }
}

fn id_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let raw: Vec<IdScalar> = Vec::deserialize(deserializer)?;
    Ok(raw.into_iter().map(IdScalar::into_string).collect())
}

fn machine_table<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, Option<MachineSpec>>, D::Error> {
    let raw: BTreeMap<IdScalar, Option<MachineSpec>> =
        BTreeMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(id, spec)| (id.into_string(), spec))
        .collect())
}

/// The root bundle document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Bundle {
    /// Applications to deploy, by name. The legacy `services` key is
    /// accepted as an alias.
    #[serde(default, alias = "services")]
    pub applications: BTreeMap<String, ApplicationSpec>,
    /// Machines declared by the bundle, by id. A machine entry may be
    /// empty (`1:`), which is equivalent to a default spec.
    #[serde(default, deserialize_with = "machine_table")]
    pub machines: BTreeMap<String, Option<MachineSpec>>,
    /// Relations as endpoint pairs, e.g. `[["mediawiki:db", "mysql:db"]]`.
    #[serde(default)]
    pub relations: Vec<[String; 2]>,
    /// Default series for charms and machines that do not declare one.
    #[serde(default, rename = "series")]
    pub default_series: String,
}

impl Bundle {
    /// Parses a bundle from YAML text.
    ///
    /// Only the document shape is checked here; semantic validation is the
    /// concern of an external verifier.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::Malformed`] when the text does not
    /// deserialize into the bundle shape.
    pub fn from_yaml(content: &str) -> Result<Self, BundleError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Returns the machine spec for a bundle machine id, normalizing empty
    /// entries to a default spec.
    #[must_use]
    pub fn machine(&self, id: &str) -> MachineSpec {
        self.machines
            .get(id)
            .and_then(Clone::clone)
            .unwrap_or_default()
    }
}

/// A single application entry in a bundle.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationSpec {
    /// Charm reference: a charm URL (`cs:precise/mediawiki-10`) or a local
    /// charm directory path.
    pub charm: String,
    /// Series override; empty means "derive from the charm or the bundle".
    #[serde(default)]
    pub series: String,
    /// Number of units to run.
    #[serde(default)]
    pub num_units: usize,
    /// Placement directives, one per unit; when shorter than `num_units`
    /// the last repeatable directive is replicated.
    #[serde(default, deserialize_with = "id_list")]
    pub to: Vec<String>,
    /// Charm configuration options (scalar values).
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
    /// Annotations to set on the application.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Constraints string, e.g. `cpu-cores=4 mem=8G`.
    #[serde(default)]
    pub constraints: String,
    /// Storage constraints by store name.
    #[serde(default)]
    pub storage: BTreeMap<String, String>,
    /// Endpoint-to-space bindings.
    #[serde(default, rename = "bindings")]
    pub endpoint_bindings: BTreeMap<String, String>,
    /// Resources by name: charm store revisions or local paths.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceValue>,
    /// Whether the application should be exposed.
    #[serde(default)]
    pub expose: bool,
}

/// A resource value: either a charm store revision or a local file path.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ResourceValue {
    /// A charm store resource revision.
    Revision(i64),
    /// A path to a local resource file.
    Local(String),
}

/// A machine entry in a bundle.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MachineSpec {
    /// Series for the machine; empty means "use the bundle default".
    #[serde(default)]
    pub series: String,
    /// Constraints string for the machine.
    #[serde(default)]
    pub constraints: String,
    /// Annotations to set on the machine.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_bundle() {
        let bundle = Bundle::from_yaml(
            "
            applications:
                django:
                    charm: django
            ",
        )
        .unwrap();
        assert_eq!(bundle.applications.len(), 1);
        let app = &bundle.applications["django"];
        assert_eq!(app.charm, "django");
        assert_eq!(app.num_units, 0);
        assert!(!app.expose);
    }

    #[test]
    fn test_services_alias() {
        let bundle = Bundle::from_yaml(
            "
            services:
                mysql:
                    charm: cs:precise/mysql-28
                    num_units: 1
            series: trusty
            ",
        )
        .unwrap();
        assert_eq!(bundle.default_series, "trusty");
        assert_eq!(bundle.applications["mysql"].num_units, 1);
    }

    #[test]
    fn test_machines_and_relations() {
        let bundle = Bundle::from_yaml(
            r#"
            applications:
                mediawiki:
                    charm: cs:precise/mediawiki-10
                    to: ["lxd:1"]
            machines:
                1:
                2:
                    series: trusty
                    constraints: "cpu-cores=4"
                    annotations:
                        foo: bar
            relations:
                - - mediawiki:db
                  - mysql:db
            "#,
        )
        .unwrap();
        assert_eq!(bundle.machines.len(), 2);
        assert_eq!(bundle.machine("1").series, "");
        assert_eq!(bundle.machine("2").constraints, "cpu-cores=4");
        assert_eq!(bundle.relations[0][0], "mediawiki:db");
    }

    #[test]
    fn test_resource_values() {
        let bundle = Bundle::from_yaml(
            r#"
            applications:
                mediawiki:
                    charm: cs:precise/mediawiki-10
                    resources:
                        data: 3
                        blob: "./resources/data.tar"
            "#,
        )
        .unwrap();
        let resources = &bundle.applications["mediawiki"].resources;
        assert_eq!(resources["data"], ResourceValue::Revision(3));
        assert_eq!(
            resources["blob"],
            ResourceValue::Local(String::from("./resources/data.tar"))
        );
    }

    #[test]
    fn test_rejects_malformed_document() {
        assert!(Bundle::from_yaml("applications: [1, 2]").is_err());
    }
}
