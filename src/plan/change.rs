//! Change records: the atomic operations of a deployment plan.
//!
//! A [`Change`] pairs a method tag and typed parameters with a unique id
//! (`<method>-<k>`) and the ids of the changes that must be applied before
//! it. Parameters reference earlier changes with `$`-prefixed placeholders
//! (`$deploy-1`, `$addMachine-3`); the applier resolves those at execution
//! time.
//!
//! Several parameter fields exist only to render human-readable
//! descriptions and are skipped on the wire.

use std::collections::BTreeMap;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};

/// The kind of entity an annotation change targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// An application.
    Application,
    /// A machine.
    Machine,
}

/// Parameters for an `addCharm` change.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCharmParams {
    /// Charm reference to upload.
    pub charm: String,
    /// Series to upload for; empty when unconstrained.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub series: String,
}

/// Parameters for a `deploy` change.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddApplicationParams {
    /// Charm to deploy: a `$addCharm-k` placeholder or a literal reference.
    pub charm: String,
    /// Series to deploy on; empty when unconstrained.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub series: String,
    /// Application name.
    pub application: String,
    /// Charm configuration options.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, Value>,
    /// Constraints string.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub constraints: String,
    /// Storage constraints by store name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub storage: BTreeMap<String, String>,
    /// Endpoint-to-space bindings.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub endpoint_bindings: BTreeMap<String, String>,
    /// Charm store resource revisions.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, i64>,
    /// Local resource paths.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub local_resources: BTreeMap<String, String>,
    /// The literal charm reference, for display.
    #[serde(skip)]
    pub charm_display: String,
}

/// Parameters for an `expose` change.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposeParams {
    /// Application to expose: a `$deploy-k` placeholder or a name.
    pub application: String,
    /// The application name, for display.
    #[serde(skip)]
    pub application_display: String,
}

/// Parameters for a `setAnnotations` change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAnnotationsParams {
    /// Target entity: a placeholder or a literal id.
    pub id: String,
    /// Kind of entity being annotated.
    pub entity_type: EntityType,
    /// Annotations to set.
    pub annotations: BTreeMap<String, String>,
    /// Display form of the target, e.g. `django` or `new machine 0`.
    #[serde(skip)]
    pub target_display: String,
}

/// Parameters for an `addMachine` change.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMachineParams {
    /// Series for the machine; empty when unconstrained.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub series: String,
    /// Constraints for the machine.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub constraints: String,
    /// Container type when the machine is a container, else empty.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub container_type: String,
    /// Parent machine: a placeholder, a literal machine id, or empty.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub parent_id: String,
    /// The allocated machine or container id, for naming and display.
    #[serde(skip)]
    pub machine_id: String,
    /// The bundle machine id this change realizes, when any.
    #[serde(skip)]
    pub bundle_machine_id: String,
    /// Whether the container's host machine already exists in the model.
    #[serde(skip)]
    pub host_existing: bool,
}

/// Parameters for an `addRelation` change.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddRelationParams {
    /// First endpoint; the application part may be a placeholder.
    pub endpoint1: String,
    /// Second endpoint; the application part may be a placeholder.
    pub endpoint2: String,
    /// Display form of the first endpoint.
    #[serde(skip)]
    pub endpoint1_display: String,
    /// Display form of the second endpoint.
    #[serde(skip)]
    pub endpoint2_display: String,
}

/// Parameters for an `addUnit` change.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddUnitParams {
    /// Application to add the unit to: a placeholder or a name.
    pub application: String,
    /// Placement target: a placeholder, a literal machine or container id,
    /// or empty for a fresh machine.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub to: String,
    /// The allocated unit name, for display.
    #[serde(skip)]
    pub unit_name: String,
    /// Display form of the placement target, e.g. `new machine 0`,
    /// `existing machine 2`, or a container id.
    #[serde(skip)]
    pub placement_display: String,
    /// The placement directive satisfied by this unit, when it targeted an
    /// application or unit.
    #[serde(skip)]
    pub directive: String,
}

/// Parameters for a `setOptions` change.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetOptionsParams {
    /// Application to configure.
    pub application: String,
    /// Option values to set.
    pub options: BTreeMap<String, Value>,
}

/// Parameters for a `setConstraints` change.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetConstraintsParams {
    /// Application to constrain.
    pub application: String,
    /// Constraints string to set.
    pub constraints: String,
}

/// Parameters for an `upgradeCharm` change.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeCharmParams {
    /// Charm to upgrade to: a placeholder or a literal reference.
    pub charm: String,
    /// Application to upgrade.
    pub application: String,
    /// The literal charm reference, for display.
    #[serde(skip)]
    pub charm_display: String,
}

/// Typed parameters for each change method.
#[derive(Debug, Clone)]
pub enum ChangeParams {
    /// Upload a charm.
    AddCharm(AddCharmParams),
    /// Deploy an application.
    Deploy(AddApplicationParams),
    /// Expose an application.
    Expose(ExposeParams),
    /// Set entity annotations.
    SetAnnotations(SetAnnotationsParams),
    /// Create a machine or container.
    AddMachine(AddMachineParams),
    /// Establish a relation.
    AddRelation(AddRelationParams),
    /// Add an application unit.
    AddUnit(AddUnitParams),
    /// Set application options.
    SetOptions(SetOptionsParams),
    /// Set application constraints.
    SetConstraints(SetConstraintsParams),
    /// Upgrade an application's charm.
    UpgradeCharm(UpgradeCharmParams),
}

impl ChangeParams {
    /// The wire method tag for these parameters.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::AddCharm(_) => "addCharm",
            Self::Deploy(_) => "deploy",
            Self::Expose(_) => "expose",
            Self::SetAnnotations(_) => "setAnnotations",
            Self::AddMachine(_) => "addMachine",
            Self::AddRelation(_) => "addRelation",
            Self::AddUnit(_) => "addUnit",
            Self::SetOptions(_) => "setOptions",
            Self::SetConstraints(_) => "setConstraints",
            Self::UpgradeCharm(_) => "upgradeCharm",
        }
    }
}

/// A single change in a deployment plan.
#[derive(Debug, Clone)]
pub struct Change {
    id: String,
    requires: Vec<String>,
    params: ChangeParams,
}

impl Change {
    /// Creates a change; used by the change set, which owns id assignment.
    pub(crate) fn new(id: String, requires: Vec<String>, params: ChangeParams) -> Self {
        Self {
            id,
            requires,
            params,
        }
    }

    /// The unique change id, of the form `<method>-<k>`.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The method tag.
    #[must_use]
    pub fn method(&self) -> &'static str {
        self.params.method()
    }

    /// Ids of changes that must be applied before this one.
    #[must_use]
    pub fn requires(&self) -> &[String] {
        &self.requires
    }

    /// The typed parameters.
    #[must_use]
    pub fn params(&self) -> &ChangeParams {
        &self.params
    }

    pub(crate) fn params_mut(&mut self) -> &mut ChangeParams {
        &mut self.params
    }

    pub(crate) fn push_require(&mut self, id: String) {
        if !self.requires.contains(&id) {
            self.requires.push(id);
        }
    }

    /// A one-line human-readable description of the change.
    #[must_use]
    pub fn description(&self) -> String {
        match &self.params {
            ChangeParams::AddCharm(p) => {
                if p.series.is_empty() {
                    format!("upload charm {}", p.charm)
                } else {
                    format!("upload charm {} for series {}", p.charm, p.series)
                }
            }
            ChangeParams::Deploy(p) => {
                let series = if p.series.is_empty() {
                    String::new()
                } else {
                    format!(" on {}", p.series)
                };
                format!(
                    "deploy application {}{series} using {}",
                    p.application, p.charm_display
                )
            }
            ChangeParams::Expose(p) => format!("expose {}", p.application_display),
            ChangeParams::SetAnnotations(p) => {
                format!("set annotations for {}", p.target_display)
            }
            ChangeParams::AddMachine(p) => {
                if p.container_type.is_empty() {
                    let bundle = if p.bundle_machine_id.is_empty()
                        || p.bundle_machine_id == p.machine_id
                    {
                        String::new()
                    } else {
                        format!(" (bundle machine {})", p.bundle_machine_id)
                    };
                    format!("add new machine {}{bundle}", p.machine_id)
                } else {
                    let host = if p.host_existing { "existing" } else { "new" };
                    let top = p.machine_id.split('/').next().unwrap_or("");
                    format!(
                        "add {} container {} on {host} machine {top}",
                        p.container_type, p.machine_id
                    )
                }
            }
            ChangeParams::AddRelation(p) => {
                format!(
                    "add relation {} - {}",
                    p.endpoint1_display, p.endpoint2_display
                )
            }
            ChangeParams::AddUnit(p) => {
                let satisfy = if p.directive.is_empty() {
                    String::new()
                } else {
                    format!(" to satisfy [{}]", p.directive)
                };
                format!(
                    "add unit {} to {}{satisfy}",
                    p.unit_name, p.placement_display
                )
            }
            ChangeParams::SetOptions(p) => {
                format!("set application options for {}", p.application)
            }
            ChangeParams::SetConstraints(p) => {
                format!(
                    "set constraints for {} to {:?}",
                    p.application, p.constraints
                )
            }
            ChangeParams::UpgradeCharm(p) => {
                format!("upgrade {} to use charm {}", p.application, p.charm_display)
            }
        }
    }

    /// The positional argument projection used by GUI consumers.
    #[must_use]
    pub fn gui_args(&self) -> Vec<Value> {
        match &self.params {
            ChangeParams::AddCharm(p) => {
                vec![json!(p.charm), json!(p.series)]
            }
            ChangeParams::Deploy(p) => vec![
                json!(p.charm),
                json!(p.series),
                json!(p.application),
                json!(p.options),
                json!(p.constraints),
                json!(p.storage),
                json!(p.endpoint_bindings),
                json!(p.resources),
            ],
            ChangeParams::Expose(p) => vec![json!(p.application)],
            ChangeParams::SetAnnotations(p) => vec![
                json!(p.id),
                json!(p.entity_type),
                json!(p.annotations),
            ],
            ChangeParams::AddMachine(p) => vec![json!({
                "series": p.series,
                "constraints": p.constraints,
                "containerType": p.container_type,
                "parentId": p.parent_id,
            })],
            ChangeParams::AddRelation(p) => {
                vec![json!(p.endpoint1), json!(p.endpoint2)]
            }
            ChangeParams::AddUnit(p) => {
                let to = if p.to.is_empty() {
                    Value::Null
                } else {
                    json!(p.to)
                };
                vec![json!(p.application), to]
            }
            ChangeParams::SetOptions(p) => {
                vec![json!(p.application), json!(p.options)]
            }
            ChangeParams::SetConstraints(p) => {
                vec![json!(p.application), json!(p.constraints)]
            }
            ChangeParams::UpgradeCharm(p) => {
                vec![json!(p.application), json!(p.charm)]
            }
        }
    }
}

impl Serialize for Change {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Change", 4)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("method", self.method())?;
        state.serialize_field("requires", &self.requires)?;
        match &self.params {
            ChangeParams::AddCharm(p) => state.serialize_field("params", p)?,
            ChangeParams::Deploy(p) => state.serialize_field("params", p)?,
            ChangeParams::Expose(p) => state.serialize_field("params", p)?,
            ChangeParams::SetAnnotations(p) => state.serialize_field("params", p)?,
            ChangeParams::AddMachine(p) => state.serialize_field("params", p)?,
            ChangeParams::AddRelation(p) => state.serialize_field("params", p)?,
            ChangeParams::AddUnit(p) => state.serialize_field("params", p)?,
            ChangeParams::SetOptions(p) => state.serialize_field("params", p)?,
            ChangeParams::SetConstraints(p) => state.serialize_field("params", p)?,
            ChangeParams::UpgradeCharm(p) => state.serialize_field("params", p)?,
        }
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_charm_description() {
        let change = Change::new(
            String::from("addCharm-0"),
            Vec::new(),
            ChangeParams::AddCharm(AddCharmParams {
                charm: String::from("cs:precise/mediawiki-10"),
                series: String::from("precise"),
            }),
        );
        assert_eq!(
            change.description(),
            "upload charm cs:precise/mediawiki-10 for series precise"
        );
        assert_eq!(change.gui_args(), vec![
            json!("cs:precise/mediawiki-10"),
            json!("precise")
        ]);
    }

    #[test]
    fn test_machine_description_with_bundle_id() {
        let change = Change::new(
            String::from("addMachine-2"),
            Vec::new(),
            ChangeParams::AddMachine(AddMachineParams {
                machine_id: String::from("0"),
                bundle_machine_id: String::from("1"),
                ..AddMachineParams::default()
            }),
        );
        assert_eq!(change.description(), "add new machine 0 (bundle machine 1)");
    }

    #[test]
    fn test_container_description() {
        let change = Change::new(
            String::from("addMachine-5"),
            Vec::new(),
            ChangeParams::AddMachine(AddMachineParams {
                container_type: String::from("lxd"),
                machine_id: String::from("2/lxd/1"),
                host_existing: true,
                ..AddMachineParams::default()
            }),
        );
        assert_eq!(
            change.description(),
            "add lxd container 2/lxd/1 on existing machine 2"
        );
    }

    #[test]
    fn test_set_constraints_description_quotes_value() {
        let change = Change::new(
            String::from("setConstraints-0"),
            Vec::new(),
            ChangeParams::SetConstraints(SetConstraintsParams {
                application: String::from("django"),
                constraints: String::from("cpu-cores=4 cpu-power=42"),
            }),
        );
        assert_eq!(
            change.description(),
            "set constraints for django to \"cpu-cores=4 cpu-power=42\""
        );
    }

    #[test]
    fn test_wire_serialization_shape() {
        let change = Change::new(
            String::from("addUnit-7"),
            vec![String::from("deploy-1")],
            ChangeParams::AddUnit(AddUnitParams {
                application: String::from("$deploy-1"),
                to: String::from("$addMachine-5"),
                unit_name: String::from("django/0"),
                placement_display: String::from("new machine 0"),
                directive: String::new(),
            }),
        );
        let wire = serde_json::to_value(&change).unwrap();
        assert_eq!(
            wire,
            json!({
                "id": "addUnit-7",
                "method": "addUnit",
                "requires": ["deploy-1"],
                "params": {
                    "application": "$deploy-1",
                    "to": "$addMachine-5",
                },
            })
        );
    }
}
