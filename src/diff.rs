//! Structural diffing between a bundle and a model.
//!
//! [`Differ`] reports what differs without emitting any change: entities
//! present on only one side, and field-level differences for entities
//! present on both. The output serializes to the YAML shape consumed by
//! reporting tools, with empty sections omitted.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use crate::bundle::{Bundle, Endpoint};
use crate::error::{PlanError, Result};
use crate::model::{container_type, Model};

/// The side of a diff an entity is missing from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffSide {
    /// Present in the model but not the bundle.
    Bundle,
    /// Present in the bundle but not the model.
    Model,
}

/// Bundle and model values of a string that differs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StringDiff {
    /// The bundle-side value.
    pub bundle: String,
    /// The model-side value.
    pub model: String,
}

impl StringDiff {
    fn compare(bundle: &str, model: &str) -> Option<Self> {
        (bundle != model).then(|| Self {
            bundle: bundle.to_string(),
            model: model.to_string(),
        })
    }
}

/// Bundle and model values of an integer that differs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntDiff {
    /// The bundle-side value.
    pub bundle: usize,
    /// The model-side value.
    pub model: usize,
}

/// Bundle and model values of a boolean that differs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BoolDiff {
    /// The bundle-side value.
    pub bundle: bool,
    /// The model-side value.
    pub model: bool,
}

/// Bundle and model values of a configuration option that differs; a
/// missing side is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OptionDiff {
    /// The bundle-side value, if set there.
    pub bundle: Option<Value>,
    /// The model-side value, if set there.
    pub model: Option<Value>,
}

/// Differences for one application.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplicationDiff {
    /// Set when the application exists on only one side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<DiffSide>,
    /// Charm difference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charm: Option<StringDiff>,
    /// Series difference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<StringDiff>,
    /// Unit count difference; never reported for subordinates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_units: Option<IntDiff>,
    /// Expose flag difference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expose: Option<BoolDiff>,
    /// Differing options by name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, OptionDiff>,
    /// Differing annotations by name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, StringDiff>,
    /// Constraints difference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints: Option<StringDiff>,
}

impl ApplicationDiff {
    fn is_empty(&self) -> bool {
        self.missing.is_none()
            && self.charm.is_none()
            && self.series.is_none()
            && self.num_units.is_none()
            && self.expose.is_none()
            && self.options.is_empty()
            && self.annotations.is_empty()
            && self.constraints.is_none()
    }
}

/// Differences for one machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MachineDiff {
    /// Set when the machine exists on only one side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<DiffSide>,
    /// Constraints difference. The model snapshot carries no machine
    /// constraints, so this is reserved in the wire shape.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints: Option<StringDiff>,
    /// Differing annotations by name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, StringDiff>,
    /// Series difference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<StringDiff>,
}

impl MachineDiff {
    fn is_empty(&self) -> bool {
        self.missing.is_none()
            && self.constraints.is_none()
            && self.annotations.is_empty()
            && self.series.is_none()
    }
}

/// Relations present on only one side, canonicalized and sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelationsDiff {
    /// Relations only the bundle declares.
    #[serde(rename = "bundle-extra", skip_serializing_if = "Vec::is_empty")]
    pub bundle_extra: Vec<[String; 2]>,
    /// Relations only the model has.
    #[serde(rename = "model-extra", skip_serializing_if = "Vec::is_empty")]
    pub model_extra: Vec<[String; 2]>,
}

/// The structural difference between a bundle and a model.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BundleDiff {
    /// Per-application differences.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub applications: BTreeMap<String, ApplicationDiff>,
    /// Per-machine differences.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub machines: BTreeMap<String, MachineDiff>,
    /// Bundle-level series difference. Reserved: the model snapshot has no
    /// bundle-level series to compare against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<StringDiff>,
    /// Relation set differences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relations: Option<RelationsDiff>,
}

impl BundleDiff {
    /// True when the bundle and model match in every compared detail.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
            && self.machines.is_empty()
            && self.series.is_none()
            && self.relations.is_none()
    }
}

/// Computes a [`BundleDiff`] between a bundle and a model snapshot.
#[derive(Debug, Clone)]
pub struct Differ<'a> {
    bundle: &'a Bundle,
    model: &'a Model,
    include_annotations: bool,
}

impl<'a> Differ<'a> {
    /// Creates a differ over a bundle and a model.
    #[must_use]
    pub fn new(bundle: &'a Bundle, model: &'a Model) -> Self {
        Self {
            bundle,
            model,
            include_annotations: true,
        }
    }

    /// Controls whether annotations are compared. On by default.
    #[must_use]
    pub fn include_annotations(mut self, include: bool) -> Self {
        self.include_annotations = include;
        self
    }

    /// Computes the diff. No changes are emitted.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::EmptyBundle`] when the bundle declares no
    /// applications.
    pub fn build(&self) -> Result<BundleDiff> {
        if self.bundle.applications.is_empty() {
            return Err(PlanError::EmptyBundle);
        }
        let mut diff = BundleDiff::default();
        self.diff_applications(&mut diff);
        self.diff_machines(&mut diff);
        self.diff_relations(&mut diff);
        Ok(diff)
    }

    fn diff_applications(&self, diff: &mut BundleDiff) {
        for (name, spec) in &self.bundle.applications {
            let Some(deployed) = self.model.get_application(name) else {
                diff.applications.insert(
                    name.clone(),
                    ApplicationDiff {
                        missing: Some(DiffSide::Model),
                        ..ApplicationDiff::default()
                    },
                );
                continue;
            };

            let mut entry = ApplicationDiff {
                charm: StringDiff::compare(&spec.charm, &deployed.charm),
                series: StringDiff::compare(&spec.series, &deployed.series),
                ..ApplicationDiff::default()
            };
            if !deployed.is_subordinate() && spec.num_units != deployed.unit_count() {
                entry.num_units = Some(IntDiff {
                    bundle: spec.num_units,
                    model: deployed.unit_count(),
                });
            }
            if spec.expose != deployed.exposed {
                entry.expose = Some(BoolDiff {
                    bundle: spec.expose,
                    model: deployed.exposed,
                });
            }
            let option_names: BTreeSet<&String> = spec
                .options
                .keys()
                .chain(deployed.options.keys())
                .collect();
            for option in option_names {
                let bundle_value = spec.options.get(option);
                let model_value = deployed.options.get(option);
                if bundle_value != model_value {
                    entry.options.insert(
                        option.clone(),
                        OptionDiff {
                            bundle: bundle_value.cloned(),
                            model: model_value.cloned(),
                        },
                    );
                }
            }
            if self.include_annotations {
                entry.annotations =
                    diff_annotations(&spec.annotations, &deployed.annotations);
            }
            if !self
                .model
                .constraints_match(&spec.constraints, &deployed.constraints)
            {
                entry.constraints = Some(StringDiff {
                    bundle: spec.constraints.clone(),
                    model: deployed.constraints.clone(),
                });
            }
            if !entry.is_empty() {
                diff.applications.insert(name.clone(), entry);
            }
        }

        for name in self.model.applications.keys() {
            if !self.bundle.applications.contains_key(name) {
                diff.applications.insert(
                    name.clone(),
                    ApplicationDiff {
                        missing: Some(DiffSide::Bundle),
                        ..ApplicationDiff::default()
                    },
                );
            }
        }
    }

    /// The model machine id a bundle machine compares against: the machine
    /// map entry when present, else the same id.
    fn to_model_machine_id(&self, id: &str) -> String {
        self.model
            .machine_map
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    fn diff_machines(&self, diff: &mut BundleDiff) {
        let mut used: BTreeSet<String> = BTreeSet::new();
        for id in self.bundle.machines.keys() {
            let spec = self.bundle.machine(id);
            let model_id = self.to_model_machine_id(id);
            used.insert(model_id.clone());
            let Some(machine) = self.model.machines.get(&model_id) else {
                diff.machines.insert(
                    id.clone(),
                    MachineDiff {
                        missing: Some(DiffSide::Model),
                        ..MachineDiff::default()
                    },
                );
                continue;
            };

            let mut entry = MachineDiff {
                series: StringDiff::compare(&spec.series, &machine.series),
                ..MachineDiff::default()
            };
            if self.include_annotations {
                entry.annotations =
                    diff_annotations(&spec.annotations, &machine.annotations);
            }
            if !entry.is_empty() {
                diff.machines.insert(id.clone(), entry);
            }
        }

        for id in self.model.machines.keys() {
            // Containers are never declared by a bundle.
            if container_type(id).is_some() {
                continue;
            }
            if !used.contains(id) {
                diff.machines.insert(
                    id.clone(),
                    MachineDiff {
                        missing: Some(DiffSide::Bundle),
                        ..MachineDiff::default()
                    },
                );
            }
        }
    }

    fn diff_relations(&self, diff: &mut BundleDiff) {
        let bundle_side: BTreeSet<CanonicalRelation> = self
            .bundle
            .relations
            .iter()
            .map(|pair| {
                let ep1 = Endpoint::parse(&pair[0]);
                let ep2 = Endpoint::parse(&pair[1]);
                canonicalize(
                    (ep1.application.as_str(), ep1.relation.as_str()),
                    (ep2.application.as_str(), ep2.relation.as_str()),
                )
            })
            .collect();
        let model_side: BTreeSet<CanonicalRelation> = self
            .model
            .relations
            .iter()
            .map(|rel| {
                canonicalize(
                    (rel.app1.as_str(), rel.endpoint1.as_str()),
                    (rel.app2.as_str(), rel.endpoint2.as_str()),
                )
            })
            .collect();

        let bundle_extra: Vec<[String; 2]> = bundle_side
            .difference(&model_side)
            .map(render_relation)
            .collect();
        let model_extra: Vec<[String; 2]> = model_side
            .difference(&bundle_side)
            .map(render_relation)
            .collect();
        if !bundle_extra.is_empty() || !model_extra.is_empty() {
            diff.relations = Some(RelationsDiff {
                bundle_extra,
                model_extra,
            });
        }
    }
}

/// A relation with its endpoints swapped into canonical order, so the two
/// sides compare regardless of declaration order.
type CanonicalRelation = (String, String, String, String);

fn canonicalize(one: (&str, &str), two: (&str, &str)) -> CanonicalRelation {
    if two < one {
        (
            two.0.to_string(),
            two.1.to_string(),
            one.0.to_string(),
            one.1.to_string(),
        )
    } else {
        (
            one.0.to_string(),
            one.1.to_string(),
            two.0.to_string(),
            two.1.to_string(),
        )
    }
}

fn render_relation(relation: &CanonicalRelation) -> [String; 2] {
    let render = |application: &str, endpoint: &str| {
        if endpoint.is_empty() {
            application.to_string()
        } else {
            format!("{application}:{endpoint}")
        }
    };
    [
        render(&relation.0, &relation.1),
        render(&relation.2, &relation.3),
    ]
}

fn diff_annotations(
    bundle: &BTreeMap<String, String>,
    model: &BTreeMap<String, String>,
) -> BTreeMap<String, StringDiff> {
    let names: BTreeSet<&String> = bundle.keys().chain(model.keys()).collect();
    let mut result = BTreeMap::new();
    for name in names {
        let bundle_value = bundle.get(name).map_or("", String::as_str);
        let model_value = model.get(name).map_or("", String::as_str);
        if bundle_value != model_value {
            result.insert(
                name.clone(),
                StringDiff {
                    bundle: bundle_value.to_string(),
                    model: model_value.to_string(),
                },
            );
        }
    }
    result
}
