//! The observed live model and the queries the planner runs against it.
//!
//! A [`Model`] is a point-in-time snapshot of what is currently deployed:
//! applications with their units, machines, relations, plus the bookkeeping
//! the planner needs to line the bundle up with reality: the machine map
//! (bundle machine id to existing machine id) and the naming sequences for
//! freshly created machines, containers, and units.
//!
//! The planner works on its own clone of the caller's model; the snapshot
//! handed in is never mutated.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::trace;

use crate::bundle::{Bundle, Placement};
use crate::naturalsort::sort_naturally;

/// Comparator deciding whether two constraint strings are equivalent.
///
/// Injected to avoid a hard dependency on a constraints parser; when absent
/// the planner falls back to plain string equality.
pub type ConstraintsEqual = fn(&str, &str) -> bool;

/// Returns the top-level machine id hosting the given machine.
///
/// `"2/lxd/0"` and `"2/lxd/0/kvm/1"` both resolve to `"2"`; a top-level id
/// resolves to itself.
#[must_use]
pub fn top_level_machine(id: &str) -> &str {
    id.split('/').next().unwrap_or(id)
}

/// Returns the container type of a machine id, or `None` for a top-level
/// machine. The container type of `"2/lxd/0"` is `lxd`.
#[must_use]
pub fn container_type(id: &str) -> Option<&str> {
    let segments: Vec<&str> = id.split('/').collect();
    if segments.len() < 3 {
        return None;
    }
    Some(segments[segments.len() - 2])
}

/// Returns the parent machine id of a container, or the id itself for a
/// top-level machine. The parent of `"2/lxd/0/kvm/1"` is `"2/lxd/0"`.
#[must_use]
pub fn parent_machine(id: &str) -> &str {
    match id.rfind('/') {
        Some(last) => match id[..last].rfind('/') {
            Some(second) => &id[..second],
            None => id,
        },
        None => id,
    }
}

/// An application deployed in the model.
#[derive(Debug, Clone, Default)]
pub struct Application {
    /// Application name.
    pub name: String,
    /// The charm URL currently deployed.
    pub charm: String,
    /// Series the application runs on; empty when unknown.
    pub series: String,
    /// Current charm configuration values.
    pub options: BTreeMap<String, Value>,
    /// Current annotations.
    pub annotations: BTreeMap<String, String>,
    /// Current constraints string.
    pub constraints: String,
    /// Whether the application is exposed.
    pub exposed: bool,
    /// Principal applications this application is subordinate to; empty for
    /// principal applications.
    pub subordinate_to: Vec<String>,
    /// Units of the application, sorted in natural unit-name order.
    pub units: Vec<Unit>,
}

impl Application {
    /// Number of deployed units.
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// True when this application is a subordinate.
    #[must_use]
    pub fn is_subordinate(&self) -> bool {
        !self.subordinate_to.is_empty()
    }

    /// Returns the subset of `annotations` that differ from the deployed
    /// ones. A model side without annotations reports every wanted
    /// annotation.
    #[must_use]
    pub fn changed_annotations(
        &self,
        annotations: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        changed_string_values(&self.annotations, annotations)
    }

    /// Returns the subset of `options` whose model value differs or is
    /// missing. Model values arrive JSON-encoded, which widens integers to
    /// floats; exact-integer floats are narrowed back before comparison.
    #[must_use]
    pub fn changed_options(
        &self,
        options: &BTreeMap<String, Value>,
    ) -> BTreeMap<String, Value> {
        if self.options.is_empty() {
            return options.clone();
        }
        let mut changes = BTreeMap::new();
        for (key, value) in options {
            let same = self
                .options
                .get(key)
                .is_some_and(|current| option_values_equal(value, current));
            if !same {
                changes.insert(key.clone(), value.clone());
            }
        }
        changes
    }
}

fn option_values_equal(wanted: &Value, current: &Value) -> bool {
    if wanted == current {
        return true;
    }
    if let (Some(w), Some(c)) = (wanted.as_i64(), current.as_f64()) {
        // Never narrow when it would lose information.
        if c.fract() == 0.0 && c.abs() < 9_007_199_254_740_992.0 {
            #[allow(clippy::cast_possible_truncation)]
            return c as i64 == w;
        }
    }
    false
}

fn changed_string_values(
    existing: &BTreeMap<String, String>,
    wanted: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    if existing.is_empty() {
        return wanted.clone();
    }
    let mut changes = BTreeMap::new();
    for (key, value) in wanted {
        if existing.get(key) != Some(value) {
            changes.insert(key.clone(), value.clone());
        }
    }
    changes
}

/// A unit of a deployed application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unit {
    /// Unit name of the form `<application>/<number>`.
    pub name: String,
    /// Machine or container id the unit runs on.
    pub machine: String,
}

impl Unit {
    /// Creates a unit from its name and machine.
    #[must_use]
    pub fn new(name: impl Into<String>, machine: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            machine: machine.into(),
        }
    }
}

/// A machine present in the model.
#[derive(Debug, Clone, Default)]
pub struct Machine {
    /// Machine id (top-level or container).
    pub id: String,
    /// Series the machine runs; empty when unknown.
    pub series: String,
    /// Current annotations.
    pub annotations: BTreeMap<String, String>,
}

impl Machine {
    /// Returns the subset of `annotations` that differ from the machine's.
    #[must_use]
    pub fn changed_annotations(
        &self,
        annotations: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        changed_string_values(&self.annotations, annotations)
    }
}

/// A relation between two application endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relation {
    /// First application name.
    pub app1: String,
    /// First endpoint name.
    pub endpoint1: String,
    /// Second application name.
    pub app2: String,
    /// Second endpoint name.
    pub endpoint2: String,
}

impl Relation {
    /// Creates a relation from its four parts.
    #[must_use]
    pub fn new(app1: &str, endpoint1: &str, app2: &str, endpoint2: &str) -> Self {
        Self {
            app1: app1.to_string(),
            endpoint1: endpoint1.to_string(),
            app2: app2.to_string(),
            endpoint2: endpoint2.to_string(),
        }
    }
}

/// The existing deployment, if any.
#[derive(Debug, Clone, Default)]
pub struct Model {
    /// Deployed applications by name.
    pub applications: BTreeMap<String, Application>,
    /// Existing machines by id (top-level and containers).
    pub machines: BTreeMap<String, Machine>,
    /// Established relations.
    pub relations: Vec<Relation>,
    /// Mapping of bundle machine ids to existing machine ids. May be
    /// partially pre-populated by the caller; [`Model::infer_machine_map`]
    /// fills in the rest.
    pub machine_map: BTreeMap<String, String>,
    /// Next-number sequences keyed by `"machine"`,
    /// `"machine-<parent>/<container-type>"`, or `"application-<name>"`.
    /// When empty, the planner infers the sequences from the snapshot.
    pub sequence: BTreeMap<String, usize>,
    /// Optional constraints comparator; string equality when absent.
    pub constraints_equal: Option<ConstraintsEqual>,
}

impl Model {
    /// Looks up a deployed application by name.
    #[must_use]
    pub fn get_application(&self, name: &str) -> Option<&Application> {
        self.applications.get(name)
    }

    /// True when any deployed application uses exactly this charm
    /// reference.
    #[must_use]
    pub fn has_charm(&self, charm: &str) -> bool {
        self.applications.values().any(|app| app.charm == charm)
    }

    /// True when the model has this relation, in either endpoint order.
    #[must_use]
    pub fn has_relation(
        &self,
        app1: &str,
        endpoint1: &str,
        app2: &str,
        endpoint2: &str,
    ) -> bool {
        let one_way = Relation::new(app1, endpoint1, app2, endpoint2);
        let other = Relation::new(app2, endpoint2, app1, endpoint1);
        self.relations
            .iter()
            .any(|rel| *rel == one_way || *rel == other)
    }

    /// Compares two constraint strings with the injected comparator, or
    /// plain string equality when none was supplied.
    #[must_use]
    pub fn constraints_match(&self, wanted: &str, current: &str) -> bool {
        match self.constraints_equal {
            Some(equal) => equal(wanted, current),
            None => wanted == current,
        }
    }

    /// Returns the existing machine a bundle machine id maps to. An id
    /// without a machine map entry resolves to the identically-named model
    /// machine, when one exists.
    #[must_use]
    pub fn bundle_machine(&self, id: &str) -> Option<&Machine> {
        let mapped = self.machine_map.get(id).map_or(id, String::as_str);
        self.machines.get(mapped)
    }

    /// Returns the machine of unit `<application>/<index>`, if deployed.
    #[must_use]
    pub fn get_unit_machine(&self, application: &str, index: usize) -> Option<String> {
        let app = self.applications.get(application)?;
        let target = format!("{application}/{index}");
        app.units
            .iter()
            .find(|unit| unit.name == target)
            .map(|unit| unit.machine.clone())
    }

    /// Naturally-sorted top-level machines hosting a unit of `source_app`
    /// but no unit of `target_app`.
    ///
    /// With a container type, "hosting the target" means "hosting a target
    /// unit inside a container of that type whose parent is the machine".
    #[must_use]
    pub fn unit_machines_without_app(
        &self,
        source_app: &str,
        target_app: &str,
        container: &str,
    ) -> Vec<String> {
        let Some(source) = self.get_application(source_app) else {
            return Vec::new();
        };

        let mut machines: BTreeSet<String> = source
            .units
            .iter()
            .map(|unit| top_level_machine(&unit.machine).to_string())
            .collect();
        if let Some(target) = self.get_application(target_app) {
            for unit in &target.units {
                if container.is_empty() {
                    machines.remove(&unit.machine);
                } else if container_type(&unit.machine) == Some(container) {
                    machines.remove(top_level_machine(&unit.machine));
                }
            }
        }

        let mut sorted: Vec<String> = machines.into_iter().collect();
        sort_naturally(&mut sorted);
        sorted
    }

    /// True when a unit of `application` runs on the given machine: with an
    /// empty container type, directly on the machine; otherwise inside a
    /// container of that type whose parent is the machine. Machine ids are
    /// indirected through the machine map.
    #[must_use]
    pub fn machine_has_app(
        &self,
        machine: &str,
        application: &str,
        container: &str,
    ) -> bool {
        let machine = self
            .machine_map
            .get(machine)
            .map_or(machine, String::as_str);
        let Some(app) = self.get_application(application) else {
            return false;
        };
        app.units.iter().any(|unit| {
            if container.is_empty() {
                container_type(&unit.machine).is_none() && unit.machine == machine
            } else {
                container_type(&unit.machine) == Some(container)
                    && parent_machine(&unit.machine) == machine
            }
        })
    }

    /// Filters placement directives of `source_app`, retaining those not
    /// already satisfied by deployed units. `new` directives are always
    /// retained, as are application targets without an explicit unit
    /// number (those are resolved greedily at placement time).
    #[must_use]
    pub fn unsatisfied_machine_and_unit_placements(
        &self,
        source_app: &str,
        placements: &[String],
    ) -> Vec<String> {
        if self.get_application(source_app).is_none() {
            return placements.to_vec();
        }

        let mut result = Vec::new();
        for value in placements {
            let Ok(placement) = Placement::parse(value) else {
                result.push(value.clone());
                continue;
            };
            let satisfied = if placement.is_new_machine() {
                false
            } else if !placement.machine.is_empty() {
                self.machine_has_app(
                    &placement.machine,
                    source_app,
                    &placement.container_type,
                )
            } else if let Some(number) = placement.unit {
                match self.get_unit_machine(&placement.application, number) {
                    Some(machine) => self.machine_has_app(
                        &machine,
                        source_app,
                        &placement.container_type,
                    ),
                    None => false,
                }
            } else {
                false
            };
            if !satisfied {
                result.push(value.clone());
            }
        }
        result
    }

    /// Infers the bundle-machine-to-existing-machine mapping.
    ///
    /// Two phases: first, bundle machines whose placement directives are
    /// already satisfied on the identically-named machine map to themselves
    /// and are locked; second, in natural bundle-machine order, unmapped
    /// machines adopt the top-level machine of the deployed unit at the
    /// directive's position, skipping machines locked in phase one.
    ///
    /// Deployed unit lists are assumed naturally sorted.
    pub fn infer_machine_map(&mut self, bundle: &Bundle) {
        let mut locked: BTreeSet<String> = BTreeSet::new();
        for (app_name, app) in &bundle.applications {
            for to in &app.to {
                let Ok(placement) = Placement::parse(to) else {
                    continue;
                };
                if placement.machine.is_empty() || placement.is_new_machine() {
                    continue;
                }
                let machine = placement.machine;
                if self.machine_map.contains_key(&machine) {
                    continue;
                }
                if self.machine_has_app(&machine, app_name, &placement.container_type) {
                    trace!(machine = %machine, application = %app_name, "machine maps to itself");
                    self.machine_map.insert(machine.clone(), machine.clone());
                    locked.insert(machine);
                }
            }
        }

        let mut ids: Vec<String> = bundle.machines.keys().cloned().collect();
        sort_naturally(&mut ids);

        'machines: for id in ids {
            if self.machine_map.contains_key(&id) {
                continue;
            }
            for (app_name, app) in &bundle.applications {
                for (index, to) in app.to.iter().enumerate() {
                    let Ok(placement) = Placement::parse(to) else {
                        continue;
                    };
                    if placement.machine != id {
                        continue;
                    }
                    let Some(deployed) = self.applications.get(app_name) else {
                        continue;
                    };
                    let Some(unit) = deployed.units.get(index) else {
                        continue;
                    };
                    let machine = top_level_machine(&unit.machine).to_string();
                    if locked.contains(&machine) {
                        // The same existing machine cannot satisfy two
                        // bundle machines.
                        continue;
                    }
                    trace!(bundle_machine = %id, existing = %machine, "inferred machine mapping");
                    self.machine_map.insert(id, machine);
                    continue 'machines;
                }
            }
        }
    }

    /// Populates empty sequences from the snapshot: unit numbers per
    /// application, the top-level machine counter, and per-parent container
    /// counters. Counters never decrease.
    pub(crate) fn initialize_sequence(&mut self) {
        if !self.sequence.is_empty() {
            // A supplied mapping is assumed complete.
            return;
        }

        for (app_name, app) in &self.applications {
            for unit in &app.units {
                let Some((_, number)) = unit.name.rsplit_once('/') else {
                    continue;
                };
                let Ok(number) = number.parse::<usize>() else {
                    continue;
                };
                let key = format!("application-{app_name}");
                let entry = self.sequence.entry(key).or_insert(0);
                if *entry <= number {
                    *entry = number + 1;
                }
            }
        }

        for machine_id in self.machines.keys() {
            let Ok(number) = machine_id
                .rsplit('/')
                .next()
                .unwrap_or(machine_id)
                .parse::<usize>()
            else {
                continue;
            };
            let key = match container_type(machine_id) {
                Some(container) => {
                    format!("machine-{}/{container}", parent_machine(machine_id))
                }
                None => String::from("machine"),
            };
            let entry = self.sequence.entry(key).or_insert(0);
            if *entry <= number {
                *entry = number + 1;
            }
        }
    }

    /// Allocates the next top-level machine id.
    pub(crate) fn next_machine(&mut self) -> String {
        let entry = self.sequence.entry(String::from("machine")).or_insert(0);
        let value = *entry;
        *entry += 1;
        value.to_string()
    }

    /// Allocates the next container id of the given type on a parent
    /// machine.
    pub(crate) fn next_container(&mut self, parent: &str, container: &str) -> String {
        let key = format!("machine-{parent}/{container}");
        let entry = self.sequence.entry(key).or_insert(0);
        let value = *entry;
        *entry += 1;
        format!("{parent}/{container}/{value}")
    }

    /// Allocates the next unit name for an application.
    pub(crate) fn next_unit(&mut self, application: &str) -> String {
        let key = format!("application-{application}");
        let entry = self.sequence.entry(key).or_insert(0);
        let value = *entry;
        *entry += 1;
        format!("{application}/{value}")
    }
}

#[cfg(test)]
mod tests;
