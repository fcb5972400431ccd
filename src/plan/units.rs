//! Unit-count convergence and placement resolution.
//!
//! Unit changes are appended first for every application (sorted), then
//! placements are resolved per application in dependency rounds: an
//! application is placed only after every application its directives
//! reference has been placed, so target units always have a known machine.
//! The final interleaving of machines, containers, and units is produced by
//! the change set's stable topological sort.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::trace;

use crate::bundle::{ApplicationSpec, Bundle, Placement};
use crate::error::{PlanError, Result};
use crate::model::{container_type, top_level_machine, Application, Model};
use crate::plan::change::{AddMachineParams, AddUnitParams, ChangeParams};
use crate::plan::changeset::ChangeSet;
use crate::plan::MachineRecord;

/// Greedy queues are keyed by (target application, source application,
/// container type): each source application consumes its own view of the
/// target's machines and units.
type QueueKey = (String, String, String);

/// Bookkeeping for a unit added in this run.
#[derive(Debug, Clone)]
struct UnitRecord {
    index: usize,
    change_id: String,
    /// Top-level machine the unit landed on, once placed.
    base_machine: String,
    /// Whether that machine already exists in the model.
    base_existing: bool,
    /// How the unit's own placement renders in descriptions.
    placement_display: String,
}

/// The resolved placement of one unit.
#[derive(Debug, Default)]
struct Placed {
    /// `to` field: empty, a `$change` placeholder, or a literal id.
    to: String,
    /// Display form of the target.
    display: String,
    /// Change ids the unit must wait for.
    requires: Vec<String>,
    /// Top-level machine the unit lands on.
    base_machine: String,
    /// Whether that machine exists in the model.
    base_existing: bool,
    /// The satisfied directive, when it targeted an application or unit.
    directive: String,
}

pub(crate) struct UnitProcessor<'a> {
    bundle: &'a Bundle,
    model: &'a mut Model,
    changes: &'a mut ChangeSet,
    added_applications: &'a BTreeMap<String, String>,
    added_machines: &'a BTreeMap<String, MachineRecord>,
    app_series: &'a BTreeMap<String, String>,
    records: BTreeMap<String, UnitRecord>,
    app_units: BTreeMap<String, Vec<String>>,
    existing_queues: BTreeMap<QueueKey, VecDeque<String>>,
    new_unit_queues: BTreeMap<QueueKey, VecDeque<String>>,
}

impl<'a> UnitProcessor<'a> {
    pub(crate) fn new(
        bundle: &'a Bundle,
        model: &'a mut Model,
        changes: &'a mut ChangeSet,
        added_applications: &'a BTreeMap<String, String>,
        added_machines: &'a BTreeMap<String, MachineRecord>,
        app_series: &'a BTreeMap<String, String>,
    ) -> Self {
        Self {
            bundle,
            model,
            changes,
            added_applications,
            added_machines,
            app_series,
            records: BTreeMap::new(),
            app_units: BTreeMap::new(),
            existing_queues: BTreeMap::new(),
            new_unit_queues: BTreeMap::new(),
        }
    }

    pub(crate) fn run(mut self) -> Result<()> {
        let graph = self.placement_graph()?;
        check_cycles(&graph)?;
        self.add_needed_units();
        self.process_placements(&graph)
    }

    /// Directed application adjacency: an edge from each application to
    /// every bundle application its placement directives reference.
    fn placement_graph(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let bundle = self.bundle;
        let mut graph: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, spec) in &bundle.applications {
            let mut targets: Vec<String> = Vec::new();
            for to in &spec.to {
                let placement = Placement::parse(to).map_err(PlanError::from)?;
                if placement.application.is_empty()
                    || !bundle.applications.contains_key(&placement.application)
                {
                    continue;
                }
                if !targets.contains(&placement.application) {
                    targets.push(placement.application);
                }
            }
            graph.insert(name.clone(), targets);
        }
        Ok(graph)
    }

    /// Appends an `addUnit` change for every unit the model is short of.
    /// Subordinate applications never contribute unit changes.
    fn add_needed_units(&mut self) {
        let bundle = self.bundle;
        for (name, spec) in &bundle.applications {
            let existing = self.model.get_application(name);
            if existing.is_some_and(Application::is_subordinate) {
                trace!(application = %name, "subordinate application, skipping unit count");
                continue;
            }
            let deployed = existing.map_or(0, Application::unit_count);
            if spec.num_units <= deployed {
                continue;
            }
            for _ in deployed..spec.num_units {
                let (application, requires) = match self.added_applications.get(name) {
                    Some(deploy_id) => (format!("${deploy_id}"), vec![deploy_id.clone()]),
                    None => (name.clone(), Vec::new()),
                };
                let unit_name = self.model.next_unit(name);
                let index = self.changes.add(
                    ChangeParams::AddUnit(AddUnitParams {
                        application,
                        unit_name: unit_name.clone(),
                        ..AddUnitParams::default()
                    }),
                    requires,
                );
                self.records.insert(
                    unit_name.clone(),
                    UnitRecord {
                        index,
                        change_id: self.changes.id_at(index),
                        base_machine: String::new(),
                        base_existing: false,
                        placement_display: String::new(),
                    },
                );
                self.app_units
                    .entry(name.clone())
                    .or_default()
                    .push(unit_name);
            }
        }
    }

    /// Resolves placements in dependency rounds: each round places, in
    /// sorted order, every application whose referenced applications have
    /// all been placed.
    fn process_placements(&mut self, graph: &BTreeMap<String, Vec<String>>) -> Result<()> {
        let mut remaining: Vec<String> = self.bundle.applications.keys().cloned().collect();
        let mut placed: BTreeSet<String> = BTreeSet::new();

        while !remaining.is_empty() {
            let ready: Vec<String> = remaining
                .iter()
                .filter(|name| {
                    graph
                        .get(*name)
                        .map_or(true, |deps| deps.iter().all(|dep| placed.contains(dep)))
                })
                .cloned()
                .collect();
            if ready.is_empty() {
                // The cycle check runs first, so the rounds always drain.
                return Err(PlanError::internal(
                    "unit placement ordering did not converge",
                ));
            }
            for name in &ready {
                self.place_application(name)?;
                placed.insert(name.clone());
            }
            remaining.retain(|name| !placed.contains(name));
        }
        Ok(())
    }

    fn place_application(&mut self, name: &str) -> Result<()> {
        let bundle = self.bundle;
        let Some(spec) = bundle.applications.get(name) else {
            return Ok(());
        };
        let unit_names = self.app_units.get(name).cloned().unwrap_or_default();
        if unit_names.is_empty() {
            return Ok(());
        }
        let series = self.app_series.get(name).cloned().unwrap_or_default();
        let constraints = machine_constraints(spec);

        // Directives already satisfied by deployed units are skipped; a
        // repeatable last directive covers units beyond the directive list.
        let unsatisfied = self
            .model
            .unsatisfied_machine_and_unit_placements(name, &spec.to);
        let repeatable = spec.to.last().cloned().filter(|last| {
            Placement::parse(last).is_ok_and(|p| {
                p.is_new_machine() || (p.machine.is_empty() && p.unit.is_none())
            })
        });

        let mut directives = unsatisfied.into_iter();
        for unit_name in &unit_names {
            let placed = match directives.next().or_else(|| repeatable.clone()) {
                Some(directive) => {
                    self.resolve_directive(name, &directive, &series, &constraints)?
                }
                None => self.fresh_machine(),
            };
            self.apply_placement(unit_name, placed);
        }

        // Serialize the application's units: each waits for the previous.
        for pair in unit_names.windows(2) {
            let previous = self.records[&pair[0]].change_id.clone();
            let index = self.records[&pair[1]].index;
            self.changes.require(index, previous);
        }
        Ok(())
    }

    fn resolve_directive(
        &mut self,
        source_app: &str,
        directive: &str,
        series: &str,
        constraints: &str,
    ) -> Result<Placed> {
        let placement = Placement::parse(directive).map_err(PlanError::from)?;

        if placement.is_new_machine() {
            return Ok(self.new_machine(&placement, series, constraints));
        }
        if !placement.machine.is_empty() {
            return Ok(self.on_bundle_machine(&placement, series, constraints));
        }
        if let Some(number) = placement.unit {
            let target_name = format!("{}/{number}", placement.application);
            if let Some(target) = self.records.get(&target_name).cloned() {
                return Ok(self.next_to_new_unit(
                    &target,
                    &placement,
                    series,
                    constraints,
                    directive,
                ));
            }
            if let Some(machine) =
                self.model.get_unit_machine(&placement.application, number)
            {
                return Ok(self.next_to_existing_unit(&machine, &placement, directive));
            }
            trace!(target = %target_name, "placement target does not exist, using a fresh machine");
            return Ok(self.fresh_machine());
        }

        // Application target: consume machines already hosting the target
        // application, then its units added in this run, then spill to a
        // fresh machine.
        let key = (
            placement.application.clone(),
            source_app.to_string(),
            placement.container_type.clone(),
        );
        if !self.existing_queues.contains_key(&key) {
            let machines = self.model.unit_machines_without_app(
                &placement.application,
                source_app,
                &placement.container_type,
            );
            self.existing_queues.insert(key.clone(), machines.into());
        }
        if let Some(machine) = self
            .existing_queues
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
        {
            return Ok(self.next_to_existing_machine(&machine, &placement, directive));
        }
        if !self.new_unit_queues.contains_key(&key) {
            let units = self
                .app_units
                .get(&placement.application)
                .cloned()
                .unwrap_or_default();
            self.new_unit_queues.insert(key.clone(), units.into());
        }
        if let Some(target_name) = self
            .new_unit_queues
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
        {
            let target = self.records[&target_name].clone();
            return Ok(self.next_to_new_unit(
                &target,
                &placement,
                series,
                constraints,
                directive,
            ));
        }
        trace!(
            application = %placement.application,
            "no more co-location targets, using a fresh machine"
        );
        Ok(self.fresh_machine())
    }

    /// An unconstrained unit: a fresh machine is named for it but no
    /// machine change is emitted; the applier creates the machine.
    fn fresh_machine(&mut self) -> Placed {
        let machine = self.model.next_machine();
        Placed {
            display: format!("new machine {machine}"),
            base_machine: machine,
            ..Placed::default()
        }
    }

    /// An explicit `new` (or `<ct>:new`) directive: emits the machine or
    /// container change.
    fn new_machine(
        &mut self,
        placement: &Placement,
        series: &str,
        constraints: &str,
    ) -> Placed {
        let host = self.model.next_machine();
        if placement.container_type.is_empty() {
            let index = self.changes.add(
                ChangeParams::AddMachine(AddMachineParams {
                    series: series.to_string(),
                    constraints: constraints.to_string(),
                    machine_id: host.clone(),
                    ..AddMachineParams::default()
                }),
                Vec::new(),
            );
            let change_id = self.changes.id_at(index);
            return Placed {
                to: format!("${change_id}"),
                display: format!("new machine {host}"),
                requires: vec![change_id],
                base_machine: host,
                ..Placed::default()
            };
        }

        let container = self
            .model
            .next_container(&host, &placement.container_type);
        let index = self.changes.add(
            ChangeParams::AddMachine(AddMachineParams {
                series: series.to_string(),
                constraints: constraints.to_string(),
                container_type: placement.container_type.clone(),
                machine_id: container.clone(),
                ..AddMachineParams::default()
            }),
            Vec::new(),
        );
        let change_id = self.changes.id_at(index);
        Placed {
            to: format!("${change_id}"),
            display: container,
            requires: vec![change_id],
            base_machine: host,
            ..Placed::default()
        }
    }

    /// A directive naming a bundle machine, possibly inside a container.
    fn on_bundle_machine(
        &mut self,
        placement: &Placement,
        series: &str,
        constraints: &str,
    ) -> Placed {
        let Some(record) = self.added_machines.get(&placement.machine).cloned() else {
            trace!(machine = %placement.machine, "directive references undeclared machine");
            return self.fresh_machine();
        };

        if record.existing {
            if placement.container_type.is_empty() {
                return Placed {
                    to: record.machine_id.clone(),
                    display: format!("existing machine {}", record.machine_id),
                    base_machine: record.machine_id,
                    base_existing: true,
                    ..Placed::default()
                };
            }
            // A container on an existing machine needs no change of its
            // own; the freshly numbered container id rides on the unit.
            let container = self
                .model
                .next_container(&record.machine_id, &placement.container_type);
            return Placed {
                to: container.clone(),
                display: container,
                base_machine: record.machine_id,
                base_existing: true,
                ..Placed::default()
            };
        }

        let change_id = record.change_id.clone().unwrap_or_default();
        if placement.container_type.is_empty() {
            return Placed {
                to: format!("${change_id}"),
                display: format!("new machine {}", record.machine_id),
                requires: vec![change_id],
                base_machine: record.machine_id,
                ..Placed::default()
            };
        }
        let container = self
            .model
            .next_container(&record.machine_id, &placement.container_type);
        let index = self.changes.add(
            ChangeParams::AddMachine(AddMachineParams {
                series: series.to_string(),
                constraints: constraints.to_string(),
                container_type: placement.container_type.clone(),
                parent_id: format!("${change_id}"),
                machine_id: container.clone(),
                ..AddMachineParams::default()
            }),
            vec![change_id],
        );
        let container_change = self.changes.id_at(index);
        Placed {
            to: format!("${container_change}"),
            display: container,
            requires: vec![container_change],
            base_machine: record.machine_id,
            ..Placed::default()
        }
    }

    /// Next to a unit that exists in the model.
    fn next_to_existing_unit(
        &mut self,
        machine: &str,
        placement: &Placement,
        directive: &str,
    ) -> Placed {
        if placement.container_type.is_empty() {
            let display = if container_type(machine).is_some() {
                machine.to_string()
            } else {
                format!("existing machine {machine}")
            };
            return Placed {
                to: machine.to_string(),
                display,
                base_machine: top_level_machine(machine).to_string(),
                base_existing: true,
                directive: directive.to_string(),
                ..Placed::default()
            };
        }
        let host = top_level_machine(machine).to_string();
        let container = self.model.next_container(&host, &placement.container_type);
        Placed {
            to: container.clone(),
            display: container,
            base_machine: host,
            base_existing: true,
            directive: directive.to_string(),
            ..Placed::default()
        }
    }

    /// Next to an existing machine consumed from an application-target
    /// queue.
    fn next_to_existing_machine(
        &mut self,
        machine: &str,
        placement: &Placement,
        directive: &str,
    ) -> Placed {
        if placement.container_type.is_empty() {
            return Placed {
                to: machine.to_string(),
                display: format!("existing machine {machine}"),
                base_machine: machine.to_string(),
                base_existing: true,
                directive: directive.to_string(),
                ..Placed::default()
            };
        }
        let container = self.model.next_container(machine, &placement.container_type);
        Placed {
            to: container.clone(),
            display: container,
            base_machine: machine.to_string(),
            base_existing: true,
            directive: directive.to_string(),
            ..Placed::default()
        }
    }

    /// Next to a unit added in this run; the unit change itself anchors
    /// the reference, and any container change is parented on it.
    fn next_to_new_unit(
        &mut self,
        target: &UnitRecord,
        placement: &Placement,
        series: &str,
        constraints: &str,
        directive: &str,
    ) -> Placed {
        if placement.container_type.is_empty() {
            return Placed {
                to: format!("${}", target.change_id),
                display: target.placement_display.clone(),
                requires: vec![target.change_id.clone()],
                base_machine: target.base_machine.clone(),
                base_existing: target.base_existing,
                directive: directive.to_string(),
            };
        }
        let container = self
            .model
            .next_container(&target.base_machine, &placement.container_type);
        let index = self.changes.add(
            ChangeParams::AddMachine(AddMachineParams {
                series: series.to_string(),
                constraints: constraints.to_string(),
                container_type: placement.container_type.clone(),
                parent_id: format!("${}", target.change_id),
                machine_id: container.clone(),
                host_existing: target.base_existing,
                ..AddMachineParams::default()
            }),
            vec![target.change_id.clone()],
        );
        let container_change = self.changes.id_at(index);
        Placed {
            to: format!("${container_change}"),
            display: container,
            requires: vec![container_change],
            base_machine: target.base_machine.clone(),
            base_existing: target.base_existing,
            directive: directive.to_string(),
        }
    }

    fn apply_placement(&mut self, unit_name: &str, placed: Placed) {
        let Some(record) = self.records.get_mut(unit_name) else {
            return;
        };
        self.changes.set_unit_placement(
            record.index,
            placed.to,
            placed.display.clone(),
            placed.directive,
        );
        for required in placed.requires {
            self.changes.require(record.index, required);
        }
        record.base_machine = placed.base_machine;
        record.base_existing = placed.base_existing;
        record.placement_display = placed.display;
    }
}

/// Constraints for machines created to host a unit: the application's
/// constraints, with the space names bound by its endpoint bindings folded
/// into the `spaces=` constraint.
fn machine_constraints(spec: &ApplicationSpec) -> String {
    if spec.endpoint_bindings.is_empty() {
        return spec.constraints.clone();
    }
    let mut spaces: BTreeSet<String> = spec
        .endpoint_bindings
        .values()
        .filter(|space| !space.is_empty())
        .cloned()
        .collect();

    let mut tokens: Vec<String> = Vec::new();
    let mut replaced = false;
    for token in spec.constraints.split_whitespace() {
        if let Some(list) = token.strip_prefix("spaces=") {
            spaces.extend(
                list.split(',')
                    .filter(|space| !space.is_empty())
                    .map(ToString::to_string),
            );
            tokens.push(String::new());
            replaced = true;
        } else {
            tokens.push(token.to_string());
        }
    }
    let joined = format!(
        "spaces={}",
        spaces.into_iter().collect::<Vec<_>>().join(",")
    );
    if replaced {
        for token in &mut tokens {
            if token.is_empty() {
                *token = joined.clone();
            }
        }
    } else {
        tokens.insert(0, joined);
    }
    tokens.join(" ")
}

/// Rejects placement graphs with cycles, naming the sorted participants.
fn check_cycles(graph: &BTreeMap<String, Vec<String>>) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Grey,
        Black,
    }
    enum Frame {
        Enter(String),
        Exit(String),
    }

    let mut colors: BTreeMap<String, Color> =
        graph.keys().map(|name| (name.clone(), Color::White)).collect();

    for start in graph.keys() {
        if colors[start] != Color::White {
            continue;
        }
        let mut stack = vec![Frame::Enter(start.clone())];
        let mut path: Vec<String> = Vec::new();
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(node) => {
                    if colors[&node] != Color::White {
                        continue;
                    }
                    colors.insert(node.clone(), Color::Grey);
                    path.push(node.clone());
                    stack.push(Frame::Exit(node.clone()));
                    if let Some(targets) = graph.get(&node) {
                        for target in targets.iter().rev() {
                            match colors.get(target) {
                                Some(Color::Grey) => {
                                    let from = path
                                        .iter()
                                        .position(|name| name == target)
                                        .unwrap_or(0);
                                    let mut applications: Vec<String> =
                                        path[from..].to_vec();
                                    applications.sort();
                                    applications.dedup();
                                    return Err(PlanError::PlacementCycle {
                                        applications,
                                    });
                                }
                                Some(Color::White) => {
                                    stack.push(Frame::Enter(target.clone()));
                                }
                                _ => {}
                            }
                        }
                    }
                }
                Frame::Exit(node) => {
                    colors.insert(node, Color::Black);
                    path.pop();
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with(constraints: &str, bindings: &[(&str, &str)]) -> ApplicationSpec {
        let mut spec = ApplicationSpec {
            constraints: constraints.to_string(),
            ..ApplicationSpec::default()
        };
        for (endpoint, space) in bindings {
            spec.endpoint_bindings
                .insert((*endpoint).to_string(), (*space).to_string());
        }
        spec
    }

    #[test]
    fn test_machine_constraints_without_bindings() {
        let spec = spec_with("cpu-cores=4", &[]);
        assert_eq!(machine_constraints(&spec), "cpu-cores=4");
    }

    #[test]
    fn test_machine_constraints_merges_binding_spaces() {
        let spec = spec_with(
            "spaces=baz cpu-cores=4 cpu-power=42",
            &[("", "foo"), ("http", "bar")],
        );
        assert_eq!(
            machine_constraints(&spec),
            "spaces=bar,baz,foo cpu-cores=4 cpu-power=42"
        );
    }

    #[test]
    fn test_machine_constraints_adds_spaces_when_absent() {
        let spec = spec_with("cpu-cores=4", &[("http", "dmz")]);
        assert_eq!(machine_constraints(&spec), "spaces=dmz cpu-cores=4");
    }

    #[test]
    fn test_check_cycles_two_apps() {
        let mut graph = BTreeMap::new();
        graph.insert(
            String::from("mysql"),
            vec![String::from("keystone")],
        );
        graph.insert(
            String::from("keystone"),
            vec![String::from("mysql")],
        );
        let err = check_cycles(&graph).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cycle in placement directives for: keystone, mysql"
        );
    }

    #[test]
    fn test_check_cycles_self_reference() {
        let mut graph = BTreeMap::new();
        graph.insert(String::from("problem"), vec![String::from("problem")]);
        let err = check_cycles(&graph).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cycle in placement directives for: problem"
        );
    }

    #[test]
    fn test_check_cycles_accepts_dag() {
        let mut graph = BTreeMap::new();
        graph.insert(String::from("django"), vec![String::from("memcached")]);
        graph.insert(String::from("memcached"), Vec::new());
        graph.insert(String::from("ror"), Vec::new());
        assert!(check_cycles(&graph).is_ok());
    }
}
