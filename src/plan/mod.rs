//! The plan builder: reconciles a bundle against a live model.
//!
//! [`Planner`] walks the bundle's applications (sorted), machines
//! (naturally sorted), relations, and units, consulting the model to decide
//! which operations to emit. The resulting change list is returned in a
//! stable topological order; executing it in order converges the model
//! toward the bundle.

pub mod change;
mod changeset;
mod units;

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::bundle::{charm, ApplicationSpec, Bundle, Endpoint, ResourceValue};
use crate::error::{PlanError, Result};
use crate::model::Model;
use crate::naturalsort::sort_naturally;
use change::{
    AddApplicationParams, AddCharmParams, AddMachineParams, AddRelationParams,
    Change, ChangeParams, EntityType, ExposeParams, SetAnnotationsParams,
    SetConstraintsParams, SetOptionsParams, UpgradeCharmParams,
};
use changeset::ChangeSet;

/// How a bundle machine resolved during planning: either an existing model
/// machine (via the machine map) or a machine change emitted in this run.
#[derive(Debug, Clone)]
pub(crate) struct MachineRecord {
    /// The id of the `addMachine` change, when one was emitted.
    pub change_id: Option<String>,
    /// The machine id, freshly allocated or existing.
    pub machine_id: String,
    /// True when the machine already exists in the model.
    pub existing: bool,
}

/// Builds deployment plans from a bundle and an optional live model.
///
/// ```
/// use bundleplan::{Bundle, Planner};
///
/// let bundle = Bundle::from_yaml(
///     "
///     applications:
///         django:
///             charm: django
///     ",
/// )
/// .unwrap();
/// let changes = Planner::new(&bundle).build().unwrap();
/// assert_eq!(changes[0].id(), "addCharm-0");
/// assert_eq!(changes[1].id(), "deploy-1");
/// ```
#[derive(Debug, Clone)]
pub struct Planner<'a> {
    bundle: &'a Bundle,
    model: Option<&'a Model>,
    include_annotations: bool,
}

impl<'a> Planner<'a> {
    /// Creates a planner for a bundle with no existing model: the plan is a
    /// pure deployment.
    #[must_use]
    pub fn new(bundle: &'a Bundle) -> Self {
        Self {
            bundle,
            model: None,
            include_annotations: true,
        }
    }

    /// Plans against an existing model snapshot; the plan becomes an
    /// incremental convergence. The snapshot is not mutated.
    #[must_use]
    pub fn with_model(mut self, model: &'a Model) -> Self {
        self.model = Some(model);
        self
    }

    /// Controls whether annotation changes are emitted. On by default.
    #[must_use]
    pub fn include_annotations(mut self, include: bool) -> Self {
        self.include_annotations = include;
        self
    }

    /// Computes the ordered change list.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::EmptyBundle`] for a bundle without
    /// applications, [`PlanError::PlacementCycle`] when unit placement
    /// directives reference each other circularly, or a
    /// [`PlanError::Bundle`] for malformed directives. No changes are
    /// returned on error.
    pub fn build(&self) -> Result<Vec<Change>> {
        if self.bundle.applications.is_empty() {
            return Err(PlanError::EmptyBundle);
        }
        let mut model = self.model.cloned().unwrap_or_default();
        model.initialize_sequence();
        model.infer_machine_map(self.bundle);

        let mut resolver = Resolver {
            bundle: self.bundle,
            model,
            changes: ChangeSet::new(),
            include_annotations: self.include_annotations,
        };
        let (added_applications, app_series) = resolver.handle_applications()?;
        let added_machines = resolver.handle_machines();
        resolver.handle_relations(&added_applications);
        resolver.handle_units(&added_applications, &added_machines, &app_series)?;
        resolver.changes.sorted()
    }
}

struct Resolver<'a> {
    bundle: &'a Bundle,
    model: Model,
    changes: ChangeSet,
    include_annotations: bool,
}

impl Resolver<'_> {
    /// Emits charm uploads, deployments, upgrades, and application-level
    /// deltas. Returns the deploy change id per newly deployed application
    /// and the resolved series per application.
    #[allow(clippy::too_many_lines)]
    fn handle_applications(
        &mut self,
    ) -> Result<(BTreeMap<String, String>, BTreeMap<String, String>)> {
        let bundle = self.bundle;
        let mut uploaded: BTreeMap<(String, String), String> = BTreeMap::new();
        let mut added: BTreeMap<String, String> = BTreeMap::new();
        let mut app_series: BTreeMap<String, String> = BTreeMap::new();

        for (name, spec) in &bundle.applications {
            let series = resolve_series(spec, &bundle.default_series)?;
            app_series.insert(name.clone(), series.clone());

            let key = (spec.charm.clone(), series.clone());
            if !uploaded.contains_key(&key) && !self.model.has_charm(&spec.charm) {
                let index = self.changes.add(
                    ChangeParams::AddCharm(AddCharmParams {
                        charm: spec.charm.clone(),
                        series: series.clone(),
                    }),
                    Vec::new(),
                );
                uploaded.insert(key.clone(), self.changes.id_at(index));
            }
            let charm_change = uploaded.get(&key).cloned();

            match self.model.get_application(name).cloned() {
                None => {
                    let deploy_id = self.add_deploy(name, spec, &series, charm_change.as_deref());
                    added.insert(name.clone(), deploy_id);
                }
                Some(existing) => {
                    self.reconcile_application(
                        name,
                        spec,
                        &existing,
                        charm_change.as_deref(),
                    );
                }
            }
        }
        Ok((added, app_series))
    }

    /// Emits `deploy` (and expose/annotations) for an application absent
    /// from the model.
    fn add_deploy(
        &mut self,
        name: &str,
        spec: &ApplicationSpec,
        series: &str,
        charm_change: Option<&str>,
    ) -> String {
        let mut resources = BTreeMap::new();
        let mut local_resources = BTreeMap::new();
        for (res_name, value) in &spec.resources {
            match value {
                ResourceValue::Revision(revision) => {
                    resources.insert(res_name.clone(), *revision);
                }
                ResourceValue::Local(path) => {
                    local_resources.insert(res_name.clone(), path.clone());
                }
            }
        }

        let (charm_ref, requires) = match charm_change {
            Some(id) => (format!("${id}"), vec![id.to_string()]),
            None => (spec.charm.clone(), Vec::new()),
        };
        let index = self.changes.add(
            ChangeParams::Deploy(AddApplicationParams {
                charm: charm_ref,
                series: series.to_string(),
                application: name.to_string(),
                options: spec.options.clone(),
                constraints: spec.constraints.clone(),
                storage: spec.storage.clone(),
                endpoint_bindings: spec.endpoint_bindings.clone(),
                resources,
                local_resources,
                charm_display: spec.charm.clone(),
            }),
            requires,
        );
        let deploy_id = self.changes.id_at(index);
        debug!(application = %name, charm = %spec.charm, "deploying application");

        if spec.expose {
            self.changes.add(
                ChangeParams::Expose(ExposeParams {
                    application: format!("${deploy_id}"),
                    application_display: name.to_string(),
                }),
                vec![deploy_id.clone()],
            );
        }
        if self.include_annotations && !spec.annotations.is_empty() {
            self.changes.add(
                ChangeParams::SetAnnotations(SetAnnotationsParams {
                    id: format!("${deploy_id}"),
                    entity_type: EntityType::Application,
                    annotations: spec.annotations.clone(),
                    target_display: name.to_string(),
                }),
                vec![deploy_id.clone()],
            );
        }
        deploy_id
    }

    /// Emits the deltas for an application already present in the model.
    fn reconcile_application(
        &mut self,
        name: &str,
        spec: &ApplicationSpec,
        existing: &crate::model::Application,
        charm_change: Option<&str>,
    ) {
        if existing.charm != spec.charm {
            let (charm_ref, requires) = match charm_change {
                Some(id) => (format!("${id}"), vec![id.to_string()]),
                None => (spec.charm.clone(), Vec::new()),
            };
            self.changes.add(
                ChangeParams::UpgradeCharm(UpgradeCharmParams {
                    charm: charm_ref,
                    application: name.to_string(),
                    charm_display: spec.charm.clone(),
                }),
                requires,
            );
            debug!(application = %name, charm = %spec.charm, "upgrading charm");
        }

        let changed_options = existing.changed_options(&spec.options);
        if !changed_options.is_empty() {
            self.changes.add(
                ChangeParams::SetOptions(SetOptionsParams {
                    application: name.to_string(),
                    options: changed_options,
                }),
                Vec::new(),
            );
        }

        if !self
            .model
            .constraints_match(&spec.constraints, &existing.constraints)
        {
            self.changes.add(
                ChangeParams::SetConstraints(SetConstraintsParams {
                    application: name.to_string(),
                    constraints: spec.constraints.clone(),
                }),
                Vec::new(),
            );
        }

        if self.include_annotations {
            let changed = existing.changed_annotations(&spec.annotations);
            if !changed.is_empty() {
                self.changes.add(
                    ChangeParams::SetAnnotations(SetAnnotationsParams {
                        id: name.to_string(),
                        entity_type: EntityType::Application,
                        annotations: changed,
                        target_display: name.to_string(),
                    }),
                    Vec::new(),
                );
            }
        }

        if spec.expose && !existing.exposed {
            self.changes.add(
                ChangeParams::Expose(ExposeParams {
                    application: name.to_string(),
                    application_display: name.to_string(),
                }),
                Vec::new(),
            );
        }
    }

    /// Emits machine changes for bundle machines without a model
    /// counterpart; machines resolved through the machine map are reused.
    fn handle_machines(&mut self) -> BTreeMap<String, MachineRecord> {
        let bundle = self.bundle;
        let mut records: BTreeMap<String, MachineRecord> = BTreeMap::new();

        let mut ids: Vec<String> = bundle.machines.keys().cloned().collect();
        sort_naturally(&mut ids);

        for id in ids {
            let spec = bundle.machine(&id);
            let existing = self.model.bundle_machine(&id).cloned();
            let record = match existing {
                Some(machine) => {
                    trace!(bundle_machine = %id, existing = %machine.id, "reusing existing machine");
                    let changed = machine.changed_annotations(&spec.annotations);
                    if self.include_annotations && !changed.is_empty() {
                        self.changes.add(
                            ChangeParams::SetAnnotations(SetAnnotationsParams {
                                id: machine.id.clone(),
                                entity_type: EntityType::Machine,
                                annotations: changed,
                                target_display: format!("existing machine {}", machine.id),
                            }),
                            Vec::new(),
                        );
                    }
                    MachineRecord {
                        change_id: None,
                        machine_id: machine.id,
                        existing: true,
                    }
                }
                None => {
                    let series = if spec.series.is_empty() {
                        bundle.default_series.clone()
                    } else {
                        spec.series.clone()
                    };
                    let machine_id = self.model.next_machine();
                    let index = self.changes.add(
                        ChangeParams::AddMachine(AddMachineParams {
                            series,
                            constraints: spec.constraints.clone(),
                            machine_id: machine_id.clone(),
                            bundle_machine_id: id.clone(),
                            ..AddMachineParams::default()
                        }),
                        Vec::new(),
                    );
                    let change_id = self.changes.id_at(index);
                    if self.include_annotations && !spec.annotations.is_empty() {
                        self.changes.add(
                            ChangeParams::SetAnnotations(SetAnnotationsParams {
                                id: format!("${change_id}"),
                                entity_type: EntityType::Machine,
                                annotations: spec.annotations.clone(),
                                target_display: format!("new machine {machine_id}"),
                            }),
                            vec![change_id.clone()],
                        );
                    }
                    MachineRecord {
                        change_id: Some(change_id),
                        machine_id,
                        existing: false,
                    }
                }
            };
            records.insert(id, record);
        }
        records
    }

    /// Emits `addRelation` for bundle relations absent from the model,
    /// rewriting endpoints of applications deployed in this run to their
    /// deploy-change placeholders.
    fn handle_relations(&mut self, added_applications: &BTreeMap<String, String>) {
        let bundle = self.bundle;
        for relation in &bundle.relations {
            let ep1 = Endpoint::parse(&relation[0]);
            let ep2 = Endpoint::parse(&relation[1]);
            if self.model.has_relation(
                &ep1.application,
                &ep1.relation,
                &ep2.application,
                &ep2.relation,
            ) {
                trace!(endpoint1 = %ep1, endpoint2 = %ep2, "relation already established");
                continue;
            }

            let mut requires = Vec::new();
            let mut rewrite = |ep: &Endpoint| -> Endpoint {
                match added_applications.get(&ep.application) {
                    Some(deploy_id) => {
                        requires.push(deploy_id.clone());
                        Endpoint {
                            application: format!("${deploy_id}"),
                            relation: ep.relation.clone(),
                        }
                    }
                    None => ep.clone(),
                }
            };
            let rewritten1 = rewrite(&ep1);
            let rewritten2 = rewrite(&ep2);
            self.changes.add(
                ChangeParams::AddRelation(AddRelationParams {
                    endpoint1: rewritten1.to_string(),
                    endpoint2: rewritten2.to_string(),
                    endpoint1_display: ep1.to_string(),
                    endpoint2_display: ep2.to_string(),
                }),
                requires,
            );
        }
    }

    /// Runs the unit processor for unit-count convergence and placement.
    fn handle_units(
        &mut self,
        added_applications: &BTreeMap<String, String>,
        added_machines: &BTreeMap<String, MachineRecord>,
        app_series: &BTreeMap<String, String>,
    ) -> Result<()> {
        units::UnitProcessor::new(
            self.bundle,
            &mut self.model,
            &mut self.changes,
            added_applications,
            added_machines,
            app_series,
        )
        .run()
    }
}

/// Resolves the effective series of an application: its own, else the one
/// embedded in the charm reference (URL or local metadata), else the bundle
/// default.
fn resolve_series(spec: &ApplicationSpec, default_series: &str) -> Result<String> {
    if !spec.series.is_empty() {
        return Ok(spec.series.clone());
    }
    if charm::is_local(&spec.charm) {
        if let Some(series) = charm::local_series(&spec.charm)? {
            return Ok(series);
        }
        return Ok(default_series.to_string());
    }
    if let Some(series) = charm::url_series(&spec.charm) {
        return Ok(series);
    }
    Ok(default_series.to_string())
}
