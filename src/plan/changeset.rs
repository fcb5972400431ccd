//! The append-only change set and its topological emission order.

use std::collections::{HashSet, VecDeque};

use crate::error::{PlanError, Result};
use crate::plan::change::{Change, ChangeParams};

/// Accumulates changes during a planning run.
///
/// Ids are assigned on append as `<method>-<k>` where `k` is the number of
/// changes already added; they are unique within a run and never reused.
/// Appended changes may be patched afterwards (placement targets and extra
/// requirements become known late), which is why [`ChangeSet::add`] hands
/// back an index.
#[derive(Debug, Default)]
pub(crate) struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends a change, assigning its id. Returns the change's index.
    pub(crate) fn add(&mut self, params: ChangeParams, requires: Vec<String>) -> usize {
        let id = format!("{}-{}", params.method(), self.changes.len());
        self.changes.push(Change::new(id, requires, params));
        self.changes.len() - 1
    }

    /// The id of the change at `index`.
    pub(crate) fn id_at(&self, index: usize) -> String {
        self.changes[index].id().to_string()
    }

    /// Adds a requirement to the change at `index`; duplicates are ignored.
    pub(crate) fn require(&mut self, index: usize, id: String) {
        self.changes[index].push_require(id);
    }

    /// Patches the placement fields of an `addUnit` change.
    pub(crate) fn set_unit_placement(
        &mut self,
        index: usize,
        to: String,
        placement_display: String,
        directive: String,
    ) {
        if let ChangeParams::AddUnit(params) = self.changes[index].params_mut() {
            params.to = to;
            params.placement_display = placement_display;
            params.directive = directive;
        }
    }

    /// Returns the changes in a topological order consistent with their
    /// requirements, stable with respect to insertion order.
    ///
    /// The order is produced by rotation: repeatedly take the next change
    /// whose requirements have all been emitted, otherwise move it to the
    /// tail. A full rotation without progress means the requirements graph
    /// has a cycle, which is a planner defect.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Internal`] if the requirement graph does not
    /// drain.
    pub(crate) fn sorted(self) -> Result<Vec<Change>> {
        let mut queue: VecDeque<Change> = self.changes.into();
        let mut emitted: HashSet<String> = HashSet::with_capacity(queue.len());
        let mut result = Vec::with_capacity(queue.len());
        let mut stalled = 0;

        while let Some(change) = queue.pop_front() {
            if change
                .requires()
                .iter()
                .all(|required| emitted.contains(required))
            {
                emitted.insert(change.id().to_string());
                result.push(change);
                stalled = 0;
            } else {
                queue.push_back(change);
                stalled += 1;
                if stalled > queue.len() {
                    return Err(PlanError::internal(
                        "change requirements do not form a DAG",
                    ));
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::change::AddCharmParams;

    fn charm_params(name: &str) -> ChangeParams {
        ChangeParams::AddCharm(AddCharmParams {
            charm: name.to_string(),
            series: String::new(),
        })
    }

    #[test]
    fn test_ids_follow_insertion_order() {
        let mut set = ChangeSet::new();
        let a = set.add(charm_params("a"), Vec::new());
        let b = set.add(charm_params("b"), Vec::new());
        assert_eq!(set.id_at(a), "addCharm-0");
        assert_eq!(set.id_at(b), "addCharm-1");
    }

    #[test]
    fn test_sorted_is_stable_for_independent_changes() {
        let mut set = ChangeSet::new();
        for name in ["a", "b", "c"] {
            set.add(charm_params(name), Vec::new());
        }
        let ids: Vec<String> = set
            .sorted()
            .unwrap()
            .iter()
            .map(|c| c.id().to_string())
            .collect();
        assert_eq!(ids, vec!["addCharm-0", "addCharm-1", "addCharm-2"]);
    }

    #[test]
    fn test_sorted_defers_until_requirements_met() {
        let mut set = ChangeSet::new();
        // 0 requires 2, which is appended later.
        set.add(charm_params("a"), vec![String::from("addCharm-2")]);
        set.add(charm_params("b"), Vec::new());
        set.add(charm_params("c"), Vec::new());
        let ids: Vec<String> = set
            .sorted()
            .unwrap()
            .iter()
            .map(|c| c.id().to_string())
            .collect();
        assert_eq!(ids, vec!["addCharm-1", "addCharm-2", "addCharm-0"]);
    }

    #[test]
    fn test_sorted_detects_requirement_cycle() {
        let mut set = ChangeSet::new();
        set.add(charm_params("a"), vec![String::from("addCharm-1")]);
        set.add(charm_params("b"), vec![String::from("addCharm-0")]);
        assert!(matches!(set.sorted(), Err(PlanError::Internal(_))));
    }

    #[test]
    fn test_duplicate_requires_are_ignored() {
        let mut set = ChangeSet::new();
        let a = set.add(charm_params("a"), vec![String::from("x")]);
        set.require(a, String::from("x"));
        assert_eq!(set.changes[a].requires(), ["x"]);
    }
}
