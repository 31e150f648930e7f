//! Tree Utilities
//!
//! Visible subset of the planning: collapsed lots hide their task rows and
//! bars, which stay in the model.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::domain::{Group, Item};
use crate::store::PlanningState;

/// Render groups as indented rows using recursive DFS
/// Returns (Group, depth) pairs in display order
pub fn flatten_groups(groups: &[Group], collapsed: &BTreeMap<String, bool>) -> Vec<(Group, usize)> {
    // Build parent -> children map, keeping array order
    let mut children_map: HashMap<Option<&str>, Vec<&Group>> = HashMap::new();
    for group in groups {
        children_map.entry(group.parent_id.as_deref()).or_default().push(group);
    }

    fn collect<'a>(
        parent_id: Option<&'a str>,
        depth: usize,
        children_map: &HashMap<Option<&'a str>, Vec<&'a Group>>,
        collapsed: &BTreeMap<String, bool>,
        result: &mut Vec<(Group, usize)>,
    ) {
        if let Some(children) = children_map.get(&parent_id) {
            for &group in children {
                result.push((group.clone(), depth));
                // If not collapsed, add its children
                if !collapsed.get(&group.id).copied().unwrap_or(false) {
                    collect(Some(group.id.as_str()), depth + 1, children_map, collapsed, result);
                }
            }
        }
    }

    let mut result = Vec::new();
    collect(None, 0, &children_map, collapsed, &mut result);
    result
}

/// What the chart draws
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VisibleView {
    pub groups: Vec<Group>,
    pub items: Vec<Item>,
}

pub fn visible_view(state: &PlanningState) -> VisibleView {
    let groups: Vec<Group> = flatten_groups(&state.groups, &state.collapsed)
        .into_iter()
        .map(|(group, _)| group)
        .collect();
    let shown: HashSet<&str> = groups.iter().map(|g| g.id.as_str()).collect();
    let items = state
        .items
        .iter()
        .filter(|item| shown.contains(item.group.as_str()))
        .cloned()
        .collect();
    VisibleView { groups, items }
}
