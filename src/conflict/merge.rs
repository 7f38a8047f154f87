//! Three-way merge for structured document values.
//!
//! The only mergeable shape is an ordered list of identity-tagged nodes
//! (`[{ "id": ..., ... }, ...]`): the common editor document shape, where
//! each node is a block/paragraph/item with a stable id. Anything else
//! (scalars, maps without an `id` key, type mismatches between base/mine/
//! theirs) is not computable and falls back to a textual diff preview.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Merged(String),
    NotComputable { reason: String, diff_preview: String },
}

/// Pluggable per §6 Adapter contracts: a host may supply a domain-specific
/// merge strategy instead of the default ordered-node-list one.
pub trait MergeStrategy: Send + Sync {
    fn merge(&self, base: &str, mine: &str, theirs: &str) -> MergeOutcome;
}

/// Default strategy: three-way merge over ordered node lists keyed by `id`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrderedNodeListMerge;

impl MergeStrategy for OrderedNodeListMerge {
    fn merge(&self, base: &str, mine: &str, theirs: &str) -> MergeOutcome {
        let (Some(base_nodes), Some(mine_nodes), Some(theirs_nodes)) =
            (parse_node_list(base), parse_node_list(mine), parse_node_list(theirs))
        else {
            return not_computable("value is not an ordered list of identity-tagged nodes", mine, theirs);
        };

        let base_by_id = index_by_id(&base_nodes);
        let mine_by_id = index_by_id(&mine_nodes);
        let theirs_by_id = index_by_id(&theirs_nodes);

        let mut merged: Vec<Value> = Vec::new();
        let mut seen = std::collections::HashSet::new();

        // Walk theirs' order first since the server value is the
        // authoritative ordering once a conflict exists; locally-added
        // nodes are appended after.
        for node in &theirs_nodes {
            let Some(id) = node_id(node) else { continue };
            seen.insert(id.clone());

            let base_node = base_by_id.get(&id);
            let mine_node = mine_by_id.get(&id);

            match (base_node, mine_node) {
                (Some(base_node), Some(mine_node)) => {
                    let mine_changed = *mine_node != base_node;
                    let theirs_changed = node != *base_node;
                    match (mine_changed, theirs_changed) {
                        (true, true) if node != *mine_node => {
                            return not_computable(
                                &format!("node `{id}` edited on both sides"),
                                mine,
                                theirs,
                            );
                        }
                        (true, _) => merged.push((*mine_node).clone()),
                        _ => merged.push(node.clone()),
                    }
                }
                (None, Some(_)) => {
                    // Added on both sides with the same id but no common
                    // ancestor to compare against: can't tell which wins.
                    return not_computable(&format!("node `{id}` added on both sides"), mine, theirs);
                }
                (Some(_), None) => {
                    // Deleted locally, still present remotely; remote
                    // content survives since the merge favors not losing
                    // server-visible data silently.
                    merged.push(node.clone());
                }
                (None, None) => merged.push(node.clone()),
            }
        }

        // Nodes mine added that theirs never saw.
        for node in &mine_nodes {
            let Some(id) = node_id(node) else { continue };
            if seen.contains(&id) {
                continue;
            }
            if base_by_id.contains_key(&id) {
                // Present in base, absent from theirs: theirs deleted it.
                // Respect the deletion rather than resurrecting it.
                continue;
            }
            merged.push(node.clone());
        }

        match serde_json::to_string(&Value::Array(merged)) {
            Ok(body) => MergeOutcome::Merged(body),
            Err(e) => not_computable(&format!("failed to serialise merge result: {e}"), mine, theirs),
        }
    }
}

fn not_computable(reason: &str, mine: &str, theirs: &str) -> MergeOutcome {
    MergeOutcome::NotComputable { reason: reason.to_string(), diff_preview: line_diff_preview(mine, theirs) }
}

/// A minimal preview for the UI to render when no automatic merge is
/// possible: lines unique to each side, not a full diff algorithm.
fn line_diff_preview(mine: &str, theirs: &str) -> String {
    let mine_lines: std::collections::HashSet<&str> = mine.lines().collect();
    let theirs_lines: std::collections::HashSet<&str> = theirs.lines().collect();

    let mut preview = String::new();
    for line in mine.lines() {
        if !theirs_lines.contains(line) {
            preview.push_str("- (mine) ");
            preview.push_str(line);
            preview.push('\n');
        }
    }
    for line in theirs.lines() {
        if !mine_lines.contains(line) {
            preview.push_str("+ (theirs) ");
            preview.push_str(line);
            preview.push('\n');
        }
    }
    preview
}

fn parse_node_list(raw: &str) -> Option<Vec<Value>> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let array = value.as_array()?;
    if array.iter().all(|n| node_id(n).is_some()) {
        Some(array.clone())
    } else {
        None
    }
}

fn node_id(node: &Value) -> Option<String> {
    node.get("id").and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn index_by_id(nodes: &[Value]) -> std::collections::HashMap<String, Value> {
    nodes.iter().filter_map(|n| node_id(n).map(|id| (id, n.clone()))).collect()
}
