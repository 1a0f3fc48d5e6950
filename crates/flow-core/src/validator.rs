//! Validator: rejects a `WorkflowVersion` unless all structural
//! rules hold. Each violated rule surfaces its own `CoreEngineError` variant
//! so callers (and tests) can assert on the specific rule that failed.

use std::collections::{HashMap, HashSet};

use flow_domain::{BlockGroupId, EdgeEndpoint, StepId, StepType};

use crate::errors::CoreEngineError;
use crate::graph::{GraphModel, PortDirection};

pub fn validate(graph: &GraphModel) -> Result<(), CoreEngineError> {
    check_edge_endpoints_exist(graph)?;
    check_no_cycle(graph)?;
    check_reachability(graph)?;
    check_ports(graph)?;
    check_branching_in_group(graph)?;
    check_group_parent_acyclic(graph)?;
    check_credential_bindings(graph)?;
    Ok(())
}

fn check_edge_endpoints_exist(graph: &GraphModel) -> Result<(), CoreEngineError> {
    for edge in &graph.version.edges {
        for endpoint in [edge.source, edge.target] {
            match endpoint {
                EdgeEndpoint::Step(id) if graph.step(id).is_none() => {
                    return Err(CoreEngineError::ConfigInvalid(format!("edge {} references unknown step {id}", edge.id)));
                }
                EdgeEndpoint::Group(id) if graph.group(id).is_none() => {
                    return Err(CoreEngineError::ConfigInvalid(format!("edge {} references unknown group {id}", edge.id)));
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Builds a node-level graph over the step+group projection and runs Kahn's
/// algorithm; any node left un-orderable after the pass is on a cycle (spec
/// §4.2 rule 2). Loop group bodies reference themselves only via internal
/// control flow (foreach/while iteration), never via a graph edge, so they
/// never appear as a structural cycle here.
fn check_no_cycle(graph: &GraphModel) -> Result<(), CoreEngineError> {
    let nodes: Vec<EdgeEndpoint> = graph
        .version
        .steps
        .iter()
        .map(|s| EdgeEndpoint::Step(s.id))
        .chain(graph.version.block_groups.iter().map(|g| EdgeEndpoint::Group(g.id)))
        .collect();

    let mut indegree: HashMap<EdgeEndpoint, usize> = nodes.iter().map(|n| (*n, 0)).collect();
    for edge in &graph.version.edges {
        *indegree.entry(edge.target).or_insert(0) += 1;
    }

    let mut queue: Vec<EdgeEndpoint> = indegree.iter().filter(|(_, &d)| d == 0).map(|(n, _)| *n).collect();
    let mut visited = 0usize;
    let mut indegree = indegree;
    while let Some(n) = queue.pop() {
        visited += 1;
        for edge in graph.outgoing_edges(n) {
            if let Some(d) = indegree.get_mut(&edge.target) {
                *d -= 1;
                if *d == 0 {
                    queue.push(edge.target);
                }
            }
        }
    }

    if visited != nodes.len() {
        return Err(CoreEngineError::ProjectHasCycle);
    }
    Ok(())
}

/// Rule 3: every non-start step reachable from a start step; every step can
/// reach a terminal node (no dangling sources). A step "reaches a terminal
/// node" if following outgoing edges (in either the step or the containing
/// group's projection) eventually lands on a node with no outgoing edges.
fn check_reachability(graph: &GraphModel) -> Result<(), CoreEngineError> {
    let starts = graph.start_steps();
    if starts.is_empty() {
        return Err(CoreEngineError::ConfigInvalid("workflow has no start step".into()));
    }

    let mut reachable: HashSet<EdgeEndpoint> = HashSet::new();
    let mut stack: Vec<EdgeEndpoint> = starts.iter().map(|id| EdgeEndpoint::Step(*id)).collect();
    while let Some(n) = stack.pop() {
        if !reachable.insert(n) {
            continue;
        }
        for edge in graph.outgoing_edges(n) {
            stack.push(edge.target);
        }
    }

    for step in &graph.version.steps {
        if step.step_type == StepType::Start {
            continue;
        }
        // Steps inside a group are reached through the group's own incoming
        // edges, not directly — membership substitutes for a direct edge.
        if let Some(gid) = step.block_group_id {
            if reachable.contains(&EdgeEndpoint::Group(gid)) {
                continue;
            }
        }
        if !reachable.contains(&EdgeEndpoint::Step(step.id)) {
            return Err(CoreEngineError::ProjectHasUnreachable);
        }
    }

    // Every node must be able to reach a terminal (no dangling sources):
    // nodes with outgoing edges whose destinations form a cycle back to
    // themselves without ever reaching a sink are already excluded by the
    // cycle check; here we only need "every node with zero outgoing edges OR
    // a path to one."
    let mut can_terminate: HashSet<EdgeEndpoint> = HashSet::new();
    let all_nodes: Vec<EdgeEndpoint> = graph
        .version
        .steps
        .iter()
        .map(|s| EdgeEndpoint::Step(s.id))
        .chain(graph.version.block_groups.iter().map(|g| EdgeEndpoint::Group(g.id)))
        .collect();
    for &n in &all_nodes {
        if graph.outgoing_edges(n).is_empty() {
            can_terminate.insert(n);
        }
    }
    // Fixed-point propagation backward: a node can terminate if any outgoing
    // edge leads to a node that can terminate.
    let mut changed = true;
    while changed {
        changed = false;
        for &n in &all_nodes {
            if can_terminate.contains(&n) {
                continue;
            }
            if graph.outgoing_edges(n).iter().any(|e| can_terminate.contains(&e.target)) {
                can_terminate.insert(n);
                changed = true;
            }
        }
    }
    for &n in &all_nodes {
        if !can_terminate.contains(&n) {
            return Err(CoreEngineError::ProjectHasUnconnected);
        }
    }
    Ok(())
}

fn check_ports(graph: &GraphModel) -> Result<(), CoreEngineError> {
    for edge in &graph.version.edges {
        check_endpoint_port(graph, edge.source, &edge.source_port, PortDirection::Output)
            .map_err(|_| CoreEngineError::SourcePortNotFound(edge.source_port.clone()))?;
        check_endpoint_port(graph, edge.target, &edge.target_port, PortDirection::Input)
            .map_err(|_| CoreEngineError::TargetPortNotFound(edge.target_port.clone()))?;
    }
    Ok(())
}

fn check_endpoint_port(graph: &GraphModel, endpoint: EdgeEndpoint, port: &str, dir: PortDirection) -> Result<(), ()> {
    match endpoint {
        EdgeEndpoint::Group(_) => Ok(()), // group ports are the group's own external contract; not block-resolved here
        EdgeEndpoint::Step(step_id) => {
            let Some(step) = graph.step(step_id) else { return Err(()) };
            // Branching steps declare their ports dynamically via config
            // (condition true/false, switch cases) rather than through a
            // BlockDefinition; only port-bearing ordinary steps are checked
            // against the resolved block here.
            if step.step_type.is_branching_kind() {
                return Ok(());
            }
            match graph.resolved_block(step_id) {
                Some(resolved) => {
                    if resolved.has_port(dir, port) || port == "error" {
                        Ok(())
                    } else {
                        Err(())
                    }
                }
                None => Ok(()), // no block definition bound (e.g. built-in step type); ports unchecked
            }
        }
    }
}

/// A branching step (condition/switch) with more than one outgoing port
/// must live inside a group; see DESIGN.md for where exactly the boundary
/// of "more than one" is drawn.
fn check_branching_in_group(graph: &GraphModel) -> Result<(), CoreEngineError> {
    for step in &graph.version.steps {
        if !step.step_type.is_branching_kind() {
            continue;
        }
        let port_count: HashSet<&str> = graph
            .outgoing_edges(EdgeEndpoint::Step(step.id))
            .iter()
            .map(|e| e.source_port.as_str())
            .collect();
        if port_count.len() > 1 && step.block_group_id.is_none() {
            return Err(CoreEngineError::ProjectBranchOutsideGroup);
        }
    }
    Ok(())
}

fn check_group_parent_acyclic(graph: &GraphModel) -> Result<(), CoreEngineError> {
    for group in &graph.version.block_groups {
        let mut visited = HashSet::new();
        let mut cur = Some(group.id);
        while let Some(gid) = cur {
            if !visited.insert(gid) {
                return Err(CoreEngineError::ConfigInvalid(format!("block group {gid} parent chain has a cycle")));
            }
            cur = graph.group(gid).and_then(|g| g.parent_group_id);
        }
    }
    Ok(())
}

fn check_credential_bindings(graph: &GraphModel) -> Result<(), CoreEngineError> {
    for step in &graph.version.steps {
        let Some(resolved) = graph.resolved_block(step.id) else { continue };
        for required in &resolved.required_credentials {
            if !step.credential_bindings.contains_key(required) {
                return Err(CoreEngineError::CredentialBindingMissing(required.clone()));
            }
        }
    }
    Ok(())
}

/// Helper used by group executors needing a group's declared body members'
/// owning group-id chain without re-walking the whole `BlockGroup` table.
pub fn group_ancestors(graph: &GraphModel, mut group_id: BlockGroupId) -> Vec<BlockGroupId> {
    let mut out = Vec::new();
    while let Some(group) = graph.group(group_id) {
        out.push(group.id);
        match group.parent_group_id {
            Some(parent) => group_id = parent,
            None => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_domain::*;
    use serde_json::Value;

    fn tenant() -> TenantId {
        TenantId::new()
    }

    #[test]
    fn rejects_cycle() {
        let t = tenant();
        let s1 = Step::new("s1", StepType::Start).unwrap();
        let s2 = Step::new("s2", StepType::Function).unwrap();
        let e1 = Edge::new(EdgeEndpoint::Step(s1.id), "output", EdgeEndpoint::Step(s2.id), "input").unwrap();
        let e2 = Edge::new(EdgeEndpoint::Step(s2.id), "output", EdgeEndpoint::Step(s1.id), "input").unwrap();
        let version = WorkflowVersion::new(t, 1).with_steps(vec![s1, s2]).with_edges(vec![e1, e2]);
        let defs = BlockDefinitionSet::default();
        let graph = GraphModel::build(version, &defs).unwrap();
        assert_eq!(validate(&graph).unwrap_err(), CoreEngineError::ProjectHasCycle);
    }

    #[test]
    fn rejects_unreachable_step() {
        let t = tenant();
        let s1 = Step::new("s1", StepType::Start).unwrap();
        let s2 = Step::new("s2", StepType::Function).unwrap();
        let version = WorkflowVersion::new(t, 1).with_steps(vec![s1, s2]).with_edges(vec![]);
        let defs = BlockDefinitionSet::default();
        let graph = GraphModel::build(version, &defs).unwrap();
        assert_eq!(validate(&graph).unwrap_err(), CoreEngineError::ProjectHasUnreachable);
    }

    #[test]
    fn rejects_branching_outside_group() {
        let t = tenant();
        let s1 = Step::new("s1", StepType::Start).unwrap();
        let s2 = Step::new("s2", StepType::Condition).unwrap();
        let t1 = Step::new("t1", StepType::Function).unwrap();
        let t2 = Step::new("t2", StepType::Function).unwrap();
        let e1 = Edge::new(EdgeEndpoint::Step(s1.id), "output", EdgeEndpoint::Step(s2.id), "input").unwrap();
        let e2 = Edge::new(EdgeEndpoint::Step(s2.id), "true", EdgeEndpoint::Step(t1.id), "input").unwrap();
        let e3 = Edge::new(EdgeEndpoint::Step(s2.id), "false", EdgeEndpoint::Step(t2.id), "input").unwrap();
        let version = WorkflowVersion::new(t, 1)
            .with_steps(vec![s1, s2, t1, t2])
            .with_edges(vec![e1, e2, e3]);
        let defs = BlockDefinitionSet::default();
        let graph = GraphModel::build(version, &defs).unwrap();
        assert_eq!(validate(&graph).unwrap_err(), CoreEngineError::ProjectBranchOutsideGroup);
    }

    #[test]
    fn accepts_linear_workflow() {
        let t = tenant();
        let s1 = Step::new("s1", StepType::Start).unwrap();
        let s2 = Step::new("s2", StepType::Log).unwrap();
        let e1 = Edge::new(EdgeEndpoint::Step(s1.id), "output", EdgeEndpoint::Step(s2.id), "input").unwrap();
        let version = WorkflowVersion::new(t, 1).with_steps(vec![s1, s2]).with_edges(vec![e1]);
        let defs = BlockDefinitionSet::default();
        let graph = GraphModel::build(version, &defs).unwrap();
        assert!(validate(&graph).is_ok());
        let _ = Value::Null;
    }
}
