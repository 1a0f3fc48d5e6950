//! Graph Model: an in-memory, indexed form of a `WorkflowVersion`
//! plus block-definition inheritance resolution.
//!
//! Owns (rather than borrows) its indexed entities so a `GraphModel` can be
//! wrapped in an `Arc` and shared across the scheduler's spawned step tasks
//! without threading a lifetime parameter through the whole engine.

use std::collections::{HashMap, HashSet};

use flow_domain::{
    BlockDefinition, BlockDefinitionSet, BlockGroup, BlockGroupId, Edge, EdgeEndpoint, Port, Step, StepId,
    WorkflowVersion,
};
use serde_json::Value;

use crate::errors::CoreEngineError;

/// A block definition's inheritance chain, fully resolved: pre-process in
/// child-first order, post-process root-first, resolved code from the
/// nearest ancestor that has one, and `config_defaults` merged by override
/// from root downward.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBlock {
    pub slug: String,
    pub pre_process_chain: Vec<String>,
    pub post_process_chain: Vec<String>,
    pub resolved_code: String,
    pub merged_config_defaults: Value,
    pub input_ports: Vec<Port>,
    pub output_ports: Vec<Port>,
    pub required_credentials: Vec<String>,
    pub group_kind: Option<flow_domain::GroupType>,
}

impl ResolvedBlock {
    pub fn default_output_port(&self) -> Option<&Port> {
        self.output_ports
            .iter()
            .find(|p| p.is_default)
            .or_else(|| self.output_ports.iter().find(|p| p.name == "output"))
    }

    pub fn has_port(&self, direction: PortDirection, name: &str) -> bool {
        let ports = match direction {
            PortDirection::Input => &self.input_ports,
            PortDirection::Output => &self.output_ports,
        };
        ports.iter().any(|p| p.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// Indexed, owned view over a `WorkflowVersion`: lookup by step
/// id, outgoing/incoming edges by (endpoint, port), and membership by group
/// id.
#[derive(Debug, Clone)]
pub struct GraphModel {
    pub version: WorkflowVersion,
    steps_by_id: HashMap<StepId, Step>,
    groups_by_id: HashMap<BlockGroupId, BlockGroup>,
    outgoing: HashMap<EdgeEndpoint, Vec<Edge>>,
    incoming: HashMap<EdgeEndpoint, Vec<Edge>>,
    members_by_group: HashMap<BlockGroupId, Vec<StepId>>,
    resolved_blocks: HashMap<StepId, ResolvedBlock>,
}

impl GraphModel {
    pub fn build(version: WorkflowVersion, definitions: &BlockDefinitionSet) -> Result<Self, CoreEngineError> {
        let steps_by_id: HashMap<StepId, Step> = version.steps.iter().cloned().map(|s| (s.id, s)).collect();
        let groups_by_id: HashMap<BlockGroupId, BlockGroup> =
            version.block_groups.iter().cloned().map(|g| (g.id, g)).collect();

        let mut outgoing: HashMap<EdgeEndpoint, Vec<Edge>> = HashMap::new();
        let mut incoming: HashMap<EdgeEndpoint, Vec<Edge>> = HashMap::new();
        for edge in &version.edges {
            outgoing.entry(edge.source).or_default().push(edge.clone());
            incoming.entry(edge.target).or_default().push(edge.clone());
        }

        let mut members_by_group: HashMap<BlockGroupId, Vec<StepId>> = HashMap::new();
        for step in &version.steps {
            if let Some(gid) = step.block_group_id {
                members_by_group.entry(gid).or_default().push(step.id);
            }
        }

        let mut resolved_blocks = HashMap::new();
        for step in &version.steps {
            if let Some(block_id) = step.block_definition_id {
                let def = definitions
                    .find_by_id(block_id)
                    .ok_or_else(|| CoreEngineError::ConfigInvalid(format!("unknown block definition for step {}", step.id)))?;
                let resolved = resolve_inheritance(def, definitions)?;
                resolved_blocks.insert(step.id, resolved);
            }
        }

        Ok(Self {
            version,
            steps_by_id,
            groups_by_id,
            outgoing,
            incoming,
            members_by_group,
            resolved_blocks,
        })
    }

    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps_by_id.get(&id)
    }

    pub fn group(&self, id: BlockGroupId) -> Option<&BlockGroup> {
        self.groups_by_id.get(&id)
    }

    pub fn resolved_block(&self, step_id: StepId) -> Option<&ResolvedBlock> {
        self.resolved_blocks.get(&step_id)
    }

    pub fn outgoing_edges(&self, endpoint: EdgeEndpoint) -> &[Edge] {
        self.outgoing.get(&endpoint).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn incoming_edges(&self, endpoint: EdgeEndpoint) -> &[Edge] {
        self.incoming.get(&endpoint).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn members_of(&self, group_id: BlockGroupId) -> &[StepId] {
        self.members_by_group.get(&group_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Steps with no outgoing edges — the run's termination condition is
    /// "every reachable node is terminal, pending, or skipped", and this is
    /// the accessor for the terminal half of that.
    pub fn terminal_steps(&self) -> Vec<StepId> {
        self.version
            .steps
            .iter()
            .filter(|s| self.outgoing_edges(EdgeEndpoint::Step(s.id)).is_empty())
            .map(|s| s.id)
            .collect()
    }

    /// Distinct ports referenced by at least one incoming edge of `endpoint`
    /// — the set fan-in readiness is computed over, i.e. every required
    /// input port must be satisfied before the node is ready. Works for
    /// both step and group endpoints, since `Edge` may target either.
    pub fn required_input_ports(&self, endpoint: EdgeEndpoint) -> HashSet<String> {
        self.incoming_edges(endpoint).iter().map(|e| e.target_port.clone()).collect()
    }

    pub fn start_steps(&self) -> Vec<StepId> {
        self.version
            .steps
            .iter()
            .filter(|s| s.step_type == flow_domain::StepType::Start)
            .map(|s| s.id)
            .collect()
    }

    /// Groups directly nested under `group_id` via `parent_group_id`.
    pub fn child_groups(&self, group_id: BlockGroupId) -> Vec<BlockGroupId> {
        self.version
            .block_groups
            .iter()
            .filter(|g| g.parent_group_id == Some(group_id))
            .map(|g| g.id)
            .collect()
    }

    /// Every node (step or nested group) that belongs directly to
    /// `group_id`'s body — the sub-DAG of contained steps a Group
    /// Executor's sub-scheduler drives. Nested groups are themselves a node
    /// of that sub-DAG, per `EdgeEndpoint::Group`.
    pub fn nodes_in_scope(&self, group_id: BlockGroupId) -> Vec<EdgeEndpoint> {
        let mut nodes: Vec<EdgeEndpoint> =
            self.members_of(group_id).iter().map(|id| EdgeEndpoint::Step(*id)).collect();
        nodes.extend(self.child_groups(group_id).into_iter().map(EdgeEndpoint::Group));
        nodes
    }

    /// Local roots of a scope: nodes with no incoming edge sourced from
    /// another node in the same scope.
    pub fn entry_nodes(&self, scope: &[EdgeEndpoint]) -> Vec<EdgeEndpoint> {
        let scope_set: HashSet<EdgeEndpoint> = scope.iter().copied().collect();
        scope
            .iter()
            .copied()
            .filter(|node| !self.incoming_edges(*node).iter().any(|e| scope_set.contains(&e.source)))
            .collect()
    }

    /// Nodes within `scope` with no outgoing edge to another node in the
    /// same scope — the scope-local analogue of `terminal_steps`.
    pub fn terminal_nodes(&self, scope: &[EdgeEndpoint]) -> Vec<EdgeEndpoint> {
        let scope_set: HashSet<EdgeEndpoint> = scope.iter().copied().collect();
        scope
            .iter()
            .copied()
            .filter(|node| !self.outgoing_edges(*node).iter().any(|e| scope_set.contains(&e.target)))
            .collect()
    }
}

/// Walks `parent_block_id` from `def` to its root, accumulating chains
/// iteratively (not recursively) so cycles are detected eagerly via a
/// visited set rather than blowing the call stack.
pub fn resolve_inheritance(def: &BlockDefinition, defs: &BlockDefinitionSet) -> Result<ResolvedBlock, CoreEngineError> {
    let mut visited = HashSet::new();
    let mut chain = Vec::new(); // child -> root order
    let mut cur = def;
    loop {
        if !visited.insert(cur.id) {
            return Err(CoreEngineError::CircularInheritance);
        }
        if chain.len() >= crate::constants::MAX_INHERITANCE_DEPTH {
            return Err(CoreEngineError::InheritanceDepthExceeded);
        }
        chain.push(cur);
        match cur.parent_block_id {
            Some(parent_id) => {
                cur = defs
                    .find_by_id(parent_id)
                    .ok_or_else(|| CoreEngineError::ConfigInvalid(format!("unknown parent block {parent_id}")))?;
            }
            None => break,
        }
    }

    let pre_process_chain: Vec<String> = chain.iter().filter_map(|b| b.pre_process.clone()).collect();
    let post_process_chain: Vec<String> = chain.iter().rev().filter_map(|b| b.post_process.clone()).collect();
    let resolved_code = chain
        .iter()
        .find(|b| !b.code.is_empty())
        .map(|b| b.code.clone())
        .unwrap_or_default();

    let mut merged_config_defaults = Value::Null;
    for b in chain.iter().rev() {
        merged_config_defaults = crate::injection::merge_json(&merged_config_defaults, &b.config_defaults);
    }

    Ok(ResolvedBlock {
        slug: def.slug.clone(),
        pre_process_chain,
        post_process_chain,
        resolved_code,
        merged_config_defaults,
        input_ports: def.input_ports.clone(),
        output_ports: def.output_ports.clone(),
        required_credentials: def.required_credentials.clone(),
        group_kind: def.group_kind,
    })
}

/// Idempotence check used by tests: resolving the same definition twice
/// must yield byte-identical chains.
pub fn resolution_is_idempotent(def: &BlockDefinition, defs: &BlockDefinitionSet) -> bool {
    let a = resolve_inheritance(def, defs);
    let b = resolve_inheritance(def, defs);
    match (a, b) {
        (Ok(a), Ok(b)) => a == b,
        (Err(a), Err(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_domain::BlockDefinition;

    fn block(slug: &str) -> BlockDefinition {
        BlockDefinition::new(slug, "test").unwrap()
    }

    #[test]
    fn resolves_code_from_nearest_ancestor() {
        let mut root = block("root");
        root.code = "root-code".into();
        let mut child = block("child").with_parent(root.id).unwrap();
        child.code = String::new();
        let mut defs = BlockDefinitionSet::default();
        defs.definitions.push(root.clone());
        defs.definitions.push(child.clone());

        let resolved = resolve_inheritance(&child, &defs).unwrap();
        assert_eq!(resolved.resolved_code, "root-code");
    }

    #[test]
    fn detects_cycle() {
        let a = block("a");
        let mut b = block("b").with_parent(a.id).unwrap();
        let mut defs = BlockDefinitionSet::default();
        defs.definitions.push(a.clone());
        b.parent_block_id = Some(a.id);
        defs.definitions.push(b.clone());
        let mut a_mut = a.clone();
        a_mut.parent_block_id = Some(b.id);
        defs.definitions[0] = a_mut.clone();

        let err = resolve_inheritance(&a_mut, &defs).unwrap_err();
        assert_eq!(err, CoreEngineError::CircularInheritance);
    }

    #[test]
    fn resolution_idempotent() {
        let mut root = block("root");
        root.code = "x".into();
        let child = block("child").with_parent(root.id).unwrap();
        let mut defs = BlockDefinitionSet::default();
        defs.definitions.push(root);
        defs.definitions.push(child.clone());
        assert!(resolution_is_idempotent(&child, &defs));
    }
}
