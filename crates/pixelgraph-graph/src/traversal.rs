//! Post-order traversal, terminal-node discovery, and dependency-tree
//! printing. Stateless — every function takes the [`GraphModel`] it
//! operates on, so multiple traversals (from different roots, on
//! different threads) never contend on anything but the model's own
//! node-table lock.

use std::collections::HashMap;

use pixelgraph_core::{GraphError, GraphResult};

use crate::model::GraphModel;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    Gray,
    Black,
}

fn visit(graph: &GraphModel, id: i64, colors: &mut HashMap<i64, Color>, order: &mut Vec<i64>) -> GraphResult<()> {
    match colors.get(&id) {
        Some(Color::Black) => return Ok(()),
        Some(Color::Gray) => return Err(GraphError::Cycle(format!("cycle detected at node {id}"))),
        None => {}
    }
    colors.insert(id, Color::Gray);
    if let Some(node) = graph.get(id) {
        for parent in node
            .image_inputs
            .iter()
            .map(|i| i.from_node_id)
            .chain(node.parameter_inputs.iter().map(|p| p.from_node_id))
        {
            visit(graph, parent, colors, order)?;
        }
    }
    colors.insert(id, Color::Black);
    order.push(id);
    Ok(())
}

/// Dependency-first (post) order of every node reachable from `end_id`,
/// `end_id` itself last. A back edge to a node still on the DFS stack is a
/// [`GraphError::Cycle`].
pub fn topo_postorder_from(graph: &GraphModel, end_id: i64) -> GraphResult<Vec<i64>> {
    let mut colors = HashMap::new();
    let mut order = Vec::new();
    visit(graph, end_id, &mut colors, &mut order)?;
    Ok(order)
}

/// Node ids never referenced as an input by any other node in the graph —
/// the graph's terminal outputs.
pub fn ending_nodes(graph: &GraphModel) -> Vec<i64> {
    let all_nodes = graph.all_nodes();
    let mut referenced: std::collections::HashSet<i64> = std::collections::HashSet::new();
    for node in &all_nodes {
        referenced.extend(node.image_inputs.iter().map(|i| i.from_node_id));
        referenced.extend(node.parameter_inputs.iter().map(|p| p.from_node_id));
    }
    all_nodes
        .into_iter()
        .map(|n| n.id)
        .filter(|id| !referenced.contains(id))
        .collect()
}

/// Cycle pre-check only: is `potential_ancestor` reachable by following
/// `start`'s declared inputs? Delegates to [`GraphModel::is_ancestor`].
pub fn is_ancestor(graph: &GraphModel, potential_ancestor: i64, start: i64) -> bool {
    graph.is_ancestor(potential_ancestor, start)
}

/// A stable, indented text rendering of the dependency tree rooted at
/// `root_id`, for diagnostics. Edge order matches declaration order
/// (`image_inputs` then `parameter_inputs`), so the output is deterministic
/// for a given graph.
pub fn print_dependency_tree(graph: &GraphModel, root_id: i64) -> GraphResult<String> {
    let mut out = String::new();
    write_tree(graph, root_id, 0, &mut out)?;
    Ok(out)
}

fn write_tree(graph: &GraphModel, id: i64, depth: usize, out: &mut String) -> GraphResult<()> {
    let node = graph
        .get(id)
        .ok_or_else(|| GraphError::NotFound(format!("node {id}")))?;
    out.push_str(&"  ".repeat(depth));
    out.push_str(&format!("- [{}] {} ({}:{})\n", node.id, node.name, node.node_type, node.subtype));
    for input in &node.image_inputs {
        write_tree(graph, input.from_node_id, depth + 1, out)?;
    }
    for input in &node.parameter_inputs {
        write_tree(graph, input.from_node_id, depth + 1, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ImageInput, Node};

    fn chain_graph() -> GraphModel {
        let graph = GraphModel::new("/tmp/pixelgraph-test");
        graph.add_node(Node::new(1, "source", "generator", "perlin")).unwrap();
        graph
            .add_node(Node::new(2, "blur", "filter", "gaussian").with_image_input(ImageInput::new(1)))
            .unwrap();
        graph
            .add_node(Node::new(3, "grade", "filter", "curve").with_image_input(ImageInput::new(2)))
            .unwrap();
        graph
    }

    #[test]
    fn postorder_visits_dependencies_before_dependents() {
        let graph = chain_graph();
        let order = topo_postorder_from(&graph, 3).unwrap();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn ending_nodes_excludes_referenced_ids() {
        let graph = chain_graph();
        assert_eq!(ending_nodes(&graph), vec![3]);
    }

    #[test]
    fn dependency_tree_renders_chain() {
        let graph = chain_graph();
        let text = print_dependency_tree(&graph, 3).unwrap();
        assert_eq!(
            text,
            "- [3] grade (filter:curve)\n  - [2] blur (filter:gaussian)\n    - [1] source (generator:perlin)\n"
        );
    }
}
