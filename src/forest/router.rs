//! Descriptor routing: descriptor → one leaf per tree.

use super::node::NodeTable;

/// Walk tree `tree` from the root and return the leaf the descriptor reaches.
///
/// At each split node the descriptor goes right (`left_child + 1`) when
/// `descriptor[feature] > threshold`, otherwise left. The node table
/// guarantees children come after their parent, so the walk terminates.
/// `descriptor` must be at least `nodes.required_descriptor_len()` long.
#[inline]
pub fn route(nodes: &NodeTable, tree: usize, descriptor: &[f32]) -> u32 {
    let mut node = nodes.node(tree, 0);
    while !node.is_leaf() {
        let go_right = descriptor[node.feature as usize] > node.threshold;
        let next = node.left_child as usize + usize::from(go_right);
        node = nodes.node(tree, next);
    }
    node.leaf as u32
}

/// Route a descriptor through every tree of the forest.
pub fn route_all(nodes: &NodeTable, descriptor: &[f32]) -> Vec<u32> {
    (0..nodes.tree_count())
        .map(|tree| route(nodes, tree, descriptor))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::node::ForestNode;

    /// Tree 0:
    /// ```text
    ///            n0: f0 > 0.5 ?
    ///           /             \
    ///       n1: leaf 0     n2: f1 > -1.0 ?
    ///                       /          \
    ///                n3: leaf 1     n4: leaf 2
    /// ```
    /// Tree 1 is a single root leaf.
    fn table() -> NodeTable {
        NodeTable::from_trees(&[
            vec![
                ForestNode::split(1, 0, 0.5),
                ForestNode::leaf(0),
                ForestNode::split(3, 1, -1.0),
                ForestNode::leaf(1),
                ForestNode::leaf(2),
            ],
            vec![ForestNode::leaf(0)],
        ])
        .unwrap()
    }

    #[test]
    fn test_root_leaf_always_returns_zero() {
        let nodes = table();
        for d in [[0.0, 0.0], [100.0, -100.0], [-3.0, 7.5]] {
            assert_eq!(route(&nodes, 1, &d), 0);
        }
    }

    #[test]
    fn test_hand_computed_routes() {
        let nodes = table();

        assert_eq!(route(&nodes, 0, &[0.2, 5.0]), 0);
        assert_eq!(route(&nodes, 0, &[0.7, -2.0]), 1);
        assert_eq!(route(&nodes, 0, &[0.7, 0.0]), 2);
        // Equal to the threshold is not greater: goes left.
        assert_eq!(route(&nodes, 0, &[0.5, 0.0]), 0);
        assert_eq!(route(&nodes, 0, &[0.9, -1.0]), 1);
    }

    #[test]
    fn test_route_all_covers_every_tree() {
        let nodes = table();
        assert_eq!(route_all(&nodes, &[0.7, 0.0]), vec![2, 0]);
    }
}
