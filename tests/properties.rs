//! Property tests: random mutation sequences keep the tree well formed.

use std::sync::Arc;

use cactus_graph::store::InMemoryGraphStore;
use cactus_graph::{GraphId, GraphKernel, GraphState, GraphTree, NodeId};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Extend(usize),
    Fork(usize),
    DeleteNode(usize),
    DeleteExtension(usize),
    DeleteChildren(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => any::<usize>().prop_map(Op::Extend),
        3 => any::<usize>().prop_map(Op::Fork),
        1 => any::<usize>().prop_map(Op::DeleteNode),
        1 => any::<usize>().prop_map(Op::DeleteExtension),
        1 => any::<usize>().prop_map(Op::DeleteChildren),
    ]
}

fn pick(state: &GraphState, index: usize) -> Option<NodeId> {
    let ids: Vec<NodeId> = state.nodes.values().map(|n| n.id).collect();
    if ids.is_empty() {
        None
    } else {
        Some(ids[index % ids.len()])
    }
}

fn check_tree(tree: &GraphTree, state: &GraphState) -> Result<(), TestCaseError> {
    let roots = tree.branches().filter(|b| b.parent_node.is_none()).count();
    prop_assert!(roots <= 1);

    for branch in tree.branches() {
        if let Some(parent) = branch.parent_node {
            prop_assert!(tree.contains_node(parent));
            prop_assert_ne!(tree.node(parent).unwrap().branch_id, branch.id);
        }

        let members = tree.nodes_of(branch.id).unwrap();
        let sequences: Vec<i64> = members
            .iter()
            .map(|id| tree.node(*id).unwrap().sequence)
            .collect();
        prop_assert!(sequences.windows(2).all(|w| w[0] < w[1]));

        let projected = state.branch(branch.id).unwrap();
        prop_assert_eq!(&projected.node_ids, &members.to_vec());
        let heads: Vec<NodeId> = members
            .iter()
            .copied()
            .filter(|id| state.node(*id).unwrap().is_head)
            .collect();
        prop_assert_eq!(heads, members.last().copied().into_iter().collect::<Vec<_>>());
    }

    prop_assert_eq!(state.nodes.len(), tree.num_nodes());
    prop_assert_eq!(state.branches.len(), tree.num_branches());
    Ok(())
}

async fn run(ops: Vec<Op>) -> Result<(), TestCaseError> {
    let kernel = GraphKernel::new(Arc::new(InMemoryGraphStore::new()));
    let gid = GraphId::new("prop");
    let mut state = kernel.create_root(&gid, "root", "user").await.unwrap();

    for op in ops {
        let before = state.clone();
        state = match op {
            Op::Extend(i) => {
                let Some(node) = pick(&before, i) else { continue };
                let owner = before
                    .branches
                    .values()
                    .find(|b| b.node_ids.contains(&node))
                    .unwrap()
                    .id;
                let after = kernel.extend(node, "more", "user").await.unwrap();
                let members = &after.branch(owner).unwrap().node_ids;
                prop_assert_eq!(members.len(), before.branch(owner).unwrap().node_ids.len() + 1);
                prop_assert_eq!(after.nodes.len(), before.nodes.len() + 1);
                after
            }
            Op::Fork(i) => {
                let Some(node) = pick(&before, i) else { continue };
                let after = kernel.fork(node, "fork", "start", "user").await.unwrap();
                prop_assert_eq!(after.branches.len(), before.branches.len() + 1);
                prop_assert_eq!(
                    after.branches_forked_from(node).len(),
                    before.branches_forked_from(node).len() + 1
                );
                after
            }
            Op::DeleteNode(i) => {
                let Some(node) = pick(&before, i) else { continue };
                let after = kernel.delete_node_and_descendants(node).await.unwrap();
                prop_assert!(after.node(node).is_none());
                prop_assert!(after.branches_forked_from(node).is_empty());
                after
            }
            Op::DeleteExtension(i) => {
                let Some(node) = pick(&before, i) else { continue };
                let after = kernel.delete_extension(node).await.unwrap();
                let owner = after
                    .branches
                    .values()
                    .find(|b| b.node_ids.contains(&node))
                    .unwrap();
                prop_assert_eq!(owner.node_ids.first().copied(), Some(node));
                after
            }
            Op::DeleteChildren(i) => {
                let Some(node) = pick(&before, i) else { continue };
                let after = kernel.delete_children(node).await.unwrap();
                prop_assert!(after.branches_forked_from(node).is_empty());
                prop_assert!(after.node(node).is_some());
                after
            }
        };

        let tree = kernel.engine().load_tree(&gid).await.unwrap();
        check_tree(&tree, &state)?;
        prop_assert_eq!(&cactus_graph::project(&tree), &state);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_mutations_keep_tree_well_formed(ops in prop::collection::vec(op_strategy(), 1..24)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run(ops))?;
    }
}
