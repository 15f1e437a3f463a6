//! Sticky, balanced assignment of partitions to nodes.
//!
//! Every node computes the same assignment from the same inputs: the
//! partition count, the member list in name order, and the previous
//! assignment. Partitions a node already held are kept up to its new quota,
//! which keeps stop/start churn to the minimum a rebalance needs.

use crate::error::{Error, Result};
use crate::types::{NodeName, PartitionId};
use std::collections::BTreeMap;

/// Partitions assigned to each node, in assignment order.
pub type PartitionAssignments = BTreeMap<NodeName, Vec<PartitionId>>;

/// Compute a new assignment of `count` partitions over `nodes`.
///
/// With `N` nodes, the first `count % N` nodes in name order get
/// `ceil(count / N)` partitions and the rest get `floor(count / N)`.
/// Each node first keeps partitions it held in `current`, then tops up from
/// the unclaimed partitions in ascending ID order.
///
/// `nodes` is sorted and deduplicated before use. Entries of `current` that
/// are out of range or already kept by an earlier node are ignored.
pub fn reallocate(
    count: u32,
    nodes: &[NodeName],
    current: &PartitionAssignments,
) -> Result<PartitionAssignments> {
    let mut nodes: Vec<&NodeName> = nodes.iter().collect();
    nodes.sort();
    nodes.dedup();
    if nodes.is_empty() {
        return Err(Error::EmptyNodeList);
    }

    let n = nodes.len();
    let count_usize = count as usize;
    let low = count_usize / n;
    let high = count_usize.div_ceil(n);
    let high_count = count_usize - low * n;
    let quota = |i: usize| if i < high_count { high } else { low };

    let mut used = vec![false; count_usize];
    let mut kept: Vec<Vec<PartitionId>> = Vec::with_capacity(n);

    for (i, node) in nodes.iter().enumerate() {
        let target = quota(i);
        let mut retained = Vec::with_capacity(target);
        for &p in current.get(*node).map(Vec::as_slice).unwrap_or_default() {
            if retained.len() == target {
                break;
            }
            let Some(slot) = used.get_mut(p as usize) else {
                continue;
            };
            if *slot {
                continue;
            }
            *slot = true;
            retained.push(p);
        }
        kept.push(retained);
    }

    let mut free = used
        .iter()
        .enumerate()
        .filter(|(_, used)| !**used)
        .map(|(p, _)| p as PartitionId);

    let mut result = PartitionAssignments::new();
    for (i, (node, mut partitions)) in nodes.into_iter().zip(kept).enumerate() {
        let missing = quota(i) - partitions.len();
        partitions.extend(free.by_ref().take(missing));
        result.insert(node.clone(), partitions);
    }

    Ok(result)
}

/// Invert an assignment into a per-partition owner table.
///
/// `owners[p]` is the node assigned partition `p`, or `None` if no node is.
pub fn owners(count: u32, assignments: &PartitionAssignments) -> Vec<Option<&NodeName>> {
    let mut owners = vec![None; count as usize];
    for (node, partitions) in assignments {
        for &p in partitions {
            if let Some(slot) = owners.get_mut(p as usize) {
                *slot = Some(node);
            }
        }
    }
    owners
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<NodeName> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn assigns(list: &[(&str, &[PartitionId])]) -> PartitionAssignments {
        list.iter()
            .map(|(node, parts)| (node.to_string(), parts.to_vec()))
            .collect()
    }

    #[test]
    fn test_from_empty_two_nodes() {
        let result = reallocate(5, &names(&["A", "B"]), &PartitionAssignments::new()).unwrap();
        assert_eq!(result, assigns(&[("A", &[0, 1, 2]), ("B", &[3, 4])]));
    }

    #[test]
    fn test_single_node_takes_all() {
        let result = reallocate(3, &names(&["A"]), &PartitionAssignments::new()).unwrap();
        assert_eq!(result, assigns(&[("A", &[0, 1, 2])]));
    }

    #[test]
    fn test_new_node_takes_excess() {
        let current = assigns(&[("A", &[0, 1, 2, 3, 4])]);
        let result = reallocate(5, &names(&["A", "B"]), &current).unwrap();
        assert_eq!(result, assigns(&[("A", &[0, 1, 2]), ("B", &[3, 4])]));
    }

    #[test]
    fn test_sticky_on_node_join_in_front() {
        let current = assigns(&[("B", &[0, 1, 2]), ("C", &[3, 4, 5])]);
        let result = reallocate(6, &names(&["A", "B", "C"]), &current).unwrap();
        assert_eq!(
            result,
            assigns(&[("A", &[2, 5]), ("B", &[0, 1]), ("C", &[3, 4])])
        );
    }

    #[test]
    fn test_node_leave_redistributes() {
        let current = assigns(&[("A", &[0, 1]), ("B", &[2, 3]), ("C", &[4, 5])]);
        let result = reallocate(6, &names(&["A", "C"]), &current).unwrap();
        assert_eq!(result, assigns(&[("A", &[0, 1, 2]), ("C", &[4, 5, 3])]));
    }

    #[test]
    fn test_more_nodes_than_partitions() {
        let result =
            reallocate(2, &names(&["A", "B", "C", "D"]), &PartitionAssignments::new()).unwrap();
        assert_eq!(
            result,
            assigns(&[("A", &[0]), ("B", &[1]), ("C", &[]), ("D", &[])])
        );
    }

    #[test]
    fn test_unsorted_and_duplicate_nodes() {
        let result =
            reallocate(5, &names(&["B", "A", "B"]), &PartitionAssignments::new()).unwrap();
        assert_eq!(result, assigns(&[("A", &[0, 1, 2]), ("B", &[3, 4])]));
    }

    #[test]
    fn test_stale_current_ignored() {
        // 9 is out of range, 1 is claimed twice
        let current = assigns(&[("A", &[9, 1]), ("B", &[1, 2])]);
        let result = reallocate(4, &names(&["A", "B"]), &current).unwrap();
        assert_eq!(result, assigns(&[("A", &[1, 0]), ("B", &[2, 3])]));
    }

    #[test]
    fn test_empty_node_list_rejected() {
        let err = reallocate(4, &[], &PartitionAssignments::new()).unwrap_err();
        assert!(matches!(err, Error::EmptyNodeList));
    }

    #[test]
    fn test_zero_partitions() {
        let result = reallocate(0, &names(&["A", "B"]), &PartitionAssignments::new()).unwrap();
        assert_eq!(result, assigns(&[("A", &[]), ("B", &[])]));
    }

    #[test]
    fn test_owners_table() {
        let a = assigns(&[("A", &[0, 2]), ("B", &[1])]);
        let table = owners(4, &a);
        assert_eq!(table[0].map(String::as_str), Some("A"));
        assert_eq!(table[1].map(String::as_str), Some("B"));
        assert_eq!(table[2].map(String::as_str), Some("A"));
        assert_eq!(table[3], None);
    }
}
