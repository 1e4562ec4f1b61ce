//! Stable topological ordering of pending items.

/// Items participating in a dependency cycle, as input indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    /// Members in discovery order, starting at the item that closed the
    /// cycle.
    pub members: Vec<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Order `len` items so every predecessor of an item precedes it.
///
/// `preds(i)` returns the indices that must come before item `i`.
/// Indices outside `0..len` are ignored (they refer to items that are not
/// pending). Ties break by input order, so independent items keep their
/// original relative positions.
///
/// Returns the indices in commit order, or the [`Cycle`] encountered.
pub fn sort_stable<F>(len: usize, mut preds: F) -> Result<Vec<usize>, Cycle>
where
    F: FnMut(usize) -> Vec<usize>,
{
    let mut marks = vec![Mark::Unvisited; len];
    let mut order = Vec::with_capacity(len);
    let mut stack = Vec::new();

    for root in 0..len {
        if marks[root] == Mark::Unvisited {
            visit(root, len, &mut preds, &mut marks, &mut stack, &mut order)?;
        }
    }

    Ok(order)
}

fn visit<F>(
    node: usize,
    len: usize,
    preds: &mut F,
    marks: &mut [Mark],
    stack: &mut Vec<usize>,
    order: &mut Vec<usize>,
) -> Result<(), Cycle>
where
    F: FnMut(usize) -> Vec<usize>,
{
    marks[node] = Mark::Visiting;
    stack.push(node);

    for pred in preds(node) {
        if pred >= len {
            continue;
        }
        match marks[pred] {
            Mark::Done => {}
            Mark::Unvisited => visit(pred, len, preds, marks, stack, order)?,
            Mark::Visiting => {
                // Everything from the first occurrence of `pred` on the
                // stack participates in the cycle.
                let start = stack
                    .iter()
                    .position(|&n| n == pred)
                    .expect("visiting node must be on the stack");
                return Err(Cycle {
                    members: stack[start..].to_vec(),
                });
            }
        }
    }

    stack.pop();
    marks[node] = Mark::Done;
    order.push(node);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preds_from(edges: &[(usize, usize)]) -> impl FnMut(usize) -> Vec<usize> + '_ {
        // (before, after): `before` is a predecessor of `after`.
        move |node| {
            edges
                .iter()
                .filter(|(_, after)| *after == node)
                .map(|(before, _)| *before)
                .collect()
        }
    }

    #[test]
    fn independent_items_keep_input_order() {
        let order = sort_stable(4, |_| Vec::new()).unwrap();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn predecessors_come_first() {
        // 2 before 0, 3 before 2.
        let edges = [(2, 0), (3, 2)];
        let order = sort_stable(4, preds_from(&edges)).unwrap();

        let pos = |n: usize| order.iter().position(|&x| x == n).unwrap();
        assert!(pos(3) < pos(2));
        assert!(pos(2) < pos(0));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn stability_among_unconstrained_items() {
        // Only 3 before 1; everything else free.
        let edges = [(3, 1)];
        let order = sort_stable(5, preds_from(&edges)).unwrap();
        assert_eq!(order, vec![0, 3, 1, 2, 4]);
    }

    #[test]
    fn out_of_range_predecessors_are_ignored() {
        let order = sort_stable(2, |n| if n == 0 { vec![7, 1] } else { vec![] }).unwrap();
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn two_node_cycle_is_reported() {
        let edges = [(0, 1), (1, 0)];
        let err = sort_stable(2, preds_from(&edges)).unwrap_err();
        let mut members = err.members;
        members.sort_unstable();
        assert_eq!(members, vec![0, 1]);
    }

    #[test]
    fn cycle_excludes_unrelated_items() {
        // 0 free; 1 <-> 2 cyclic; 3 depends on 0.
        let edges = [(1, 2), (2, 1), (0, 3)];
        let err = sort_stable(4, preds_from(&edges)).unwrap_err();
        let mut members = err.members;
        members.sort_unstable();
        assert_eq!(members, vec![1, 2]);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let err = sort_stable(1, |_| vec![0]).unwrap_err();
        assert_eq!(err.members, vec![0]);
    }
}
