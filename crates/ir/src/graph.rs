use collopt_util::IndexSet;

use crate::instruction::InstId;

pub trait Node: Copy {
    fn index(&self) -> usize;
}

impl Node for InstId {
    fn index(&self) -> usize {
        InstId::index(self) as usize
    }
}

/// Search a directed graph depth-first from each of the `starts` in turn, calling `pre` when a
/// node is first encountered and `post` once all of its successors have been visited.
///
/// The `pre` callback returns the successors of the given node; they are visited in the order it
/// returns them. Every node is visited at most once across all starting nodes, so a start that was
/// already reached from an earlier start is skipped.
pub fn depth_first_search<N, I>(
    starts: impl IntoIterator<Item = N>,
    mut pre: impl FnMut(N) -> I,
    mut post: impl FnMut(N),
) where
    N: Node,
    I: IntoIterator<Item = N>,
{
    let mut visited = IndexSet::new();
    let mut stack = Vec::new();

    for start in starts {
        if !visited.insert(start.index()) {
            continue;
        }
        stack.push((start, pre(start).into_iter()));

        while let Some((node, iter)) = stack.last_mut() {
            if let Some(next) = iter.next() {
                if visited.insert(next.index()) {
                    stack.push((next, pre(next).into_iter()));
                }
            } else {
                post(*node);
                stack.pop();
            }
        }
    }
}

/// Accumulate nodes in DFS post-order, every node appears after all of its successors.
pub fn post_order<N, I>(
    starts: impl IntoIterator<Item = N>,
    successors: impl FnMut(N) -> I,
) -> Vec<N>
where
    N: Node,
    I: IntoIterator<Item = N>,
{
    let mut post_order = Vec::new();
    depth_first_search(starts, successors, |n| post_order.push(n));
    post_order
}
