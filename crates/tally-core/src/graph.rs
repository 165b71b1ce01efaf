//! Children-first ordering over id-indexed graphs (matchers, conditions).

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Fresh,
    Active,
    Done,
}

/// Order nodes so every child precedes its parents. On a cycle, returns the
/// offending path with the repeated node at both ends.
pub(crate) fn topo_order(children: &[Vec<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let mut marks = vec![Mark::Fresh; children.len()];
    let mut order = Vec::with_capacity(children.len());
    let mut path = Vec::new();
    for root in 0..children.len() {
        visit(root, children, &mut marks, &mut path, &mut order)?;
    }
    Ok(order)
}

fn visit(
    node: usize,
    children: &[Vec<usize>],
    marks: &mut [Mark],
    path: &mut Vec<usize>,
    order: &mut Vec<usize>,
) -> Result<(), Vec<usize>> {
    match marks[node] {
        Mark::Done => return Ok(()),
        Mark::Active => {
            let pos = path.iter().position(|&n| n == node).unwrap_or(0);
            let mut cycle = path[pos..].to_vec();
            cycle.push(node);
            return Err(cycle);
        }
        Mark::Fresh => {}
    }
    marks[node] = Mark::Active;
    path.push(node);
    for &child in &children[node] {
        visit(child, children, marks, path, order)?;
    }
    path.pop();
    marks[node] = Mark::Done;
    order.push(node);
    Ok(())
}

/// `a -> b -> a`
pub(crate) fn describe_cycle(cycle: &[usize], names: &[String]) -> String {
    cycle
        .iter()
        .map(|&i| names[i].as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}
