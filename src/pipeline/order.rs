//! Dependency ordering of the package set.

use std::collections::{BTreeSet, HashMap};

use crate::error::{PipelineError, PipelineResult};
use crate::recipe::PackageSpec;

/// Order `specs` so every package comes after the in-set packages it
/// depends on. Ties keep declaration order, so an already valid list is
/// returned unchanged. Dependencies outside the set are not ordered.
pub fn build_order(specs: &[PackageSpec]) -> PipelineResult<Vec<PackageSpec>> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(specs.len());
    for (i, spec) in specs.iter().enumerate() {
        if index.insert(spec.name.as_str(), i).is_some() {
            return Err(PipelineError::Recipe(format!(
                "package '{}' is declared more than once",
                spec.name
            )));
        }
    }

    let mut pending = vec![0usize; specs.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); specs.len()];
    for (i, spec) in specs.iter().enumerate() {
        for dep in &spec.depends_on {
            if let Some(&d) = index.get(dep.as_str()) {
                pending[i] += 1;
                dependents[d].push(i);
            }
        }
    }

    // Smallest declaration index first.
    let mut ready: BTreeSet<usize> = (0..specs.len()).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(specs.len());
    while let Some(i) = ready.pop_first() {
        order.push(specs[i].clone());
        for &next in &dependents[i] {
            pending[next] -= 1;
            if pending[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() != specs.len() {
        let stuck: Vec<&str> = specs
            .iter()
            .enumerate()
            .filter(|(i, _)| pending[*i] > 0)
            .map(|(_, spec)| spec.name.as_str())
            .collect();
        return Err(PipelineError::Recipe(format!(
            "dependency cycle among: {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}
