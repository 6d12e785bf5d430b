//! The dependency graph: insertion-ordered step storage, validation,
//! topological ordering, and level partitioning.

use crate::error::PipelineError;
use crate::step::Step;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, instrument};

/// Insertion-ordered collection of [`Step`]s.
///
/// Steps may be added in any order — forward references are legal at
/// insertion time and only checked at [`Dag::validate`].
#[derive(Debug, Clone, Default)]
pub struct Dag {
    steps: Vec<Step>,
    index: HashMap<String, usize>,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step. Fails if a step of the same name already exists.
    /// Does not check that declared dependencies exist yet — that's
    /// deferred to [`Dag::validate`].
    pub fn add(&mut self, step: Step) -> Result<(), PipelineError> {
        if self.index.contains_key(step.name()) {
            return Err(PipelineError::DuplicateStep(step.name().to_string()));
        }
        self.index.insert(step.name().to_string(), self.steps.len());
        self.steps.push(step);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Step> {
        self.index.get(name).map(|&i| &self.steps[i])
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Iterate steps in insertion order (not topological order).
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter()
    }

    /// Run both structural checks, in order:
    /// missing-dependency check, then cycle check. Idempotent — repeated
    /// calls on an unchanged DAG never mutate state and always return the
    /// same verdict.
    #[instrument(skip(self), fields(steps = self.steps.len()))]
    pub fn validate(&self) -> Result<(), PipelineError> {
        for step in &self.steps {
            for dep in step.dependencies() {
                if !self.index.contains_key(dep) {
                    return Err(PipelineError::MissingDependency {
                        step: step.name().to_string(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        self.sorted_steps()?;
        debug!("DAG validated");
        Ok(())
    }

    /// A linear ordering where every step appears after all its
    /// dependencies, breaking ties by insertion order among steps that
    /// are simultaneously ready (Kahn's algorithm with an insertion-order
    /// tie-break).
    pub fn sorted_steps(&self) -> Result<Vec<&Step>, PipelineError> {
        let order = self.kahn_order()?;
        Ok(order.into_iter().map(|i| &self.steps[i]).collect())
    }

    /// Partition steps into levels: level 0 holds every step with no
    /// dependencies; level k holds every step whose longest path from a
    /// root equals k. Insertion order is preserved within a level.
    pub fn levels(&self) -> Result<Vec<Vec<&Step>>, PipelineError> {
        let order = self.kahn_order()?;

        let mut level_of: HashMap<&str, usize> = HashMap::new();
        let mut max_level = 0usize;

        // `order` is topological, so every dependency is visited before
        // the step that depends on it.
        for &i in &order {
            let step = &self.steps[i];
            let level = step
                .dependencies()
                .iter()
                .map(|d| level_of[d.as_str()] + 1)
                .max()
                .unwrap_or(0);
            level_of.insert(step.name(), level);
            max_level = max_level.max(level);
        }

        let mut levels: Vec<Vec<&Step>> = vec![Vec::new(); max_level + 1];
        for step in &self.steps {
            levels[level_of[step.name()]].push(step);
        }
        Ok(levels)
    }

    /// `graph TD` Mermaid rendering: one edge line per (step, dependency)
    /// pair in insertion order, then bare lines for steps with no
    /// dependencies and no dependents.
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");
        let mut has_edge: HashSet<&str> = HashSet::new();

        for step in &self.steps {
            for dep in step.dependencies() {
                out.push_str(&format!("  {} --> {}\n", dep, step.name()));
                has_edge.insert(dep.as_str());
                has_edge.insert(step.name());
            }
        }

        for step in &self.steps {
            if !has_edge.contains(step.name()) {
                out.push_str(&format!("  {}\n", step.name()));
            }
        }

        out
    }

    /// Kahn's algorithm over step indices, queueing ready steps in
    /// insertion order so ties resolve deterministically.
    fn kahn_order(&self) -> Result<Vec<usize>, PipelineError> {
        let mut in_degree = vec![0usize; self.steps.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.steps.len()];

        for (i, step) in self.steps.iter().enumerate() {
            in_degree[i] = step.dependencies().len();
            for dep in step.dependencies() {
                if let Some(&dep_idx) = self.index.get(dep) {
                    dependents[dep_idx].push(i);
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..self.steps.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.steps.len());

        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &child in &dependents[i] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    queue.push_back(child);
                }
            }
        }

        if order.len() != self.steps.len() {
            let stuck = (0..self.steps.len())
                .find(|&i| in_degree[i] > 0)
                .map(|i| self.steps[i].name().to_string())
                .unwrap_or_default();
            return Err(PipelineError::Cycle(stuck));
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepBuilder;
    use serde_json::Value;

    fn step(name: &str, deps: &[&str]) -> Step {
        StepBuilder::new(name)
            .depends_on(deps.iter().map(|s| s.to_string()))
            .callable(|_| Ok(Value::Null))
            .build()
    }

    #[test]
    fn duplicate_insertion_fails() {
        let mut dag = Dag::new();
        dag.add(step("a", &[])).unwrap();
        let err = dag.add(step("a", &[])).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateStep(name) if name == "a"));
    }

    #[test]
    fn forward_reference_allowed_before_validate() {
        let mut dag = Dag::new();
        dag.add(step("a", &["b"])).unwrap();
        dag.add(step("b", &[])).unwrap();
        dag.validate().unwrap();
    }

    #[test]
    fn missing_dependency_detected_on_validate() {
        let mut dag = Dag::new();
        dag.add(step("process", &["missing1", "missing2", "missing3"]))
            .unwrap();
        let err = dag.validate().unwrap_err();
        match err {
            PipelineError::MissingDependency { step, dependency } => {
                assert_eq!(step, "process");
                assert!(["missing1", "missing2", "missing3"].contains(&dependency.as_str()));
            }
            other => panic!("expected MissingDependency, got {other:?}"),
        }
    }

    #[test]
    fn cycle_detected() {
        let mut dag = Dag::new();
        dag.add(step("a", &["b"])).unwrap();
        dag.add(step("b", &["a"])).unwrap();
        assert!(matches!(dag.validate(), Err(PipelineError::Cycle(_))));
    }

    #[test]
    fn validate_is_idempotent() {
        let mut dag = Dag::new();
        dag.add(step("a", &[])).unwrap();
        dag.add(step("b", &["a"])).unwrap();
        dag.validate().unwrap();
        dag.validate().unwrap();
        assert_eq!(dag.len(), 2);
    }

    #[test]
    fn sorted_steps_respects_insertion_tie_break() {
        let mut dag = Dag::new();
        dag.add(step("c", &[])).unwrap();
        dag.add(step("a", &[])).unwrap();
        dag.add(step("b", &[])).unwrap();
        let order: Vec<&str> = dag.sorted_steps().unwrap().iter().map(|s| s.name()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn diamond_levels() {
        let mut dag = Dag::new();
        dag.add(step("source", &[])).unwrap();
        dag.add(step("path_a", &["source"])).unwrap();
        dag.add(step("path_b", &["source"])).unwrap();
        dag.add(step("merge", &["path_a", "path_b"])).unwrap();

        let levels = dag.levels().unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0].iter().map(|s| s.name()).collect::<Vec<_>>(), vec!["source"]);
        let mut l1: Vec<&str> = levels[1].iter().map(|s| s.name()).collect();
        l1.sort();
        assert_eq!(l1, vec!["path_a", "path_b"]);
        assert_eq!(levels[2].iter().map(|s| s.name()).collect::<Vec<_>>(), vec!["merge"]);
    }

    #[test]
    fn mermaid_rendering() {
        let mut dag = Dag::new();
        dag.add(step("fetch", &[])).unwrap();
        dag.add(step("transform", &["fetch"])).unwrap();
        dag.add(step("orphan", &[])).unwrap();

        let mermaid = dag.to_mermaid();
        assert!(mermaid.starts_with("graph TD\n"));
        assert!(mermaid.contains("  fetch --> transform\n"));
        assert!(mermaid.contains("  orphan\n"));
        assert!(!mermaid.contains("  fetch\n"));
    }
}
