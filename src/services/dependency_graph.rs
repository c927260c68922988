//! Compiled dependency graph and subject matcher.
//!
//! Built once at startup from a [`GraphDefinition`] and read-only afterwards,
//! so one instance can be shared across tasks behind an `Arc`.

use std::collections::{BTreeMap, HashMap, HashSet};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::domain::errors::{GraphError, SubjectError};
use crate::domain::models::{
    Bindings, CommandSpec, GraphDefinition, SubjectPattern, TaskDefinition, TaskOptions,
};

/// A dependency declaration with its compiled pattern and constraints.
#[derive(Debug, Clone)]
pub struct CompiledDependency {
    pub pattern: SubjectPattern,
    pub constraints: Vec<(String, Regex)>,
}

impl CompiledDependency {
    /// Every constrained placeholder's bound value satisfies its regex.
    fn admits(&self, bindings: &Bindings) -> bool {
        self.constraints.iter().all(|(name, constraint)| {
            bindings
                .get(name)
                .is_some_and(|value| constraint.is_match(value))
        })
    }
}

/// A task template: how one product subject is built from its dependencies.
#[derive(Debug, Clone)]
pub struct TaskTemplate {
    /// The product template text, which doubles as the template id.
    pub id: String,
    pub pattern: SubjectPattern,
    pub name: String,
    pub worker: Option<String>,
    pub options: TaskOptions,
    pub command: CommandSpec,
    pub dependencies: Vec<CompiledDependency>,
}

/// One task template instance a subject contributes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependentTaskMatch {
    /// The subject that matched a dependency declaration.
    pub subject: String,
    /// The concrete product subject.
    pub product: String,
    pub task_template_id: String,
    /// Bindings restricted to the product template's placeholders.
    pub args: Bindings,
}

/// Edge in a task graph listing: a template and the product it would build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskGraphEdge {
    pub task_id: String,
    pub subject: String,
}

/// Transitive view of the templates around a concrete subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskGraph {
    pub subject: String,
    /// Template whose product pattern matches `subject`.
    pub task_id: String,
    /// Template id to the tasks it feeds, with their concrete products.
    pub children: BTreeMap<String, Vec<TaskGraphEdge>>,
    /// Template id to the dependency subject templates it waits on.
    pub parents: BTreeMap<String, Vec<String>>,
}

/// The compiled, immutable dependency graph.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    name: String,
    config: serde_json::Value,
    templates: Vec<TaskTemplate>,
    index: HashMap<String, usize>,
}

impl DependencyGraph {
    /// Compile every template and dependency pattern, failing on the first malformed one.
    pub fn build(definition: GraphDefinition) -> Result<Self, GraphError> {
        let mut templates = Vec::with_capacity(definition.graph.len());
        let mut index = HashMap::with_capacity(definition.graph.len());

        for (key, task) in definition.graph {
            let template = compile_template(&key, task)?;
            index.insert(key, templates.len());
            templates.push(template);
        }

        debug!(
            graph = %definition.name,
            templates = templates.len(),
            "dependency graph compiled"
        );

        Ok(Self {
            name: definition.name,
            config: definition.config,
            templates,
            index,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Global configuration passed to resolvers and ready predicates.
    pub fn config(&self) -> &serde_json::Value {
        &self.config
    }

    pub fn templates(&self) -> &[TaskTemplate] {
        &self.templates
    }

    pub fn get(&self, template_id: &str) -> Option<&TaskTemplate> {
        self.index.get(template_id).map(|&i| &self.templates[i])
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Every task template instance `subject` is a dependency of.
    ///
    /// Templates and declarations are visited in definition order. With
    /// `recurse`, each computed product is matched in turn, skipping products
    /// already visited.
    #[instrument(skip(self), level = "debug")]
    pub fn match_subject(&self, subject: &str, recurse: bool) -> Vec<DependentTaskMatch> {
        let mut matches = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(subject.to_string());
        self.collect_matches(subject, recurse, &mut visited, &mut matches);
        matches
    }

    fn collect_matches(
        &self,
        subject: &str,
        recurse: bool,
        visited: &mut HashSet<String>,
        matches: &mut Vec<DependentTaskMatch>,
    ) {
        for template in &self.templates {
            for dependency in &template.dependencies {
                let Some(bindings) = dependency.pattern.captures(subject) else {
                    continue;
                };
                if !dependency.admits(&bindings) {
                    debug!(
                        subject,
                        template_id = %template.id,
                        dependency = %dependency.pattern,
                        "constraint rejected match"
                    );
                    continue;
                }

                // Build guarantees every product placeholder is bound here.
                let Ok(product) = template.pattern.render(&bindings) else {
                    continue;
                };
                let args = template
                    .pattern
                    .placeholders()
                    .iter()
                    .filter_map(|name| bindings.get(name).map(|v| (name.clone(), v.clone())))
                    .collect();

                matches.push(DependentTaskMatch {
                    subject: subject.to_string(),
                    product: product.clone(),
                    task_template_id: template.id.clone(),
                    args,
                });

                if recurse && visited.insert(product.clone()) {
                    self.collect_matches(&product, recurse, visited, matches);
                }
            }
        }
    }

    /// The first template whose own product pattern matches `subject`.
    pub fn template_for(&self, subject: &str) -> Option<&TaskTemplate> {
        self.templates.iter().find(|t| t.pattern.is_match(subject))
    }

    /// Children and parents of the template producing `subject`.
    ///
    /// Returns `None` when no template produces `subject`.
    pub fn task_graph(&self, subject: &str) -> Option<TaskGraph> {
        let root = self.template_for(subject)?;
        let mut graph = TaskGraph {
            subject: subject.to_string(),
            task_id: root.id.clone(),
            ..TaskGraph::default()
        };

        self.collect_children(subject, &mut graph.children);
        self.collect_parents(&root.id, &mut graph.parents);
        Some(graph)
    }

    fn collect_children(&self, subject: &str, children: &mut BTreeMap<String, Vec<TaskGraphEdge>>) {
        let Some(template) = self.template_for(subject) else {
            return;
        };
        if children.contains_key(&template.id) {
            return;
        }

        let edges: Vec<TaskGraphEdge> = self
            .match_subject(subject, false)
            .into_iter()
            .map(|m| TaskGraphEdge {
                task_id: m.task_template_id,
                subject: m.product,
            })
            .collect();
        children.insert(template.id.clone(), edges.clone());

        for edge in edges {
            self.collect_children(&edge.subject, children);
        }
    }

    fn collect_parents(&self, template_id: &str, parents: &mut BTreeMap<String, Vec<String>>) {
        if parents.contains_key(template_id) {
            return;
        }
        let Some(template) = self.get(template_id) else {
            return;
        };

        let deps: Vec<String> = template
            .dependencies
            .iter()
            .map(|d| d.pattern.as_str().to_string())
            .collect();
        parents.insert(template_id.to_string(), deps.clone());

        for dep in deps {
            if self.get(&dep).is_some() {
                self.collect_parents(&dep, parents);
            }
        }
    }
}

fn compile_template(key: &str, task: TaskDefinition) -> Result<TaskTemplate, GraphError> {
    let pattern_error = |source: SubjectError| GraphError::Pattern {
        template: key.to_string(),
        source,
    };

    let pattern = SubjectPattern::compile(key).map_err(pattern_error)?;

    if task.options.dependent_count == Some(0) {
        return Err(GraphError::ZeroDependentCount {
            template: key.to_string(),
        });
    }

    let mut dependencies = Vec::with_capacity(task.dependencies.len());
    for declaration in task.dependencies {
        let dep_pattern = SubjectPattern::compile(&declaration.subject).map_err(pattern_error)?;

        // The product must be fully renderable from what this declaration binds.
        if let Some(name) = pattern
            .placeholders()
            .iter()
            .find(|name| !dep_pattern.placeholders().contains(name))
        {
            return Err(pattern_error(SubjectError::MissingBinding {
                pattern: declaration.subject.clone(),
                name: name.clone(),
            }));
        }

        let mut constraints = Vec::with_capacity(declaration.constraints.len());
        for (placeholder, expr) in declaration.constraints {
            if !dep_pattern.placeholders().contains(&placeholder) {
                return Err(GraphError::Constraint {
                    template: key.to_string(),
                    placeholder,
                    reason: format!("not a placeholder of {}", declaration.subject),
                });
            }
            let regex = Regex::new(&expr).map_err(|e| GraphError::Constraint {
                template: key.to_string(),
                placeholder: placeholder.clone(),
                reason: e.to_string(),
            })?;
            constraints.push((placeholder, regex));
        }

        dependencies.push(CompiledDependency {
            pattern: dep_pattern,
            constraints,
        });
    }

    Ok(TaskTemplate {
        id: key.to_string(),
        pattern,
        name: task.name,
        worker: task.worker,
        options: task.options,
        command: task.command,
        dependencies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(yaml: &str) -> DependencyGraph {
        DependencyGraph::build(GraphDefinition::from_str(yaml).unwrap()).unwrap()
    }

    const IMAGERY: &str = r#"
graph:
  "file:///conus/{date}/{time}/cells/{cell}/{band}/image.png":
    name: CONUS Cell
    dependencies:
      - subject: "file:///conus/{date}/{time}/cells/{cell}/{band}/image.jp2"
  "file:///conus/{date}/{time}/{band}/conus-ca.png":
    name: California
    dependencies:
      - subject: "file:///conus/{date}/{time}/cells/{cell}/{band}/image.png"
        constraints:
          cell: "^(2-3|4-5|5-6)$"
    options:
      dependentCount: 3
  "file:///latest/{band}/conus.png":
    dependencies:
      - subject: "file:///conus/{date}/{time}/cells/{cell}/{band}/image.png"
        constraints:
          band: "^(2|3)$"
    options:
      run: everytime
"#;

    #[test]
    fn test_match_direct_dependency() {
        let g = graph(IMAGERY);
        let matches = g.match_subject("file:///conus/2020-06-25/04:25:30/cells/4-5/3/image.jp2", false);
        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.product, "file:///conus/2020-06-25/04:25:30/cells/4-5/3/image.png");
        assert_eq!(m.task_template_id, "file:///conus/{date}/{time}/cells/{cell}/{band}/image.png");
        assert_eq!(m.args.len(), 4);
    }

    #[test]
    fn test_match_returns_all_templates_in_order() {
        let g = graph(IMAGERY);
        let matches = g.match_subject("file:///conus/2020-06-25/04:25:30/cells/4-5/3/image.png", false);
        let products: Vec<_> = matches.iter().map(|m| m.product.as_str()).collect();
        assert_eq!(
            products,
            [
                "file:///conus/2020-06-25/04:25:30/3/conus-ca.png",
                "file:///latest/3/conus.png"
            ]
        );
    }

    #[test]
    fn test_args_drop_dependency_only_placeholders() {
        let g = graph(IMAGERY);
        let matches = g.match_subject("file:///conus/2020-06-25/04:25:30/cells/4-5/3/image.png", false);
        let latest = &matches[1];
        assert_eq!(latest.args.len(), 1);
        assert_eq!(latest.args["band"], "3");
        assert!(!latest.args.contains_key("cell"));
    }

    #[test]
    fn test_constraint_rejects_binding() {
        let g = graph(IMAGERY);
        // cell 1-2 fails the California constraint, band 7 fails the latest constraint
        let matches = g.match_subject("file:///conus/2020-06-25/04:25:30/cells/1-2/7/image.png", false);
        assert!(matches.is_empty());

        let matches = g.match_subject("file:///conus/2020-06-25/04:25:30/cells/1-2/3/image.png", false);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].product, "file:///latest/3/conus.png");
    }

    #[test]
    fn test_no_match() {
        let g = graph(IMAGERY);
        assert!(g.match_subject("file:///fulldisk/x.png", false).is_empty());
    }

    #[test]
    fn test_recursive_match() {
        let g = graph(IMAGERY);
        let matches = g.match_subject("file:///conus/2020-06-25/04:25:30/cells/4-5/3/image.jp2", true);
        assert_eq!(matches.len(), 3);
        assert_eq!(matches[0].subject, "file:///conus/2020-06-25/04:25:30/cells/4-5/3/image.jp2");
        assert_eq!(matches[1].subject, "file:///conus/2020-06-25/04:25:30/cells/4-5/3/image.png");
    }

    #[test]
    fn test_recursive_match_terminates_on_cycles() {
        let g = graph(
            r#"
graph:
  "file:///a/{x}":
    dependencies: [{ subject: "file:///b/{x}" }]
  "file:///b/{x}":
    dependencies: [{ subject: "file:///a/{x}" }]
"#,
        );
        let matches = g.match_subject("file:///a/1", true);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].product, "file:///b/1");
        assert_eq!(matches[1].product, "file:///a/1");
    }

    #[test]
    fn test_wildcard_dependency() {
        let g = graph(
            r#"
graph:
  "file:///audit/log":
    dependencies: [{ subject: "*" }]
"#,
        );
        let matches = g.match_subject("anything://x", false);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].product, "file:///audit/log");
    }

    #[test]
    fn test_build_rejects_malformed_pattern() {
        let def = GraphDefinition::from_str("graph:\n  \"file:///{x\": {}\n").unwrap();
        let err = DependencyGraph::build(def).unwrap_err();
        assert!(matches!(err, GraphError::Pattern { .. }));
    }

    #[test]
    fn test_build_rejects_unrenderable_product() {
        let def = GraphDefinition::from_str(
            "graph:\n  \"file:///o/{x}/{y}\":\n    dependencies: [{ subject: \"file:///i/{x}\" }]\n",
        )
        .unwrap();
        let err = DependencyGraph::build(def).unwrap_err();
        assert!(err.to_string().contains("'y'"));
    }

    #[test]
    fn test_build_rejects_bad_constraints() {
        let unknown = GraphDefinition::from_str(
            "graph:\n  \"file:///o/{x}\":\n    dependencies: [{ subject: \"file:///i/{x}\", constraints: { z: \"1\" } }]\n",
        )
        .unwrap();
        assert!(matches!(
            DependencyGraph::build(unknown).unwrap_err(),
            GraphError::Constraint { .. }
        ));

        let invalid = GraphDefinition::from_str(
            "graph:\n  \"file:///o/{x}\":\n    dependencies: [{ subject: \"file:///i/{x}\", constraints: { x: \"(\" } }]\n",
        )
        .unwrap();
        assert!(matches!(
            DependencyGraph::build(invalid).unwrap_err(),
            GraphError::Constraint { .. }
        ));
    }

    #[test]
    fn test_build_rejects_zero_dependent_count() {
        let def = GraphDefinition::from_str(
            "graph:\n  \"file:///o\":\n    options: { dependentCount: 0 }\n",
        )
        .unwrap();
        assert!(matches!(
            DependencyGraph::build(def).unwrap_err(),
            GraphError::ZeroDependentCount { .. }
        ));
    }

    #[test]
    fn test_template_lookup() {
        let g = graph(IMAGERY);
        assert_eq!(g.len(), 3);
        assert!(g.get("file:///latest/{band}/conus.png").is_some());
        assert!(g.get("file:///nope").is_none());
        let t = g.template_for("file:///latest/2/conus.png").unwrap();
        assert_eq!(t.id, "file:///latest/{band}/conus.png");
    }

    #[test]
    fn test_task_graph() {
        let g = graph(IMAGERY);
        let tg = g
            .task_graph("file:///conus/2020-06-25/04:25:30/cells/4-5/3/image.png")
            .unwrap();
        assert_eq!(tg.task_id, "file:///conus/{date}/{time}/cells/{cell}/{band}/image.png");
        assert_eq!(tg.children[&tg.task_id].len(), 2);
        assert_eq!(
            tg.parents[&tg.task_id],
            ["file:///conus/{date}/{time}/cells/{cell}/{band}/image.jp2"]
        );
        assert!(g.task_graph("file:///unknown").is_none());
    }
}
