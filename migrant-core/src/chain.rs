//! The linear chain of migration definitions and its structural validator.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{Error, MigrantResult};
use crate::schema::SchemaBundle;

/// A compiled, named migration with an optional link to its parent.
///
/// Parent links are owned `Arc` handles rather than arena indices: the
/// chain is append-only and definitions never move once built, so sharing
/// via `Arc` is simpler than threading an index through every consumer
/// (the simulation validator in particular needs to walk ancestors while
/// holding no other borrow of the chain).
pub struct MigrationDefinition {
    pub id: String,
    pub name: String,
    pub parent: Option<Arc<MigrationDefinition>>,
    pub schemas: SchemaBundle,
    pub compile: Box<dyn Fn() -> crate::state::MigrationState + Send + Sync>,
}

impl std::fmt::Debug for MigrationDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| &p.id))
            .finish()
    }
}

impl MigrationDefinition {
    /// The migration's ancestors, nearest first, root last.
    pub fn ancestors(self: &Arc<Self>) -> Vec<Arc<MigrationDefinition>> {
        let mut out = Vec::new();
        let mut cur = self.parent.clone();
        while let Some(p) = cur {
            out.push(p.clone());
            cur = p.parent.clone();
        }
        out
    }

    /// The full path from the root to `self`, root first.
    pub fn path(self: &Arc<Self>) -> Vec<Arc<MigrationDefinition>> {
        let mut ancestors = self.ancestors();
        ancestors.reverse();
        ancestors.push(self.clone());
        ancestors
    }

    pub fn depth(self: &Arc<Self>) -> usize {
        self.ancestors().len()
    }
}

/// An ordered, append-only sequence of migrations.
#[derive(Default)]
pub struct Chain {
    definitions: Vec<Arc<MigrationDefinition>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a migration whose `parent` (if set) must already be the
    /// chain's current tail - enforced so the chain stays linear, never a
    /// tree, matching spec.md §4.3's "linear chain" model.
    pub fn push(&mut self, definition: Arc<MigrationDefinition>) -> MigrantResult<()> {
        if let Some(parent) = &definition.parent {
            match self.definitions.last() {
                Some(tail) if Arc::ptr_eq(tail, parent) => {}
                Some(tail) => {
                    return Err(Error::chain_invalid(format!(
                        "migration '{}' declares parent '{}' but the chain's tail is '{}'",
                        definition.id, parent.id, tail.id
                    )))
                }
                None => {
                    return Err(Error::chain_invalid(format!(
                        "migration '{}' declares a parent but the chain is empty",
                        definition.id
                    )))
                }
            }
        } else if !self.definitions.is_empty() {
            return Err(Error::chain_invalid(format!(
                "migration '{}' has no parent but the chain is non-empty",
                definition.id
            )));
        }
        self.definitions.push(definition);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn tail(&self) -> Option<Arc<MigrationDefinition>> {
        self.definitions.last().cloned()
    }

    /// The definitions in application order, root first.
    pub fn in_order(&self) -> &[Arc<MigrationDefinition>] {
        &self.definitions
    }

    pub fn find(&self, id: &str) -> Option<Arc<MigrationDefinition>> {
        self.definitions.iter().find(|d| d.id == id).cloned()
    }

    /// The nearest common ancestor of two migrations already in this chain,
    /// or `None` if they share no ancestor (only possible if one of them is
    /// itself the root and the other isn't on its path).
    pub fn common_ancestor(
        &self,
        a: &Arc<MigrationDefinition>,
        b: &Arc<MigrationDefinition>,
    ) -> Option<Arc<MigrationDefinition>> {
        let a_path: HashSet<String> = a.path().into_iter().map(|d| d.id.clone()).collect();
        b.path()
            .into_iter()
            .rev()
            .find(|candidate| a_path.contains(&candidate.id))
    }
}

/// Configuration for [`ChainValidator`], spec.md §4.3 items 2, 6, 7.
#[derive(Debug, Clone)]
pub struct ChainValidatorConfig {
    /// Reject ids that don't match `[A-Za-z0-9_@-]+` (spec.md §4.3 item 2).
    pub strict_ids: bool,
    /// Whether more than one root (a definition with `parent = None`) is
    /// permitted. Default `false`.
    pub allow_multiple_roots: bool,
    /// Whether more than one leaf (a definition no other definition names
    /// as parent) is permitted. Default `true`.
    pub allow_multiple_leaves: bool,
    pub max_depth: usize,
}

impl Default for ChainValidatorConfig {
    fn default() -> Self {
        Self {
            strict_ids: true,
            allow_multiple_roots: false,
            allow_multiple_leaves: true,
            max_depth: 1000,
        }
    }
}

/// `{total, roots, leaves, maxDepth, topoOrder}` from spec.md §4.3's
/// `ChainValidationResult.metadata`.
#[derive(Debug, Default, Clone)]
pub struct ChainMetadata {
    pub total: usize,
    pub roots: usize,
    pub leaves: usize,
    pub max_depth: usize,
    /// Migration ids in BFS topological order, root(s) first; ties among a
    /// node's children broken by their insertion order in the input array
    /// (spec.md §4.3's tie-break rule).
    pub topo_order: Vec<String>,
}

/// Accumulated structural problems found by [`ChainValidator`].
#[derive(Debug, Default, Clone)]
pub struct ChainValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub metadata: ChainMetadata,
}

impl ChainValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn ok(&self) -> bool {
        self.is_valid()
    }
}

fn is_strict_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '@' | '-'))
}

/// Structural validation of a chain: duplicate ids, malformed ids, cycles,
/// root/leaf cardinality, and depth limits (spec.md §4.3, §4.6's "Chain
/// Validator").
pub struct ChainValidator {
    config: ChainValidatorConfig,
}

impl ChainValidator {
    pub fn new(config: ChainValidatorConfig) -> Self {
        Self { config }
    }

    /// Validate an already-linearized [`Chain`] (spec.md §4.3 items 1-5:
    /// non-empty, unique well-formed ids, exactly one root, parent-equals-
    /// predecessor). [`Chain::push`] already enforces linearity and an
    /// acyclic parent graph structurally, so this focuses on id validity,
    /// duplicates, and depth, then reports the (trivial, since linear)
    /// root/leaf/topo-order metadata.
    pub fn validate(&self, chain: &Chain) -> ChainValidationResult {
        let mut result = ChainValidationResult::default();

        if chain.is_empty() {
            result.errors.push("chain must not be empty".into());
            return result;
        }

        let mut seen = HashSet::new();
        for def in chain.in_order() {
            self.check_definition(def, &mut seen, &mut result);
        }

        let depth = chain.tail().map(|t| t.depth() + 1).unwrap_or(0);
        if depth > self.config.max_depth {
            result.errors.push(format!(
                "chain depth {depth} exceeds configured maximum {}",
                self.config.max_depth
            ));
        }

        result.metadata = ChainMetadata {
            total: chain.len(),
            roots: 1,
            leaves: 1,
            max_depth: depth,
            topo_order: chain.in_order().iter().map(|d| d.id.clone()).collect(),
        };

        result
    }

    fn check_definition(
        &self,
        def: &Arc<MigrationDefinition>,
        seen: &mut HashSet<String>,
        result: &mut ChainValidationResult,
    ) {
        if def.id.trim().is_empty() {
            result.errors.push("migration id must not be empty".into());
            return;
        }
        if self.config.strict_ids && !is_strict_id(&def.id) {
            result.errors.push(format!(
                "migration id '{}' does not match [A-Za-z0-9_@-]+",
                def.id
            ));
        }
        if !seen.insert(def.id.clone()) {
            result
                .errors
                .push(format!("Duplicate migration ID found: {}", def.id));
        }
        if def.name.trim().is_empty() {
            result
                .warnings
                .push(format!("migration '{}' has an empty name", def.id));
        }
    }

    /// Validate a raw, not-necessarily-linearized array of definitions -
    /// the shape spec.md §4.3 describes as "typically produced by sorting
    /// migration files by name", which may branch into several leaves (or,
    /// erroneously, several roots) before [`Chain::push`] would ever see
    /// it. Performs all of spec.md §4.3 items 1-7: non-empty, id validity/
    /// uniqueness, cycle detection, root/leaf cardinality against
    /// [`ChainValidatorConfig::allow_multiple_roots`]/`allow_multiple_leaves`,
    /// depth, and a BFS topological order.
    pub fn validate_definitions(&self, defs: &[Arc<MigrationDefinition>]) -> ChainValidationResult {
        let mut result = ChainValidationResult::default();

        if defs.is_empty() {
            result.errors.push("chain must not be empty".into());
            return result;
        }

        let mut seen = HashSet::new();
        for def in defs {
            self.check_definition(def, &mut seen, &mut result);
        }
        if !result.is_valid() {
            return result;
        }

        let by_id: std::collections::HashMap<&str, &Arc<MigrationDefinition>> =
            defs.iter().map(|d| (d.id.as_str(), d)).collect();

        let mut children: std::collections::HashMap<&str, Vec<&str>> = std::collections::HashMap::new();
        let mut roots = Vec::new();
        for def in defs {
            match &def.parent {
                None => roots.push(def.id.as_str()),
                Some(parent) => {
                    if by_id.contains_key(parent.id.as_str()) {
                        children.entry(parent.id.as_str()).or_default().push(&def.id);
                    } else {
                        result.errors.push(format!(
                            "migration '{}' declares a parent '{}' not present in the chain",
                            def.id, parent.id
                        ));
                    }
                }
            }
        }
        if !result.is_valid() {
            return result;
        }

        if roots.is_empty() {
            result.errors.push("chain has no root (every migration declares a parent)".into());
            return result;
        }
        if roots.len() > 1 && !self.config.allow_multiple_roots {
            result.errors.push(format!(
                "chain has {} roots but multiple roots are not permitted",
                roots.len()
            ));
        }

        let leaves: Vec<&str> = defs
            .iter()
            .map(|d| d.id.as_str())
            .filter(|id| !children.contains_key(id))
            .collect();
        if leaves.len() > 1 && !self.config.allow_multiple_leaves {
            result
                .warnings
                .push(format!("chain has {} leaves", leaves.len()));
        }

        // BFS from the roots, in array order; each node's children are
        // visited in the order they appear in `defs` (the tie-break rule).
        let mut topo_order = Vec::with_capacity(defs.len());
        let mut visited = HashSet::new();
        let mut queue: std::collections::VecDeque<&str> = roots.iter().copied().collect();
        let mut max_depth_seen = 0usize;
        let mut depths: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for r in &roots {
            depths.insert(r, 1);
        }
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            topo_order.push(id.to_string());
            let depth = depths.get(id).copied().unwrap_or(1);
            max_depth_seen = max_depth_seen.max(depth);
            if let Some(kids) = children.get(id) {
                for kid in kids {
                    depths.insert(kid, depth + 1);
                    queue.push_back(kid);
                }
            }
        }

        if topo_order.len() != defs.len() {
            result.errors.push("chain contains a cycle".into());
            return result;
        }

        if max_depth_seen > self.config.max_depth {
            result.errors.push(format!(
                "chain depth {max_depth_seen} exceeds configured maximum {}",
                self.config.max_depth
            ));
        }

        result.metadata = ChainMetadata {
            total: defs.len(),
            roots: roots.len(),
            leaves: leaves.len(),
            max_depth: max_depth_seen,
            topo_order,
        };

        result
    }

    /// Validate and convert straight to a [`crate::error::Error`] on
    /// failure, for callers (like [`crate::runner::Runner`]) that just
    /// want a pass/fail gate rather than the accumulated report.
    pub fn validate_strict(&self, chain: &Chain) -> MigrantResult<()> {
        let result = self.validate(chain);
        if result.is_valid() {
            Ok(())
        } else {
            Err(Error::chain_invalid(result.errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DatabaseState;

    fn def(id: &str, parent: Option<Arc<MigrationDefinition>>) -> Arc<MigrationDefinition> {
        Arc::new(MigrationDefinition {
            id: id.to_string(),
            name: format!("migration {id}"),
            parent,
            schemas: SchemaBundle::new(),
            compile: Box::new(|| crate::state::MigrationState::new(DatabaseState::new())),
        })
    }

    #[test]
    fn push_rejects_non_tail_parent() {
        let mut chain = Chain::new();
        let root = def("m1", None);
        chain.push(root.clone()).unwrap();
        let sibling_parent = def("m2", Some(root.clone()));
        chain.push(sibling_parent).unwrap();

        let bad = def("m3", Some(root));
        assert!(chain.push(bad).is_err());
    }

    #[test]
    fn validator_flags_duplicate_ids() {
        let mut chain = Chain::new();
        let m1 = def("m1", None);
        chain.push(m1.clone()).unwrap();
        let dup = Arc::new(MigrationDefinition {
            id: "m1".to_string(),
            name: "dup".to_string(),
            parent: Some(m1),
            schemas: SchemaBundle::new(),
            compile: Box::new(|| crate::state::MigrationState::new(DatabaseState::new())),
        });
        chain.push(dup).unwrap();

        let result = ChainValidator::new(ChainValidatorConfig::default()).validate(&chain);
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("Duplicate migration ID found: m1")));
    }

    #[test]
    fn common_ancestor_finds_shared_root() {
        let mut chain = Chain::new();
        let root = def("m1", None);
        chain.push(root.clone()).unwrap();
        let branch_point = def("m2", Some(root));
        chain.push(branch_point.clone()).unwrap();
        let leaf = def("m3", Some(branch_point.clone()));
        chain.push(leaf.clone()).unwrap();

        let ancestor = chain.common_ancestor(&branch_point, &leaf);
        assert_eq!(ancestor.unwrap().id, "m2");
    }

    #[test]
    fn validate_definitions_s1_chain_is_valid() {
        let m1 = def("001", None);
        let m2 = def("002", Some(m1.clone()));
        let m3 = def("003", Some(m2.clone()));
        let defs = vec![m1, m2, m3];

        let result = ChainValidator::new(ChainValidatorConfig::default()).validate_definitions(&defs);
        assert!(result.ok());
        assert_eq!(result.metadata.total, 3);
        assert_eq!(result.metadata.roots, 1);
        assert_eq!(result.metadata.leaves, 1);
        assert_eq!(result.metadata.max_depth, 3);
        assert_eq!(result.metadata.topo_order, vec!["001", "002", "003"]);
    }

    #[test]
    fn validate_definitions_s2_duplicate_id_is_reported() {
        let m1 = def("001", None);
        let dup = Arc::new(MigrationDefinition {
            id: "001".to_string(),
            name: "dup".to_string(),
            parent: None,
            schemas: SchemaBundle::new(),
            compile: Box::new(|| crate::state::MigrationState::new(DatabaseState::new())),
        });
        let defs = vec![m1, dup];

        let result = ChainValidator::new(ChainValidatorConfig::default()).validate_definitions(&defs);
        assert!(!result.ok());
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("Duplicate migration ID found: 001")));
    }

    #[test]
    fn validate_definitions_rejects_multiple_roots_by_default() {
        let m1 = def("a", None);
        let m2 = def("b", None);
        let result =
            ChainValidator::new(ChainValidatorConfig::default()).validate_definitions(&[m1, m2]);
        assert!(!result.ok());
    }

    #[test]
    fn validate_definitions_allows_multiple_leaves_by_default() {
        let root = def("a", None);
        let left = def("b", Some(root.clone()));
        let right = def("c", Some(root.clone()));
        let result = ChainValidator::new(ChainValidatorConfig::default())
            .validate_definitions(&[root, left, right]);
        assert!(result.ok());
        assert_eq!(result.metadata.leaves, 2);
    }

    #[test]
    fn validate_definitions_rejects_malformed_id_in_strict_mode() {
        let m1 = def("has a space", None);
        let result = ChainValidator::new(ChainValidatorConfig::default()).validate_definitions(&[m1]);
        assert!(!result.ok());
    }
}
