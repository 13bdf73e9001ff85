//! Alias assignment for query extents.
//!
//! Every data-source clause resolves to a stable alias for the lifetime of
//! one compile. Linking makes two syntactically distinct clauses resolve to
//! one alias (a join clause and its owning group-join, a subquery main source
//! and the clause that iterates it); a blank entry makes references omit the
//! alias prefix entirely (union-ordering output columns).

use std::collections::HashMap;

use crate::query_model::SourceId;

#[derive(Debug, Default)]
pub struct ExtentNameProvider {
    next_index: u32,
    /// Union-find parent table keyed by clause identity.
    links: HashMap<SourceId, SourceId>,
    names: HashMap<SourceId, String>,
    /// Prepended to every non-blank resolution while set. Used for the
    /// iteration variable of ALL-subquery SATISFIES predicates.
    prefix: Option<String>,
}

impl ExtentNameProvider {
    pub fn new() -> Self {
        ExtentNameProvider {
            next_index: 1,
            links: HashMap::new(),
            names: HashMap::new(),
            prefix: None,
        }
    }

    fn root(&self, id: SourceId) -> SourceId {
        let mut current = id;
        while let Some(&parent) = self.links.get(&current) {
            current = parent;
        }
        current
    }

    fn mint(&mut self) -> String {
        let name = format!("Extent{}", self.next_index);
        self.next_index += 1;
        name
    }

    /// Resolve a source to its alias, minting one on first sight.
    /// Resolution is idempotent within one compile.
    pub fn extent_name(&mut self, id: SourceId) -> String {
        let root = self.root(id);
        if !self.names.contains_key(&root) {
            let name = self.mint();
            self.names.insert(root, name);
        }
        let name = &self.names[&root];
        match &self.prefix {
            Some(prefix) if !name.is_empty() => format!("{}{}", prefix, name),
            _ => name.clone(),
        }
    }

    /// Force `secondary` to resolve to the same alias as `primary` for the
    /// remainder of the compile. Linking is never undone.
    pub fn link(&mut self, primary: SourceId, secondary: SourceId) {
        let primary_root = self.root(primary);
        let secondary_root = self.root(secondary);
        if primary_root != secondary_root {
            self.links.insert(secondary_root, primary_root);
        }
    }

    /// Make a source resolve to the empty alias, so member references on it
    /// render without a prefix.
    pub fn set_blank(&mut self, id: SourceId) {
        let root = self.root(id);
        self.names.insert(root, String::new());
    }

    /// Mint a fresh alias not tied to any source (existential iteration
    /// variables).
    pub fn unlinked_name(&mut self) -> String {
        self.mint()
    }

    pub fn set_prefix(&mut self, prefix: Option<String>) {
        self.prefix = prefix;
    }
}
