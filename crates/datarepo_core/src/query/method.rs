//! Static method declarations for repository facades.
//!
//! A declaration is the Rust counterpart of an annotated repository method:
//! its name (the signature), an optional declarative query, parameter names,
//! the declared return shape and execution hints.

/// Declared return shape of a repository method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    /// Ordered list, empty when nothing matches.
    Many,
    /// Zero or one row; more than one is a non-uniqueness error.
    Single,
    /// Counted page.
    Page,
    /// Uncounted slice.
    Slice,
    Count,
    Exists,
    /// Bulk update/delete returning the affected row count.
    Modifying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    PessimisticWrite,
}

/// Advisory execution hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryHints {
    /// Skip identity-cache bookkeeping for returned entities.
    pub read_only: bool,
    /// Relationship attribute paths fetched in the same statement.
    pub fetch: &'static [&'static str],
    pub lock: Option<LockMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDecl {
    pub name: &'static str,
    pub query: Option<&'static str>,
    pub count_query: Option<&'static str>,
    pub params: &'static [&'static str],
    pub returns: ReturnKind,
    pub hints: QueryHints,
    /// Clear the identity cache after this bulk mutation regardless of
    /// session configuration.
    pub clear_automatically: bool,
}

impl MethodDecl {
    /// A query derived from `name` alone.
    pub const fn derived(name: &'static str, returns: ReturnKind) -> Self {
        Self {
            name,
            query: None,
            count_query: None,
            params: &[],
            returns,
            hints: QueryHints {
                read_only: false,
                fetch: &[],
                lock: None,
            },
            clear_automatically: false,
        }
    }

    /// A declarative query with named placeholders.
    pub const fn declared(name: &'static str, query: &'static str, returns: ReturnKind) -> Self {
        let mut decl = Self::derived(name, returns);
        decl.query = Some(query);
        decl
    }

    pub const fn params(mut self, params: &'static [&'static str]) -> Self {
        self.params = params;
        self
    }

    pub const fn count_query(mut self, query: &'static str) -> Self {
        self.count_query = Some(query);
        self
    }

    pub const fn fetch(mut self, paths: &'static [&'static str]) -> Self {
        self.hints.fetch = paths;
        self
    }

    pub const fn read_only(mut self) -> Self {
        self.hints.read_only = true;
        self
    }

    pub const fn lock(mut self, mode: LockMode) -> Self {
        self.hints.lock = Some(mode);
        self
    }

    pub const fn clear_automatically(mut self) -> Self {
        self.clear_automatically = true;
        self
    }

    pub fn is_declarative(&self) -> bool {
        self.query.is_some()
    }
}
