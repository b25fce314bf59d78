//! Include system for GLSL sources.
//!
//! Fragments are registered in dependency order: every fragment a new fragment
//! requires must already be present. A shader then declares what it needs with
//! `REQUIRE(<name>)` directives and [`ShaderLibrary::resolve`] prepends the
//! transitive set of fragments ahead of the shader body.

mod deps;
mod pragma;
mod stages;

pub use deps::DepSet;
pub use pragma::{required_names, REQUIRE_PRAGMA};
pub use stages::{Stage, StageSources, FULLSCREEN_VERTEX_GLSL};

/// Default number of fragments a library accepts.
pub const MAX_FRAGMENTS: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("too many library fragments (capacity {capacity}); cannot add '{name}'")]
    Full { name: String, capacity: usize },
}

/// Slot index of a registered fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FragmentId(pub usize);

#[derive(Debug, Clone)]
struct Fragment {
    name: String,
    source: String,
    requires: DepSet,
    closure: DepSet,
}

/// Ordered registry of named source fragments.
#[derive(Debug, Clone)]
pub struct ShaderLibrary {
    fragments: Vec<Fragment>,
    capacity: usize,
}

impl Default for ShaderLibrary {
    fn default() -> Self {
        Self::with_capacity(MAX_FRAGMENTS)
    }
}

impl ShaderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fragments: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Registers a fragment, panicking when the library is full.
    ///
    /// Overflowing the library is a static ordering mistake in the caller, so
    /// it is treated like a failed assertion. Use [`ShaderLibrary::try_register`]
    /// when the fragment list comes from user data.
    pub fn register(&mut self, name: impl Into<String>, source: impl Into<String>) -> FragmentId {
        match self.try_register(name, source) {
            Ok(id) => id,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_register(
        &mut self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<FragmentId, LibraryError> {
        let name = name.into();
        if self.fragments.len() >= self.capacity {
            return Err(LibraryError::Full {
                name,
                capacity: self.capacity,
            });
        }
        let source = source.into();
        if self.lookup(&name).is_some() {
            tracing::warn!(fragment = %name, "fragment registered twice; later lookups use the new slot");
        }

        let requires = self.dependencies(&source, &name);
        let closure = self.expand(&requires);
        let id = FragmentId(self.fragments.len());
        tracing::trace!(
            fragment = %name,
            slot = id.0,
            direct = requires.len(),
            transitive = closure.len(),
            "registered shader library fragment"
        );
        self.fragments.push(Fragment {
            name,
            source,
            requires,
            closure,
        });
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<FragmentId> {
        self.fragments
            .iter()
            .rposition(|fragment| fragment.name == name)
            .map(FragmentId)
    }

    pub fn name(&self, id: FragmentId) -> Option<&str> {
        self.fragments.get(id.0).map(|fragment| fragment.name.as_str())
    }

    pub fn source(&self, id: FragmentId) -> Option<&str> {
        self.fragments.get(id.0).map(|fragment| fragment.source.as_str())
    }

    /// Direct dependencies recorded when the fragment was registered.
    pub fn requires(&self, id: FragmentId) -> Option<&DepSet> {
        self.fragments.get(id.0).map(|fragment| &fragment.requires)
    }

    /// Every fragment `source` needs, directly or transitively.
    pub fn closure(&self, source: &str) -> DepSet {
        let direct = self.dependencies(source, "shader code");
        self.expand(&direct)
    }

    /// Concatenates the required fragments in slot order followed by `source`.
    ///
    /// Slot order is a valid topological order because a fragment can only
    /// reference fragments registered before it.
    pub fn resolve(&self, source: &str) -> String {
        let closure = self.closure(source);
        if closure.is_empty() {
            return source.to_owned();
        }

        let fragments: Vec<&str> = closure
            .iter()
            .filter_map(|slot| self.fragments.get(slot))
            .map(|fragment| fragment.source.as_str())
            .collect();
        let mut assembled =
            String::with_capacity(fragments.iter().map(|s| s.len()).sum::<usize>() + source.len());
        for fragment in fragments {
            assembled.push_str(fragment);
        }
        assembled.push_str(source);
        assembled
    }

    /// Resolves every stage of a program.
    pub fn assemble(&self, sources: &StageSources) -> StageSources {
        sources.map_sources(|source| self.resolve(source))
    }

    /// Names referenced by `source` that are not registered.
    pub fn unresolved<'a>(&self, source: &'a str) -> Vec<&'a str> {
        required_names(source)
            .filter(|name| self.lookup(name).is_none())
            .collect()
    }

    fn dependencies(&self, source: &str, owner: &str) -> DepSet {
        let mut deps = DepSet::new();
        for name in required_names(source) {
            match self.lookup(name) {
                Some(id) => deps.insert(id.0),
                None => tracing::info!(
                    dependency = %name,
                    required_by = %owner,
                    "dependency not found; this might be due to bad library ordering or overriding a builtin shader"
                ),
            }
        }
        deps
    }

    fn expand(&self, direct: &DepSet) -> DepSet {
        let mut closure = direct.clone();
        for slot in direct.iter() {
            if let Some(fragment) = self.fragments.get(slot) {
                closure.union_with(&fragment.closure);
            }
        }
        closure
    }
}
