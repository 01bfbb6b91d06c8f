//! Module loader with import allow-listing and a class cache.
//!
//! Loading runs in a fixed order: the module type is validated before
//! anything is parsed, the docblock is checked against the allow-list before
//! anything is compiled, and the engine must produce exactly one class.

use std::collections::HashMap;
use std::sync::Arc;

use vismod_protocol::{is_valid_module_type, IntrospectReply, MethodSpec, ModuleSource};

use crate::bindings::Bindings;
use crate::docblock::{self, Docblock};
use crate::error::SandboxError;
use crate::matrix::MATRIX_METHOD;
use crate::module::{builtin_methods, ModuleClass, ModuleEngine};

/// Reject module types outside `^[A-Za-z][A-Za-z0-9]*$`.
pub fn validate_module_type(module_type: &str) -> Result<(), SandboxError> {
    if is_valid_module_type(module_type) {
        Ok(())
    } else {
        Err(SandboxError::InvalidModuleType(module_type.to_string()))
    }
}

// ─── Compilation unit ───────────────────────────────────────────────────

/// A validated module: header, synthesized bindings and body.
#[derive(Debug, Clone)]
pub struct CompilationUnit {
    pub module_type: String,
    pub docblock: Docblock,
    pub bindings: Bindings,
    pub body: String,
}

impl CompilationUnit {
    /// Validate the type, parse the header and bind the allow-listed imports.
    pub fn prepare(module_type: &str, source_text: &str) -> Result<Self, SandboxError> {
        validate_module_type(module_type)?;
        let (docblock, body) = docblock::parse(source_text)?;
        let bindings = Bindings::from_imports(module_type, &docblock.imports)?;
        Ok(Self {
            module_type: module_type.to_string(),
            docblock,
            bindings,
            body: body.to_string(),
        })
    }

    /// The bindings preamble, rendered as a block comment.
    pub fn preamble(&self) -> String {
        format!("(; vismod:bindings {} ;)", self.bindings.render_preamble())
    }

    /// Preamble spliced in front of the body.
    pub fn spliced(&self) -> String {
        format!("{}\n{}", self.preamble(), self.body)
    }
}

// ─── Loaded class ───────────────────────────────────────────────────────

/// A compiled class plus its merged metadata.
pub struct LoadedClass {
    module_type: String,
    version_stamp: String,
    class: Arc<dyn ModuleClass>,
    bindings: Arc<Bindings>,
    name: String,
    category: String,
    methods: Vec<MethodSpec>,
    declared: Vec<String>,
}

impl std::fmt::Debug for LoadedClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedClass")
            .field("module_type", &self.module_type)
            .field("version_stamp", &self.version_stamp)
            .field("name", &self.name)
            .field("declared", &self.declared)
            .finish_non_exhaustive()
    }
}

impl LoadedClass {
    fn new(unit: CompilationUnit, version_stamp: &str, class: Arc<dyn ModuleClass>) -> Self {
        let meta = class.meta().clone();

        // Declared methods replace built-ins of the same name.
        let mut methods = builtin_methods();
        let mut declared = Vec::with_capacity(meta.methods.len());
        for spec in meta.methods {
            declared.push(spec.name.clone());
            match methods.iter_mut().find(|m| m.name == spec.name) {
                Some(existing) => *existing = spec,
                None => methods.push(spec),
            }
        }

        let name = meta
            .name
            .or(unit.docblock.name)
            .unwrap_or_else(|| unit.module_type.clone());
        let category = meta
            .category
            .or(unit.docblock.category)
            .unwrap_or_else(|| unit.module_type.clone());

        Self {
            module_type: unit.module_type,
            version_stamp: version_stamp.to_string(),
            class,
            bindings: Arc::new(unit.bindings),
            name,
            category,
            methods,
            declared,
        }
    }

    pub fn module_type(&self) -> &str {
        &self.module_type
    }

    pub fn version_stamp(&self) -> &str {
        &self.version_stamp
    }

    pub fn class(&self) -> &Arc<dyn ModuleClass> {
        &self.class
    }

    pub fn bindings(&self) -> &Arc<Bindings> {
        &self.bindings
    }

    pub fn methods(&self) -> &[MethodSpec] {
        &self.methods
    }

    pub fn method_spec(&self, name: &str) -> Option<&MethodSpec> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Whether the class itself implements `name`.
    pub fn is_declared(&self, name: &str) -> bool {
        self.declared.iter().any(|d| d == name)
    }

    /// Whether `name` can be invoked on live instances.
    pub fn is_callable(&self, name: &str) -> bool {
        name != MATRIX_METHOD && self.method_spec(name).is_some()
    }

    /// Method names accepted by `invokeOnInstance`.
    pub fn callable_methods(&self) -> Vec<String> {
        self.methods
            .iter()
            .filter(|m| m.name != MATRIX_METHOD)
            .map(|m| m.name.clone())
            .collect()
    }

    pub fn introspect(&self) -> IntrospectReply {
        IntrospectReply {
            callable_methods: self.callable_methods(),
            name: self.name.clone(),
            category: self.category.clone(),
            methods: self.methods.clone(),
        }
    }
}

// ─── Loader ─────────────────────────────────────────────────────────────

/// Compiles modules through a [`ModuleEngine`] and caches the results.
///
/// The cache holds at most one class per module type; a source with a new
/// version stamp evicts the stale entry. Failed loads are never cached.
pub struct ModuleLoader {
    engine: Arc<dyn ModuleEngine>,
    cache: HashMap<String, Arc<LoadedClass>>,
}

impl ModuleLoader {
    pub fn new(engine: Arc<dyn ModuleEngine>) -> Self {
        Self {
            engine,
            cache: HashMap::new(),
        }
    }

    /// Load a class without touching the cache.
    pub fn load_class(
        &self,
        module_type: &str,
        source: &ModuleSource,
    ) -> Result<Arc<LoadedClass>, SandboxError> {
        let unit = CompilationUnit::prepare(module_type, &source.text)?;

        let mut classes = self.engine.compile(&unit)?;
        if classes.len() != 1 {
            return Err(SandboxError::NoDefaultExport(module_type.to_string()));
        }
        let class = classes.remove(0);

        let loaded = LoadedClass::new(unit, &source.version_stamp, class);
        tracing::debug!(
            module_type = %module_type,
            version = %source.version_stamp,
            "module class loaded"
        );
        Ok(Arc::new(loaded))
    }

    /// Load a class, reusing the cached one if its version stamp matches.
    pub fn load_cached(
        &mut self,
        module_type: &str,
        source: &ModuleSource,
    ) -> Result<Arc<LoadedClass>, SandboxError> {
        validate_module_type(module_type)?;

        if let Some(cached) = self.cache.get(module_type) {
            if cached.version_stamp == source.version_stamp {
                return Ok(cached.clone());
            }
            tracing::debug!(
                module_type = %module_type,
                stale = %cached.version_stamp,
                fresh = %source.version_stamp,
                "evicting stale module class"
            );
            self.cache.remove(module_type);
        }

        let loaded = self.load_class(module_type, source)?;
        self.cache.insert(module_type.to_string(), loaded.clone());
        Ok(loaded)
    }

    pub fn cached_stamp(&self, module_type: &str) -> Option<&str> {
        self.cache.get(module_type).map(|c| c.version_stamp.as_str())
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Drop every cached class. Returns how many were evicted.
    pub fn clear_cache(&mut self) -> usize {
        let evicted = self.cache.len();
        self.cache.clear();
        evicted
    }
}
