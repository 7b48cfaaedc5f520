//! Map adapter
//!
//! The pluggable seam between raw documents and index rows. A mapper
//! inspects one document and emits zero or more (key, value) pairs
//! through the collector it is handed; it never touches the row store
//! directly. Emission and application are two phases: the adapter
//! first drains the mapper into a plain vector, then the caller
//! applies that vector under its own locking.

use serde_json::Value;

use crate::collation::Collation;

use super::query::QueryRow;

/// Marker prefix for design documents, which are configuration and
/// are skipped by indexing unless a view opts in.
pub const DESIGN_DOC_PREFIX: &str = "_design/";

/// A document as handed to mappers: id plus JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub id: String,
    pub body: Value,
}

impl SourceDocument {
    pub fn new(id: impl Into<String>, body: Value) -> Self {
        SourceDocument {
            id: id.into(),
            body,
        }
    }

    pub fn is_design_doc(&self) -> bool {
        self.id.starts_with(DESIGN_DOC_PREFIX)
    }
}

/// Collects emissions from one mapper invocation.
#[derive(Debug, Default)]
pub struct Emitter {
    emissions: Vec<(Value, Value)>,
}

impl Emitter {
    pub fn new() -> Self {
        Emitter::default()
    }

    /// Emit one (key, value) pair.
    pub fn emit(&mut self, key: Value, value: Value) {
        self.emissions.push((key, value));
    }

    /// Emit a key with no value.
    pub fn emit_key(&mut self, key: Value) {
        self.emit(key, Value::Null);
    }

    pub fn into_emissions(self) -> Vec<(Value, Value)> {
        self.emissions
    }
}

/// Mapping function of a view.
///
/// Implementations must not call back into the view they index for;
/// they see one document at a time and talk only to the emitter.
pub trait Mapper: Send + Sync {
    fn map(&self, doc: &SourceDocument, emitter: &mut Emitter);
}

impl<F> Mapper for F
where
    F: Fn(&SourceDocument, &mut Emitter) + Send + Sync,
{
    fn map(&self, doc: &SourceDocument, emitter: &mut Emitter) {
        self(doc, emitter)
    }
}

/// Fallback mapper: emits the document id as key with no value,
/// turning the view into an id index.
#[derive(Debug, Default)]
pub struct DefaultMapper;

impl Mapper for DefaultMapper {
    fn map(&self, doc: &SourceDocument, emitter: &mut Emitter) {
        emitter.emit_key(Value::String(doc.id.clone()));
    }
}

/// Reduce function: aggregates the `values` of rows sharing a group.
/// `keys` holds the corresponding full row keys. When `rereduce` is
/// true the values are prior reduce outputs, not row values.
pub type ReduceFn = Box<dyn Fn(&[Value], &[Value], bool) -> Value + Send + Sync>;

/// Hook applied to the final row array of a query, after grouping,
/// skip and limit.
pub type PostProcessFn = Box<dyn Fn(Vec<QueryRow>) -> Vec<QueryRow> + Send + Sync>;

/// Everything that defines one view: its name, mapper, collation, and
/// optional reduce and post-processing stages.
pub struct ViewDefinition {
    name: String,
    collation: Collation,
    mapper: Box<dyn Mapper>,
    reduce: Option<ReduceFn>,
    post_process: Option<PostProcessFn>,
    index_design_docs: bool,
    keep_documents: bool,
}

impl ViewDefinition {
    pub fn new(name: impl Into<String>, mapper: impl Mapper + 'static) -> Self {
        ViewDefinition {
            name: name.into(),
            collation: Collation::Canonical,
            mapper: Box::new(mapper),
            reduce: None,
            post_process: None,
            index_design_docs: false,
            keep_documents: false,
        }
    }

    /// An id-indexing view with the default mapper.
    pub fn by_id(name: impl Into<String>) -> Self {
        ViewDefinition::new(name, DefaultMapper)
    }

    pub fn with_collation(mut self, collation: Collation) -> Self {
        self.collation = collation;
        self
    }

    pub fn with_reduce(
        mut self,
        reduce: impl Fn(&[Value], &[Value], bool) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.reduce = Some(Box::new(reduce));
        self
    }

    pub fn with_post_process(
        mut self,
        hook: impl Fn(Vec<QueryRow>) -> Vec<QueryRow> + Send + Sync + 'static,
    ) -> Self {
        self.post_process = Some(Box::new(hook));
        self
    }

    /// Index design documents too. Off by default.
    pub fn with_design_docs(mut self) -> Self {
        self.index_design_docs = true;
        self
    }

    /// Keep document bodies on rows produced by change-feed updates.
    /// Off by default; bodies are never checkpointed either way.
    pub fn with_documents(mut self) -> Self {
        self.keep_documents = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collation(&self) -> Collation {
        self.collation
    }

    pub fn has_reduce(&self) -> bool {
        self.reduce.is_some()
    }

    pub fn reduce_fn(&self) -> Option<&ReduceFn> {
        self.reduce.as_ref()
    }

    pub fn post_process_fn(&self) -> Option<&PostProcessFn> {
        self.post_process.as_ref()
    }

    pub fn keeps_documents(&self) -> bool {
        self.keep_documents
    }

    /// Run the mapper over one document and collect its emissions.
    /// Design documents yield nothing unless the view opted in.
    pub fn map_document(&self, doc: &SourceDocument) -> Vec<(Value, Value)> {
        if doc.is_design_doc() && !self.index_design_docs {
            return Vec::new();
        }
        let mut emitter = Emitter::new();
        self.mapper.map(doc, &mut emitter);
        emitter.into_emissions()
    }
}

impl std::fmt::Debug for ViewDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewDefinition")
            .field("name", &self.name)
            .field("collation", &self.collation)
            .field("reduce", &self.reduce.is_some())
            .field("post_process", &self.post_process.is_some())
            .field("index_design_docs", &self.index_design_docs)
            .field("keep_documents", &self.keep_documents)
            .finish()
    }
}
