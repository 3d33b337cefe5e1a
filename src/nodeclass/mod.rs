//! Per-type node metadata and the registry that owns it.
//!
//! A [`NodeType`] is built once from a [`NodeTypeDescriptor`] and is immutable
//! afterwards. It carries the capability flags, the edge and data layouts,
//! the dense leaf and iterable ids, and the hashing seed used for value
//! numbering. Types are shared between threads through `Arc`.

pub mod data;
pub mod edges;

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};
use smallvec::SmallVec;
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::types::TypeId;

pub use data::{DataField, DataKind, DataLayout, DataValue};
pub use edges::{
    EdgeKind, EdgeLayout, EdgeSlot, InputType, InputTypeSet, IterationMask, MaskEntry, Position,
    MAX_EDGES, MAX_LIST_EDGES,
};

/// Capability flags of a node type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeFlags {
    /// Instances may be deduplicated by global value numbering.
    pub value_numberable: bool,
    /// Binary inputs may be swapped by canonicalization.
    pub commutative: bool,
    /// Instances take part in canonicalization.
    pub canonicalizable: bool,
    /// Instances are never equal to another instance.
    pub has_identity: bool,
    /// Instances kill memory state.
    pub memory_kill: bool,
    /// Instances are linked into per-type chains for typed iteration.
    pub iterable: bool,
    /// The type cannot be instantiated.
    pub is_abstract: bool,
}

impl NodeFlags {
    fn inherit(self, parent: NodeFlags) -> NodeFlags {
        NodeFlags {
            value_numberable: self.value_numberable || parent.value_numberable,
            commutative: self.commutative || parent.commutative,
            canonicalizable: self.canonicalizable || parent.canonicalizable,
            has_identity: self.has_identity || parent.has_identity,
            memory_kill: self.memory_kill || parent.memory_kill,
            iterable: self.iterable || parent.iterable,
            is_abstract: self.is_abstract,
        }
    }
}

/// Immutable metadata of a node type.
#[derive(Debug)]
pub struct NodeType {
    id: TypeId,
    name: String,
    short_name: String,
    name_template: Option<String>,
    parent: Option<Arc<NodeType>>,
    inputs: EdgeLayout,
    successors: EdgeLayout,
    data: DataLayout,
    flags: NodeFlags,
    leaf_id: Option<u32>,
    iterable_id: Option<u32>,
    allowed_usage_types: InputTypeSet,
    seed: u64,
}

impl NodeType {
    /// Registry id.
    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Full type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display name, the type name without a trailing `Node`.
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    /// Optional display template.
    pub fn name_template(&self) -> Option<&str> {
        self.name_template.as_deref()
    }

    /// Parent type, if any.
    pub fn parent(&self) -> Option<&Arc<NodeType>> {
        self.parent.as_ref()
    }

    /// Input edge layout.
    #[inline]
    pub fn inputs(&self) -> &EdgeLayout {
        &self.inputs
    }

    /// Successor edge layout.
    #[inline]
    pub fn successors(&self) -> &EdgeLayout {
        &self.successors
    }

    /// Edge layout of the given family.
    #[inline]
    pub fn edges(&self, kind: EdgeKind) -> &EdgeLayout {
        match kind {
            EdgeKind::Inputs => &self.inputs,
            EdgeKind::Successors => &self.successors,
        }
    }

    /// Data layout.
    #[inline]
    pub fn data(&self) -> &DataLayout {
        &self.data
    }

    /// Effective flags, including those inherited from the parent chain.
    #[inline]
    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    /// Whether instances can be deduplicated.
    #[inline]
    pub fn is_value_numberable(&self) -> bool {
        self.flags.value_numberable
    }

    /// A leaf type has no inputs and no successors.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.inputs.count() == 0 && self.successors.count() == 0
    }

    /// Dense id among leaf value-numberable types.
    #[inline]
    pub fn leaf_id(&self) -> Option<u32> {
        self.leaf_id
    }

    /// Dense id among iterable types.
    #[inline]
    pub fn iterable_id(&self) -> Option<u32> {
        self.iterable_id
    }

    /// Input types other nodes may use instances of this type as.
    pub fn allowed_usage_types(&self) -> InputTypeSet {
        self.allowed_usage_types
    }

    /// Returns true if instances may be used through an input of kind `ty`.
    pub fn allows_usage_as(&self, ty: InputType) -> bool {
        matches!(ty, InputType::Value | InputType::Unchecked) || self.allowed_usage_types.contains(ty)
    }

    /// Returns true if this type is `ancestor` or derives from it.
    pub fn is_a(&self, ancestor: TypeId) -> bool {
        let mut current = Some(self);
        while let Some(ty) = current {
            if ty.id == ancestor {
                return true;
            }
            current = ty.parent.as_deref();
        }
        false
    }

    /// Value number of an instance holding `values`.
    pub fn value_number(&self, values: &[DataValue]) -> u64 {
        DataLayout::value_number(self.seed, values)
    }

    /// Returns true if the edge at `pos` of a `from` node can be carried over
    /// to a node of this type.
    pub fn is_valid(&self, pos: Position, from: &NodeType) -> bool {
        if self.id == from.id {
            return true;
        }
        self.edges(pos.kind).is_same(from.edges(pos.kind), pos.slot)
    }
}

/// Field role inside a descriptor.
#[derive(Clone, Debug)]
enum FieldSpec {
    Data(DataField),
    Edge(EdgeSlot),
}

/// Builder describing a node type before registration.
///
/// Fields of the parent type, if any, are laid out ahead of the fields
/// declared here.
#[derive(Clone, Debug)]
pub struct NodeTypeDescriptor {
    name: String,
    short_name: Option<String>,
    name_template: Option<String>,
    parent: Option<Arc<NodeType>>,
    fields: Vec<FieldSpec>,
    flags: NodeFlags,
    allowed_usage_types: InputTypeSet,
}

impl NodeTypeDescriptor {
    /// Starts a descriptor for a type called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            short_name: None,
            name_template: None,
            parent: None,
            fields: Vec::new(),
            flags: NodeFlags::default(),
            allowed_usage_types: InputTypeSet::EMPTY,
        }
    }

    /// Declares the parent type.
    pub fn parent(mut self, parent: &Arc<NodeType>) -> Self {
        self.parent = Some(Arc::clone(parent));
        self
    }

    /// Overrides the derived short name.
    pub fn short_name(mut self, short: impl Into<String>) -> Self {
        self.short_name = Some(short.into());
        self
    }

    /// Sets the display template.
    pub fn name_template(mut self, template: impl Into<String>) -> Self {
        self.name_template = Some(template.into());
        self
    }

    /// Adds a required direct input accepting any node type.
    pub fn input(self, name: impl Into<String>, input_type: InputType) -> Self {
        self.edge(EdgeSlot::input(name, input_type, None, false, false))
    }

    /// Adds an optional direct input.
    pub fn optional_input(self, name: impl Into<String>, input_type: InputType) -> Self {
        self.edge(EdgeSlot::input(name, input_type, None, false, true))
    }

    /// Adds a direct input restricted to `declared` and its subtypes.
    pub fn typed_input(
        self,
        name: impl Into<String>,
        input_type: InputType,
        declared: TypeId,
        optional: bool,
    ) -> Self {
        self.edge(EdgeSlot::input(
            name,
            input_type,
            Some(declared),
            false,
            optional,
        ))
    }

    /// Adds an input list.
    pub fn input_list(self, name: impl Into<String>, input_type: InputType) -> Self {
        self.edge(EdgeSlot::input(name, input_type, None, true, false))
    }

    /// Adds a direct successor.
    pub fn successor(self, name: impl Into<String>) -> Self {
        self.edge(EdgeSlot::successor(name, None, false))
    }

    /// Adds a successor list.
    pub fn successor_list(self, name: impl Into<String>) -> Self {
        self.edge(EdgeSlot::successor(name, None, true))
    }

    /// Adds an arbitrary edge slot.
    pub fn edge(mut self, slot: EdgeSlot) -> Self {
        self.fields.push(FieldSpec::Edge(slot));
        self
    }

    /// Adds a data field.
    pub fn data(mut self, name: impl Into<String>, kind: DataKind) -> Self {
        self.fields.push(FieldSpec::Data(DataField {
            name: name.into(),
            kind,
        }));
        self
    }

    /// Replaces all flags.
    pub fn flags(mut self, flags: NodeFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Marks the type value-numberable.
    pub fn value_numberable(mut self) -> Self {
        self.flags.value_numberable = true;
        self
    }

    /// Marks the type commutative.
    pub fn commutative(mut self) -> Self {
        self.flags.commutative = true;
        self
    }

    /// Marks the type canonicalizable.
    pub fn canonicalizable(mut self) -> Self {
        self.flags.canonicalizable = true;
        self
    }

    /// Gives instances identity.
    pub fn has_identity(mut self) -> Self {
        self.flags.has_identity = true;
        self
    }

    /// Marks the type as a memory kill.
    pub fn memory_kill(mut self) -> Self {
        self.flags.memory_kill = true;
        self
    }

    /// Links instances into per-type chains.
    pub fn iterable(mut self) -> Self {
        self.flags.iterable = true;
        self
    }

    /// Forbids instantiation.
    pub fn abstract_type(mut self) -> Self {
        self.flags.is_abstract = true;
        self
    }

    /// Declares the input types instances may be used as.
    pub fn allowed_usages(mut self, types: &[InputType]) -> Self {
        self.allowed_usage_types = self.allowed_usage_types.union(InputTypeSet::of(types));
        self
    }
}

fn derive_short_name(name: &str) -> String {
    match name.strip_suffix("Node") {
        Some(stripped) if name != "StartNode" && name != "EndNode" && !stripped.is_empty() => {
            stripped.to_string()
        }
        _ => name.to_string(),
    }
}

fn name_seed(name: &str) -> u64 {
    let mut hasher = FxHasher::default();
    name.hash(&mut hasher);
    hasher.finish()
}

#[derive(Default)]
struct RegistryInner {
    types: Vec<Arc<NodeType>>,
    by_name: FxHashMap<String, TypeId>,
    // Iterable ids of each type and of all its iterable descendants.
    iterable_ids: Vec<SmallVec<[u32; 4]>>,
    leaf_count: u32,
    iterable_count: u32,
}

/// Owner of all node types known to a family of graphs.
///
/// Registration is thread-safe; graphs hold the registry through an `Arc`.
#[derive(Default)]
pub struct TypeRegistry {
    inner: RwLock<RegistryInner>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a descriptor and registers the resulting type.
    pub fn register(&self, descriptor: NodeTypeDescriptor) -> Result<Arc<NodeType>> {
        let mut inner = self.inner.write();
        if inner.by_name.contains_key(&descriptor.name) {
            return Err(GraphError::layout(
                &descriptor.name,
                "a type with this name is already registered",
            ));
        }
        let name = descriptor.name;
        let parent = descriptor.parent;
        if let Some(parent) = &parent {
            let known = inner
                .types
                .get(parent.id.as_usize())
                .is_some_and(|ty| ty.name == parent.name);
            if !known {
                return Err(GraphError::layout(
                    &name,
                    format!("parent {} belongs to another registry", parent.name),
                ));
            }
        }

        let mut inputs: Vec<EdgeSlot> = Vec::new();
        let mut successors: Vec<EdgeSlot> = Vec::new();
        let mut data: Vec<DataField> = Vec::new();
        if let Some(parent) = &parent {
            inputs.extend(parent.inputs.slots().iter().cloned());
            successors.extend(parent.successors.slots().iter().cloned());
            data.extend(parent.data.fields().iter().cloned());
        }
        for field in descriptor.fields {
            match field {
                FieldSpec::Data(field) => data.push(field),
                FieldSpec::Edge(slot) if slot.input_type().is_some() => inputs.push(slot),
                FieldSpec::Edge(slot) => successors.push(slot),
            }
        }
        for slot in inputs.iter().chain(successors.iter()) {
            if let Some(declared) = slot.declared() {
                if declared.as_usize() >= inner.types.len() {
                    return Err(GraphError::UnknownType(declared));
                }
            }
        }

        let inputs = EdgeLayout::build(&name, EdgeKind::Inputs, inputs)?;
        let successors = EdgeLayout::build(&name, EdgeKind::Successors, successors)?;
        let data = DataLayout::build(&name, data)?;

        let mut flags = descriptor.flags;
        let mut allowed_usage_types = descriptor.allowed_usage_types;
        if let Some(parent) = &parent {
            flags = flags.inherit(parent.flags);
            allowed_usage_types = allowed_usage_types.union(parent.allowed_usage_types);
        }

        if inputs.optional_memory_inputs().count() > 1 {
            return Err(GraphError::layout(
                &name,
                "at most one optional memory input is allowed",
            ));
        }
        if allowed_usage_types.contains(InputType::Memory) && !flags.memory_kill {
            return Err(GraphError::layout(
                &name,
                "types usable as memory must be memory kills",
            ));
        }
        for slot in inputs.slots() {
            if slot.input_type() != Some(InputType::Memory) || slot.is_list() {
                continue;
            }
            if let Some(declared) = slot.declared() {
                let declared_ty = &inner.types[declared.as_usize()];
                if !declared_ty.flags.memory_kill {
                    return Err(GraphError::layout(
                        &name,
                        format!(
                            "memory input {} must be declared as a memory kill, not {}",
                            slot.name(),
                            declared_ty.name
                        ),
                    ));
                }
            }
        }

        let id = TypeId(inner.types.len() as u32);
        let is_leaf = inputs.count() == 0 && successors.count() == 0;
        let leaf_id = if is_leaf && flags.value_numberable && !flags.is_abstract {
            let leaf = inner.leaf_count;
            inner.leaf_count += 1;
            Some(leaf)
        } else {
            None
        };
        let iterable_id = if flags.iterable && !flags.is_abstract {
            let iterable = inner.iterable_count;
            inner.iterable_count += 1;
            Some(iterable)
        } else {
            None
        };

        let short_name = descriptor
            .short_name
            .unwrap_or_else(|| derive_short_name(&name));
        let ty = Arc::new(NodeType {
            id,
            seed: name_seed(&name),
            name: name.clone(),
            short_name,
            name_template: descriptor.name_template,
            parent,
            inputs,
            successors,
            data,
            flags,
            leaf_id,
            iterable_id,
            allowed_usage_types,
        });

        inner.iterable_ids.push(SmallVec::new());
        if let Some(iterable) = iterable_id {
            let mut current = Some(&*ty);
            while let Some(t) = current {
                inner.iterable_ids[t.id.as_usize()].push(iterable);
                current = t.parent.as_deref();
            }
        }
        inner.types.push(Arc::clone(&ty));
        inner.by_name.insert(name, id);
        debug!(
            type_name = ty.name(),
            type_id = id.0,
            inputs = ty.inputs.count(),
            successors = ty.successors.count(),
            leaf_id = ?leaf_id,
            iterable_id = ?iterable_id,
            "nodeclass.register"
        );
        Ok(ty)
    }

    /// Type with the given id.
    pub fn get(&self, id: TypeId) -> Option<Arc<NodeType>> {
        self.inner.read().types.get(id.as_usize()).cloned()
    }

    /// Type with the given name.
    pub fn lookup(&self, name: &str) -> Option<Arc<NodeType>> {
        let inner = self.inner.read();
        let id = *inner.by_name.get(name)?;
        inner.types.get(id.as_usize()).cloned()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.inner.read().types.len()
    }

    /// Returns true if no type is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of leaf value-numberable types.
    pub fn leaf_type_count(&self) -> usize {
        self.inner.read().leaf_count as usize
    }

    /// Number of iterable types.
    pub fn iterable_type_count(&self) -> usize {
        self.inner.read().iterable_count as usize
    }

    /// Iterable ids of `ty` and all of its iterable descendants.
    pub fn iterable_ids(&self, ty: TypeId) -> SmallVec<[u32; 4]> {
        self.inner
            .read()
            .iterable_ids
            .get(ty.as_usize())
            .cloned()
            .unwrap_or_default()
    }

    /// Moves the edge slots of a type to new storage cells and recomputes its
    /// iteration masks. Nodes created before the call keep the old layout, so
    /// this must run before any instance exists.
    pub fn rebind_storage(
        &self,
        id: TypeId,
        input_cells: &[u8],
        successor_cells: &[u8],
    ) -> Result<Arc<NodeType>> {
        let mut inner = self.inner.write();
        let current = inner
            .types
            .get(id.as_usize())
            .cloned()
            .ok_or(GraphError::UnknownType(id))?;
        let mut inputs = current.inputs.clone();
        inputs.rebind(&current.name, input_cells)?;
        let mut successors = current.successors.clone();
        successors.rebind(&current.name, successor_cells)?;
        let rebound = Arc::new(NodeType {
            id: current.id,
            name: current.name.clone(),
            short_name: current.short_name.clone(),
            name_template: current.name_template.clone(),
            parent: current.parent.clone(),
            inputs,
            successors,
            data: current.data.clone(),
            flags: current.flags,
            leaf_id: current.leaf_id,
            iterable_id: current.iterable_id,
            allowed_usage_types: current.allowed_usage_types,
            seed: current.seed,
        });
        inner.types[id.as_usize()] = Arc::clone(&rebound);
        Ok(rebound)
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("TypeRegistry")
            .field("types", &inner.types.len())
            .field("leaf_types", &inner.leaf_count)
            .field("iterable_types", &inner.iterable_count)
            .finish()
    }
}
