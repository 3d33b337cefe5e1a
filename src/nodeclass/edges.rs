//! Edge slot catalogs and packed iteration masks.
//!
//! Each node type owns two [`EdgeLayout`]s, one for inputs and one for
//! successors. A layout lists its slots with every direct slot ahead of every
//! list slot, and precomputes an [`IterationMask`] so traversal can walk the
//! slots with a shift and a mask instead of consulting the slot table.

use std::fmt;

use crate::error::{GraphError, Result};
use crate::types::TypeId;

/// Maximum number of slots in one edge layout.
pub const MAX_EDGES: usize = 8;

/// Maximum number of list slots in one edge layout.
pub const MAX_LIST_EDGES: usize = 6;

const ENTRY_BITS: u32 = 8;
const ENTRY_MASK: u64 = 0xFF;
const LIST_BIT: u64 = 0x1;

/// Which family of edges a layout or position refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Data and control dependencies.
    Inputs,
    /// Control-flow successors.
    Successors,
}

/// Kind of dependency an input edge expresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InputType {
    /// Ordinary data value.
    Value = 0,
    /// Memory state.
    Memory = 1,
    /// Boolean condition.
    Condition = 2,
    /// Frame state.
    State = 3,
    /// Guard dependency.
    Guard = 4,
    /// Anchoring dependency.
    Anchor = 5,
    /// Loose association.
    Association = 6,
    /// Extension point.
    Extension = 7,
    /// Not checked against allowed usage types.
    Unchecked = 8,
}

impl InputType {
    /// All input types in declaration order.
    pub const ALL: [InputType; 9] = [
        InputType::Value,
        InputType::Memory,
        InputType::Condition,
        InputType::State,
        InputType::Guard,
        InputType::Anchor,
        InputType::Association,
        InputType::Extension,
        InputType::Unchecked,
    ];

    #[inline]
    const fn bit(self) -> u16 {
        1 << (self as u8)
    }
}

/// Small bit set of [`InputType`]s.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct InputTypeSet(u16);

impl InputTypeSet {
    /// The empty set.
    pub const EMPTY: InputTypeSet = InputTypeSet(0);

    /// Builds a set from a slice of input types.
    pub fn of(types: &[InputType]) -> Self {
        let mut set = Self::EMPTY;
        for ty in types {
            set.insert(*ty);
        }
        set
    }

    /// Adds an input type to the set.
    pub fn insert(&mut self, ty: InputType) {
        self.0 |= ty.bit();
    }

    /// Returns true if the set contains `ty`.
    pub fn contains(self, ty: InputType) -> bool {
        self.0 & ty.bit() != 0
    }

    /// Returns the union of both sets.
    pub fn union(self, other: InputTypeSet) -> InputTypeSet {
        InputTypeSet(self.0 | other.0)
    }

    /// Returns true if no input type is present.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates the contained input types in declaration order.
    pub fn iter(self) -> impl Iterator<Item = InputType> {
        InputType::ALL
            .into_iter()
            .filter(move |ty| self.contains(*ty))
    }
}

/// Address of one edge of a node: a slot plus, for list slots, an element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Position {
    /// Edge family.
    pub kind: EdgeKind,
    /// Slot index in the layout.
    pub slot: usize,
    /// Element index for list slots, `None` for direct slots.
    pub sub_index: Option<usize>,
}

impl Position {
    /// Position of a direct slot.
    pub const fn direct(kind: EdgeKind, slot: usize) -> Self {
        Self {
            kind,
            slot,
            sub_index: None,
        }
    }

    /// Position of a list element.
    pub const fn element(kind: EdgeKind, slot: usize, index: usize) -> Self {
        Self {
            kind,
            slot,
            sub_index: Some(index),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            EdgeKind::Inputs => "in",
            EdgeKind::Successors => "succ",
        };
        match self.sub_index {
            Some(i) => write!(f, "{prefix}[{}][{i}]", self.slot),
            None => write!(f, "{prefix}[{}]", self.slot),
        }
    }
}

/// Description of one edge slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgeSlot {
    name: String,
    declared: Option<TypeId>,
    list: bool,
    input_type: Option<InputType>,
    optional: bool,
    storage: u8,
}

impl EdgeSlot {
    /// Creates an input slot. `declared` restricts the assignable node types.
    pub fn input(
        name: impl Into<String>,
        input_type: InputType,
        declared: Option<TypeId>,
        list: bool,
        optional: bool,
    ) -> Self {
        Self {
            name: name.into(),
            declared,
            list,
            input_type: Some(input_type),
            optional,
            storage: 0,
        }
    }

    /// Creates a successor slot.
    pub fn successor(name: impl Into<String>, declared: Option<TypeId>, list: bool) -> Self {
        Self {
            name: name.into(),
            declared,
            list,
            input_type: None,
            optional: false,
            storage: 0,
        }
    }

    /// Field name of the slot.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared node type, `None` meaning any node.
    pub fn declared(&self) -> Option<TypeId> {
        self.declared
    }

    /// Whether the slot holds a node list.
    pub fn is_list(&self) -> bool {
        self.list
    }

    /// Input kind, `None` for successor slots.
    pub fn input_type(&self) -> Option<InputType> {
        self.input_type
    }

    /// Whether the input may legitimately stay empty.
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Storage cell the slot lives in.
    pub fn storage(&self) -> usize {
        self.storage as usize
    }
}

/// One decoded mask entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaskEntry {
    /// Storage cell of the slot.
    pub storage: usize,
    /// Whether the slot is a list.
    pub list: bool,
}

/// Packed `(storage, is-list)` pairs, first slot in the low byte.
///
/// Entries are stored as `((storage + 1) << 1) | list` so that a zero byte
/// always terminates the walk.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct IterationMask(u64);

impl IterationMask {
    /// Packs the slots so that [`IterationMask::pop`] yields them in order.
    pub fn compute(slots: &[EdgeSlot]) -> Self {
        let mut mask = 0u64;
        for slot in slots.iter().rev() {
            mask <<= ENTRY_BITS;
            mask |= ((slot.storage as u64 + 1) << 1) | if slot.list { LIST_BIT } else { 0 };
        }
        IterationMask(mask)
    }

    /// Raw packed value.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Returns true when every entry was consumed.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Removes and returns the next entry.
    #[inline]
    pub fn pop(&mut self) -> Option<MaskEntry> {
        if self.0 == 0 {
            return None;
        }
        let entry = self.0 & ENTRY_MASK;
        self.0 >>= ENTRY_BITS;
        Some(MaskEntry {
            storage: ((entry >> 1) - 1) as usize,
            list: entry & LIST_BIT != 0,
        })
    }
}

impl Iterator for IterationMask {
    type Item = MaskEntry;

    #[inline]
    fn next(&mut self) -> Option<MaskEntry> {
        self.pop()
    }
}

impl fmt::Debug for IterationMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IterationMask({:#018x})", self.0)
    }
}

/// Ordered catalog of the edge slots of one kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgeLayout {
    kind: EdgeKind,
    direct_count: usize,
    slots: Vec<EdgeSlot>,
    mask: IterationMask,
}

impl EdgeLayout {
    /// Builds a layout from scanned slots.
    ///
    /// Direct slots keep their relative order and are placed before list
    /// slots, which also keep theirs. Storage cells are assigned in the
    /// resulting order.
    pub fn build(type_name: &str, kind: EdgeKind, scanned: Vec<EdgeSlot>) -> Result<Self> {
        if scanned.len() > MAX_EDGES {
            return Err(GraphError::layout(
                type_name,
                format!(
                    "{} {:?} edges exceed the maximum of {MAX_EDGES}",
                    scanned.len(),
                    kind
                ),
            ));
        }
        let list_count = scanned.iter().filter(|slot| slot.list).count();
        if list_count > MAX_LIST_EDGES {
            return Err(GraphError::layout(
                type_name,
                format!("{list_count} {kind:?} list edges exceed the maximum of {MAX_LIST_EDGES}"),
            ));
        }
        for (i, slot) in scanned.iter().enumerate() {
            let expects_input = kind == EdgeKind::Inputs;
            if slot.input_type.is_some() != expects_input {
                return Err(GraphError::layout(
                    type_name,
                    format!("slot {} does not belong to the {kind:?} layout", slot.name),
                ));
            }
            if scanned[..i].iter().any(|other| other.name == slot.name) {
                return Err(GraphError::layout(
                    type_name,
                    format!("duplicate edge slot {}", slot.name),
                ));
            }
        }
        let (direct, lists): (Vec<EdgeSlot>, Vec<EdgeSlot>) =
            scanned.into_iter().partition(|slot| !slot.list);
        let direct_count = direct.len();
        let mut slots: Vec<EdgeSlot> = direct.into_iter().chain(lists).collect();
        for (storage, slot) in slots.iter_mut().enumerate() {
            slot.storage = storage as u8;
        }
        let mask = IterationMask::compute(&slots);
        Ok(Self {
            kind,
            direct_count,
            slots,
            mask,
        })
    }

    /// Layout with no slots.
    pub fn empty(kind: EdgeKind) -> Self {
        Self {
            kind,
            direct_count: 0,
            slots: Vec::new(),
            mask: IterationMask::default(),
        }
    }

    /// Reassigns storage cells after the node storage was relocated, then
    /// recomputes the iteration mask. `storage[i]` is the new cell of slot `i`.
    pub fn rebind(&mut self, type_name: &str, storage: &[u8]) -> Result<()> {
        if storage.len() != self.slots.len() {
            return Err(GraphError::layout(
                type_name,
                format!(
                    "rebind expects {} storage cells, got {}",
                    self.slots.len(),
                    storage.len()
                ),
            ));
        }
        let mut seen = [false; MAX_EDGES];
        for &cell in storage {
            let cell = cell as usize;
            if cell >= MAX_EDGES || seen[cell] {
                return Err(GraphError::layout(
                    type_name,
                    format!("invalid or repeated storage cell {cell}"),
                ));
            }
            seen[cell] = true;
        }
        for (slot, &cell) in self.slots.iter_mut().zip(storage) {
            slot.storage = cell;
        }
        self.mask = IterationMask::compute(&self.slots);
        Ok(())
    }

    /// Edge family of the layout.
    pub fn kind(&self) -> EdgeKind {
        self.kind
    }

    /// Total number of slots.
    pub fn count(&self) -> usize {
        self.slots.len()
    }

    /// Number of direct slots; they occupy indices `0..direct_count`.
    pub fn direct_count(&self) -> usize {
        self.direct_count
    }

    /// Slot at `index`.
    pub fn slot(&self, index: usize) -> Option<&EdgeSlot> {
        self.slots.get(index)
    }

    /// All slots in layout order.
    pub fn slots(&self) -> &[EdgeSlot] {
        &self.slots
    }

    /// Index of the slot with the given name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|slot| slot.name == name)
    }

    /// Precomputed traversal mask.
    #[inline]
    pub fn iteration_mask(&self) -> IterationMask {
        self.mask
    }

    /// Returns true if slot `index` has the same shape in both layouts, so an
    /// edge can be carried over between nodes of the two types.
    pub fn is_same(&self, other: &EdgeLayout, index: usize) -> bool {
        match (self.slots.get(index), other.slots.get(index)) {
            (Some(a), Some(b)) => {
                self.kind == other.kind
                    && a.list == b.list
                    && a.declared == b.declared
                    && a.input_type == b.input_type
                    && a.optional == b.optional
            }
            _ => false,
        }
    }

    /// Number of optional memory inputs.
    pub(crate) fn optional_memory_inputs(&self) -> impl Iterator<Item = &EdgeSlot> {
        self.slots
            .iter()
            .filter(|slot| slot.optional && slot.input_type == Some(InputType::Memory))
    }
}
