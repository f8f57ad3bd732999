//! Abstract locations, i.e. equivalence classes of runtime addresses.
use std::{fmt, rc::Rc};

use itertools::Itertools;

use crate::ir::{
    CaptureId, CfgId, OperationKey,
    symbols::{SymbolRef, TypeRef},
};

/// The interprocedural call sites leading to the analyzed frame, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CallStack(Rc<[OperationKey]>);

impl CallStack {
    /// The call stack of a top-level analysis.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the call stack extended with one more call site.
    #[must_use]
    pub fn push(&self, call: OperationKey) -> Self {
        Self(self.0.iter().copied().chain([call]).collect())
    }

    /// Returns the number of call sites.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this is the call stack of a top-level analysis.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the call sites, outermost first.
    pub fn iter(&self) -> impl Iterator<Item = &OperationKey> {
        self.0.iter()
    }
}

impl fmt::Display for CallStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.iter().join(" > "))
    }
}

/// A flow capture of a specific graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("{cfg}:{capture}")]
pub struct CaptureKey {
    /// The graph declaring the capture.
    pub cfg: CfgId,
    /// The capture.
    pub capture: CaptureId,
}

/// An equivalence class of runtime addresses.
///
/// Locations created within an interprocedural frame carry the frame's [`CallStack`], so
/// the same allocation site reached through different call chains yields distinct
/// locations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AbstractLocation {
    /// The null reference.
    Null,
    /// Storage that does not live at any address, e.g. a value without an entity.
    NoLocation,
    /// Objects created by an allocation site.
    Allocation {
        /// The creation operation.
        creation: OperationKey,
        /// The type of the created object.
        ty: Option<TypeRef>,
        /// The frame performing the allocation.
        call_stack: CallStack,
    },
    /// The `this` instance of the analyzed method.
    ThisOrMe {
        /// The containing type.
        ty: Option<TypeRef>,
        /// The analyzed frame.
        call_stack: CallStack,
    },
    /// Storage of a declared symbol without explicit allocation, e.g. a local or a
    /// parameter.
    Symbol {
        /// The symbol.
        symbol: SymbolRef,
        /// The frame declaring the symbol.
        call_stack: CallStack,
    },
    /// Storage of a flow capture.
    FlowCapture {
        /// The capture.
        capture: CaptureKey,
        /// The frame declaring the capture.
        call_stack: CallStack,
    },
}

impl AbstractLocation {
    /// Whether this is the null location.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this is the "no location" singleton.
    #[must_use]
    pub const fn is_no_location(&self) -> bool {
        matches!(self, Self::NoLocation)
    }

    /// Whether this location denotes an object on the heap.
    #[must_use]
    pub const fn is_heap(&self) -> bool {
        matches!(self, Self::Allocation { .. } | Self::ThisOrMe { .. })
    }

    /// Returns the creation operation of an allocation.
    #[must_use]
    pub const fn creation(&self) -> Option<OperationKey> {
        match self {
            Self::Allocation { creation, .. } => Some(*creation),
            _ => None,
        }
    }

    /// Returns the frame that created the location.
    #[must_use]
    pub const fn call_stack(&self) -> Option<&CallStack> {
        match self {
            Self::Null | Self::NoLocation => None,
            Self::Allocation { call_stack, .. }
            | Self::ThisOrMe { call_stack, .. }
            | Self::Symbol { call_stack, .. }
            | Self::FlowCapture { call_stack, .. } => Some(call_stack),
        }
    }
}

impl fmt::Display for AbstractLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::NoLocation => write!(f, "<none>"),
            Self::Allocation {
                creation,
                call_stack,
                ..
            } => write!(f, "new@{creation}{call_stack}"),
            Self::ThisOrMe { call_stack, .. } => write!(f, "this{call_stack}"),
            Self::Symbol { symbol, call_stack } => write!(f, "{symbol}{call_stack}"),
            Self::FlowCapture {
                capture,
                call_stack,
            } => write!(f, "{capture}{call_stack}"),
        }
    }
}
