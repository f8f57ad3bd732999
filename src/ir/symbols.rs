//! Resolved declarations and types consumed by the analyses.
use std::collections::{BTreeSet, VecDeque};

use bitflags::bitflags;
use trait_gen::trait_gen;

/// A reference to a type in a [`SymbolTable`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::From,
    derive_more::Into,
    derive_more::Display,
)]
#[display("T{_0}")]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct TypeRef(u32);

/// A reference to a declared symbol (local, parameter, field, property or event).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::From,
    derive_more::Into,
    derive_more::Display,
)]
#[display("S{_0}")]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct SymbolRef(u32);

/// A reference to a method, lambda or local function.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::From,
    derive_more::Into,
    derive_more::Display,
)]
#[display("M{_0}")]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct MethodRef(u32);

#[trait_gen(T -> TypeRef, SymbolRef, MethodRef)]
impl T {
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }

    fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).unwrap_or(u32::MAX))
    }
}

/// The shape of a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// A reference type declared as a class.
    Class,
    /// A user-defined value type.
    Struct,
    /// An interface.
    Interface,
    /// A delegate type.
    Delegate,
    /// An enumeration.
    Enum,
    /// A single or multi dimensional array.
    Array {
        /// The element type.
        element: TypeRef,
    },
    /// A value tuple.
    Tuple {
        /// The types of the elements.
        elements: Vec<TypeRef>,
    },
    /// A nullable value type wrapping `underlying`.
    Nullable {
        /// The wrapped value type.
        underlying: TypeRef,
    },
    /// The boolean type.
    Boolean,
    /// Integral numeric types, including characters.
    Integral,
    /// Floating point numeric types.
    Floating,
    /// The string type.
    String,
    /// The root of the reference type hierarchy.
    Object,
    /// An unconstrained type parameter.
    TypeParameter,
}

/// A type declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    /// The name of the type.
    pub name: String,
    /// The shape of the type.
    pub kind: TypeKind,
    /// The direct base type, if any.
    pub base: Option<TypeRef>,
    /// The directly implemented interfaces.
    pub interfaces: Vec<TypeRef>,
}

impl TypeInfo {
    /// Creates a type with no base type and no interfaces.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            base: None,
            interfaces: Vec::new(),
        }
    }

    /// Sets the base type.
    #[must_use]
    pub fn with_base(mut self, base: TypeRef) -> Self {
        self.base = Some(base);
        self
    }

    /// Adds an implemented interface.
    #[must_use]
    pub fn with_interface(mut self, interface: TypeRef) -> Self {
        self.interfaces.push(interface);
        self
    }
}

/// How a parameter is passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum RefKind {
    /// Passed by value.
    #[default]
    None,
    /// Passed by reference.
    Ref,
    /// Passed by reference, assigned by the callee.
    Out,
    /// Passed by read-only reference.
    In,
}

impl RefKind {
    /// Whether the callee may write through the parameter.
    #[must_use]
    pub const fn is_writable_reference(self) -> bool {
        matches!(self, Self::Ref | Self::Out)
    }
}

/// The kind of a declared symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    /// A local variable.
    Local,
    /// A method parameter.
    Parameter {
        /// Zero-based position in the parameter list.
        ordinal: usize,
        /// How the argument is passed.
        ref_kind: RefKind,
    },
    /// A field.
    Field,
    /// A property or an indexer.
    Property,
    /// An event.
    Event,
}

/// A declared symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// The name of the symbol.
    pub name: String,
    /// The kind of the symbol.
    pub kind: SymbolKind,
    /// The declared type.
    pub ty: TypeRef,
    /// Whether the symbol belongs to a type rather than an instance.
    pub is_static: bool,
}

impl Symbol {
    /// Creates a non-static symbol.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: SymbolKind, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            kind,
            ty,
            is_static: false,
        }
    }

    /// Marks the symbol as static.
    #[must_use]
    pub fn into_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Returns the ref kind of a parameter, or [`RefKind::None`] for other symbols.
    #[must_use]
    pub const fn ref_kind(&self) -> RefKind {
        match self.kind {
            SymbolKind::Parameter { ref_kind, .. } => ref_kind,
            _ => RefKind::None,
        }
    }
}

/// The kind of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum MethodKind {
    /// A regular method.
    Ordinary,
    /// An instance or type constructor.
    Constructor,
    /// An anonymous function.
    Lambda,
    /// A function declared inside another body.
    LocalFunction,
    /// The `Invoke` method of a delegate type.
    DelegateInvoke,
}

bitflags! {
    /// Modifiers and well-known roles of a method.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
    pub struct MethodFlags: u16 {
        /// Declared `static`.
        const STATIC = 0x0001;
        /// Declared `abstract`; has no body.
        const ABSTRACT = 0x0002;
        /// Declared `virtual`; may be overridden.
        const VIRTUAL = 0x0004;
        /// Overrides an inherited method.
        const OVERRIDE = 0x0008;
        /// Synthesized by the compiler.
        const IMPLICIT = 0x0010;
        /// Implemented outside the analyzed source.
        const EXTERN = 0x0020;
        /// An `Equals(object)` style value equality method.
        const OBJECT_EQUALS = 0x0100;
        /// A static reference equality method.
        const REFERENCE_EQUALS = 0x0200;
    }
}

/// A method declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    /// The name of the method.
    pub name: String,
    /// The kind of the method.
    pub kind: MethodKind,
    /// The modifiers of the method.
    pub flags: MethodFlags,
    /// The declaring type.
    pub containing_type: Option<TypeRef>,
    /// The parameter symbols in declaration order.
    pub parameters: Vec<SymbolRef>,
    /// The return type; `None` for `void`.
    pub return_type: Option<TypeRef>,
}

impl MethodInfo {
    /// Creates a method without parameters or modifiers.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: MethodKind) -> Self {
        Self {
            name: name.into(),
            kind,
            flags: MethodFlags::empty(),
            containing_type: None,
            parameters: Vec::new(),
            return_type: None,
        }
    }

    /// Sets the modifiers.
    #[must_use]
    pub fn with_flags(mut self, flags: MethodFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: impl IntoIterator<Item = SymbolRef>) -> Self {
        self.parameters = parameters.into_iter().collect();
        self
    }

    /// Sets the return type.
    #[must_use]
    pub fn with_return_type(mut self, ty: TypeRef) -> Self {
        self.return_type = Some(ty);
        self
    }

    /// Sets the declaring type.
    #[must_use]
    pub fn with_containing_type(mut self, ty: TypeRef) -> Self {
        self.containing_type = Some(ty);
        self
    }

    /// Whether this is a lambda or a local function.
    #[must_use]
    pub const fn is_lambda_or_local_function(&self) -> bool {
        matches!(self.kind, MethodKind::Lambda | MethodKind::LocalFunction)
    }

    /// Whether a call to this method may dispatch to a body other than its own.
    #[must_use]
    pub const fn is_overridable(&self) -> bool {
        self.flags.intersects(
            MethodFlags::ABSTRACT
                .union(MethodFlags::VIRTUAL)
                .union(MethodFlags::OVERRIDE),
        )
    }
}

/// The types every symbol table knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WellKnownTypes {
    /// The root object type.
    pub object: TypeRef,
    /// The boolean type.
    pub boolean: TypeRef,
    /// The string type.
    pub string: TypeRef,
    /// The root exception type.
    pub exception: TypeRef,
}

/// A resolved table of types, symbols and methods.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    types: Vec<TypeInfo>,
    symbols: Vec<Symbol>,
    methods: Vec<MethodInfo>,
    well_known: WellKnownTypes,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// Creates a symbol table containing the well-known types.
    #[must_use]
    pub fn new() -> Self {
        let object = TypeInfo::new("object", TypeKind::Object);
        let boolean = TypeInfo::new("bool", TypeKind::Boolean);
        let string = TypeInfo::new("string", TypeKind::String);
        let exception = TypeInfo::new("Exception", TypeKind::Class).with_base(TypeRef(0));
        Self {
            types: vec![object, boolean, string, exception],
            symbols: Vec::new(),
            methods: Vec::new(),
            well_known: WellKnownTypes {
                object: TypeRef(0),
                boolean: TypeRef(1),
                string: TypeRef(2),
                exception: TypeRef(3),
            },
        }
    }

    /// Returns the well-known types.
    #[must_use]
    pub const fn well_known(&self) -> &WellKnownTypes {
        &self.well_known
    }

    /// Registers a type.
    pub fn add_type(&mut self, info: TypeInfo) -> TypeRef {
        self.types.push(info);
        TypeRef::from_index(self.types.len() - 1)
    }

    /// Registers a symbol.
    pub fn add_symbol(&mut self, symbol: Symbol) -> SymbolRef {
        self.symbols.push(symbol);
        SymbolRef::from_index(self.symbols.len() - 1)
    }

    /// Registers a method.
    pub fn add_method(&mut self, method: MethodInfo) -> MethodRef {
        self.methods.push(method);
        MethodRef::from_index(self.methods.len() - 1)
    }

    /// Looks up a type.
    #[must_use]
    pub fn type_info(&self, ty: TypeRef) -> Option<&TypeInfo> {
        self.types.get(ty.index())
    }

    /// Looks up a symbol.
    #[must_use]
    pub fn symbol(&self, symbol: SymbolRef) -> Option<&Symbol> {
        self.symbols.get(symbol.index())
    }

    /// Looks up a method.
    #[must_use]
    pub fn method(&self, method: MethodRef) -> Option<&MethodInfo> {
        self.methods.get(method.index())
    }

    /// Returns the declared type of a symbol.
    #[must_use]
    pub fn symbol_type(&self, symbol: SymbolRef) -> Option<TypeRef> {
        self.symbol(symbol).map(|it| it.ty)
    }

    /// Whether assigning a value of this type copies it rather than its reference.
    ///
    /// Strings are treated as values since they are immutable.
    #[must_use]
    pub fn has_value_copy_semantics(&self, ty: TypeRef) -> bool {
        self.type_info(ty).is_some_and(|info| {
            matches!(
                info.kind,
                TypeKind::Struct
                    | TypeKind::Enum
                    | TypeKind::Tuple { .. }
                    | TypeKind::Nullable { .. }
                    | TypeKind::Boolean
                    | TypeKind::Integral
                    | TypeKind::Floating
                    | TypeKind::String
            )
        })
    }

    /// Whether values of this type live on the heap and may be aliased.
    #[must_use]
    pub fn is_reference_type(&self, ty: TypeRef) -> bool {
        self.type_info(ty).is_some_and(|info| {
            matches!(
                info.kind,
                TypeKind::Class
                    | TypeKind::Interface
                    | TypeKind::Delegate
                    | TypeKind::Array { .. }
                    | TypeKind::Object
                    | TypeKind::String
            )
        })
    }

    /// Whether the type is `bool` or a nullable `bool`.
    #[must_use]
    pub fn is_boolean_or_nullable_boolean(&self, ty: TypeRef) -> bool {
        match self.type_info(ty).map(|it| &it.kind) {
            Some(TypeKind::Boolean) => true,
            Some(TypeKind::Nullable { underlying }) => {
                matches!(
                    self.type_info(*underlying).map(|it| &it.kind),
                    Some(TypeKind::Boolean)
                )
            }
            _ => false,
        }
    }

    /// Whether the type is a nullable value type.
    #[must_use]
    pub fn is_nullable_value_type(&self, ty: TypeRef) -> bool {
        matches!(
            self.type_info(ty).map(|it| &it.kind),
            Some(TypeKind::Nullable { .. })
        )
    }

    /// Whether the type is a delegate.
    #[must_use]
    pub fn is_delegate(&self, ty: TypeRef) -> bool {
        matches!(
            self.type_info(ty).map(|it| &it.kind),
            Some(TypeKind::Delegate)
        )
    }

    /// Whether `sub` is `sup` or derives from or implements it.
    #[must_use]
    pub fn is_subtype_of(&self, sub: TypeRef, sup: TypeRef) -> bool {
        if sub == sup {
            return true;
        }
        if sup == self.well_known.object && self.is_reference_type(sub) {
            return true;
        }
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([sub]);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            if current == sup {
                return true;
            }
            if let Some(info) = self.type_info(current) {
                queue.extend(info.base);
                queue.extend(info.interfaces.iter().copied());
            }
        }
        false
    }

    /// Whether the type is the root exception type or derives from it.
    #[must_use]
    pub fn is_exception_type(&self, ty: TypeRef) -> bool {
        self.is_subtype_of(ty, self.well_known.exception)
    }

    /// Returns the parameter symbol of `method` at `ordinal`.
    #[must_use]
    pub fn parameter(&self, method: MethodRef, ordinal: usize) -> Option<SymbolRef> {
        self.method(method)?.parameters.get(ordinal).copied()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn table_with_hierarchy() -> (SymbolTable, TypeRef, TypeRef, TypeRef) {
        let mut table = SymbolTable::new();
        let object = table.well_known().object;
        let shape = table.add_type(TypeInfo::new("IShape", TypeKind::Interface));
        let base = table.add_type(TypeInfo::new("Base", TypeKind::Class).with_base(object));
        let derived = table.add_type(
            TypeInfo::new("Derived", TypeKind::Class)
                .with_base(base)
                .with_interface(shape),
        );
        (table, shape, base, derived)
    }

    #[test]
    fn subtype_follows_bases_and_interfaces() {
        let (table, shape, base, derived) = table_with_hierarchy();
        assert!(table.is_subtype_of(derived, base));
        assert!(table.is_subtype_of(derived, shape));
        assert!(table.is_subtype_of(derived, table.well_known().object));
        assert!(!table.is_subtype_of(base, derived));
        assert!(!table.is_subtype_of(base, shape));
    }

    #[test]
    fn copy_semantics() {
        let mut table = SymbolTable::new();
        let point = table.add_type(TypeInfo::new("Point", TypeKind::Struct));
        let node = table.add_type(TypeInfo::new("Node", TypeKind::Class));
        assert!(table.has_value_copy_semantics(point));
        assert!(table.has_value_copy_semantics(table.well_known().string));
        assert!(!table.has_value_copy_semantics(node));
        assert!(table.is_reference_type(node));
        assert!(!table.is_reference_type(point));
    }

    #[test]
    fn nullable_boolean() {
        let mut table = SymbolTable::new();
        let boolean = table.well_known().boolean;
        let nullable = table.add_type(TypeInfo::new(
            "bool?",
            TypeKind::Nullable {
                underlying: boolean,
            },
        ));
        let int = table.add_type(TypeInfo::new("int", TypeKind::Integral));
        assert!(table.is_boolean_or_nullable_boolean(boolean));
        assert!(table.is_boolean_or_nullable_boolean(nullable));
        assert!(!table.is_boolean_or_nullable_boolean(int));
    }

    #[test]
    fn parameters_by_ordinal() {
        let mut table = SymbolTable::new();
        let object = table.well_known().object;
        let p0 = table.add_symbol(Symbol::new(
            "a",
            SymbolKind::Parameter {
                ordinal: 0,
                ref_kind: RefKind::None,
            },
            object,
        ));
        let p1 = table.add_symbol(Symbol::new(
            "b",
            SymbolKind::Parameter {
                ordinal: 1,
                ref_kind: RefKind::Out,
            },
            object,
        ));
        let method = table.add_method(
            MethodInfo::new("M", MethodKind::Ordinary).with_parameters([p0, p1]),
        );
        assert_eq!(table.parameter(method, 1), Some(p1));
        assert_eq!(table.parameter(method, 2), None);
        assert!(
            table
                .symbol(p1)
                .is_some_and(|it| it.ref_kind().is_writable_reference())
        );
    }

    proptest! {
        #[test]
        fn unknown_handles_are_tolerated(ty in any::<TypeRef>(), symbol in any::<SymbolRef>()) {
            let table = SymbolTable::new();
            prop_assume!(ty.index() >= 4);
            prop_assert!(table.type_info(ty).is_none());
            prop_assert!(!table.has_value_copy_semantics(ty));
            prop_assert!(table.symbol(symbol).is_none());
        }

        #[test]
        fn subtype_is_reflexive(ty in any::<TypeRef>()) {
            let table = SymbolTable::new();
            prop_assert!(table.is_subtype_of(ty, ty));
        }
    }
}
