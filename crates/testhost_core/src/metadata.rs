//! Reflected metadata model.
//!
//! A test assembly reaches the host as a manifest describing what a reflection API would report about it: its
//! types, their runtime methods and properties, custom attributes (with base-type chains so "derived from"
//! checks work), referenced assemblies, and any loader exceptions raised while resolving types.
//!
//! ## Notes
//! - Every field defaults sensibly so hand-written manifests stay short.
//! - `DataValue` is the value universe for attribute arguments and data rows. `DataValue::Opaque` stands for a
//!   runtime object the host cannot serialize; it formats fine but fails [`DataValue::to_serialized`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lang::attributes::{self, AttributeId};
use crate::lang::interfaces::{self, InterfaceId};

/// A single reflected assembly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyMetadata {
    /// Simple assembly name, e.g. `Contoso.Tests`.
    pub name: String,
    /// Path the assembly was loaded from. Filled in by the loader when the manifest leaves it empty.
    pub location: String,
    /// Simple names of referenced assemblies.
    pub references: Vec<String>,
    /// Assembly-level attributes.
    pub attributes: Vec<AttributeData>,
    /// Types that could be resolved. `None` means type resolution failed as a whole.
    pub types: Option<Vec<TypeMetadata>>,
    /// Messages of loader exceptions raised while resolving types.
    pub loader_exceptions: Vec<String>,
    /// Assembly-scoped run parameters (overridden by run-settings parameters on key collision).
    pub run_parameters: BTreeMap<String, String>,
}

impl AssemblyMetadata {
    /// Whether the assembly references the given assembly by simple name.
    pub fn references_assembly(&self, simple_name: &str) -> bool {
        self.references.iter().any(|r| r.eq_ignore_ascii_case(simple_name))
    }

    /// Find a type by full name.
    pub fn find_type(&self, full_name: &str) -> Option<&TypeMetadata> {
        self.types.as_deref().unwrap_or_default().iter().find(|t| t.full_name == full_name)
    }
}

/// Kind of reflected type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    #[default]
    Class,
    Struct,
    Interface,
    Enum,
    Delegate,
}

/// Effective visibility of a type or member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Internal,
    ProtectedInternal,
    Protected,
    PrivateProtected,
    Private,
}

impl Visibility {
    pub fn is_public(self) -> bool {
        self == Visibility::Public
    }

    /// Visible to code in the same assembly (and therefore discoverable when internals are allowed).
    pub fn is_internal(self) -> bool {
        matches!(self, Visibility::Internal | Visibility::ProtectedInternal)
    }

    pub fn is_private(self) -> bool {
        self == Visibility::Private
    }
}

/// A reflected type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeMetadata {
    pub full_name: String,
    pub kind: TypeKind,
    pub visibility: Visibility,
    pub is_abstract: bool,
    pub is_sealed: bool,
    /// Open generic type definition (`Foo<T>` rather than `Foo<int>`).
    pub is_generic_definition: bool,
    pub generic_arity: u32,
    /// Full name of the base type, if any.
    pub base_type: Option<String>,
    pub attributes: Vec<AttributeData>,
    /// Methods declared on the type, plus any inherited from types outside the assembly.
    pub methods: Vec<MethodMetadata>,
    pub properties: Vec<PropertyMetadata>,
    /// Static members that `DynamicData` sources can read rows from.
    pub data_members: Vec<DataMember>,
}

impl TypeMetadata {
    pub fn is_class(&self) -> bool {
        self.kind == TypeKind::Class
    }

    /// Simple (namespace-free) name of the type.
    pub fn name(&self) -> &str {
        crate::lang::registry::simple_name(&self.full_name)
    }

    pub fn find_property(&self, name: &str) -> Option<&PropertyMetadata> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn find_data_member(&self, name: &str) -> Option<&DataMember> {
        self.data_members.iter().find(|m| m.name == name)
    }
}

/// Classification of a reflected return type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Void,
    /// Awaitable unit (`Task` / `ValueTask`).
    AwaitableUnit,
    /// Awaitable carrying a value (`Task<T>` / `ValueTask<T>`).
    AwaitableValue,
    Other,
}

impl ReturnKind {
    /// Classify a return type name.
    ///
    /// ## Examples
    /// ```rust
    /// use testhost_core::ReturnKind;
    ///
    /// assert_eq!(ReturnKind::classify("System.Void"), ReturnKind::Void);
    /// assert_eq!(ReturnKind::classify("System.Threading.Tasks.ValueTask"), ReturnKind::AwaitableUnit);
    /// assert_eq!(ReturnKind::classify("Task`1[System.Int32]"), ReturnKind::AwaitableValue);
    /// assert_eq!(ReturnKind::classify("int"), ReturnKind::Other);
    /// ```
    pub fn classify(type_name: &str) -> Self {
        let name = type_name.trim();
        let (head, has_type_arguments) = match name.find(['`', '<', '[']) {
            Some(idx) => (&name[..idx], true),
            None => (name, false),
        };
        let simple = head.rsplit('.').next().unwrap_or(head);
        match (simple, has_type_arguments) {
            ("" | "void" | "Void", false) => ReturnKind::Void,
            ("Task" | "ValueTask", false) => ReturnKind::AwaitableUnit,
            ("Task" | "ValueTask", true) => ReturnKind::AwaitableValue,
            _ => ReturnKind::Other,
        }
    }
}

fn default_return_type() -> String {
    "void".to_string()
}

/// A reflected method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodMetadata {
    pub name: String,
    /// Full name of the declaring type. `None` means the type the method is listed on.
    pub declaring_type: Option<String>,
    /// Simple name of the declaring assembly. `None` means the assembly of the listing type.
    pub declaring_assembly: Option<String>,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_abstract: bool,
    /// Open generic method definition.
    pub is_generic_definition: bool,
    /// Constructed generic method (closed over concrete type arguments).
    pub is_generic: bool,
    #[serde(default = "default_return_type")]
    pub return_type: String,
    pub parameters: Vec<ParameterMetadata>,
    pub attributes: Vec<AttributeData>,
}

impl Default for MethodMetadata {
    fn default() -> Self {
        Self {
            name: String::new(),
            declaring_type: None,
            declaring_assembly: None,
            visibility: Visibility::Public,
            is_static: false,
            is_abstract: false,
            is_generic_definition: false,
            is_generic: false,
            return_type: default_return_type(),
            parameters: Vec::new(),
            attributes: Vec::new(),
        }
    }
}

impl MethodMetadata {
    pub fn return_kind(&self) -> ReturnKind {
        ReturnKind::classify(&self.return_type)
    }

    /// Parameter type names joined the way they would appear in a method signature.
    pub fn parameter_signature(&self) -> String {
        self.parameters.iter().map(|p| p.type_name.as_str()).collect::<Vec<_>>().join(",")
    }

    /// Whether the method takes exactly one parameter typed as a raw object array.
    pub fn takes_single_object_array(&self) -> bool {
        matches!(self.parameters.as_slice(), [only] if only.is_object_array())
    }
}

/// A reflected method parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterMetadata {
    pub name: String,
    pub type_name: String,
}

impl ParameterMetadata {
    pub fn is_object_array(&self) -> bool {
        matches!(self.type_name.as_str(), "object[]" | "Object[]" | "System.Object[]")
    }
}

/// A reflected property.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertyMetadata {
    pub name: String,
    pub type_name: String,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_abstract: bool,
    pub has_setter: bool,
}

/// A static member exposing rows for `DynamicData`, or formatting display names for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataMember {
    pub name: String,
    pub is_static: bool,
    /// Rows produced when the member is read.
    pub rows: Vec<DataRowEntry>,
    /// Message of the exception raised when the member is read, if it throws.
    pub error: Option<String>,
    /// Display-name template when the member is used as a display-name provider. `{method}` is replaced by the
    /// method name and `{0}`, `{1}`, ... by the formatted arguments.
    pub display_name_format: Option<String>,
}

/// A custom attribute instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeData {
    /// Full type name of the attribute.
    pub type_name: String,
    /// Base types of the attribute, nearest first.
    pub base_types: Vec<String>,
    /// Interfaces implemented by the attribute type.
    pub interfaces: Vec<String>,
    /// Positional constructor arguments.
    pub arguments: Vec<DataValue>,
    /// Named property/field arguments.
    pub named: BTreeMap<String, DataValue>,
    /// Rows a custom data source attribute produced when the manifest was captured.
    pub rows: Vec<DataRowEntry>,
}

impl AttributeData {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    pub fn with_argument(mut self, value: impl Into<DataValue>) -> Self {
        self.arguments.push(value.into());
        self
    }

    pub fn with_named(mut self, name: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base_types.push(base.into());
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn with_row(mut self, row: DataRowEntry) -> Self {
        self.rows.push(row);
        self
    }

    /// Resolve the attribute to a known framework attribute, directly or via its base-type chain.
    pub fn resolve_id(&self) -> Option<AttributeId> {
        attributes::resolve(&self.type_name, &self.base_types)
    }

    pub fn implements(&self, id: InterfaceId) -> bool {
        self.interfaces.iter().any(|i| interfaces::from_type_name(i) == Some(id))
    }

    pub fn named_str(&self, name: &str) -> Option<&str> {
        self.named.get(name).and_then(DataValue::as_str)
    }

    pub fn positional_str(&self, index: usize) -> Option<&str> {
        self.arguments.get(index).and_then(DataValue::as_str)
    }
}

/// A value appearing in attribute arguments or data rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<DataValue>),
    /// A runtime object the host cannot serialize, identified by its type name.
    Opaque {
        #[serde(rename = "$opaque")]
        type_name: String,
    },
}

/// Failure to serialize a data row argument.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("type '{type_name}' is not serializable")]
pub struct SerializationError {
    pub type_name: String,
}

impl DataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DataValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[DataValue]> {
        match self {
            DataValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Serialize the value into a self-contained JSON document.
    ///
    /// Fails when the value, or anything nested in it, is opaque or a non-finite float.
    pub fn to_serialized(&self) -> Result<String, SerializationError> {
        self.check_serializable()?;
        serde_json::to_string(self).map_err(|_| SerializationError {
            type_name: self.type_label().to_string(),
        })
    }

    fn check_serializable(&self) -> Result<(), SerializationError> {
        match self {
            DataValue::Opaque { type_name } => Err(SerializationError {
                type_name: type_name.clone(),
            }),
            DataValue::Float(f) if !f.is_finite() => Err(SerializationError {
                type_name: "System.Double".to_string(),
            }),
            DataValue::Array(items) => items.iter().try_for_each(DataValue::check_serializable),
            _ => Ok(()),
        }
    }

    fn type_label(&self) -> &str {
        match self {
            DataValue::Null => "null",
            DataValue::Bool(_) => "System.Boolean",
            DataValue::Int(_) => "System.Int64",
            DataValue::Float(_) => "System.Double",
            DataValue::String(_) => "System.String",
            DataValue::Array(_) => "System.Object[]",
            DataValue::Opaque { type_name } => type_name,
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Null => write!(f, "null"),
            DataValue::Bool(b) => write!(f, "{}", b),
            DataValue::Int(i) => write!(f, "{}", i),
            DataValue::Float(x) => write!(f, "{}", x),
            DataValue::String(s) => write!(f, "\"{}\"", s),
            DataValue::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            DataValue::Opaque { type_name } => write!(f, "{}", type_name),
        }
    }
}

impl From<bool> for DataValue {
    fn from(value: bool) -> Self {
        DataValue::Bool(value)
    }
}

impl From<i64> for DataValue {
    fn from(value: i64) -> Self {
        DataValue::Int(value)
    }
}

impl From<i32> for DataValue {
    fn from(value: i32) -> Self {
        DataValue::Int(i64::from(value))
    }
}

impl From<f64> for DataValue {
    fn from(value: f64) -> Self {
        DataValue::Float(value)
    }
}

impl From<&str> for DataValue {
    fn from(value: &str) -> Self {
        DataValue::String(value.to_string())
    }
}

impl From<String> for DataValue {
    fn from(value: String) -> Self {
        DataValue::String(value)
    }
}

impl From<Vec<DataValue>> for DataValue {
    fn from(value: Vec<DataValue>) -> Self {
        DataValue::Array(value)
    }
}

/// One row produced by a data source: either bare arguments or a wrapper carrying row-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataRowEntry {
    Plain(Vec<DataValue>),
    Wrapped(TestDataRow),
}

impl DataRowEntry {
    pub fn values(&self) -> &[DataValue] {
        match self {
            DataRowEntry::Plain(values) => values,
            DataRowEntry::Wrapped(row) => &row.values,
        }
    }

    pub fn into_row(self) -> TestDataRow {
        match self {
            DataRowEntry::Plain(values) => TestDataRow {
                values,
                ..TestDataRow::default()
            },
            DataRowEntry::Wrapped(row) => row,
        }
    }
}

/// Row wrapper with optional per-row display name, categories and ignore message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestDataRow {
    pub values: Vec<DataValue>,
    pub display_name: Option<String>,
    pub categories: Vec<String>,
    pub ignore_message: Option<String>,
}
