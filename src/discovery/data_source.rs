//! Data sources attached to test methods.
//!
//! Three shapes are recognized:
//!
//! - `DataRow(args...)`: one inline row per attribute.
//! - `DynamicData("Member")`: rows read from a static data member of the test class (or of the type named by
//!   `DynamicDataDeclaringType`).
//! - Any other attribute implementing `ITestDataSource`: rows captured in the manifest on the attribute itself.
//!
//! A source produces [`TestDataRow`]s and computes display names. Turning rows into elements is the assembly
//! enumerator's job.

use testhost_core::lang::attributes::{
    DATA_ERROR_ARG, DISPLAY_NAME_ARG, DISPLAY_NAME_FORMAT_ARG, DYNAMIC_DATA_DECLARING_TYPE_ARG,
    DYNAMIC_DATA_DISPLAY_NAME_ARG, IGNORE_MESSAGE_ARG, TEST_CATEGORIES_ARG, UNFOLDING_STRATEGY_ARG,
};
use testhost_core::lang::interfaces::InterfaceId;
use testhost_core::{AssemblyMetadata, AttributeData, DataRowEntry, DataType, DataValue, MethodMetadata, TestDataRow};

/// How a data source's rows are surfaced at discovery time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum UnfoldingStrategy {
    /// Defer to the assembly-wide strategy.
    #[default]
    Auto,
    /// One test case per row.
    Unfold,
    /// One test case per method; rows are expanded at execution time.
    Fold,
}

impl UnfoldingStrategy {
    /// Parse a strategy name, ignoring case.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Some(UnfoldingStrategy::Auto),
            "unfold" => Some(UnfoldingStrategy::Unfold),
            "fold" => Some(UnfoldingStrategy::Fold),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnfoldingStrategy::Auto => "Auto",
            UnfoldingStrategy::Unfold => "Unfold",
            UnfoldingStrategy::Fold => "Fold",
        }
    }
}

/// Where a source's rows come from.
#[derive(Debug, Clone, PartialEq)]
pub enum DataSourceKind {
    DataRow,
    DynamicData {
        member: String,
        declaring_type: Option<String>,
        display_name_member: Option<String>,
    },
    Custom {
        type_name: String,
    },
}

/// One data source attribute on a test method.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSource {
    pub kind: DataSourceKind,
    /// Inline rows (DataRow) or captured rows (custom sources). Dynamic sources resolve rows on demand.
    pub rows: Vec<DataRowEntry>,
    /// Fixed display name (DataRow `DisplayName`).
    pub display_name: Option<String>,
    /// Display-name template (custom sources).
    pub display_name_format: Option<String>,
    pub ignore_message: Option<String>,
    /// Categories declared on the row attribute itself (DataRow `TestCategories`).
    pub categories: Vec<String>,
    pub unfolding: UnfoldingStrategy,
    /// Failure raised by the source when it produced its rows.
    pub data_error: Option<String>,
}

impl DataSource {
    fn base(kind: DataSourceKind, attribute: &AttributeData) -> Self {
        Self {
            kind,
            rows: Vec::new(),
            display_name: None,
            display_name_format: None,
            ignore_message: attribute.named_str(IGNORE_MESSAGE_ARG).map(str::to_string),
            categories: Vec::new(),
            unfolding: attribute
                .named_str(UNFOLDING_STRATEGY_ARG)
                .and_then(UnfoldingStrategy::parse)
                .unwrap_or_default(),
            data_error: None,
        }
    }

    /// `DataRow(a, b, ...)`
    pub fn data_row(attribute: &AttributeData) -> Self {
        let categories = attribute
            .named
            .get(TEST_CATEGORIES_ARG)
            .map(string_list)
            .unwrap_or_default();
        Self {
            rows: vec![DataRowEntry::Plain(attribute.arguments.clone())],
            display_name: attribute.named_str(DISPLAY_NAME_ARG).map(str::to_string),
            categories,
            ..Self::base(DataSourceKind::DataRow, attribute)
        }
    }

    /// `DynamicData("Member")`, optionally with `DynamicDataDeclaringType` / `DynamicDataDisplayName`.
    pub fn dynamic_data(attribute: &AttributeData) -> Self {
        let kind = DataSourceKind::DynamicData {
            member: attribute.positional_str(0).unwrap_or_default().to_string(),
            declaring_type: attribute.named_str(DYNAMIC_DATA_DECLARING_TYPE_ARG).map(str::to_string),
            display_name_member: attribute.named_str(DYNAMIC_DATA_DISPLAY_NAME_ARG).map(str::to_string),
        };
        Self::base(kind, attribute)
    }

    /// Any other `ITestDataSource` attribute.
    ///
    /// Its unfolding strategy and ignore message only count when the attribute implements the matching capability
    /// interface.
    pub fn custom(attribute: &AttributeData) -> Self {
        let kind = DataSourceKind::Custom {
            type_name: attribute.type_name.clone(),
        };
        let base = Self::base(kind, attribute);
        Self {
            rows: attribute.rows.clone(),
            display_name_format: attribute.named_str(DISPLAY_NAME_FORMAT_ARG).map(str::to_string),
            data_error: attribute.named_str(DATA_ERROR_ARG).map(str::to_string),
            unfolding: if attribute.implements(InterfaceId::UnfoldingCapability) {
                base.unfolding
            } else {
                UnfoldingStrategy::Auto
            },
            ignore_message: base
                .ignore_message
                .clone()
                .filter(|_| attribute.implements(InterfaceId::IgnoreCapability)),
            ..base
        }
    }

    /// Data type recorded on elements unfolded from this source.
    pub fn data_type(&self) -> DataType {
        match self.kind {
            DataSourceKind::DataRow => DataType::DataRow,
            _ => DataType::TestDataSource,
        }
    }

    /// Short description used in warnings.
    pub fn label(&self) -> String {
        match &self.kind {
            DataSourceKind::DataRow => "DataRow".to_string(),
            DataSourceKind::DynamicData { member, .. } => format!("DynamicData({})", member),
            DataSourceKind::Custom { type_name } => type_name.clone(),
        }
    }

    /// Produce the source's rows.
    ///
    /// `owner` is the full name of the type declaring the test method. A source that raises while producing rows
    /// yields `Err` with the raised message.
    pub fn get_data(&self, owner: &str, assembly: &AssemblyMetadata) -> Result<Vec<TestDataRow>, String> {
        if let Some(error) = &self.data_error {
            return Err(error.clone());
        }

        let entries = match &self.kind {
            DataSourceKind::DataRow | DataSourceKind::Custom { .. } => self.rows.clone(),
            DataSourceKind::DynamicData {
                member, declaring_type, ..
            } => {
                let type_name = declaring_type.as_deref().unwrap_or(owner);
                let ty = assembly.find_type(type_name).ok_or_else(|| {
                    format!("type '{}' declaring dynamic data member '{}' was not found", type_name, member)
                })?;
                let data_member = ty
                    .find_data_member(member)
                    .ok_or_else(|| format!("member '{}' was not found on type '{}'", member, type_name))?;
                if !data_member.is_static {
                    return Err(format!("dynamic data member '{}.{}' must be static", type_name, member));
                }
                if let Some(error) = &data_member.error {
                    return Err(error.clone());
                }
                data_member.rows.clone()
            }
        };

        Ok(entries
            .into_iter()
            .map(|entry| {
                let mut row = entry.into_row();
                if matches!(self.kind, DataSourceKind::DataRow) {
                    let mut categories = self.categories.clone();
                    categories.append(&mut row.categories);
                    row.categories = categories;
                }
                row
            })
            .collect())
    }

    /// Display name this source gives a row, before falling back to the element's own name.
    ///
    /// `args` is `None` when the source produced no rows at all.
    pub fn display_name(
        &self,
        method: &MethodMetadata,
        owner: &str,
        assembly: &AssemblyMetadata,
        args: Option<&[DataValue]>,
    ) -> Option<String> {
        match &self.kind {
            DataSourceKind::DataRow => self
                .display_name
                .clone()
                .filter(|name| !name.trim().is_empty())
                .or_else(|| default_display_name(&method.name, args)),
            DataSourceKind::DynamicData {
                declaring_type,
                display_name_member: Some(name_member),
                ..
            } => {
                let type_name = declaring_type.as_deref().unwrap_or(owner);
                let format = assembly
                    .find_type(type_name)
                    .and_then(|ty| ty.find_data_member(name_member))
                    .and_then(|m| m.display_name_format.as_deref());
                match format {
                    Some(format) => Some(format_display_name(format, &method.name, args.unwrap_or_default())),
                    None => default_display_name(&method.name, args),
                }
            }
            DataSourceKind::DynamicData { .. } => default_display_name(&method.name, args),
            DataSourceKind::Custom { .. } => match &self.display_name_format {
                Some(format) => Some(format_display_name(format, &method.name, args.unwrap_or_default())),
                None => default_display_name(&method.name, args),
            },
        }
    }
}

/// `Method (a,b)`. `None` when there is no data to show.
pub fn default_display_name(method_name: &str, args: Option<&[DataValue]>) -> Option<String> {
    let args = args?;
    let rendered: Vec<String> = args.iter().map(ToString::to_string).collect();
    Some(format!("{} ({})", method_name, rendered.join(",")))
}

/// Expand `{method}` and positional `{N}` placeholders.
pub fn format_display_name(format: &str, method_name: &str, args: &[DataValue]) -> String {
    let mut rendered = format.replace("{method}", method_name);
    for (index, arg) in args.iter().enumerate() {
        rendered = rendered.replace(&format!("{{{}}}", index), &arg.to_string());
    }
    rendered
}

/// Arguments a row passes to `method`.
///
/// A method taking a single `object[]` receives the whole row as that array. A row that already consists of one
/// array is passed through as the single argument rather than nested again.
pub fn arguments_for(method: &MethodMetadata, values: Vec<DataValue>) -> Vec<DataValue> {
    if !method.takes_single_object_array() {
        return values;
    }
    match values.as_slice() {
        [DataValue::Array(_)] => values,
        _ => vec![DataValue::Array(values)],
    }
}

fn string_list(value: &DataValue) -> Vec<String> {
    match value {
        DataValue::String(s) => vec![s.clone()],
        DataValue::Array(items) => items.iter().filter_map(DataValue::as_str).map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testhost_core::{DataMember, ParameterMetadata, TypeMetadata};

    fn method(name: &str) -> MethodMetadata {
        MethodMetadata {
            name: name.to_string(),
            ..MethodMetadata::default()
        }
    }

    fn assembly_with_member(member: DataMember) -> AssemblyMetadata {
        AssemblyMetadata {
            types: Some(vec![TypeMetadata {
                full_name: "Ns.Tests".to_string(),
                data_members: vec![member],
                ..TypeMetadata::default()
            }]),
            ..AssemblyMetadata::default()
        }
    }

    #[test]
    fn test_strategy_parse_ignores_case() {
        assert_eq!(UnfoldingStrategy::parse("FOLD"), Some(UnfoldingStrategy::Fold));
        assert_eq!(UnfoldingStrategy::parse("unfold"), Some(UnfoldingStrategy::Unfold));
        assert_eq!(UnfoldingStrategy::parse("sideways"), None);
    }

    #[test]
    fn test_data_row_reads_arguments_and_named_values() {
        let attribute = AttributeData::new("DataRow")
            .with_argument(1)
            .with_argument("a")
            .with_named(DISPLAY_NAME_ARG, "first")
            .with_named(TEST_CATEGORIES_ARG, DataValue::Array(vec!["slow".into()]))
            .with_named(UNFOLDING_STRATEGY_ARG, "Fold");
        let source = DataSource::data_row(&attribute);

        assert_eq!(source.unfolding, UnfoldingStrategy::Fold);
        assert_eq!(source.data_type(), DataType::DataRow);
        let rows = source.get_data("Ns.Tests", &AssemblyMetadata::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values, vec![DataValue::Int(1), DataValue::from("a")]);
        assert_eq!(rows[0].categories, vec!["slow".to_string()]);
        assert_eq!(
            source.display_name(&method("Adds"), "Ns.Tests", &AssemblyMetadata::default(), Some(&rows[0].values)),
            Some("first".to_string())
        );
    }

    #[test]
    fn test_dynamic_data_reads_static_member() {
        let assembly = assembly_with_member(DataMember {
            name: "Cases".to_string(),
            is_static: true,
            rows: vec![DataRowEntry::Plain(vec![1.into()]), DataRowEntry::Plain(vec![2.into()])],
            ..DataMember::default()
        });
        let source = DataSource::dynamic_data(&AttributeData::new("DynamicData").with_argument("Cases"));
        let rows = source.get_data("Ns.Tests", &assembly).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_dynamic_data_failures_are_messages() {
        let assembly = assembly_with_member(DataMember {
            name: "Broken".to_string(),
            is_static: true,
            error: Some("boom".to_string()),
            ..DataMember::default()
        });
        let broken = DataSource::dynamic_data(&AttributeData::new("DynamicData").with_argument("Broken"));
        assert_eq!(broken.get_data("Ns.Tests", &assembly), Err("boom".to_string()));

        let missing = DataSource::dynamic_data(&AttributeData::new("DynamicData").with_argument("Nope"));
        assert!(missing.get_data("Ns.Tests", &assembly).unwrap_err().contains("Nope"));
    }

    #[test]
    fn test_dynamic_display_name_member_formats() {
        let assembly = assembly_with_member(DataMember {
            name: "Names".to_string(),
            is_static: true,
            display_name_format: Some("{method} with {0}".to_string()),
            ..DataMember::default()
        });
        let source = DataSource::dynamic_data(
            &AttributeData::new("DynamicData")
                .with_argument("Cases")
                .with_named(DYNAMIC_DATA_DISPLAY_NAME_ARG, "Names"),
        );
        let name = source.display_name(&method("Adds"), "Ns.Tests", &assembly, Some(&[DataValue::Int(3)]));
        assert_eq!(name.as_deref(), Some("Adds with 3"));
    }

    #[test]
    fn test_custom_capabilities_gate_strategy_and_ignore() {
        let plain = AttributeData::new("My.Source")
            .with_interface("ITestDataSource")
            .with_named(UNFOLDING_STRATEGY_ARG, "Fold")
            .with_named(IGNORE_MESSAGE_ARG, "later");
        let source = DataSource::custom(&plain);
        assert_eq!(source.unfolding, UnfoldingStrategy::Auto);
        assert_eq!(source.ignore_message, None);

        let capable = plain
            .with_interface("ITestDataSourceUnfoldingCapability")
            .with_interface("ITestDataSourceIgnoreCapability");
        let source = DataSource::custom(&capable);
        assert_eq!(source.unfolding, UnfoldingStrategy::Fold);
        assert_eq!(source.ignore_message.as_deref(), Some("later"));
    }

    #[test]
    fn test_default_display_name() {
        let args = [DataValue::Int(1), DataValue::from("x"), DataValue::Null];
        assert_eq!(default_display_name("M", Some(&args)).as_deref(), Some("M (1,\"x\",null)"));
        assert_eq!(default_display_name("M", None), None);
    }

    #[test]
    fn test_single_object_array_argument_shape() {
        let takes_array = MethodMetadata {
            parameters: vec![ParameterMetadata {
                name: "args".to_string(),
                type_name: "System.Object[]".to_string(),
            }],
            ..method("M")
        };
        let packed = arguments_for(&takes_array, vec![1.into(), 2.into()]);
        assert_eq!(packed, vec![DataValue::Array(vec![1.into(), 2.into()])]);

        let already_array = vec![DataValue::Array(vec![1.into(), 2.into()])];
        assert_eq!(arguments_for(&takes_array, already_array.clone()), already_array);

        assert_eq!(arguments_for(&method("M"), vec![1.into(), 2.into()]), vec![1.into(), 2.into()]);
    }
}
