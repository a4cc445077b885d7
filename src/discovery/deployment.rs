//! Deployment item resolution.

use testhost_core::{AttributeData, DeploymentItem, MethodMetadata, TypeMetadata};

use super::reflect::Attribute;

/// Resolves the files a test needs deployed next to the run.
pub trait DeploymentResolver {
    /// Items for `method` listed on `ty`. Invalid declarations push a warning and are skipped.
    fn deployment_items(
        &self,
        method: &MethodMetadata,
        ty: &TypeMetadata,
        warnings: &mut Vec<String>,
    ) -> Vec<DeploymentItem>;
}

/// Reads `DeploymentItem` attributes: class-level first, then method-level.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttributeDeploymentResolver;

impl DeploymentResolver for AttributeDeploymentResolver {
    fn deployment_items(
        &self,
        method: &MethodMetadata,
        ty: &TypeMetadata,
        warnings: &mut Vec<String>,
    ) -> Vec<DeploymentItem> {
        let mut items = Vec::new();
        for data in ty.attributes.iter().chain(&method.attributes) {
            if let Some(item) = deployment_item(data, ty, method, warnings) {
                if !items.contains(&item) {
                    items.push(item);
                }
            }
        }
        items
    }
}

fn deployment_item(
    data: &AttributeData,
    ty: &TypeMetadata,
    method: &MethodMetadata,
    warnings: &mut Vec<String>,
) -> Option<DeploymentItem> {
    let Attribute::DeploymentItem { path, output_directory } = Attribute::resolve(data) else {
        return None;
    };
    if path.trim().is_empty() {
        warnings.push(format!(
            "Invalid deployment item on {}.{}: the source path is empty",
            ty.full_name, method.name
        ));
        return None;
    }
    if std::path::Path::new(&output_directory).is_absolute() {
        warnings.push(format!(
            "Invalid deployment item on {}.{}: output directory '{}' must be relative",
            ty.full_name, method.name, output_directory
        ));
        return None;
    }
    Some(DeploymentItem {
        source_path: path,
        relative_output_directory: output_directory,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(path: &str, output: &str) -> DeploymentItem {
        DeploymentItem {
            source_path: path.to_string(),
            relative_output_directory: output.to_string(),
        }
    }

    #[test]
    fn test_class_items_come_first_and_duplicates_collapse() {
        let ty = TypeMetadata {
            full_name: "Ns.Tests".to_string(),
            attributes: vec![AttributeData::new("DeploymentItem").with_argument("data/shared.json")],
            ..TypeMetadata::default()
        };
        let method = MethodMetadata {
            name: "Reads".to_string(),
            attributes: vec![
                AttributeData::new("DeploymentItem").with_argument("data/input.csv").with_argument("inputs"),
                AttributeData::new("DeploymentItem").with_argument("data/shared.json"),
            ],
            ..MethodMetadata::default()
        };

        let mut warnings = Vec::new();
        let items = AttributeDeploymentResolver.deployment_items(&method, &ty, &mut warnings);
        assert_eq!(items, vec![item("data/shared.json", ""), item("data/input.csv", "inputs")]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_empty_path_warns() {
        let method = MethodMetadata {
            name: "Reads".to_string(),
            attributes: vec![AttributeData::new("DeploymentItem").with_argument("  ")],
            ..MethodMetadata::default()
        };
        let mut warnings = Vec::new();
        let items = AttributeDeploymentResolver.deployment_items(&method, &TypeMetadata::default(), &mut warnings);
        assert!(items.is_empty());
        assert_eq!(warnings.len(), 1);
    }
}
