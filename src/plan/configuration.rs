//! Step configuration trees.
//!
//! A [`ConfigNode`] is a named node with an optional value, attributes and
//! children. Merging is dominant/recessive: the dominant side wins on value
//! and attributes, recessive children fill in what the dominant side lacks.

use super::descriptor::StepDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Root node name of every step configuration.
pub const ROOT: &str = "configuration";

/// Attribute holding a parameter's declared default value.
pub const DEFAULT_VALUE: &str = "default-value";

/// Attribute holding a parameter's implementation type.
pub const IMPLEMENTATION: &str = "implementation";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "toml::Table")]
pub struct ConfigNode {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ConfigNode>,
}

impl ConfigNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// An empty `configuration` root.
    pub fn root() -> Self {
        Self::new(ROOT)
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: ConfigNode) -> Self {
        self.children.push(child);
        self
    }

    /// First child with the given name.
    pub fn child(&self, name: &str) -> Option<&ConfigNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Rename this node, keeping everything else.
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Merge `self` (dominant) over `recessive`.
    ///
    /// The n-th child named `x` on the recessive side merges with the n-th
    /// child named `x` on the dominant side; unmatched recessive children are
    /// appended after the dominant ones.
    pub fn merged_over(&self, recessive: &ConfigNode) -> ConfigNode {
        let mut merged = self.clone();

        if merged.value.is_none() {
            merged.value = recessive.value.clone();
        }
        for (key, value) in &recessive.attributes {
            merged
                .attributes
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }

        let mut seen: HashMap<&str, usize> = HashMap::new();
        for child in &recessive.children {
            let occurrence = seen.entry(child.name.as_str()).or_insert(0);
            let slot = merged
                .children
                .iter()
                .enumerate()
                .filter(|(_, c)| c.name == child.name)
                .nth(*occurrence)
                .map(|(i, _)| i);
            *occurrence += 1;
            match slot {
                Some(i) => merged.children[i] = merged.children[i].merged_over(child),
                None => merged.children.push(child.clone()),
            }
        }

        merged
    }

    /// Build a node from a TOML value.
    ///
    /// Tables become children, scalars become the node value, arrays become
    /// repeated children named after the key. Keys starting with `@` are
    /// attributes.
    pub fn from_toml(name: impl Into<String>, value: &toml::Value) -> ConfigNode {
        let mut node = ConfigNode::new(name);
        match value {
            toml::Value::Table(table) => node.extend_from_table(table),
            toml::Value::Array(items) => {
                for item in items {
                    node.children.push(ConfigNode::from_toml(node.name.clone(), item));
                }
            }
            toml::Value::String(s) => node.value = Some(s.clone()),
            other => node.value = Some(other.to_string()),
        }
        node
    }

    fn extend_from_table(&mut self, table: &toml::Table) {
        for (key, value) in table {
            if let Some(attribute) = key.strip_prefix('@') {
                let text = match value {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                self.attributes.insert(attribute.to_string(), text);
            } else if let toml::Value::Array(items) = value {
                for item in items {
                    self.children.push(ConfigNode::from_toml(key.clone(), item));
                }
            } else {
                self.children.push(ConfigNode::from_toml(key.clone(), value));
            }
        }
    }
}

impl From<toml::Table> for ConfigNode {
    fn from(table: toml::Table) -> Self {
        let mut node = ConfigNode::root();
        node.extend_from_table(&table);
        node
    }
}

/// Final configuration of a step, parameter by parameter.
///
/// For each declared parameter the declared override (matched by name, then
/// alias) is merged over the parameter's default node. Parameters absent from
/// both sides are left out.
pub fn finalize(descriptor: &StepDescriptor, declared: Option<&ConfigNode>) -> ConfigNode {
    let defaults = descriptor.default_configuration();
    let mut finalized = ConfigNode::root();

    for parameter in &descriptor.parameters {
        let declared_node = declared.and_then(|config| {
            config.child(&parameter.name).or_else(|| {
                parameter
                    .alias
                    .as_deref()
                    .and_then(|alias| config.child(alias))
            })
        });
        let default_node = defaults.child(&parameter.name);

        let node = match (declared_node, default_node) {
            (Some(declared), Some(default)) => declared.merged_over(default),
            (Some(declared), None) => declared.clone(),
            (None, Some(default)) => default.clone(),
            (None, None) => continue,
        };
        let mut node = node.renamed(parameter.name.clone());

        if let Some(implementation) = &parameter.implementation
            && !node.attributes.contains_key(IMPLEMENTATION)
        {
            node.attributes
                .insert(IMPLEMENTATION.to_string(), implementation.clone());
        }

        finalized.children.push(node);
    }

    finalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::descriptor::{Coordinate, Parameter};

    fn descriptor(parameters: Vec<Parameter>) -> StepDescriptor {
        let mut d = StepDescriptor::new(Coordinate::new("org.acme", "acme-plugin"), "build");
        d.parameters = parameters;
        d
    }

    #[test]
    fn test_merge_dominant_value_wins() {
        let dominant = ConfigNode::new("source").with_value("21");
        let recessive = ConfigNode::new("source")
            .with_value("${maven.compiler.source}")
            .with_attribute(DEFAULT_VALUE, "1.8");

        let merged = dominant.merged_over(&recessive);
        assert_eq!(merged.value.as_deref(), Some("21"));
        assert_eq!(merged.attribute(DEFAULT_VALUE), Some("1.8"));
    }

    #[test]
    fn test_merge_fills_missing_value_and_children() {
        let dominant = ConfigNode::root().with_child(ConfigNode::new("a").with_value("1"));
        let recessive = ConfigNode::root()
            .with_value("ignored")
            .with_child(ConfigNode::new("a").with_value("0").with_attribute("x", "y"))
            .with_child(ConfigNode::new("b").with_value("2"));

        let merged = dominant.merged_over(&recessive);
        assert_eq!(merged.value.as_deref(), Some("ignored"));
        assert_eq!(merged.children.len(), 2);
        assert_eq!(merged.child("a").unwrap().value.as_deref(), Some("1"));
        assert_eq!(merged.child("a").unwrap().attribute("x"), Some("y"));
        assert_eq!(merged.child("b").unwrap().value.as_deref(), Some("2"));
    }

    #[test]
    fn test_merge_repeated_children_pairwise() {
        let dominant = ConfigNode::new("includes").with_child(ConfigNode::new("include").with_value("**/A.java"));
        let recessive = ConfigNode::new("includes")
            .with_child(ConfigNode::new("include").with_value("**/*Test.java"))
            .with_child(ConfigNode::new("include").with_value("**/*IT.java"));

        let merged = dominant.merged_over(&recessive);
        let values: Vec<_> = merged
            .children
            .iter()
            .map(|c| c.value.as_deref().unwrap())
            .collect();
        assert_eq!(values, ["**/A.java", "**/*IT.java"]);
    }

    #[test]
    fn test_from_toml_table() {
        let table: toml::Table = toml::from_str(
            r#"
source = "17"
debug = true
includes = ["a", "b"]
[compilerArgs]
"@implementation" = "java.util.List"
arg = "-Xlint"
"#,
        )
        .unwrap();

        let node = ConfigNode::from(table);
        assert_eq!(node.name, ROOT);
        assert_eq!(node.child("source").unwrap().value.as_deref(), Some("17"));
        assert_eq!(node.child("debug").unwrap().value.as_deref(), Some("true"));
        assert_eq!(node.children.iter().filter(|c| c.name == "includes").count(), 2);
        let args = node.child("compilerArgs").unwrap();
        assert_eq!(args.attribute(IMPLEMENTATION), Some("java.util.List"));
        assert_eq!(args.child("arg").unwrap().value.as_deref(), Some("-Xlint"));
    }

    #[test]
    fn test_finalize_override_merged_over_default() {
        let d = descriptor(vec![
            Parameter::new("source")
                .with_expression("${maven.compiler.source}")
                .with_default("1.8"),
            Parameter::new("target").with_default("1.8"),
        ]);
        let declared = ConfigNode::root().with_child(ConfigNode::new("source").with_value("21"));

        let config = finalize(&d, Some(&declared));
        let source = config.child("source").unwrap();
        assert_eq!(source.value.as_deref(), Some("21"));
        assert_eq!(source.attribute(DEFAULT_VALUE), Some("1.8"));

        let target = config.child("target").unwrap();
        assert_eq!(target.value, None);
        assert_eq!(target.attribute(DEFAULT_VALUE), Some("1.8"));
    }

    #[test]
    fn test_finalize_matches_alias() {
        let d = descriptor(vec![Parameter::new("outputDirectory").with_alias("outDir")]);
        let declared = ConfigNode::root().with_child(ConfigNode::new("outDir").with_value("target/gen"));

        let config = finalize(&d, Some(&declared));
        let node = config.child("outputDirectory").unwrap();
        assert_eq!(node.value.as_deref(), Some("target/gen"));
        assert!(config.child("outDir").is_none());
    }

    #[test]
    fn test_finalize_omits_parameters_without_any_value() {
        let d = descriptor(vec![Parameter::new("skip"), Parameter::new("verbose").with_default("false")]);

        let config = finalize(&d, None);
        assert!(config.child("skip").is_none());
        assert!(config.child("verbose").is_some());
        assert_eq!(config.children.len(), 1);
    }

    #[test]
    fn test_finalize_ignores_undeclared_parameters() {
        let d = descriptor(vec![Parameter::new("source").with_default("17")]);
        let declared = ConfigNode::root().with_child(ConfigNode::new("unknown").with_value("x"));

        let config = finalize(&d, Some(&declared));
        assert!(config.child("unknown").is_none());
    }

    #[test]
    fn test_finalize_adds_implementation_attribute() {
        let d = descriptor(vec![
            Parameter::new("filters")
                .with_default("none")
                .with_implementation("java.util.ArrayList"),
        ]);
        let config = finalize(&d, None);
        assert_eq!(
            config.child("filters").unwrap().attribute(IMPLEMENTATION),
            Some("java.util.ArrayList")
        );

        let declared = ConfigNode::root().with_child(
            ConfigNode::new("filters").with_attribute(IMPLEMENTATION, "java.util.LinkedList"),
        );
        let config = finalize(&d, Some(&declared));
        assert_eq!(
            config.child("filters").unwrap().attribute(IMPLEMENTATION),
            Some("java.util.LinkedList")
        );
    }
}
