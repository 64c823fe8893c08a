//! Dependency scopes.
//!
//! `ResolutionScope` is what a step descriptor asks for; it expands into the
//! set of artifact [`Scope`]s that must be materialized before the step runs.
//! [`effective_scope`] decides how a scope propagates through a chain of
//! unit dependencies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Scope of a dependency between units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    #[default]
    Compile,
    Provided,
    Runtime,
    System,
    Test,
}

impl Scope {
    pub const ALL: [Scope; 5] = [
        Scope::Compile,
        Scope::Provided,
        Scope::Runtime,
        Scope::System,
        Scope::Test,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Compile => "compile",
            Scope::Provided => "provided",
            Scope::Runtime => "runtime",
            Scope::System => "system",
            Scope::Test => "test",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scope::ALL
            .into_iter()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid scope '{}'. Valid values: compile, provided, runtime, system, test",
                    s
                )
            })
    }
}

/// Scope requirement declared by a step descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionScope {
    #[serde(rename = "compile")]
    Compile,
    #[serde(rename = "runtime")]
    Runtime,
    #[serde(rename = "compile+runtime")]
    CompileRuntime,
    #[serde(rename = "runtime+system")]
    RuntimeSystem,
    #[serde(rename = "test")]
    Test,
}

impl ResolutionScope {
    /// Artifact scopes covered by this requirement.
    pub fn scopes(self) -> BTreeSet<Scope> {
        let scopes: &[Scope] = match self {
            ResolutionScope::Compile => &[Scope::Compile, Scope::System, Scope::Provided],
            ResolutionScope::Runtime => &[Scope::Compile, Scope::Runtime],
            ResolutionScope::CompileRuntime => &[
                Scope::Compile,
                Scope::System,
                Scope::Provided,
                Scope::Runtime,
            ],
            ResolutionScope::RuntimeSystem => &[Scope::Compile, Scope::System, Scope::Runtime],
            ResolutionScope::Test => &Scope::ALL,
        };
        scopes.iter().copied().collect()
    }
}

/// Scope a transitive dependency ends up with.
///
/// `original` is the scope declared on the dependency edge, `inherited` the
/// effective scope of the edge that led to it (`None` for direct
/// dependencies). `None` means the dependency is not transitive.
pub fn effective_scope(original: Option<Scope>, inherited: Option<Scope>) -> Option<Scope> {
    let original = original.unwrap_or(Scope::Compile);

    let Some(inherited) = inherited else {
        return Some(original);
    };

    match (original, inherited) {
        (Scope::Test | Scope::Provided, _) => None,
        (Scope::System, _) => Some(Scope::System),
        (Scope::Compile, Scope::Compile) => Some(Scope::Compile),
        (_, Scope::Test) => Some(Scope::Test),
        (_, Scope::Provided) => Some(Scope::Provided),
        _ => Some(Scope::Runtime),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_scope_expansion() {
        assert_eq!(
            ResolutionScope::Compile.scopes(),
            BTreeSet::from([Scope::Compile, Scope::Provided, Scope::System])
        );
        assert_eq!(
            ResolutionScope::Runtime.scopes(),
            BTreeSet::from([Scope::Compile, Scope::Runtime])
        );
        assert_eq!(
            ResolutionScope::CompileRuntime.scopes(),
            BTreeSet::from([Scope::Compile, Scope::Provided, Scope::Runtime, Scope::System])
        );
        assert_eq!(
            ResolutionScope::RuntimeSystem.scopes(),
            BTreeSet::from([Scope::Compile, Scope::Runtime, Scope::System])
        );
        assert_eq!(ResolutionScope::Test.scopes().len(), 5);
    }

    #[test]
    fn test_direct_dependency_keeps_scope() {
        assert_eq!(effective_scope(Some(Scope::Test), None), Some(Scope::Test));
        assert_eq!(effective_scope(None, None), Some(Scope::Compile));
    }

    #[test]
    fn test_test_and_provided_are_not_transitive() {
        assert_eq!(effective_scope(Some(Scope::Test), Some(Scope::Compile)), None);
        assert_eq!(effective_scope(Some(Scope::Provided), Some(Scope::Runtime)), None);
    }

    #[test]
    fn test_effective_scope_table() {
        use Scope::*;
        let cases = [
            (System, Compile, Some(System)),
            (System, Test, Some(System)),
            (Compile, Compile, Some(Compile)),
            (Compile, Runtime, Some(Runtime)),
            (Runtime, Compile, Some(Runtime)),
            (Compile, Test, Some(Test)),
            (Runtime, Test, Some(Test)),
            (Compile, Provided, Some(Provided)),
            (Runtime, Provided, Some(Provided)),
            (Runtime, Runtime, Some(Runtime)),
            (Compile, System, Some(Runtime)),
        ];
        for (original, inherited, expected) in cases {
            assert_eq!(
                effective_scope(Some(original), Some(inherited)),
                expected,
                "{} via {}",
                original,
                inherited
            );
        }
    }

    #[test]
    fn test_scope_from_str() {
        assert_eq!("runtime".parse::<Scope>().unwrap(), Scope::Runtime);
        let err = "import".parse::<Scope>().unwrap_err();
        assert!(err.to_string().contains("Invalid scope 'import'"));
    }

    #[test]
    fn test_resolution_scope_serde_names() {
        let scope: ResolutionScope = serde_json::from_str("\"compile+runtime\"").unwrap();
        assert_eq!(scope, ResolutionScope::CompileRuntime);
    }
}
