//! Built-in lifecycles and packaging bindings.

use super::{Alias, Lifecycle, Phase};
use std::collections::BTreeMap;

pub const CLEAN: &str = "clean";
pub const DEFAULT: &str = "default";
pub const SITE: &str = "site";

const SCOPE_COMPILE: &str = "compile";
const SCOPE_RUNTIME: &str = "runtime";
const SCOPE_TEST_ONLY: &str = "test-only";
const SCOPE_TEST: &str = "test";

const PLUGINS: &str = "org.apache.maven.plugins";

/// The three standard lifecycles.
pub fn standard_lifecycles() -> Vec<Lifecycle> {
    vec![clean_lifecycle(), default_lifecycle(), site_lifecycle()]
}

pub fn clean_lifecycle() -> Lifecycle {
    Lifecycle::new(
        CLEAN,
        vec![Phase::new("clean").binding(format!("{}:maven-clean-plugin:3.2.0:clean", PLUGINS))],
    )
    .with_aliases(vec![
        Alias::new("pre-clean", "before:clean"),
        Alias::new("post-clean", "after:clean"),
    ])
}

pub fn default_lifecycle() -> Lifecycle {
    let unit_test = Phase::new("unit-test")
        .child(Phase::new("test-sources"))
        .child(Phase::new("test-resources"))
        .child(
            Phase::new("test-compile")
                .after("test-sources")
                .after("ready")
                .after_dependencies(SCOPE_TEST_ONLY, "ready"),
        )
        .child(
            Phase::new("test")
                .after("test-compile")
                .after("test-resources")
                .after_dependencies(SCOPE_TEST, "ready"),
        );

    let build = Phase::new("build")
        .child(Phase::new("initialize").child(Phase::new("validate")))
        .child(Phase::new("sources").after("initialize"))
        .child(Phase::new("resources").after("initialize"))
        .child(
            Phase::new("compile")
                .after("sources")
                .after_dependencies(SCOPE_COMPILE, "ready"),
        )
        .child(Phase::new("ready").after("compile").after("resources"))
        .child(unit_test)
        .child(
            Phase::new("package")
                .after("ready")
                .after_dependencies(SCOPE_RUNTIME, "package"),
        );

    let verify = Phase::new("verify").child(Phase::new("integration-test").after("package"));

    let all = Phase::new("all")
        .after_children("all")
        .child(build)
        .child(verify)
        .child(Phase::new("install").after("verify"))
        .child(Phase::new("deploy").after("install"));

    Lifecycle::new(DEFAULT, vec![all]).with_aliases(
        vec![
            Alias::new("generate-sources", "sources"),
            Alias::new("process-sources", "after:sources"),
            Alias::new("generate-resources", "resources"),
            Alias::new("process-resources", "after:resources"),
            Alias::new("process-classes", "after:compile"),
            Alias::new("generate-test-sources", "test-sources"),
            Alias::new("process-test-sources", "after:test-sources"),
            Alias::new("generate-test-resources", "test-resources"),
            Alias::new("process-test-resources", "after:test-resources"),
            Alias::new("process-test-classes", "after:test-compile"),
            Alias::new("prepare-package", "before:package"),
            Alias::new("pre-integration-test", "before:integration-test"),
            Alias::new("post-integration-test", "after:integration-test"),
        ],
    )
}

pub fn site_lifecycle() -> Lifecycle {
    let site_plugin = format!("{}:maven-site-plugin:3.12.1", PLUGINS);
    Lifecycle::new(
        SITE,
        vec![
            Phase::new("site").binding(format!("{}:site", site_plugin)),
            Phase::new("site-deploy")
                .after("site")
                .binding(format!("{}:deploy", site_plugin)),
        ],
    )
    .with_aliases(vec![
        Alias::new("pre-site", "before:site"),
        Alias::new("post-site", "after:site"),
    ])
}

/// Default step bindings per packaging type: `packaging -> phase -> specs`.
pub fn standard_packagings() -> BTreeMap<String, BTreeMap<String, Vec<String>>> {
    let plugin = |artifact: &str, version: &str, goal: &str| {
        format!("{}:{}:{}:{}", PLUGINS, artifact, version, goal)
    };
    let install = plugin("maven-install-plugin", "3.1.4", "install");
    let deploy = plugin("maven-deploy-plugin", "3.1.4", "deploy");

    let mut jar = BTreeMap::new();
    jar.insert(
        "resources".to_string(),
        vec![plugin("maven-resources-plugin", "3.3.1", "resources")],
    );
    jar.insert(
        "compile".to_string(),
        vec![plugin("maven-compiler-plugin", "3.14.0", "compile")],
    );
    jar.insert(
        "test-resources".to_string(),
        vec![plugin("maven-resources-plugin", "3.3.1", "testResources")],
    );
    jar.insert(
        "test-compile".to_string(),
        vec![plugin("maven-compiler-plugin", "3.14.0", "testCompile")],
    );
    jar.insert(
        "test".to_string(),
        vec![plugin("maven-surefire-plugin", "3.5.3", "test")],
    );
    jar.insert(
        "package".to_string(),
        vec![plugin("maven-jar-plugin", "3.4.2", "jar")],
    );
    jar.insert("install".to_string(), vec![install.clone()]);
    jar.insert("deploy".to_string(), vec![deploy.clone()]);

    let mut pom = BTreeMap::new();
    pom.insert("install".to_string(), vec![install]);
    pom.insert("deploy".to_string(), vec![deploy]);

    let mut packagings = BTreeMap::new();
    packagings.insert("jar".to_string(), jar);
    packagings.insert("pom".to_string(), pom);
    packagings
}
