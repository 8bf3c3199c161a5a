//! Recipe Information
//!
//! Human and JSON summaries of a rendered recipe, plus a description of
//! the render target (`info --system`).

use std::collections::BTreeMap;
use std::env;
use std::fmt;

use serde::Serialize;
use serde_json::{json, Value};

use crate::environment::platform::RenderContext;
use crate::recipe::model::Recipe;
use crate::recipe::selector::Selector;

/// Environment variables reported for every target.
const ENV_VARS: &[&str] = &["PATH", "CONDA_PREFIX", "CONDA_SUBDIR", "CONDA_PY"];

const NOT_SET: &str = "<not set>";

/// Ordered `key: value` rows shared by the text and JSON views.
fn rows(recipe: &Recipe, ctx: &RenderContext) -> Vec<(&'static str, String)> {
    let mut rows = vec![
        ("file name", format!("{}.tar.bz2", recipe.dist_name(ctx))),
        ("name", recipe.package.name.clone()),
        ("version", recipe.package.version.clone()),
        ("build string", recipe.build_string(ctx)),
        ("build number", recipe.build.number.to_string()),
        ("platform", ctx.platform.to_string()),
    ];
    if let Some(python) = ctx.python {
        rows.push(("python", python.to_string()));
    }

    let about = &recipe.about;
    let optional = [
        ("noarch", recipe.build.noarch.as_ref()),
        ("license", about.license.as_ref()),
        ("license_family", about.license_family.as_ref()),
        ("summary", about.summary.as_ref()),
        ("home", about.home.as_ref()),
        ("doc_url", about.doc_url.as_ref()),
        ("dev_url", about.dev_url.as_ref()),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            rows.push((key, value.clone()));
        }
    }
    for source in &recipe.source {
        rows.push(("source", source.describe()));
    }
    rows
}

/// Package-style listing:
///
/// ```text
/// conda 4.3.21 py36_0
/// -------------------
/// file name   : conda-4.3.21-py36_0.tar.bz2
/// name        : conda
/// ...
/// dependencies:
///     python
/// ```
pub fn pretty_recipe(recipe: &Recipe, ctx: &RenderContext) -> String {
    let header = format!(
        "{} {} {}",
        recipe.package.name,
        recipe.package.version,
        recipe.build_string(ctx)
    );

    let mut output = String::new();
    output.push_str(&header);
    output.push('\n');
    output.push_str(&"-".repeat(header.chars().count()));
    output.push('\n');

    for (key, value) in rows(recipe, ctx) {
        output.push_str(&format!("{:<12}: {}\n", key, value));
    }
    for entry_point in &recipe.build.entry_points {
        output.push_str(&format!("{:<12}: {}\n", "entry point", entry_point));
    }

    output.push_str("dependencies:\n");
    for dep in &recipe.requirements.run {
        output.push_str(&format!("    {}\n", dep));
    }
    output
}

/// The same data as [`pretty_recipe`] as a JSON object with sorted keys.
pub fn info_json(recipe: &Recipe, ctx: &RenderContext) -> Value {
    let mut map: BTreeMap<String, Value> = BTreeMap::new();
    for (key, value) in rows(recipe, ctx) {
        let key = match key {
            "file name" => "fn".to_string(),
            "build string" => "build".to_string(),
            other => other.replace(' ', "_"),
        };
        if key == "source" {
            let entry = map.entry(key).or_insert_with(|| json!([]));
            if let Value::Array(items) = entry {
                items.push(Value::String(value));
            }
            continue;
        }
        map.insert(key, Value::String(value));
    }

    map.insert("build_number".to_string(), json!(recipe.build.number));
    map.insert("depends".to_string(), json!(recipe.requirements.run));
    map.insert("entry_points".to_string(), json!(recipe.build.entry_points));
    map.insert("test_commands".to_string(), json!(recipe.test.commands));

    Value::Object(map.into_iter().collect())
}

/// Description of a render target: selector values and the relevant
/// environment.
#[derive(Debug, Clone, Serialize)]
pub struct ContextInfo {
    pub platform: String,
    pub python: Option<String>,
    pub selectors: BTreeMap<String, bool>,
    pub env_vars: BTreeMap<String, String>,
}

impl fmt::Display for ContextInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>20} : {}", "platform", self.platform)?;
        writeln!(
            f,
            "{:>20} : {}",
            "python version",
            self.python.as_deref().unwrap_or(NOT_SET)
        )?;

        writeln!(f)?;
        writeln!(f, "selectors:")?;
        for (tag, value) in &self.selectors {
            writeln!(f, "{:>20} : {}", tag, value)?;
        }

        writeln!(f)?;
        writeln!(f, "environment:")?;
        for (name, value) in &self.env_vars {
            writeln!(f, "{:>20} : {}", name, value)?;
        }
        Ok(())
    }
}

/// Reports the target and reads the environment of this process.
pub fn context_info(ctx: &RenderContext) -> ContextInfo {
    context_info_with(ctx, |name| env::var(name).ok())
}

/// Like [`context_info`] with a custom environment lookup.
pub fn context_info_with(ctx: &RenderContext, lookup: impl Fn(&str) -> Option<String>) -> ContextInfo {
    let mut tags = vec!["unix".to_string(), "win".to_string(), "py2k".to_string(), "py3k".to_string()];
    if let Some(python) = ctx.python {
        tags.push(format!("py{}", python.as_selector_int()));
    }
    let selectors = tags
        .into_iter()
        .filter_map(|tag| {
            let value = Selector::parse(&tag).ok()?.evaluate(ctx);
            Some((tag, value))
        })
        .collect();

    let mut names: Vec<&str> = ENV_VARS.to_vec();
    if ctx.platform.is_linux() {
        names.push("LD_LIBRARY_PATH");
    } else if ctx.platform.is_osx() {
        names.push("DYLD_LIBRARY_PATH");
    }
    let env_vars = names
        .into_iter()
        .map(|name| {
            let value = lookup(name).unwrap_or_else(|| NOT_SET.to_string());
            (name.to_string(), value)
        })
        .collect();

    ContextInfo {
        platform: ctx.platform.to_string(),
        python: ctx.python.map(|py| py.to_string()),
        selectors,
        env_vars,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::platform::{Platform, PythonVersion};
    use crate::recipe::parser::render_str;
    use crate::recipe::template::TemplateContext;

    const RECIPE: &str = r#"package:
  name: conda
  version: "4.3.21"
source:
  path: ../../
build:
  number: 1
  entry_points:
    - conda = conda.cli:main
requirements:
  run:
    - python
    - pycosat >=0.6.1
about:
  home: https://conda.io
  license: BSD 3-clause
  summary: OS-agnostic, system-level binary package and environment manager.
"#;

    fn ctx() -> RenderContext {
        RenderContext::new(Platform::Linux64).with_python(PythonVersion::new(3, 6))
    }

    fn recipe() -> Recipe {
        render_str(RECIPE, &TemplateContext::new(), &ctx()).unwrap()
    }

    #[test]
    fn test_pretty_recipe() {
        let text = pretty_recipe(&recipe(), &ctx());
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "conda 4.3.21 py36_1");
        assert_eq!(lines[1], "-".repeat(lines[0].len()));
        assert_eq!(lines[2], "file name   : conda-4.3.21-py36_1.tar.bz2");
        assert!(lines.contains(&"build string: py36_1"));
        assert!(lines.contains(&"license     : BSD 3-clause"));
        assert!(lines.contains(&"source      : path ../../"));
        assert!(lines.contains(&"entry point : conda = conda.cli:main"));

        let deps = lines.iter().position(|l| *l == "dependencies:").unwrap();
        assert_eq!(&lines[deps + 1..], &["    python", "    pycosat >=0.6.1"]);
    }

    #[test]
    fn test_info_json_sorted() {
        let value = info_json(&recipe(), &ctx());
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);

        assert_eq!(value["fn"], "conda-4.3.21-py36_1.tar.bz2");
        assert_eq!(value["build"], "py36_1");
        assert_eq!(value["build_number"], 1);
        assert_eq!(value["depends"][1], "pycosat >=0.6.1");
        assert_eq!(value["source"][0], "path ../../");
        assert_eq!(value["python"], "3.6");
    }

    #[test]
    fn test_context_info_linux() {
        let info = context_info_with(&ctx(), |name| (name == "CONDA_PY").then(|| "36".to_string()));
        assert_eq!(info.selectors["unix"], true);
        assert_eq!(info.selectors["win"], false);
        assert_eq!(info.selectors["py3k"], true);
        assert_eq!(info.selectors["py36"], true);
        assert_eq!(info.env_vars["CONDA_PY"], "36");
        assert_eq!(info.env_vars["PATH"], NOT_SET);
        assert!(info.env_vars.contains_key("LD_LIBRARY_PATH"));
        assert!(!info.env_vars.contains_key("DYLD_LIBRARY_PATH"));
        assert!(info.to_string().contains("python version : 3.6"));
    }

    #[test]
    fn test_context_info_osx_without_python() {
        let info = context_info_with(&RenderContext::new(Platform::Osx64), |_| None);
        assert_eq!(info.python, None);
        assert_eq!(info.selectors.len(), 4);
        assert_eq!(info.selectors["py2k"], false);
        assert!(info.env_vars.contains_key("DYLD_LIBRARY_PATH"));
        assert!(!info.env_vars.contains_key("LD_LIBRARY_PATH"));
    }
}
