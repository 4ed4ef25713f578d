//! Template engine based on MiniJinja

use minijinja::Environment;
use std::collections::BTreeMap;

use declarative_core::{ReleaseInfo, TemplateContext, TemplatePackage, Values};

use crate::error::{Result, TemplateError};
use crate::filters;
use crate::functions;

/// Separator placed between rendered templates
pub const DOCUMENT_SEPARATOR: &str = "---\n";

/// Rendered templates of one package
#[derive(Debug, Default)]
pub struct RenderedPackage {
    /// Rendered manifests keyed by template name, in sorted order
    pub manifests: BTreeMap<String, String>,
}

impl RenderedPackage {
    /// Concatenate all manifests into one multi-document stream
    ///
    /// Equal inputs always produce byte-identical output.
    pub fn to_stream(&self) -> String {
        let mut out = String::new();
        for manifest in self.manifests.values() {
            let body = manifest.trim_start_matches(DOCUMENT_SEPARATOR).trim_end();
            out.push_str(DOCUMENT_SEPARATOR);
            out.push_str(body);
            out.push('\n');
        }
        out
    }
}

/// Template engine builder
pub struct EngineBuilder {
    strict_mode: bool,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self { strict_mode: true }
    }

    /// Set strict mode (fail on undefined variables)
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    pub fn build(self) -> Engine {
        Engine::new(self.strict_mode)
    }
}

/// The template engine
#[derive(Debug, Clone)]
pub struct Engine {
    strict_mode: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Engine {
    pub fn new(strict_mode: bool) -> Self {
        Self { strict_mode }
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    fn create_environment(&self) -> Environment<'static> {
        let mut env = Environment::new();

        env.set_undefined_behavior(if self.strict_mode {
            minijinja::UndefinedBehavior::Strict
        } else {
            minijinja::UndefinedBehavior::Lenient
        });
        env.set_keep_trailing_newline(true);

        filters::register(&mut env);
        functions::register(&mut env);

        env
    }

    /// Render a single template string
    pub fn render_string(
        &self,
        template: &str,
        context: &TemplateContext,
        template_name: &str,
    ) -> Result<String> {
        let mut env = self.create_environment();
        env.add_template_owned(template_name.to_string(), template.to_string())
            .map_err(|e| TemplateError::from_minijinja(e, template_name, template))?;

        let tmpl = env
            .get_template(template_name)
            .map_err(|e| TemplateError::from_minijinja(e, template_name, template))?;

        tmpl.render(context_value(context))
            .map_err(|e| TemplateError::from_minijinja(e, template_name, template).into())
    }

    /// Render every non-helper template of a package
    ///
    /// Templates whose name starts with `_` are loaded so they can be
    /// imported or included, but produce no output. Templates that render
    /// to nothing are dropped.
    pub fn render_package(
        &self,
        package: &TemplatePackage,
        context: &TemplateContext,
    ) -> Result<RenderedPackage> {
        let template_files = package.template_files()?;
        let mut env = self.create_environment();
        let mut sources = BTreeMap::new();

        for file_path in &template_files {
            let template_name = file_path
                .strip_prefix(&package.templates_dir)
                .unwrap_or(file_path)
                .to_string_lossy()
                .replace('\\', "/");
            let content = std::fs::read_to_string(file_path)?;

            env.add_template_owned(template_name.clone(), content.clone())
                .map_err(|e| TemplateError::from_minijinja(e, &template_name, &content))?;
            sources.insert(template_name, content);
        }

        let ctx = context_value(context);
        let mut rendered = RenderedPackage::default();

        for (template_name, source) in &sources {
            if is_helper(template_name) {
                continue;
            }

            let tmpl = env
                .get_template(template_name)
                .map_err(|e| TemplateError::from_minijinja(e, template_name, source))?;
            let output = tmpl
                .render(&ctx)
                .map_err(|e| TemplateError::from_minijinja(e, template_name, source))?;

            let trimmed = output.trim();
            if trimmed.is_empty() || trimmed == "---" {
                continue;
            }
            rendered.manifests.insert(template_name.clone(), output);
        }

        Ok(rendered)
    }

    /// Load a package, merge its defaults under `values` and render it
    pub fn render_path(
        &self,
        path: &std::path::Path,
        values: &Values,
        release: ReleaseInfo,
    ) -> Result<String> {
        let package = TemplatePackage::load(path)?;
        let mut merged = package.default_values()?;
        merged.merge(values);

        let context = TemplateContext::new(merged, release, &package.metadata);
        Ok(self.render_package(&package, &context)?.to_stream())
    }
}

fn context_value(context: &TemplateContext) -> minijinja::Value {
    minijinja::context! {
        values => &context.values,
        release => &context.release,
        pack => &context.pack,
    }
}

fn is_helper(template_name: &str) -> bool {
    template_name
        .rsplit('/')
        .next()
        .is_some_and(|file| file.starts_with('_'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use declarative_core::PackageMetadata;
    use semver::Version;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_context() -> TemplateContext {
        let values = Values::from_yaml(
            r#"
image:
  repository: nginx
  tag: "1.25"
replicas: 3
"#,
        )
        .unwrap();

        let pack = PackageMetadata {
            name: "mypack".to_string(),
            version: Version::new(1, 0, 0),
            description: None,
        };

        TemplateContext::new(values, ReleaseInfo::new("myapp", "default"), &pack)
    }

    fn write_package(dir: &TempDir) {
        let root = dir.path();
        fs::create_dir_all(root.join("templates")).unwrap();
        fs::write(root.join("values.yaml"), "replicas: 1\nname: web\n").unwrap();
        fs::write(
            root.join("templates/_helpers.tpl"),
            "{% macro labels(name) %}app: {{ name }}{% endmacro %}",
        )
        .unwrap();
        fs::write(
            root.join("templates/deployment.yaml"),
            r#"{% from "_helpers.tpl" import labels %}apiVersion: apps/v1
kind: Deployment
metadata:
  name: {{ values.name }}
  namespace: {{ release.namespace }}
  labels:
    {{ labels(values.name) }}
spec:
  replicas: {{ values.replicas }}
"#,
        )
        .unwrap();
        fs::write(
            root.join("templates/configmap.yaml"),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {{ values.name }}-cfg\n",
        )
        .unwrap();
        fs::write(
            root.join("templates/optional.yaml"),
            "{% if values.enabled | default(false) %}kind: Secret{% endif %}",
        )
        .unwrap();
    }

    #[test]
    fn test_render_simple() {
        let engine = Engine::new(true);
        let ctx = create_test_context();

        let result = engine
            .render_string("replicas: {{ values.replicas }}", &ctx, "test.yaml")
            .unwrap();
        assert_eq!(result, "replicas: 3");
    }

    #[test]
    fn test_render_with_filters() {
        let engine = Engine::new(true);
        let ctx = create_test_context();

        let template = r#"image: {{ values.image | toyaml | nindent(2) }}"#;
        let result = engine.render_string(template, &ctx, "test.yaml").unwrap();

        assert!(result.contains("  repository: nginx"));
        assert!(result.contains("  tag:"));
    }

    #[test]
    fn test_undefined_error() {
        let engine = Engine::new(true);
        let ctx = create_test_context();

        let err = engine
            .render_string("value: {{ values.undefined_key }}", &ctx, "test.yaml")
            .unwrap_err();
        assert!(matches!(err, EngineError::Template(_)));
    }

    #[test]
    fn test_lenient_mode() {
        let engine = Engine::builder().strict(false).build();
        let ctx = create_test_context();

        let result = engine
            .render_string("value: '{{ values.undefined_key }}'", &ctx, "test.yaml")
            .unwrap();
        assert_eq!(result, "value: ''");
    }

    #[test]
    fn test_render_package_sorted_and_skips_helpers() {
        let dir = TempDir::new().unwrap();
        write_package(&dir);

        let package = TemplatePackage::load(dir.path()).unwrap();
        let mut values = package.default_values().unwrap();
        values.merge(&Values::from_yaml("replicas: 2").unwrap());
        let ctx = TemplateContext::new(values, ReleaseInfo::new("web", "prod"), &package.metadata);

        let rendered = Engine::default().render_package(&package, &ctx).unwrap();
        let names: Vec<&str> = rendered.manifests.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["configmap.yaml", "deployment.yaml"]);

        let deployment = &rendered.manifests["deployment.yaml"];
        assert!(deployment.contains("replicas: 2"));
        assert!(deployment.contains("namespace: prod"));
        assert!(deployment.contains("app: web"));
    }

    #[test]
    fn test_render_path_is_deterministic() {
        let dir = TempDir::new().unwrap();
        write_package(&dir);

        let engine = Engine::default();
        let values = Values::from_yaml("replicas: 4").unwrap();
        let first = engine
            .render_path(dir.path(), &values, ReleaseInfo::new("web", "prod"))
            .unwrap();
        let second = engine
            .render_path(dir.path(), &values, ReleaseInfo::new("web", "prod"))
            .unwrap();

        assert_eq!(first, second);
        assert!(first.starts_with("---\napiVersion: v1\nkind: ConfigMap"));
        assert_eq!(first.matches("---\n").count(), 2);
        assert!(first.contains("replicas: 4"));
    }
}
