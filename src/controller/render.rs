//! # Chart Rendering
//!
//! Turns the values document into the desired child objects.
//!
//! [`HelmRenderer`] shells out to `helm template` on the chart shipped with
//! the operator image and parses the multi-document YAML it prints.

use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::api::DynamicObject;
use serde::Deserialize;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, info_span, Instrument};

/// Renders chart values into Kubernetes objects.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Every returned object carries `namespace`.
    async fn render(
        &self,
        values: &serde_json::Value,
        namespace: &str,
    ) -> Result<Vec<DynamicObject>>;
}

/// [`Renderer`] backed by the `helm` binary.
#[derive(Debug, Clone)]
pub struct HelmRenderer {
    chart_path: PathBuf,
    helm_binary: String,
}

impl HelmRenderer {
    #[must_use]
    pub fn new(chart_path: impl Into<PathBuf>) -> Self {
        Self {
            chart_path: chart_path.into(),
            helm_binary: "helm".to_string(),
        }
    }

    /// Use a different `helm` executable.
    #[must_use]
    pub fn with_binary(mut self, helm_binary: &str) -> Self {
        self.helm_binary = helm_binary.to_string();
        self
    }
}

#[async_trait]
impl Renderer for HelmRenderer {
    async fn render(
        &self,
        values: &serde_json::Value,
        namespace: &str,
    ) -> Result<Vec<DynamicObject>> {
        let span = info_span!(
            "helm.template",
            chart.path = %self.chart_path.display(),
            namespace = namespace
        );

        async {
            let start = Instant::now();

            // JSON is valid YAML, so the document can be passed to helm as is.
            let mut values_file = tempfile::Builder::new()
                .prefix("taskcluster-values-")
                .suffix(".yaml")
                .tempfile()
                .context("Failed to create values file")?;
            serde_json::to_writer(&mut values_file, values)
                .context("Failed to write values file")?;
            values_file.flush().context("Failed to flush values file")?;

            debug!("Running helm template on {}", self.chart_path.display());

            let output = tokio::process::Command::new(&self.helm_binary)
                .arg("template")
                .arg(&self.chart_path)
                .arg("--namespace")
                .arg(namespace)
                .arg("--values")
                .arg(values_file.path())
                .output()
                .await
                .context("Failed to execute helm template")?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                error!("helm template failed: {}", stderr);
                return Err(anyhow::anyhow!("helm template failed: {}", stderr.trim()));
            }

            let manifests = String::from_utf8(output.stdout)
                .context("Failed to decode helm output as UTF-8")?;
            let objects = parse_manifests(&manifests, namespace)?;

            info!(
                "Rendered {} objects in {}ms",
                objects.len(),
                start.elapsed().as_millis()
            );
            Ok(objects)
        }
        .instrument(span)
        .await
    }
}

/// Parse a multi-document YAML stream into objects placed in `namespace`.
///
/// Empty documents and documents without a kind (comments only, notes) are skipped.
pub fn parse_manifests(manifests: &str, namespace: &str) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(manifests).enumerate() {
        let value = serde_yaml::Value::deserialize(document)
            .with_context(|| format!("Rendered document {index} is not valid YAML"))?;

        let has_kind = value
            .get("kind")
            .and_then(serde_yaml::Value::as_str)
            .is_some_and(|k| !k.is_empty());
        if !has_kind {
            debug!("Skipping rendered document {} without a kind", index);
            continue;
        }

        let mut object: DynamicObject = serde_yaml::from_value(value)
            .with_context(|| format!("Rendered document {index} is not a Kubernetes object"))?;
        object.metadata.namespace = Some(namespace.to_string());
        objects.push(object);
    }

    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFESTS: &str = r#"---
# Source: taskcluster/templates/taskcluster-queue-deployment.yaml
apiVersion: apps/v1
kind: Deployment
metadata:
  name: taskcluster-queue-web
  labels:
    app.kubernetes.io/name: taskcluster-queue
spec:
  replicas: 1
---
---
# Source: taskcluster/templates/NOTES.txt
---
apiVersion: v1
kind: Secret
metadata:
  name: taskcluster-queue
  namespace: somewhere-else
data:
  ACCESS_TOKEN: VEM=
"#;

    #[test]
    fn test_parse_manifests_skips_empty_documents() {
        let objects = parse_manifests(MANIFESTS, "taskcluster").unwrap();
        assert_eq!(objects.len(), 2);

        let kinds: Vec<_> = objects
            .iter()
            .map(|o| o.types.as_ref().unwrap().kind.as_str())
            .collect();
        assert_eq!(kinds, vec!["Deployment", "Secret"]);
    }

    #[test]
    fn test_parse_manifests_sets_namespace() {
        let objects = parse_manifests(MANIFESTS, "taskcluster").unwrap();
        assert!(objects
            .iter()
            .all(|o| o.metadata.namespace.as_deref() == Some("taskcluster")));
    }

    #[test]
    fn test_parse_manifests_keeps_body() {
        let objects = parse_manifests(MANIFESTS, "taskcluster").unwrap();
        assert_eq!(objects[0].data["spec"]["replicas"], 1);
        assert_eq!(
            objects[0].metadata.name.as_deref(),
            Some("taskcluster-queue-web")
        );
    }

    #[test]
    fn test_parse_manifests_rejects_invalid_yaml() {
        assert!(parse_manifests("kind: [unclosed", "ns").is_err());
    }

    #[tokio::test]
    async fn test_helm_renderer_reports_missing_binary() {
        let renderer =
            HelmRenderer::new("/nonexistent/chart").with_binary("/nonexistent/helm-binary");
        let result = renderer.render(&serde_json::json!({}), "taskcluster").await;
        assert!(result.is_err());
    }
}
