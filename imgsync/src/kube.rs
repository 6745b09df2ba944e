//! Container image discovery in Kubernetes resource files.
//!
//! Walks a directory for `.yaml`/`.yml` files, splits each into resource
//! documents, and collects the images of every container and init container.
//! Container arguments are scanned too, since operators commonly receive
//! sidecar images as flags (`--config-reloader-image=...`).
//!
//! Documents that are not pod-bearing resources are skipped silently.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use imgsync_oci::Reference;
use regex::Regex;
use serde::Deserialize;
use serde_yaml::Value;
use walkdir::WalkDir;

use crate::Result;

/// Arguments containing any of these are never images.
const ARG_EXCLUDES: [&str; 10] = [
    "$", "http://", "https://", ":trace", ":debug", ":info", ":warn", ":error", ":critical",
    ":off",
];

/// `address:port` style arguments (`0.0.0.0:6443`).
#[allow(clippy::expect_used)]
static HOST_PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.\d+:\d").expect("valid host:port pattern"));

#[derive(Debug, Default, Deserialize)]
struct Resource {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    spec: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodSpec {
    #[serde(default)]
    containers: Vec<Container>,
    #[serde(default)]
    init_containers: Vec<Container>,
}

/// Prometheus-operator `Prometheus` / `Alertmanager` spec.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MonitoringSpec {
    #[serde(default)]
    base_image: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    image: String,
    #[serde(flatten)]
    pod: PodSpec,
}

#[derive(Debug, Default, Deserialize)]
struct Container {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    args: Vec<Value>,
}

/// Scans `root` recursively and returns the deduplicated image references,
/// in discovery order.
pub fn scan(root: &Path) -> Result<Vec<String>> {
    let mut images = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() || !is_yaml(entry.path()) {
            continue;
        }
        let content = std::fs::read_to_string(entry.path())?;
        let found = images_in_file(&content);
        tracing::debug!(
            path = %entry.path().display(),
            images = found.len(),
            "scanned resource file"
        );
        images.extend(found);
    }
    Ok(dedupe(images))
}

/// Extracts images from every resource document in a file's content.
pub fn images_in_file(content: &str) -> Vec<String> {
    split_documents(content)
        .into_iter()
        .filter_map(|doc| serde_yaml::from_str::<Resource>(doc).ok())
        .flat_map(|r| images_in_resource(&r))
        .collect()
}

/// Splits multi-document YAML on `---` separator lines.
fn split_documents(content: &str) -> Vec<&str> {
    let separator = if content.contains("\r\n") {
        "\r\n---\r\n"
    } else {
        "\n---\n"
    };
    content.split(separator).collect()
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
}

fn images_in_resource(resource: &Resource) -> Vec<String> {
    let spec = &resource.spec;
    match resource.kind.as_str() {
        "" => Vec::new(),
        "Prometheus" | "Alertmanager" => {
            let Ok(m) = serde_yaml::from_value::<MonitoringSpec>(spec.clone()) else {
                return Vec::new();
            };
            let main = if !m.base_image.is_empty() && !m.version.is_empty() {
                format!("{}:{}", m.base_image, m.version)
            } else if !m.base_image.is_empty() {
                m.base_image.clone()
            } else {
                m.image.clone()
            };
            let mut images: Vec<String> =
                Some(main).filter(|i| !i.is_empty()).into_iter().collect();
            images.extend(images_in_pod(&m.pod));
            images
        }
        "Pod" => pod_at(Some(spec)),
        "CronJob" => pod_at(
            spec.get("jobTemplate")
                .and_then(|j| j.get("spec"))
                .and_then(|j| j.get("template"))
                .and_then(|t| t.get("spec")),
        ),
        _ => pod_at(spec.get("template").and_then(|t| t.get("spec"))),
    }
}

fn pod_at(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| serde_yaml::from_value::<PodSpec>(v.clone()).ok())
        .map(|pod| images_in_pod(&pod))
        .unwrap_or_default()
}

fn images_in_pod(pod: &PodSpec) -> Vec<String> {
    pod.containers
        .iter()
        .chain(&pod.init_containers)
        .flat_map(|c| {
            c.image
                .iter()
                .filter(|i| !i.is_empty())
                .cloned()
                .chain(c.args.iter().filter_map(Value::as_str).filter_map(image_in_arg))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Returns the image named by a container argument, if it names one.
fn image_in_arg(arg: &str) -> Option<String> {
    let candidate = arg.split_once('=').map_or(arg, |(_, value)| value);
    if !candidate.contains(':') || arg == "=:" {
        return None;
    }
    if ARG_EXCLUDES.iter().any(|x| candidate.contains(x)) || HOST_PORT.is_match(candidate) {
        return None;
    }
    let reference = Reference::parse(candidate);
    if reference.repository().is_empty() || reference.repository().contains(':') {
        return None;
    }
    Some(candidate.to_owned())
}

/// Removes case-insensitive duplicates, keeping the first occurrence.
fn dedupe(images: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    images
        .into_iter()
        .filter(|i| seen.insert(i.to_lowercase()))
        .collect()
}
