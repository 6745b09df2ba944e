//! Container engine transfer status lines and their human rendering.
//!
//! The engine reports pull and push progress as a stream of JSON objects:
//! `{"id": ..., "status": ..., "progressDetail": {"current": .., "total": ..}, "error": ..}`.

use bollard::models::{CreateImageInfo, ProgressDetail, PushImageInfo};
use serde::Deserialize;

/// Events with byte progress are reported once per this many events.
pub const PROGRESS_STRIDE: usize = 25;

/// Byte counters for a layer transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[non_exhaustive]
pub struct Detail {
    /// Bytes transferred so far.
    #[serde(default)]
    pub current: i64,
    /// Total bytes for the layer.
    #[serde(default)]
    pub total: i64,
}

/// One status event from a pull or push stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct StatusLine {
    /// Layer or trace identifier.
    #[serde(default)]
    pub id: String,
    /// Free-form status text.
    #[serde(default)]
    pub status: String,
    /// Byte progress, when the event carries it.
    #[serde(default)]
    pub progress_detail: Detail,
    /// Error reported inside the stream.
    #[serde(default)]
    pub error: String,
}

impl StatusLine {
    /// Returns `true` if the event carries byte progress.
    pub fn has_progress(&self) -> bool {
        self.progress_detail.total > 0
    }

    /// Human-readable description of the event.
    pub fn describe(&self) -> String {
        let status = self.status.as_str();
        if status.contains("Pulling from") || status.contains("The push refers to repository") {
            "Started".to_owned()
        } else if status.contains("Pulling fs") || status.contains("Layer already exists") {
            format!("Processing layer (trace ID {})", self.id)
        } else if status.contains("Preparing") {
            "Preparing".to_owned()
        } else if status.contains("Verifying") {
            "Verifying Checksum".to_owned()
        } else if self.has_progress() {
            format!(
                "Processing {}B of {}B",
                self.progress_detail.current, self.progress_detail.total
            )
        } else {
            "Processing".to_owned()
        }
    }
}

fn detail(d: Option<ProgressDetail>) -> Detail {
    d.map_or_else(Detail::default, |d| Detail {
        current: d.current.unwrap_or_default(),
        total: d.total.unwrap_or_default(),
    })
}

impl From<CreateImageInfo> for StatusLine {
    fn from(info: CreateImageInfo) -> Self {
        Self {
            id: info.id.unwrap_or_default(),
            status: info.status.unwrap_or_default(),
            progress_detail: detail(info.progress_detail),
            error: info.error.unwrap_or_default(),
        }
    }
}

impl From<PushImageInfo> for StatusLine {
    fn from(info: PushImageInfo) -> Self {
        Self {
            id: String::new(),
            status: info.status.unwrap_or_default(),
            progress_detail: detail(info.progress_detail),
            error: info.error.unwrap_or_default(),
        }
    }
}

/// Samples a status stream into a bounded number of progress messages.
#[derive(Debug, Clone)]
pub struct Progress {
    stride: usize,
    counted: usize,
}

impl Progress {
    /// Creates a sampler that reports every `stride`-th byte-progress event.
    pub fn new(stride: usize) -> Self {
        Self {
            stride: stride.max(1),
            counted: 0,
        }
    }

    /// Returns the message to emit for `line`, if any.
    ///
    /// Byte-progress events are sampled; all other events are reported.
    pub fn observe(&mut self, line: &StatusLine) -> Option<String> {
        if line.has_progress() && !is_milestone(&line.status) {
            self.counted += 1;
            if self.counted % self.stride != 0 {
                return None;
            }
        }
        Some(line.describe())
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new(PROGRESS_STRIDE)
    }
}

/// Status texts that are always reported even when they carry byte counts.
const MILESTONES: [&str; 6] = [
    "Pulling from",
    "The push refers to repository",
    "Pulling fs",
    "Layer already exists",
    "Preparing",
    "Verifying",
];

fn is_milestone(status: &str) -> bool {
    MILESTONES.iter().any(|m| status.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(status: &str, current: i64, total: i64) -> StatusLine {
        StatusLine {
            id: "abc123".into(),
            status: status.into(),
            progress_detail: Detail { current, total },
            error: String::new(),
        }
    }

    #[test]
    fn describe_known_statuses() {
        assert_eq!(line("Pulling from library/busybox", 0, 0).describe(), "Started");
        assert_eq!(
            line("The push refers to repository [t.com/app]", 0, 0).describe(),
            "Started"
        );
        assert_eq!(
            line("Pulling fs layer", 0, 0).describe(),
            "Processing layer (trace ID abc123)"
        );
        assert_eq!(
            line("Layer already exists", 0, 0).describe(),
            "Processing layer (trace ID abc123)"
        );
        assert_eq!(line("Preparing", 0, 0).describe(), "Preparing");
        assert_eq!(line("Verifying Checksum", 0, 0).describe(), "Verifying Checksum");
        assert_eq!(line("Downloading", 10, 100).describe(), "Processing 10B of 100B");
        assert_eq!(line("Download complete", 0, 0).describe(), "Processing");
    }

    #[test]
    fn decode_wire_line() {
        let l: StatusLine = serde_json::from_str(
            r#"{"id":"f1","status":"Downloading","progressDetail":{"current":5,"total":9}}"#,
        )
        .unwrap();
        assert_eq!(l.id, "f1");
        assert_eq!(l.progress_detail, Detail { current: 5, total: 9 });
        assert!(l.error.is_empty());
    }

    #[test]
    fn samples_every_stride() {
        let mut p = Progress::new(25);
        let emitted = (1..=100)
            .filter_map(|i| p.observe(&line("Downloading", i, 100)))
            .collect::<Vec<_>>();
        assert_eq!(
            emitted,
            [
                "Processing 25B of 100B",
                "Processing 50B of 100B",
                "Processing 75B of 100B",
                "Processing 100B of 100B"
            ]
        );
    }

    #[test]
    fn milestones_are_never_sampled_away() {
        let mut p = Progress::new(25);
        assert_eq!(p.observe(&line("Preparing", 0, 0)).as_deref(), Some("Preparing"));
        assert_eq!(p.observe(&line("Downloading", 1, 10)), None);
    }
}
