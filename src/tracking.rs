/// Publishing plots to an experiment tracker.
///
/// The evaluation only needs to hand over a set of named image files, so the tracker is a
/// small trait. `JsonlTracker` writes one JSON object per call to a file that wandb's
/// offline sync (or any other tool) can import later.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;
use serde::Serialize;
use uuid::Uuid;

/// An image file to publish under some key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedImage
{
    pub path: PathBuf,
    pub caption: Option<String>,
}

impl TrackedImage
{
    pub fn new(path: impl Into<PathBuf>) -> Self
    {
        TrackedImage { path: path.into(), caption: None }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self
    {
        self.caption = Some(caption.into());
        self
    }
}

pub trait TrackingSink
{
    fn log(&mut self, images: &BTreeMap<String, TrackedImage>) -> anyhow::Result<()>;
}

/// A sink that drops everything, for runs that never publish.
#[derive(Debug, Default)]
pub struct NoopTracker;

impl TrackingSink for NoopTracker
{
    fn log(&mut self, _images: &BTreeMap<String, TrackedImage>) -> anyhow::Result<()>
    {
        Ok(())
    }
}

/// Appends tracked images to a JSONL file, one line per `log()` call:
///
/// ```json
/// {"run_id":"…","step":0,"timestamp":"2024-12-31T12:00:00+00:00","teacher_tsne":{"_type":"image-file","path":"out/TSNE_teacher/epoch_0.png","caption":null}}
/// ```
pub struct JsonlTracker
{
    writer: BufWriter<File>,
    path: PathBuf,
    run_id: Uuid,
    step: u64,
}

impl JsonlTracker
{
    /// Opens `path` for appending, creating it and its parent directory if needed.
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self>
    {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        Ok(JsonlTracker {
            writer: BufWriter::new(file),
            path,
            run_id: Uuid::new_v4(),
            step: 0,
        })
    }

    pub fn path(&self) -> &Path
    {
        &self.path
    }

    pub fn run_id(&self) -> Uuid
    {
        self.run_id
    }
}

impl TrackingSink for JsonlTracker
{
    fn log(&mut self, images: &BTreeMap<String, TrackedImage>) -> anyhow::Result<()>
    {
        let mut entry = serde_json::json!({
            "run_id": self.run_id.to_string(),
            "step": self.step,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        for (key, image) in images {
            entry[key.as_str()] = serde_json::json!({
                "_type": "image-file",
                "path": image.path.display().to_string(),
                "caption": image.caption,
            });
        }

        writeln!(self.writer, "{}", serde_json::to_string(&entry)?)?;
        self.writer.flush()?;
        debug!("Logged {} images to {:?} at step {}", images.len(), self.path, self.step);

        self.step += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_jsonl_tracker_writes_one_line_per_log()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs").join("metrics.jsonl");
        let mut tracker = JsonlTracker::new(&path).unwrap();

        let mut images = BTreeMap::new();
        images.insert("teacher_tsne".to_string(), TrackedImage::new("out/TSNE_teacher/epoch_0.png"));
        images.insert("student_tsne".to_string(), TrackedImage::new("out/TSNE_student/epoch_0.png").with_caption("student"));
        tracker.log(&images).unwrap();
        tracker.log(&images).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["step"], 0);
        assert_eq!(lines[1]["step"], 1);
        assert_eq!(lines[0]["run_id"], tracker.run_id().to_string());
        assert_eq!(lines[0]["teacher_tsne"]["_type"], "image-file");
        assert_eq!(lines[0]["teacher_tsne"]["path"], "out/TSNE_teacher/epoch_0.png");
        assert_eq!(lines[0]["student_tsne"]["caption"], "student");
        assert!(lines[0]["teacher_tsne"]["caption"].is_null());
    }

    #[test]
    fn test_jsonl_tracker_appends_to_existing_file()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        std::fs::write(&path, "{\"previous\":true}\n").unwrap();

        let mut tracker = JsonlTracker::new(&path).unwrap();
        tracker.log(&BTreeMap::new()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.starts_with("{\"previous\":true}"));
    }
}
