//! CSV output for normalized records.
//!
//! Rows are written to a hidden sibling file and renamed over the target
//! only once [`CsvSink::finish`] succeeds, so an aborted run never leaves a
//! half-written rotation file behind.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use portcall_shared::{NormalizedRecord, PortcallError, RECORD_HEADER, Result};

/// Streaming CSV writer with atomic commit.
pub struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<BufWriter<File>>,
    rows: usize,
    staged: StagedFile,
}

/// Removes the temporary file unless it was committed.
struct StagedFile {
    path: PathBuf,
    committed: bool,
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn output_error(path: &Path, e: impl std::fmt::Display) -> PortcallError {
    PortcallError::Output(format!("{}: {e}", path.display()))
}

/// Sibling path `.<name>.tmp` in the same directory as `path`.
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output.csv".into());
    path.with_file_name(format!(".{name}.tmp"))
}

impl CsvSink {
    /// Open the sink and write the header row.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PortcallError::io(parent, e))?;
        }

        let tmp_path = temp_path_for(&path);
        let file = File::create(&tmp_path).map_err(|e| PortcallError::io(&tmp_path, e))?;
        let staged = StagedFile {
            path: tmp_path,
            committed: false,
        };

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::new(file));
        writer
            .write_record(RECORD_HEADER)
            .map_err(|e| output_error(&staged.path, e))?;

        debug!(path = %staged.path.display(), "opened rotation sink");
        Ok(Self {
            path,
            writer,
            rows: 0,
            staged,
        })
    }

    /// Append one row.
    pub fn write(&mut self, record: &NormalizedRecord) -> Result<()> {
        self.writer
            .serialize(record)
            .map_err(|e| output_error(&self.staged.path, e))?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flush, close and move the file into place. Returns the number of rows written.
    pub fn finish(self) -> Result<usize> {
        let Self {
            path,
            writer,
            rows,
            mut staged,
        } = self;

        let file = writer
            .into_inner()
            .map_err(|e| output_error(&staged.path, e))?
            .into_inner()
            .map_err(|e| output_error(&staged.path, e))?;
        file.sync_all()
            .map_err(|e| PortcallError::io(&staged.path, e))?;
        drop(file);

        std::fs::rename(&staged.path, &path).map_err(|e| PortcallError::io(&path, e))?;
        staged.committed = true;

        info!(path = %path.display(), rows, "rotation file written");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portcall_shared::{Direction, LocationType, TimeValue, related_id};

    fn record(port: &str, order: u32) -> NormalizedRecord {
        NormalizedRecord {
            change_mode: None,
            alliance_id: None,
            alliance_pool_id: None,
            trade_id: None,
            service_provider_service_id: "CEXCOSU".into(),
            carrier_id: "COSU".into(),
            service_id: "CEX [W]".into(),
            service: "CEX".into(),
            direction: Direction::Westbound,
            frequency: "WEEKLY".into(),
            start_day: "FRI".into(),
            port_code: port.into(),
            order,
            tt: TimeValue::Text("0600".into()),
            location_type: LocationType::Discharge,
            related_id: related_id("COSU", "CEX", Direction::Westbound),
        }
    }

    #[test]
    fn header_only_when_no_records() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rotation.csv");

        let rows = CsvSink::create(&path).unwrap().finish().unwrap();
        assert_eq!(rows, 0);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, format!("{}\n", RECORD_HEADER.join(",")));
    }

    #[test]
    fn rows_follow_single_header() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("rotation.csv");

        let mut sink = CsvSink::create(&path).unwrap();
        sink.write(&record("SHANGHAI", 1)).unwrap();
        sink.write(&record("ROTTERDAM", 3)).unwrap();
        assert_eq!(sink.rows(), 2);
        assert_eq!(sink.finish().unwrap(), 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], RECORD_HEADER.join(","));
        assert!(lines[1].contains(",SHANGHAI,1,0600,D,"));
        assert!(lines[2].contains(",ROTTERDAM,3,"));
        assert!(!dir.path().join("nested").join(".rotation.csv.tmp").exists());
    }

    #[test]
    fn abandoned_sink_keeps_previous_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rotation.csv");
        std::fs::write(&path, "previous run\n").unwrap();

        {
            let mut sink = CsvSink::create(&path).unwrap();
            sink.write(&record("SHANGHAI", 1)).unwrap();
            // dropped without finish()
        }

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "previous run\n");
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn finish_overwrites_existing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rotation.csv");
        std::fs::write(&path, "stale\n").unwrap();

        let mut sink = CsvSink::create(&path).unwrap();
        sink.write(&record("BUSAN", 0)).unwrap();
        sink.finish().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("stale"));
        assert!(content.contains("BUSAN"));
    }
}
