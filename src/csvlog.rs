use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Local, NaiveDate};

use crate::record::{InverterRecord, FIELD_NAMES};

/// Destination for decoded records.
pub trait RecordSink {
    fn append(&mut self, record: &InverterRecord, at: DateTime<Local>) -> anyhow::Result<()>;
}

/// One CSV file per calendar day under a fixed directory.
pub struct DailyCsvLog {
    dir: PathBuf,
}

impl DailyCsvLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DailyCsvLog { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.csv", date.format("%Y-%m-%d")))
    }
}

pub fn header() -> Vec<&'static str> {
    std::iter::once("Time").chain(FIELD_NAMES).collect()
}

pub fn row(record: &InverterRecord, at: DateTime<Local>) -> Vec<String> {
    std::iter::once(at.format("%H:%M:%S").to_string())
        .chain(record.fields())
        .collect()
}

impl RecordSink for DailyCsvLog {
    fn append(&mut self, record: &InverterRecord, at: DateTime<Local>) -> anyhow::Result<()> {
        let path = self.path_for(at.date_naive());
        let fresh = !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if fresh {
            log::info!("Starting new log file {}", path.display());
            writer.write_record(header())?;
        }
        let line = row(record, at);
        log::debug!("[{}] Log entry: {}", record.address, line.join(","));
        writer.write_record(&line)?;
        writer.flush().context("Failed to flush log file")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{BusAddress, RawResponse};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn record(line: &str) -> InverterRecord {
        InverterRecord::parse(&RawResponse::from(line), BusAddress::new(1).unwrap()).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 21, h, m, s).unwrap()
    }

    #[test]
    fn header_lists_every_column() {
        assert_eq!(
            header().join(","),
            "Time,Address,Status,UpvV,IpvA,PpvW,UnV,InA,PnW,TdeviceC,EdailyWh,Checksum,DeviceType,EtotalKwh"
        );
    }

    #[test]
    fn row_splits_back_into_timestamp_and_fields() {
        let rec = record("*010 0 23.4 1.2 28 230 0.12 27 35 120 A 1 5.3");
        let line = row(&rec, at(9, 5, 7)).join(",");
        let fields: Vec<&str> = line.split(',').collect();
        assert_eq!(fields.len(), 14);
        assert_eq!(fields[0], "09:05:07");
        assert_eq!(fields[1..].join(","), rec.fields().join(","));
    }

    #[test]
    fn file_is_named_after_the_date() {
        let log = DailyCsvLog::new("/var/log/kaco");
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(log.path_for(date), PathBuf::from("/var/log/kaco/2024-01-02.csv"));
    }

    #[test]
    fn header_written_once_per_file() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut log = DailyCsvLog::new(dir.path());
        let rec = record("*010 0 23.4 1.2 28 230 0.12 27 35 120 A 1 5.3");

        log.append(&rec, at(10, 0, 0))?;
        log.append(&rec, at(10, 0, 9))?;

        let contents = std::fs::read_to_string(dir.path().join("2024-06-21.csv"))?;
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], header().join(","));
        assert_eq!(lines[1], "10:00:00,01,0_start,23.4,1.2,28,230,0.12,27,35,120,65,1,5.3");
        assert_eq!(lines[2], "10:00:09,01,0_start,23.4,1.2,28,230,0.12,27,35,120,65,1,5.3");
        Ok(())
    }

    #[test]
    fn short_frame_keeps_column_count() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut log = DailyCsvLog::new(dir.path());
        log.append(&record("*010 4 23.4 1.2 28 230 0.12 27 35 120 A 1"), at(12, 30, 0))?;

        let contents = std::fs::read_to_string(log.path_for(at(0, 0, 0).date_naive()))?;
        let last = contents.lines().last().unwrap_or_default();
        assert_eq!(last, "12:30:00,01,4_mpp-track,23.4,1.2,28,230,0.12,27,35,120,65,1,");
        assert_eq!(last.split(',').count(), 14);
        Ok(())
    }

    #[test]
    fn missing_directory_is_an_error() {
        let mut log = DailyCsvLog::new("/nonexistent/kaco/logs");
        let rec = record("*010 0 23.4 1.2 28 230 0.12 27 35 120 A 1 5.3");
        assert!(log.append(&rec, at(8, 0, 0)).is_err());
    }
}
