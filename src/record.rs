//! Experiment records and the sinks that persist them

use crate::error::{Error, Result};
use crate::experiment::SamplePhase;
use crate::mpu6050::SensorSample;
use chrono::{DateTime, Local};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local ISO-8601 with microseconds, no offset
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// CSV columns in output order
pub const CSV_COLUMNS: [&str; 9] = [
    "timestamp",
    "motor_state",
    "acc_x",
    "acc_y",
    "acc_z",
    "gyro_x",
    "gyro_y",
    "gyro_z",
    "temp",
];

/// One persisted tick
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentRecord {
    /// Wall-clock capture time
    pub timestamp: DateTime<Local>,
    /// Monotonic time since the run started
    pub elapsed: Duration,
    pub phase: SamplePhase,
    /// Position of `phase` in the plan
    pub phase_index: usize,
    /// Actuator state, `None` when the run has no actuator
    pub motor_state: Option<bool>,
    pub sample: SensorSample,
}

/// What a sink is told before the first record
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    /// Whether records carry an actuator state
    pub motor_state: bool,
    pub sample_rate_hz: f64,
    /// Phase names in plan order
    pub phases: Vec<String>,
}

impl Schema {
    /// Column names for this schema
    pub fn columns(&self) -> Vec<&'static str> {
        CSV_COLUMNS
            .iter()
            .copied()
            .filter(|c| self.motor_state || *c != "motor_state")
            .collect()
    }
}

/// Ordered, append-only destination for records
pub trait RecordSink {
    /// Declare the schema; called exactly once before the first `write`
    fn begin(&mut self, schema: &Schema) -> Result<()>;

    /// Append one record
    fn write(&mut self, record: &ExperimentRecord) -> Result<()>;

    /// Flush everything written so far and release the destination
    ///
    /// Idempotent.
    fn close(&mut self) -> Result<()>;
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn begin(&mut self, schema: &Schema) -> Result<()> {
        (**self).begin(schema)
    }

    fn write(&mut self, record: &ExperimentRecord) -> Result<()> {
        (**self).write(record)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Output name `<prefix>_<YYYYmmdd_HHMMSS>.csv`
pub fn output_filename(prefix: &str, now: DateTime<Local>) -> PathBuf {
    PathBuf::from(format!("{}_{}.csv", prefix, now.format("%Y%m%d_%H%M%S")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkState {
    Created,
    Open,
    Closed,
}

/// Comma-separated output with a header row
pub struct CsvRecordSink<W: Write> {
    out: BufWriter<W>,
    motor_state: bool,
    state: SinkState,
    rows: u64,
}

impl CsvRecordSink<File> {
    /// Create (or truncate) a CSV file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .map_err(|e| Error::Sink(format!("Failed to create {}: {}", path.display(), e)))?;
        Ok(Self::new(file))
    }
}

impl<W: Write> CsvRecordSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            out: BufWriter::new(writer),
            motor_state: false,
            state: SinkState::Created,
            rows: 0,
        }
    }

    /// Data rows written so far
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flush and return the underlying writer
    pub fn into_inner(self) -> Result<W> {
        self.out
            .into_inner()
            .map_err(|e| Error::Sink(format!("Failed to flush CSV output: {}", e.error())))
    }
}

impl<W: Write> RecordSink for CsvRecordSink<W> {
    fn begin(&mut self, schema: &Schema) -> Result<()> {
        if self.state != SinkState::Created {
            return Err(Error::Sink("CSV header already written".to_string()));
        }
        self.motor_state = schema.motor_state;
        writeln!(self.out, "{}", schema.columns().join(","))?;
        self.state = SinkState::Open;
        Ok(())
    }

    fn write(&mut self, record: &ExperimentRecord) -> Result<()> {
        match self.state {
            SinkState::Created => return Err(Error::Sink("CSV header not written".to_string())),
            SinkState::Closed => return Err(Error::Sink("CSV sink is closed".to_string())),
            SinkState::Open => {}
        }

        write!(self.out, "{}", record.timestamp.format(TIMESTAMP_FORMAT))?;
        if self.motor_state {
            match record.motor_state {
                Some(on) => write!(self.out, ",{}", on as u8)?,
                None => write!(self.out, ",")?,
            }
        }
        // `{:?}` keeps a fractional part on whole values (1.0, not 1)
        let s = &record.sample;
        writeln!(
            self.out,
            ",{:?},{:?},{:?},{:?},{:?},{:?},{:?}",
            s.acc_x, s.acc_y, s.acc_z, s.gyro_x, s.gyro_y, s.gyro_z, s.temp
        )?;

        self.rows += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.state == SinkState::Closed {
            return Ok(());
        }
        self.state = SinkState::Closed;
        self.out.flush()?;
        Ok(())
    }
}

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub schema: Option<Schema>,
    pub records: Vec<ExperimentRecord>,
    pub closed: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordSink for MemorySink {
    fn begin(&mut self, schema: &Schema) -> Result<()> {
        if self.schema.is_some() {
            return Err(Error::Sink("schema already declared".to_string()));
        }
        self.schema = Some(schema.clone());
        Ok(())
    }

    fn write(&mut self, record: &ExperimentRecord) -> Result<()> {
        if self.schema.is_none() {
            return Err(Error::Sink("schema not declared".to_string()));
        }
        if self.closed {
            return Err(Error::Sink("sink is closed".to_string()));
        }
        self.records.push(record.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(motor_state: Option<bool>) -> ExperimentRecord {
        let timestamp = Local.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()
            + chrono::Duration::microseconds(12);
        ExperimentRecord {
            timestamp,
            elapsed: Duration::from_millis(10),
            phase: SamplePhase::ActuatorOn,
            phase_index: 1,
            motor_state,
            sample: SensorSample {
                acc_x: 1.0,
                acc_y: -0.5,
                acc_z: 0.25,
                gyro_x: 2.0,
                gyro_y: 0.0,
                gyro_z: -1.5,
                temp: 36.53,
            },
        }
    }

    fn schema(motor_state: bool) -> Schema {
        Schema {
            motor_state,
            sample_rate_hz: 100.0,
            phases: vec!["baseline".to_string()],
        }
    }

    #[test]
    fn test_csv_with_motor_state() {
        let mut sink = CsvRecordSink::new(Vec::new());
        sink.begin(&schema(true)).unwrap();
        sink.write(&record(Some(true))).unwrap();
        sink.write(&record(Some(false))).unwrap();
        sink.close().unwrap();
        assert_eq!(sink.rows(), 2);

        let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "timestamp,motor_state,acc_x,acc_y,acc_z,gyro_x,gyro_y,gyro_z,temp"
        );
        assert_eq!(lines[1], "2024-05-06T07:08:09.000012,1,1.0,-0.5,0.25,2.0,0.0,-1.5,36.53");
        assert!(lines[2].starts_with("2024-05-06T07:08:09.000012,0,"));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_csv_without_motor_state() {
        let mut sink = CsvRecordSink::new(Vec::new());
        sink.begin(&schema(false)).unwrap();
        sink.write(&record(None)).unwrap();
        sink.close().unwrap();

        let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "timestamp,acc_x,acc_y,acc_z,gyro_x,gyro_y,gyro_z,temp");
        assert_eq!(lines[1].split(',').count(), 8);
    }

    #[test]
    fn test_csv_whole_values_keep_fraction() {
        let mut sink = CsvRecordSink::new(Vec::new());
        sink.begin(&schema(false)).unwrap();
        let mut rec = record(None);
        rec.sample = SensorSample {
            acc_z: 1.0,
            temp: 25.0,
            ..SensorSample::default()
        };
        sink.write(&rec).unwrap();

        let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let row = text.lines().nth(1).unwrap();
        assert!(row.ends_with(",0.0,0.0,1.0,0.0,0.0,0.0,25.0"), "{}", row);
        for field in row.split(',').skip(1) {
            assert!(field.parse::<f64>().is_ok() && field.contains('.'), "{}", field);
        }
    }

    #[test]
    fn test_csv_missing_state_is_empty_field() {
        let mut sink = CsvRecordSink::new(Vec::new());
        sink.begin(&schema(true)).unwrap();
        sink.write(&record(None)).unwrap();

        let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let row = text.lines().nth(1).unwrap();
        assert_eq!(row.split(',').nth(1), Some(""));
        assert_eq!(row.split(',').count(), 9);
    }

    #[test]
    fn test_csv_order_of_operations() {
        let mut sink = CsvRecordSink::new(Vec::new());
        assert!(sink.write(&record(None)).is_err());
        sink.begin(&schema(false)).unwrap();
        assert!(sink.begin(&schema(false)).is_err());
        sink.close().unwrap();
        sink.close().unwrap();
        assert!(matches!(sink.write(&record(None)), Err(Error::Sink(_))));
    }

    #[test]
    fn test_output_filename() {
        let now = Local.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            output_filename("motor_data", now),
            PathBuf::from("motor_data_20250102_030405.csv")
        );
    }
}
