//! HDF5 storage for experiment records
//!
//! Layout:
//! - `/metadata` attributes: `start_time`, `sample_rate_hz`, `phases`, `version`
//! - `/records` datasets, one per column: `timestamp` (Unix seconds),
//!   `elapsed` (seconds since run start), `phase_index`, `motor_state`
//!   (1/0, -1 when absent) and the seven sensor channels

use crate::error::{Error, Result};
use crate::record::{ExperimentRecord, RecordSink, Schema};
use hdf5::types::VarLenUnicode;
use hdf5::{Dataset, File, Group, H5Type};
use std::path::Path;

const FORMAT_VERSION: &str = "1.0";
const CHUNK_SIZE: usize = 1024;
const BATCH_SIZE: usize = 100;

fn sink_err(what: &str) -> impl FnOnce(hdf5::Error) -> Error + '_ {
    move |e| Error::Sink(format!("Failed to {}: {}", what, e))
}

struct DatasetHandles {
    timestamp: Dataset,
    elapsed: Dataset,
    phase_index: Dataset,
    motor_state: Dataset,
    acc_x: Dataset,
    acc_y: Dataset,
    acc_z: Dataset,
    gyro_x: Dataset,
    gyro_y: Dataset,
    gyro_z: Dataset,
    temp: Dataset,
}

/// Record sink writing chunked, compressed HDF5 datasets
///
/// Records are buffered and appended in batches; `close` writes the remainder
/// and flushes the file.
pub struct Hdf5RecordSink {
    file: File,
    datasets: Option<DatasetHandles>,
    buffer: Vec<ExperimentRecord>,
    written: usize,
    closed: bool,
}

impl Hdf5RecordSink {
    /// Create (or truncate) an HDF5 file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path).map_err(sink_err("create HDF5 file"))?;
        Ok(Self {
            file,
            datasets: None,
            buffer: Vec::with_capacity(BATCH_SIZE),
            written: 0,
            closed: false,
        })
    }

    /// Records persisted to the file so far
    pub fn written(&self) -> usize {
        self.written
    }

    fn write_str_attr(group: &Group, name: &str, value: &str) -> Result<()> {
        let value: VarLenUnicode = value
            .parse()
            .map_err(|e| Error::Sink(format!("Invalid attribute {}: {}", name, e)))?;
        group
            .new_attr::<VarLenUnicode>()
            .create(name)
            .and_then(|attr| attr.write_scalar(&value))
            .map_err(sink_err("write string attribute"))
    }

    fn create_dataset<T: H5Type>(group: &Group, name: &str) -> Result<Dataset> {
        group
            .new_dataset::<T>()
            .shape((0..,))
            .chunk((CHUNK_SIZE,))
            .deflate(4)
            .create(name)
            .map_err(sink_err("create dataset"))
    }

    fn append<T: H5Type>(dataset: &Dataset, new_size: usize, data: &[T]) -> Result<()> {
        dataset.resize((new_size,)).map_err(sink_err("resize dataset"))?;
        dataset
            .write_slice(data, (new_size - data.len())..)
            .map_err(sink_err("write dataset"))
    }

    fn flush_buffer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let ds = self
            .datasets
            .as_ref()
            .ok_or_else(|| Error::Sink("HDF5 schema not declared".to_string()))?;
        let batch = &self.buffer;
        let new_size = self.written + batch.len();

        let column = |f: fn(&ExperimentRecord) -> f64| batch.iter().map(f).collect::<Vec<f64>>();

        let timestamp = column(|r| r.timestamp.timestamp_micros() as f64 / 1e6);
        let elapsed = column(|r| r.elapsed.as_secs_f64());
        let phase_index: Vec<u32> = batch.iter().map(|r| r.phase_index as u32).collect();
        let motor_state: Vec<i8> = batch
            .iter()
            .map(|r| r.motor_state.map_or(-1, |on| on as i8))
            .collect();

        Self::append(&ds.timestamp, new_size, &timestamp)?;
        Self::append(&ds.elapsed, new_size, &elapsed)?;
        Self::append(&ds.phase_index, new_size, &phase_index)?;
        Self::append(&ds.motor_state, new_size, &motor_state)?;
        Self::append(&ds.acc_x, new_size, &column(|r| r.sample.acc_x))?;
        Self::append(&ds.acc_y, new_size, &column(|r| r.sample.acc_y))?;
        Self::append(&ds.acc_z, new_size, &column(|r| r.sample.acc_z))?;
        Self::append(&ds.gyro_x, new_size, &column(|r| r.sample.gyro_x))?;
        Self::append(&ds.gyro_y, new_size, &column(|r| r.sample.gyro_y))?;
        Self::append(&ds.gyro_z, new_size, &column(|r| r.sample.gyro_z))?;
        Self::append(&ds.temp, new_size, &column(|r| r.sample.temp))?;

        self.written = new_size;
        self.buffer.clear();
        Ok(())
    }
}

impl RecordSink for Hdf5RecordSink {
    fn begin(&mut self, schema: &Schema) -> Result<()> {
        if self.datasets.is_some() {
            return Err(Error::Sink("HDF5 schema already declared".to_string()));
        }

        let metadata = self
            .file
            .create_group("metadata")
            .map_err(sink_err("create metadata group"))?;
        Self::write_str_attr(&metadata, "start_time", &chrono::Local::now().to_rfc3339())?;
        metadata
            .new_attr::<f64>()
            .create("sample_rate_hz")
            .and_then(|attr| attr.write_scalar(&schema.sample_rate_hz))
            .map_err(sink_err("write sample_rate_hz"))?;
        Self::write_str_attr(&metadata, "phases", &schema.phases.join(","))?;
        Self::write_str_attr(&metadata, "version", FORMAT_VERSION)?;

        let group = self
            .file
            .create_group("records")
            .map_err(sink_err("create records group"))?;
        self.datasets = Some(DatasetHandles {
            timestamp: Self::create_dataset::<f64>(&group, "timestamp")?,
            elapsed: Self::create_dataset::<f64>(&group, "elapsed")?,
            phase_index: Self::create_dataset::<u32>(&group, "phase_index")?,
            motor_state: Self::create_dataset::<i8>(&group, "motor_state")?,
            acc_x: Self::create_dataset::<f64>(&group, "acc_x")?,
            acc_y: Self::create_dataset::<f64>(&group, "acc_y")?,
            acc_z: Self::create_dataset::<f64>(&group, "acc_z")?,
            gyro_x: Self::create_dataset::<f64>(&group, "gyro_x")?,
            gyro_y: Self::create_dataset::<f64>(&group, "gyro_y")?,
            gyro_z: Self::create_dataset::<f64>(&group, "gyro_z")?,
            temp: Self::create_dataset::<f64>(&group, "temp")?,
        });
        Ok(())
    }

    fn write(&mut self, record: &ExperimentRecord) -> Result<()> {
        if self.closed {
            return Err(Error::Sink("HDF5 sink is closed".to_string()));
        }
        if self.datasets.is_none() {
            return Err(Error::Sink("HDF5 schema not declared".to_string()));
        }
        self.buffer.push(record.clone());
        if self.buffer.len() >= BATCH_SIZE {
            self.flush_buffer()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.flush_buffer()?;
        self.file.flush().map_err(sink_err("flush HDF5 file"))
    }
}
