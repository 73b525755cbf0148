//! Streams grid points into a parquet file.

use std::sync::Arc;

use arrow::{
    array::{Float64Builder, StringBuilder, TimestampMicrosecondBuilder},
    datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit},
    record_batch::RecordBatch,
};
use parquet::{
    arrow::AsyncArrowWriter,
    basic::{Compression, ZstdLevel},
    errors::ParquetError,
    file::properties::WriterProperties,
};
use tokio::io::AsyncWrite;

use crate::reading::GridPoint;

pub const DEFAULT_ROWS_PER_GROUP: usize = 100_000;

pub fn default_compression() -> Compression {
    Compression::ZSTD(ZstdLevel::default())
}

pub fn grid_point_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            false,
        ),
        Field::new("latitude", DataType::Float64, false),
        Field::new("longitude", DataType::Float64, false),
        Field::new("value", DataType::Float64, false),
        Field::new("spatial_index", DataType::Utf8, false),
    ]))
}

/// Column builders for one record batch.
struct BatchBuilder {
    timestamps: TimestampMicrosecondBuilder,
    latitudes: Float64Builder,
    longitudes: Float64Builder,
    values: Float64Builder,
    cells: StringBuilder,
    rows: usize,
}

impl BatchBuilder {
    fn with_capacity(capacity: usize) -> Self {
        BatchBuilder {
            timestamps: TimestampMicrosecondBuilder::with_capacity(capacity).with_timezone("UTC"),
            latitudes: Float64Builder::with_capacity(capacity),
            longitudes: Float64Builder::with_capacity(capacity),
            values: Float64Builder::with_capacity(capacity),
            // H3 cells are 15 hex characters
            cells: StringBuilder::with_capacity(capacity, capacity * 15),
            rows: 0,
        }
    }

    fn append(&mut self, point: &GridPoint) {
        self.timestamps.append_value(point.timestamp.timestamp_micros());
        self.latitudes.append_value(point.latitude);
        self.longitudes.append_value(point.longitude);
        self.values.append_value(point.value);
        self.cells.append_value(point.spatial_index.to_string());
        self.rows += 1;
    }

    fn finish(&mut self, schema: &SchemaRef) -> Result<RecordBatch, arrow::error::ArrowError> {
        self.rows = 0;
        RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(self.timestamps.finish()),
                Arc::new(self.latitudes.finish()),
                Arc::new(self.longitudes.finish()),
                Arc::new(self.values.finish()),
                Arc::new(self.cells.finish()),
            ],
        )
    }
}

/// Writes `points` to `sink` as one parquet file and returns the row count.
///
/// Rows are handed to the writer `rows_per_group` at a time, so at most one
/// row group is buffered before it reaches `sink`.
pub async fn write_points<'a, W, I>(
    sink: W,
    points: I,
    rows_per_group: usize,
    compression: Compression,
) -> Result<usize, ParquetError>
where
    W: AsyncWrite + Unpin + Send,
    I: IntoIterator<Item = &'a GridPoint>,
{
    let rows_per_group = rows_per_group.max(1);
    let schema = grid_point_schema();

    let props = WriterProperties::builder()
        .set_compression(compression)
        .set_dictionary_enabled(true)
        .set_max_row_group_size(rows_per_group)
        .build();

    let mut writer = AsyncArrowWriter::try_new(sink, schema.clone(), Some(props))?;
    let mut builder = BatchBuilder::with_capacity(rows_per_group);
    let mut total = 0;

    for point in points {
        builder.append(point);

        if builder.rows >= rows_per_group {
            total += builder.rows;
            writer.write(&builder.finish(&schema)?).await?;
        }
    }

    if builder.rows > 0 {
        total += builder.rows;
        writer.write(&builder.finish(&schema)?).await?;
    }

    writer.close().await?;
    Ok(total)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use arrow::array::{Array, Float64Array, StringArray, TimestampMicrosecondArray};
    use chrono::{TimeZone, Utc};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    use bytes::Bytes;

    use super::*;
    use crate::spatial::SpatialIndexer;

    async fn encode(points: &[GridPoint], rows_per_group: usize) -> (Bytes, usize) {
        let mut buf = Vec::new();
        let rows = write_points(&mut buf, points, rows_per_group, default_compression())
            .await
            .unwrap();

        (Bytes::from(buf), rows)
    }

    fn points_fixture(n: usize) -> Vec<GridPoint> {
        let indexer = SpatialIndexer::default();
        let t0 = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();

        (0..n)
            .map(|i| {
                let latitude = 50.0 + (i % 4) as f64 * 0.25;
                let longitude = (i / 4) as f64 * 0.25;
                GridPoint {
                    timestamp: t0,
                    latitude,
                    longitude,
                    value: i as f64,
                    spatial_index: indexer.index(latitude, longitude).unwrap(),
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn should_validate_schema_and_data() {
        let points = points_fixture(10);
        let (bytes, rows) = encode(&points, 4).await;
        assert_eq!(rows, 10);

        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes).unwrap();
        assert_eq!(builder.metadata().num_row_groups(), 3);
        let reader = builder.build().unwrap();

        let mut total_rows = 0;
        for batch_result in reader {
            let batch = batch_result.unwrap();

            let schema = batch.schema();
            assert_eq!(schema.fields().len(), 5);
            assert_eq!(schema.field(0).name(), "timestamp");
            assert_eq!(schema.field(4).name(), "spatial_index");

            let timestamps = batch
                .column(0)
                .as_any()
                .downcast_ref::<TimestampMicrosecondArray>()
                .unwrap();
            let values = batch
                .column(3)
                .as_any()
                .downcast_ref::<Float64Array>()
                .unwrap();
            let cells = batch
                .column(4)
                .as_any()
                .downcast_ref::<StringArray>()
                .unwrap();

            assert_eq!(values.null_count(), 0);
            assert_eq!(cells.null_count(), 0);
            for i in 0..batch.num_rows() {
                let row = total_rows + i;
                assert_eq!(timestamps.value(i), points[row].timestamp.timestamp_micros());
                assert_eq!(values.value(i), points[row].value);
                assert_eq!(cells.value(i), points[row].spatial_index.to_string());
            }
            total_rows += batch.num_rows();
        }

        assert_eq!(total_rows, 10);
    }

    #[tokio::test]
    async fn should_write_schema_for_empty_input() {
        let (bytes, rows) = encode(&[], 100).await;
        assert_eq!(rows, 0);
        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes).unwrap();

        assert_eq!(builder.schema().fields().len(), 5);
        assert_eq!(builder.metadata().file_metadata().num_rows(), 0);
    }
}
