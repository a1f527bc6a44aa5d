// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

/// Prometheus metrics definitions for xlstore
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

lazy_static! {
    // ============================================================================
    // Erasure Coding Metrics
    // ============================================================================

    /// Erasure encode duration in seconds
    pub static ref ERASURE_ENCODE_DURATION: HistogramVec = register_histogram_vec!(
        "erasure_encode_duration_seconds",
        "Erasure encode duration in seconds",
        &["data_shards", "parity_shards"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]
    ).unwrap();

    /// Erasure decode duration in seconds
    pub static ref ERASURE_DECODE_DURATION: HistogramVec = register_histogram_vec!(
        "erasure_decode_duration_seconds",
        "Erasure decode duration in seconds",
        &["data_shards", "parity_shards"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]
    ).unwrap();

    /// Bytes through the erasure codec
    pub static ref ERASURE_BYTES_PROCESSED: CounterVec = register_counter_vec!(
        "erasure_bytes_processed_total",
        "Bytes processed by the erasure codec",
        &["operation"]
    ).unwrap();

    // ============================================================================
    // Storage Metrics
    // ============================================================================

    /// Storage operation duration in seconds
    pub static ref STORAGE_OP_DURATION: HistogramVec = register_histogram_vec!(
        "storage_operation_duration_seconds",
        "Storage operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0]
    ).unwrap();

    /// Objects written and read
    pub static ref OBJECTS_TOTAL: CounterVec = register_counter_vec!(
        "storage_objects_total",
        "Total objects written and read",
        &["operation"]
    ).unwrap();
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Record erasure encode duration
pub fn record_erasure_encode(data_shards: usize, parity_shards: usize, duration: f64) {
    ERASURE_ENCODE_DURATION
        .with_label_values(&[&data_shards.to_string(), &parity_shards.to_string()])
        .observe(duration);
}

/// Record erasure decode duration
pub fn record_erasure_decode(data_shards: usize, parity_shards: usize, duration: f64) {
    ERASURE_DECODE_DURATION
        .with_label_values(&[&data_shards.to_string(), &parity_shards.to_string()])
        .observe(duration);
}

/// Increment erasure bytes processed
pub fn increment_erasure_bytes(operation: &str, bytes: u64) {
    ERASURE_BYTES_PROCESSED
        .with_label_values(&[operation])
        .inc_by(bytes as f64);
}

/// Record storage operation duration
pub fn record_storage_op(operation: &str, duration: f64) {
    STORAGE_OP_DURATION
        .with_label_values(&[operation])
        .observe(duration);
}

/// Increment object operation counter
pub fn increment_objects(operation: &str) {
    OBJECTS_TOTAL.with_label_values(&[operation]).inc();
}

/// Render all registered metrics in Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut out = String::new();
    if let Err(e) = encoder.encode_utf8(&prometheus::gather(), &mut out) {
        tracing::warn!(error = %e, "failed to encode metrics");
    }
    out
}
