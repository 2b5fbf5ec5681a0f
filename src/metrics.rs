use prometheus::{Encoder, GaugeVec, IntCounterVec, IntGaugeVec, TextEncoder};
use sunpura_ems_rs::entity::EntityState;
use sunpura_ems_rs::Error;

lazy_static! {
    static ref SENSOR_VALUE_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "ems_sensor_value",
            "current value of a numeric sensor or setpoint",
        ),
        &["unique_id"],
    )
    .unwrap();
    static ref COORDINATOR_UP_GAUGE: IntGaugeVec = register_int_gauge_vec!(
        opts!(
            "ems_coordinator_up",
            "whether the last refresh of a coordinator succeeded",
        ),
        &["coordinator"],
    )
    .unwrap();
    static ref REFRESH_FAILURES_COUNTER: IntCounterVec = register_int_counter_vec!(
        opts!(
            "ems_refresh_failures_total",
            "number of failed coordinator refreshes",
        ),
        &["coordinator"],
    )
    .unwrap();
}

/// Record the outcome of a coordinator refresh.
pub fn record_refresh(coordinator: &str, success: bool) {
    COORDINATOR_UP_GAUGE
        .with_label_values(&[coordinator])
        .set(if success { 1 } else { 0 });
    if !success {
        REFRESH_FAILURES_COUNTER
            .with_label_values(&[coordinator])
            .inc();
    }
}

/// Feed every numeric entity into the sensor gauge. Entities without a value are dropped from
/// the exporter so stale readings do not linger.
pub fn collect(entities: &[EntityState]) {
    for entity in entities {
        match entity.numeric() {
            Some(value) => SENSOR_VALUE_GAUGE
                .with_label_values(&[&entity.unique_id])
                .set(value),
            None => {
                if SENSOR_VALUE_GAUGE
                    .remove_label_values(&[&entity.unique_id])
                    .is_ok()
                {
                    log::trace!("dropped stale metric for {}", entity.unique_id);
                }
            }
        }
    }
}

/// Read metrics from Prometheus exporter registry.
pub async fn read() -> Result<String, Error> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    encoder
        .encode(&metric_families, &mut buffer)
        .or(Err(Error::FormatError))?;
    String::from_utf8(buffer).or(Err(Error::FormatError))
}
