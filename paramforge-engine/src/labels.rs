//! Stepwise label enumeration for switch and selector parameters.

use crate::errors::MappingResult;
use crate::live::{DeviceRef, LiveDevice, ParamReading};
use paramforge_core::sample::Sample;
use std::collections::BTreeMap;
use std::time::Duration;

fn step_value(step: usize, steps: usize) -> f64 {
    if steps <= 1 {
        0.0
    } else {
        step as f64 / (steps - 1) as f64
    }
}

/// Fractions `0, 1/(steps-1), ..., 1` visited by a label walk.
pub fn step_values(steps: usize) -> Vec<f64> {
    (0..steps).map(|step| step_value(step, steps)).collect()
}

/// Write `step / (steps - 1)` for every step, collecting the displayed text.
///
/// Steps whose round trip fails are left out. The parameter's original value
/// is written back at the end.
pub async fn enumerate_labels<L: LiveDevice>(
    live: &L,
    device: &DeviceRef,
    index: usize,
    steps: usize,
    settle: Duration,
) -> MappingResult<BTreeMap<usize, String>> {
    let original = live.get_param(device, index).await?;
    let mut labels = BTreeMap::new();

    for step in 0..steps {
        let x = step_value(step, steps);
        let result: MappingResult<ParamReading> = async {
            live.set_param(device, index, x).await?;
            tokio::time::sleep(settle).await;
            live.get_param(device, index).await
        }
        .await;
        match result {
            Ok(reading) => {
                labels.insert(step, reading.display_value.trim().to_string());
            }
            Err(err) => tracing::warn!(index, step, error = %err, "label step skipped"),
        }
    }

    if let Err(err) = live.set_param(device, index, original.value).await {
        tracing::warn!(index, error = %err, "restore after enumeration failed");
    }
    Ok(labels)
}

/// Enumerated steps as samples at the values that were written.
pub fn samples_from_steps(labels: &BTreeMap<usize, String>, steps: usize) -> Vec<Sample> {
    labels
        .iter()
        .map(|(step, label)| Sample::new(step_value(*step, steps), label.as_str()))
        .collect()
}
