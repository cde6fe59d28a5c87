//! Batch responses and per-unit correlation

use rowcall_core::{Batch, BatchError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// RESPONSE TYPES
// ============================================================================

/// Successful outcome for one unit of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Position of the unit within its batch.
    pub position: usize,
    pub value: Value,
}

/// Failed outcome for one unit of a batch, as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntryError {
    /// Position of the unit within its batch.
    pub position: usize,
    pub message: String,
    /// Service-provided error label, if any.
    pub error_type: Option<String>,
    pub raw: Option<String>,
}

/// Everything a batch call reports.
///
/// Each unit of the batch must appear exactly once across `results` and
/// `errors`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub results: Vec<BatchEntry>,
    pub errors: Vec<BatchEntryError>,
}

impl BatchResponse {
    pub fn new(results: Vec<BatchEntry>, errors: Vec<BatchEntryError>) -> Self {
        Self { results, errors }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

// ============================================================================
// JSON RESPONSE KEYS
// ============================================================================

/// Key names used to read a bulk API's JSON response.
///
/// Bulk APIs disagree on naming, so every key is configurable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchResponseKeys {
    /// Array of successful entries.
    pub results: String,
    /// Array of failed entries.
    pub errors: String,
    /// Position field inside every entry.
    pub index: String,
    /// Message field inside a failed entry.
    pub message: String,
    /// Type field inside a failed entry.
    pub error_type: String,
}

impl Default for BatchResponseKeys {
    fn default() -> Self {
        Self {
            results: "results".to_string(),
            errors: "errors".to_string(),
            index: "index".to_string(),
            message: "message".to_string(),
            error_type: "type".to_string(),
        }
    }
}

impl BatchResponseKeys {
    /// Parse a bulk response body for batch number `batch`.
    ///
    /// A missing array counts as empty. Each successful entry keeps its whole
    /// object as the unit's response.
    pub fn parse(&self, body: &Value, batch: usize) -> Result<BatchResponse, BatchError> {
        let object = body.as_object().ok_or_else(|| BatchError::MalformedResponse {
            batch,
            reason: "response is not a JSON object".to_string(),
        })?;

        let mut response = BatchResponse::default();

        for entry in self.entries(object.get(&self.results), &self.results, batch)? {
            let position = self.position_of(entry, batch)?;
            response.results.push(BatchEntry {
                position,
                value: entry.clone(),
            });
        }

        for entry in self.entries(object.get(&self.errors), &self.errors, batch)? {
            let position = self.position_of(entry, batch)?;
            let message = match entry.get(&self.message) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => entry.to_string(),
            };
            let error_type = entry
                .get(&self.error_type)
                .and_then(Value::as_str)
                .map(str::to_string);
            response.errors.push(BatchEntryError {
                position,
                message,
                error_type,
                raw: Some(entry.to_string()),
            });
        }

        Ok(response)
    }

    fn entries<'a>(
        &self,
        value: Option<&'a Value>,
        key: &str,
        batch: usize,
    ) -> Result<&'a [Value], BatchError> {
        match value {
            None | Some(Value::Null) => Ok(&[][..]),
            Some(Value::Array(items)) => Ok(items.as_slice()),
            Some(_) => Err(BatchError::MalformedResponse {
                batch,
                reason: format!("'{}' is not an array", key),
            }),
        }
    }

    fn position_of(&self, entry: &Value, batch: usize) -> Result<usize, BatchError> {
        entry
            .get(&self.index)
            .and_then(Value::as_u64)
            .map(|p| p as usize)
            .ok_or_else(|| BatchError::MalformedResponse {
                batch,
                reason: format!("entry without a valid '{}' field", self.index),
            })
    }
}

// ============================================================================
// CORRELATION
// ============================================================================

/// Outcome of one unit after correlation, keyed by original row position.
pub type CorrelatedOutcome = (usize, Result<Value, BatchEntryError>);

/// Match every entry of `response` to its unit in `batch`.
///
/// Correlation uses the embedded positions only. Each unit must be reported
/// exactly once across results and errors; anything else is an error.
/// Outcomes are returned in batch order.
pub fn correlate(
    batch: &Batch,
    response: BatchResponse,
) -> Result<Vec<CorrelatedOutcome>, BatchError> {
    let size = batch.len();
    let mut slots: Vec<Option<Result<Value, BatchEntryError>>> = vec![None; size];

    let outcomes = response
        .results
        .into_iter()
        .map(|entry| (entry.position, Ok(entry.value)))
        .chain(
            response
                .errors
                .into_iter()
                .map(|entry| (entry.position, Err(entry))),
        );

    for (position, outcome) in outcomes {
        let slot = slots
            .get_mut(position)
            .ok_or(BatchError::PositionOutOfRange {
                batch: batch.index(),
                position,
                size,
            })?;
        if slot.is_some() {
            return Err(BatchError::DuplicatePosition {
                batch: batch.index(),
                position,
            });
        }
        *slot = Some(outcome);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(position, slot)| {
            let outcome = slot.ok_or(BatchError::MissingPosition {
                batch: batch.index(),
                position,
            })?;
            let origin = batch
                .origin_of(position)
                .ok_or(BatchError::PositionOutOfRange {
                    batch: batch.index(),
                    position,
                    size,
                })?;
            Ok((origin, outcome))
        })
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use rowcall_core::{chunk_units, Table};
    use serde_json::json;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property: any permutation of full coverage correlates back to
        /// batch order with the right origins.
        #[test]
        fn prop_correlate_any_order(
            (size, positions) in (1usize..12).prop_flat_map(|size| {
                (Just(size), Just((0..size).collect::<Vec<_>>()).prop_shuffle())
            }),
            offset in 0usize..50,
            fail_mask in any::<u16>(),
        ) {
            let mut table = Table::new(["n"]).unwrap();
            for i in 0..(size + offset) {
                table.push_row(vec![json!(i)]).unwrap();
            }
            let units = table.units().into_iter().skip(offset).collect();
            let batch = chunk_units(units, size).remove(0);

            let mut response = BatchResponse::default();
            for p in positions {
                if fail_mask & (1 << p) != 0 {
                    response.errors.push(BatchEntryError {
                        position: p,
                        message: "x".to_string(),
                        error_type: None,
                        raw: None,
                    });
                } else {
                    response.results.push(BatchEntry { position: p, value: json!(p) });
                }
            }

            let outcomes = correlate(&batch, response).unwrap();
            prop_assert_eq!(outcomes.len(), size);
            for (i, (origin, outcome)) in outcomes.iter().enumerate() {
                prop_assert_eq!(*origin, offset + i);
                prop_assert_eq!(outcome.is_err(), fail_mask & (1 << i) != 0);
            }
        }
    }
}
