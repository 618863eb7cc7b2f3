//! Batch descriptor used when a batch travels through the metadata
//! registry instead of the direct peer channel.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{batch::OutgoingBatch, unit::Unit, DropError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDescriptor {
    pub content_type: String,
    pub remote_path: String,
    pub size_bytes: u64,
}

/// Units are keyed by unit id so the registry can index them directly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDescriptor {
    pub batch_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_token: Option<String>,
    pub units: BTreeMap<String, UnitDescriptor>,
}

impl BatchDescriptor {
    pub fn from_batch(batch: &OutgoingBatch) -> Result<Self> {
        let units = batch
            .units()
            .iter()
            .map(|unit| {
                let remote_path = unit.remote_path().ok_or_else(|| {
                    DropError::InvalidBatch(format!(
                        "unit {} has no remote path",
                        unit.id()
                    ))
                })?;
                Ok((
                    unit.id().to_string(),
                    UnitDescriptor {
                        content_type: unit.content_type().to_owned(),
                        remote_path: remote_path.to_owned(),
                        size_bytes: unit.size(),
                    },
                ))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Self {
            batch_id: batch.id().to_owned(),
            correlation_token: batch.correlation_token().map(str::to_owned),
            units,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| DropError::Encode(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
