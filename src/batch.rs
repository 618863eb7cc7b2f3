use uuid::Uuid;

use crate::{
    codec::{self, WireRecord},
    descriptor::BatchDescriptor,
    unit::{IncomingUnit, OutgoingUnit, Unit, UnitId},
    DropError, Result,
};

pub type OutgoingBatch = Batch<OutgoingUnit>;
pub type IncomingBatch = Batch<IncomingUnit>;

/// Files transferred together as one unit of work.
///
/// The batch has no state of its own: [`Batch::state`] is the least
/// advanced state among its units, so a batch counts as `Loaded` only
/// once every unit is at least `Loaded`.
#[derive(Debug)]
pub struct Batch<U> {
    id: String,
    correlation_token: Option<String>,
    sender: String,
    receiver: String,
    units: Vec<U>,
    reference: Option<String>,
}

impl<U: Unit> Batch<U> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn correlation_token(&self) -> Option<&str> {
        self.correlation_token.as_deref()
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    /// Registry reference returned by the last successful publish.
    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn units(&self) -> &[U] {
        &self.units
    }

    pub fn unit(&self, id: UnitId) -> Option<&U> {
        self.units.iter().find(|u| u.id() == id)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.units.iter().map(|u| u.size()).sum()
    }

    pub fn state(&self) -> U::State {
        self.units
            .iter()
            .map(|u| u.state())
            .min()
            .unwrap_or_default()
    }

    pub(crate) fn units_mut(&mut self) -> &mut [U] {
        &mut self.units
    }

    pub(crate) fn unit_mut(&mut self, id: UnitId) -> Option<&mut U> {
        self.units.iter_mut().find(|u| u.id() == id)
    }

    pub(crate) fn set_reference(&mut self, reference: Option<String>) {
        self.reference = reference;
    }
}

impl OutgoingBatch {
    /// Records for the direct-channel encoding. Every unit needs a remote
    /// path, i.e. the batch has been staged at least once.
    pub fn wire_records(&self) -> Result<Vec<WireRecord>> {
        self.units
            .iter()
            .map(|unit| {
                let url = unit.remote_path().ok_or_else(|| {
                    DropError::InvalidBatch(format!(
                        "unit {} of batch {} has no remote path",
                        unit.id(),
                        self.id
                    ))
                })?;
                Ok(WireRecord::new(unit.name(), url, unit.size()))
            })
            .collect()
    }

    pub fn encode_wire(&self) -> Result<Vec<u8>> {
        codec::encode(&self.wire_records()?)
    }
}

impl IncomingBatch {
    /// Builds a received batch out of a direct-channel payload.
    pub fn from_wire(
        payload: &[u8],
        sender: impl Into<String>,
        receiver: impl Into<String>,
    ) -> Result<Self> {
        let records = codec::decode(payload)?;
        records
            .into_iter()
            .fold(BatchBuilder::new(sender, receiver), |builder, record| {
                builder.unit(IncomingUnit::from_record(record))
            })
            .build()
    }

    /// Builds a received batch out of a relay descriptor, keeping the
    /// batch and unit ids chosen by the sender.
    pub fn from_descriptor(
        descriptor: BatchDescriptor,
        sender: impl Into<String>,
        receiver: impl Into<String>,
    ) -> Result<Self> {
        let mut builder = BatchBuilder::new(sender, receiver)
            .id(descriptor.batch_id);
        if let Some(token) = descriptor.correlation_token {
            builder = builder.correlation_token(token);
        }
        for (id, unit) in descriptor.units {
            let id = Uuid::parse_str(&id).map_err(|e| {
                DropError::Decode(format!("invalid unit id {id}: {e}"))
            })?;
            let name = unit
                .remote_path
                .rsplit('/')
                .next()
                .unwrap_or(&unit.remote_path)
                .to_owned();
            builder = builder.unit(IncomingUnit::with_id(
                id,
                name,
                unit.remote_path,
                unit.content_type,
                unit.size_bytes,
            ));
        }
        builder.build()
    }
}

pub struct BatchBuilder<U> {
    id: Option<String>,
    correlation_token: Option<String>,
    sender: String,
    receiver: String,
    units: Vec<U>,
}

impl<U: Unit> BatchBuilder<U> {
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>) -> Self {
        Self {
            id: None,
            correlation_token: None,
            sender: sender.into(),
            receiver: receiver.into(),
            units: Vec::new(),
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Token handed to the notification mechanism so the receiver is told
    /// to pull the batch.
    pub fn correlation_token(mut self, token: impl Into<String>) -> Self {
        self.correlation_token = Some(token.into());
        self
    }

    pub fn unit(mut self, unit: U) -> Self {
        self.units.push(unit);
        self
    }

    pub fn units(mut self, units: impl IntoIterator<Item = U>) -> Self {
        self.units.extend(units);
        self
    }

    pub fn build(self) -> Result<Batch<U>> {
        if self.sender.trim().is_empty() || self.receiver.trim().is_empty() {
            return Err(DropError::InvalidBatch(
                "sender and receiver are required".to_owned(),
            ));
        }
        if self.units.is_empty() {
            return Err(DropError::InvalidBatch(
                "a batch needs at least one unit".to_owned(),
            ));
        }
        let id = match self.id {
            Some(id) if id.trim().is_empty() => {
                return Err(DropError::InvalidBatch(
                    "batch id must not be empty".to_owned(),
                ))
            }
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };

        Ok(Batch {
            id,
            correlation_token: self.correlation_token,
            sender: self.sender,
            receiver: self.receiver,
            units: self.units,
            reference: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{IncomingState, LoadedContent, OutgoingState};
    use std::path::PathBuf;

    fn outgoing(count: usize) -> OutgoingBatch {
        BatchBuilder::new("me", "peer")
            .units((0..count).map(|i| {
                OutgoingUnit::new(format!("/src/{i}.txt"), "text/plain")
            }))
            .build()
            .unwrap()
    }

    fn load(unit: &mut OutgoingUnit) {
        unit.begin_load().unwrap();
        unit.complete_load(LoadedContent {
            path: PathBuf::from(format!("/staging/{}", unit.id())),
            size: 10,
        })
        .unwrap();
    }

    #[test]
    fn builder_requires_identifiers_and_units() {
        let missing_sender = BatchBuilder::<OutgoingUnit>::new("", "peer")
            .unit(OutgoingUnit::new("a", "text/plain"))
            .build();
        assert!(matches!(missing_sender, Err(DropError::InvalidBatch(_))));

        let empty = BatchBuilder::<OutgoingUnit>::new("me", "peer").build();
        assert!(matches!(empty, Err(DropError::InvalidBatch(_))));

        let batch = outgoing(1);
        assert!(Uuid::parse_str(batch.id()).is_ok());
        assert_eq!(batch.correlation_token(), None);
    }

    #[test]
    fn state_is_least_advanced_unit() {
        let mut batch = outgoing(3);
        assert_eq!(batch.state(), OutgoingState::Picked);

        for i in 0..3 {
            load(&mut batch.units_mut()[i]);
            let expected = if i == 2 {
                OutgoingState::Loaded
            } else {
                OutgoingState::Picked
            };
            assert_eq!(batch.state(), expected);
        }

        let unit = &mut batch.units_mut()[1];
        unit.assign_remote_path("r/1".to_owned()).unwrap();
        unit.begin_stage().unwrap();
        assert_eq!(batch.state(), OutgoingState::Loaded);
    }

    #[test]
    fn wire_records_need_remote_paths() {
        let mut batch = outgoing(2);
        assert!(matches!(
            batch.wire_records(),
            Err(DropError::InvalidBatch(_))
        ));

        for (i, unit) in batch.units_mut().iter_mut().enumerate() {
            load(unit);
            unit.assign_remote_path(format!("b/{i}")).unwrap();
        }
        let records = batch.wire_records().unwrap();
        assert_eq!(records[0], WireRecord::new("0.txt", "b/0", 10));
        assert_eq!(records[1], WireRecord::new("1.txt", "b/1", 10));
    }

    #[test]
    fn incoming_from_wire() {
        let payload = codec::encode(&[
            WireRecord::new("a.jpg", "/r/a", 100),
            WireRecord::new("b.png", "/r/b", 200),
        ])
        .unwrap();

        let batch = IncomingBatch::from_wire(&payload, "peer", "me").unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.state(), IncomingState::Received);
        assert_eq!(batch.total_size(), 300);

        assert!(IncomingBatch::from_wire(&payload[..10], "peer", "me")
            .is_err());
    }
}
