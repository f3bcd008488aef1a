/// Broker-assigned, strictly increasing per-channel identifier of a publish
pub type SequenceNumber = u64;

/// Whether the broker accepted or rejected the publishes covered by a [`ConfirmEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmKind {
    /// Messages have been accepted
    Ack,
    /// Messages could not be accepted
    Nack,
}

/// Asynchronous publisher confirm emitted by the broker
///
/// When `multiple` is set, the event covers every outstanding publish with a sequence
/// number less than or equal to `sequence`, not only `sequence` itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmEvent {
    /// Acknowledgement or negative acknowledgement
    pub kind: ConfirmKind,
    /// Sequence number of the (last) covered publish
    pub sequence: SequenceNumber,
    /// Cumulative flag
    pub multiple: bool,
}

impl ConfirmEvent {
    /// Creates a positive acknowledgement
    pub fn ack(sequence: SequenceNumber, multiple: bool) -> Self {
        Self {
            kind: ConfirmKind::Ack,
            sequence,
            multiple,
        }
    }

    /// Creates a negative acknowledgement
    pub fn nack(sequence: SequenceNumber, multiple: bool) -> Self {
        Self {
            kind: ConfirmKind::Nack,
            sequence,
            multiple,
        }
    }
}
