use base64::Engine;

/// Bytes the sink's envelope adds around each message
pub const DEFAULT_PER_ITEM_OVERHEAD: usize = 50;

/// The encoding payloads travel in. The stream sink and the estimator share it,
/// so estimates track what actually goes on the wire.
pub const PAYLOAD_ENCODING: base64::engine::GeneralPurpose =
    base64::engine::general_purpose::STANDARD;

/// Encode one payload for transmission
pub fn encode_payload(payload: &[u8]) -> String {
    PAYLOAD_ENCODING.encode(payload)
}

/// Estimates the wire size of a group of payloads: encoded length plus a fixed
/// per-item envelope cost. Pure and deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeEstimator {
    per_item_overhead: usize,
}

impl Default for SizeEstimator {
    fn default() -> Self {
        Self {
            per_item_overhead: DEFAULT_PER_ITEM_OVERHEAD,
        }
    }
}

impl SizeEstimator {
    /// An estimator with a custom envelope cost per item
    pub fn with_overhead(per_item_overhead: usize) -> Self {
        Self { per_item_overhead }
    }

    /// Padded base64 length of `payload`
    #[inline]
    pub fn encoded_len(payload: &[u8]) -> usize {
        payload.len().div_ceil(3) * 4
    }

    /// What one payload contributes to a batch estimate
    #[inline]
    pub fn item_cost(&self, payload: &[u8]) -> usize {
        Self::encoded_len(payload) + self.per_item_overhead
    }

    /// Estimated wire bytes for sending all of `payloads` in one call
    pub fn estimate<T: AsRef<[u8]>>(&self, payloads: &[T]) -> usize {
        payloads
            .iter()
            .map(|payload| self.item_cost(payload.as_ref()))
            .sum()
    }
}
