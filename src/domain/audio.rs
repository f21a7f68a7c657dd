/// Opaque audio payload moving through the gateway.
///
/// The gateway never decodes or transcodes audio; it is forwarded to the
/// appropriate upstream (STT) or downstream (subscriber) exactly as
/// received, in PCM16/16kHz/mono as negotiated with the client out of band.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub data: Vec<u8>,
    pub sequence: u64,
}

impl AudioFrame {
    pub fn new(sequence: u64, data: Vec<u8>) -> Self {
        Self { data, sequence }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
