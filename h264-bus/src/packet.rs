use bytes::Bytes;

/// One encoded access unit. Opaque to the session; the shipped encoder emits Annex-B H.264.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PayloadBuffer {
    data: Bytes,
}

impl PayloadBuffer {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }
}

impl From<Bytes> for PayloadBuffer {
    fn from(data: Bytes) -> Self {
        Self { data }
    }
}

impl From<Vec<u8>> for PayloadBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self {
            data: Bytes::from(data),
        }
    }
}

/// Copies an encoder packet out of codec owned memory.
pub(crate) fn copy_packet_data(packet: &ffmpeg_next::codec::packet::Packet) -> Bytes {
    packet
        .data()
        .map(Bytes::copy_from_slice)
        .unwrap_or_default()
}
