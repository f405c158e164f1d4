use bytes::{BufMut, Bytes, BytesMut};
use pulse_core::PayloadFormat;

/// Bytes wrapped around and between the records of one request body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PayloadDecoration {
    pub prefix: &'static [u8],
    pub suffix: &'static [u8],
    pub separator: &'static [u8],
}

impl PayloadDecoration {
    pub const NEWLINE_SEPARATED: Self = Self {
        prefix: b"",
        suffix: b"",
        separator: b"\n",
    };

    pub const JSON_ARRAY: Self = Self {
        prefix: b"[",
        suffix: b"]",
        separator: b",",
    };

    pub fn for_format(format: PayloadFormat) -> Self {
        match format {
            PayloadFormat::NewlineDelimited => Self::NEWLINE_SEPARATED,
            PayloadFormat::JsonArray => Self::JSON_ARRAY,
        }
    }

    pub fn frame(&self, records: &[Vec<u8>]) -> Bytes {
        let content: usize = records.iter().map(Vec::len).sum();
        let separators = self.separator.len() * records.len().saturating_sub(1);
        let mut buf =
            BytesMut::with_capacity(self.prefix.len() + content + separators + self.suffix.len());
        buf.put_slice(self.prefix);
        for (i, record) in records.iter().enumerate() {
            if i > 0 {
                buf.put_slice(self.separator);
            }
            buf.put_slice(record);
        }
        buf.put_slice(self.suffix);
        buf.freeze()
    }
}
