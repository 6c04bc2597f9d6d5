use bytes::Bytes;
use encoding_rs::{DecoderResult, Encoding};
use tracing::warn;

use crate::{
    transport::ResponseHead, url::extract_charset, DispatchError, DispatchResult, HeaderSet,
};

/// A fully buffered response whose body has already been decoded.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    status_text: String,
    headers: HeaderSet,
    data: String,
    bytes: Bytes,
    charset: &'static Encoding,
}

impl Response {
    /// Decodes `body` with the charset named by the `Content-Type` header,
    /// falling back to `default_charset`.
    pub(crate) fn decode(
        head: ResponseHead,
        body: Bytes,
        default_charset: &'static Encoding,
    ) -> DispatchResult<Self> {
        let charset = resolve_charset(head.headers.content_type(), default_charset);
        let data = decode_strict(&body, charset)?;
        Ok(Self {
            status: head.status,
            status_text: head.status_text,
            headers: head.headers,
            data,
            bytes: body,
            charset,
        })
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn headers(&self) -> &HeaderSet {
        &self.headers
    }

    /// The decoded body.
    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Name of the charset `data` was decoded with.
    pub fn charset(&self) -> &'static str {
        self.charset.name()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn into_data(self) -> String {
        self.data
    }

    #[cfg(feature = "json")]
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.bytes)
    }
}

pub(crate) fn resolve_charset(
    content_type: Option<&str>,
    default_charset: &'static Encoding,
) -> &'static Encoding {
    match extract_charset(content_type) {
        Some(label) => Encoding::for_label(label.as_bytes()).unwrap_or_else(|| {
            warn!(
                "unknown charset {:?}, decoding as {}",
                label,
                default_charset.name()
            );
            default_charset
        }),
        None => default_charset,
    }
}

/// Decodes without BOM sniffing and without replacement characters.
fn decode_strict(bytes: &[u8], charset: &'static Encoding) -> DispatchResult<String> {
    let mut decoder = charset.new_decoder_without_bom_handling();
    let capacity = decoder
        .max_utf8_buffer_length_without_replacement(bytes.len())
        .unwrap_or(bytes.len());
    let mut text = String::with_capacity(capacity);
    let mut read = 0;
    loop {
        let (result, consumed) =
            decoder.decode_to_string_without_replacement(&bytes[read..], &mut text, true);
        read += consumed;
        match result {
            DecoderResult::InputEmpty => return Ok(text),
            DecoderResult::OutputFull => text.reserve(bytes.len() - read + 16),
            DecoderResult::Malformed(bad, extra) => {
                return Err(DispatchError::Decode {
                    charset: charset.name(),
                    offset: read - bad as usize - extra as usize,
                })
            }
        }
    }
}
