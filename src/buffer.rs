use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::stream::Stream;
use memchr::memmem;

use crate::constants;

pub(crate) struct StreamBuffer {
    pub(crate) eof: bool,
    pub(crate) buf: BytesMut,
    pub(crate) stream: Pin<Box<dyn Stream<Item = crate::Result<Bytes>> + Send>>,
    pub(crate) whole_stream_size_limit: u64,
    pub(crate) stream_size_counter: u64,
}

impl StreamBuffer {
    pub fn new<S>(stream: S, whole_stream_size_limit: u64) -> Self
    where
        S: Stream<Item = crate::Result<Bytes>> + Send + 'static,
    {
        StreamBuffer {
            eof: false,
            buf: BytesMut::new(),
            stream: Box::pin(stream),
            whole_stream_size_limit,
            stream_size_counter: 0,
        }
    }

    pub fn poll_stream(&mut self, cx: &mut Context<'_>) -> crate::Result<()> {
        if self.eof {
            return Ok(());
        }

        loop {
            match self.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(data))) => {
                    self.stream_size_counter += data.len() as u64;

                    if self.stream_size_counter > self.whole_stream_size_limit {
                        return Err(crate::Error::StreamSizeExceeded {
                            limit: self.whole_stream_size_limit,
                        });
                    }

                    self.buf.extend_from_slice(&data)
                }
                Poll::Ready(Some(Err(err))) => return Err(err),
                Poll::Ready(None) => {
                    self.eof = true;
                    return Ok(());
                }
                Poll::Pending => return Ok(()),
            }
        }
    }

    pub fn read_exact(&mut self, size: usize) -> Option<Bytes> {
        if size <= self.buf.len() {
            Some(self.buf.split_to(size).freeze())
        } else {
            None
        }
    }

    pub fn peek_exact(&self, size: usize) -> Option<&[u8]> {
        self.buf.get(..size)
    }

    pub fn read_until(&mut self, pattern: &[u8]) -> Option<Bytes> {
        memmem::find(&self.buf, pattern).map(|idx| self.buf.split_to(idx + pattern.len()).freeze())
    }

    /// Drops everything before the first occurrence of `pattern`, returning
    /// whether it was found.
    pub fn skip_to(&mut self, pattern: &[u8]) -> bool {
        match memmem::find(&self.buf, pattern) {
            Some(idx) => {
                drop(self.buf.split_to(idx));
                true
            }
            None => false,
        }
    }

    /// Reads field data up to the next `\r\n--boundary`.
    ///
    /// Returns `(true, bytes)` with the last chunk of the field, `(false,
    /// bytes)` with a chunk that can't be part of the delimiter, or `None`
    /// when more input is needed. A trailing `\r` that could start the
    /// delimiter is held back until more data arrives.
    pub fn read_field_data(
        &mut self,
        boundary: &str,
        field_name: Option<&str>,
    ) -> crate::Result<Option<(bool, Bytes)>> {
        let incomplete = || crate::Error::IncompleteFieldData {
            field_name: field_name.map(|s| s.to_owned()),
        };

        if self.buf.is_empty() {
            return if self.eof { Err(incomplete()) } else { Ok(None) };
        }

        let boundary_deriv = format!("{}{}{}", constants::CRLF, constants::BOUNDARY_EXT, boundary);

        if let Some(idx) = memmem::find(&self.buf, boundary_deriv.as_bytes()) {
            let bytes = self.buf.split_to(idx).freeze();

            // discard \r\n.
            drop(self.buf.split_to(constants::CRLF.len()));

            return Ok(Some((true, bytes)));
        }

        if self.eof {
            return Err(incomplete());
        }

        let window_start = self.buf.len().saturating_sub(boundary_deriv.len() - 1);
        let held_back = memchr::memrchr(constants::CR, &self.buf[window_start..])
            .map(|rel_idx| window_start + rel_idx)
            .filter(|&idx| boundary_deriv.as_bytes().starts_with(&self.buf[idx..]));

        let safe_len = held_back.unwrap_or_else(|| self.buf.len());
        if safe_len == 0 {
            return Ok(None);
        }

        Ok(Some((false, self.buf.split_to(safe_len).freeze())))
    }
}
