use bytes::BytesMut;
use http::header::HeaderMap;

use crate::buffer::StreamBuffer;
use crate::content_disposition::ContentDisposition;

pub(crate) struct DecoderState {
    pub(crate) buffer: StreamBuffer,
    pub(crate) boundary: String,
    pub(crate) stage: StreamingStage,
    pub(crate) next_field_idx: usize,
    pub(crate) curr_field: Option<CurrentField>,
}

pub(crate) struct CurrentField {
    pub(crate) idx: usize,
    pub(crate) headers: HeaderMap,
    pub(crate) content_disposition: ContentDisposition,
    pub(crate) data: BytesMut,
    pub(crate) size_limit: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamingStage {
    FindingFirstBoundary,
    ReadingBoundary,
    DeterminingBoundaryType,
    ReadingFieldHeaders,
    ReadingFieldData,
    Eof,
}
