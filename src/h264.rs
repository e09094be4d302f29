//! Annex-B bitstream helpers.
//!
//! The encoder emits Annex-B (start-code delimited) NAL units; the MP4
//! container wants AVCC (4-byte length prefixed) samples with the parameter
//! sets carried out-of-band in the `avcC` box. These helpers bridge the two.

pub const NAL_TYPE_IDR: u8 = 5;
pub const NAL_TYPE_SPS: u8 = 7;
pub const NAL_TYPE_PPS: u8 = 8;

/// Splits an Annex-B stream into NAL unit payloads (start codes stripped).
/// Handles both 3-byte and 4-byte start codes.
pub fn split_nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut units = Vec::new();
    let mut start = None;
    let mut i = 0;
    while i + 3 <= data.len() {
        let code_len = if data[i..].starts_with(&[0, 0, 0, 1]) {
            4
        } else if data[i..].starts_with(&[0, 0, 1]) {
            3
        } else {
            i += 1;
            continue;
        };
        if let Some(s) = start {
            units.push(&data[s..i]);
        }
        i += code_len;
        start = Some(i);
    }
    if let Some(s) = start {
        if s < data.len() {
            units.push(&data[s..]);
        }
    }
    units
}

/// NAL unit type from the header byte.
pub fn nal_type(nal: &[u8]) -> u8 {
    nal.first().map(|b| b & 0x1f).unwrap_or(0)
}

/// Pulls the first SPS and PPS out of an Annex-B stream, if both exist.
pub fn extract_parameter_sets(data: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let mut sps = None;
    let mut pps = None;
    for nal in split_nal_units(data) {
        match nal_type(nal) {
            NAL_TYPE_SPS if sps.is_none() => sps = Some(nal.to_vec()),
            NAL_TYPE_PPS if pps.is_none() => pps = Some(nal.to_vec()),
            _ => {}
        }
    }
    Some((sps?, pps?))
}

/// True if the stream contains an IDR slice.
pub fn contains_idr(data: &[u8]) -> bool {
    split_nal_units(data)
        .iter()
        .any(|nal| nal_type(nal) == NAL_TYPE_IDR)
}

/// Converts an Annex-B stream into an AVCC sample: each NAL unit prefixed
/// with its length as a 4-byte big-endian integer. Parameter sets are
/// dropped; they live in the track's decoder configuration.
pub fn annex_b_to_avcc(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for nal in split_nal_units(data) {
        match nal_type(nal) {
            NAL_TYPE_SPS | NAL_TYPE_PPS => continue,
            _ => {}
        }
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
    out
}
