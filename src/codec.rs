// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use bincode::enc::write::Writer;

pub const CODEC_BYTES_LIMIT: usize = 1_000_000;

pub fn encode_to_vec<T: bincode::Encode>(val: &T) -> Result<Vec<u8>, bincode::error::EncodeError> {
    let config = bincode::config::standard()
        .with_little_endian()
        .with_variable_int_encoding()
        .skip_fixed_array_length()
        .with_limit::<CODEC_BYTES_LIMIT>();

    bincode::encode_to_vec(val, config)
}

pub fn encode<W: Writer, T: bincode::Encode>(
    writer: W,
    val: &T,
) -> Result<(), bincode::error::EncodeError> {
    let config = bincode::config::standard()
        .with_little_endian()
        .with_variable_int_encoding()
        .skip_fixed_array_length()
        .with_limit::<CODEC_BYTES_LIMIT>();

    bincode::encode_into_writer(val, writer, config)
}

pub fn decode<T: bincode::Decode>(bytes: &[u8]) -> Result<T, bincode::error::DecodeError> {
    let config = bincode::config::standard()
        .with_little_endian()
        .with_variable_int_encoding()
        .skip_fixed_array_length()
        .with_limit::<CODEC_BYTES_LIMIT>();

    bincode::decode_from_slice(bytes, config).map(|r| r.0)
}

/// Decodes a value and requires the buffer to be fully consumed. Consensus
/// payloads carried in transaction envelopes must not have trailing bytes.
pub fn decode_exact<T: bincode::Decode>(bytes: &[u8]) -> Result<T, bincode::error::DecodeError> {
    let config = bincode::config::standard()
        .with_little_endian()
        .with_variable_int_encoding()
        .skip_fixed_array_length()
        .with_limit::<CODEC_BYTES_LIMIT>();

    let (val, read) = bincode::decode_from_slice(bytes, config)?;
    if read != bytes.len() {
        return Err(bincode::error::DecodeError::OtherString(
            "trailing bytes after payload".to_owned(),
        ));
    }
    Ok(val)
}

#[inline]
pub fn encode_fixed_u16<E: bincode::enc::Encoder>(
    v: u16,
    encoder: &mut E,
) -> Result<(), bincode::error::EncodeError> {
    bincode::Encode::encode(&v.to_le_bytes(), encoder)
}

#[inline]
pub fn decode_fixed_u16<D: bincode::de::Decoder>(
    decoder: &mut D,
) -> Result<u16, bincode::error::DecodeError> {
    let v: [u8; 2] = bincode::Decode::decode(decoder)?;
    Ok(u16::from_le_bytes(v))
}

#[inline]
pub fn encode_fixed_u32<E: bincode::enc::Encoder>(
    v: u32,
    encoder: &mut E,
) -> Result<(), bincode::error::EncodeError> {
    bincode::Encode::encode(&v.to_le_bytes(), encoder)
}

#[inline]
pub fn decode_fixed_u32<D: bincode::de::Decoder>(
    decoder: &mut D,
) -> Result<u32, bincode::error::DecodeError> {
    let v: [u8; 4] = bincode::Decode::decode(decoder)?;
    Ok(u32::from_le_bytes(v))
}

#[inline]
pub fn encode_fixed_i64<E: bincode::enc::Encoder>(
    v: i64,
    encoder: &mut E,
) -> Result<(), bincode::error::EncodeError> {
    bincode::Encode::encode(&v.to_le_bytes(), encoder)
}

#[inline]
pub fn decode_fixed_i64<D: bincode::de::Decoder>(
    decoder: &mut D,
) -> Result<i64, bincode::error::DecodeError> {
    let v: [u8; 8] = bincode::Decode::decode(decoder)?;
    Ok(i64::from_le_bytes(v))
}

#[inline]
pub fn encode_fixed_u64<E: bincode::enc::Encoder>(
    v: u64,
    encoder: &mut E,
) -> Result<(), bincode::error::EncodeError> {
    bincode::Encode::encode(&v.to_le_bytes(), encoder)
}

#[inline]
pub fn decode_fixed_u64<D: bincode::de::Decoder>(
    decoder: &mut D,
) -> Result<u64, bincode::error::DecodeError> {
    let v: [u8; 8] = bincode::Decode::decode(decoder)?;
    Ok(u64::from_le_bytes(v))
}
