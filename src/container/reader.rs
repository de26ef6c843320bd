//! Container parsing and span validation

use std::collections::{HashMap, HashSet};
use std::io::Cursor;

use tracing::info;

use super::io::{
    read_bool, read_f32, read_f64, read_i16, read_i32, read_i64, read_i8, read_string, read_u16,
    read_u32, read_u64, read_u8,
};
use super::types::{
    data_base_for, Container, ContainerHeader, MetaValue, TensorDescriptor, ALIGNMENT,
    CONTAINER_MAGIC, CONTAINER_VERSION, MAX_ARRAY_LEN, MAX_DIMS, MAX_METADATA_COUNT,
    MAX_TENSOR_COUNT, PREAMBLE_LEN,
};
use crate::error::{Result, VargateError};
use crate::quantize::QuantKind;

impl Container {
    /// Parse and validate a container from its full file bytes
    ///
    /// # Errors
    ///
    /// Returns [`VargateError::FormatError`] if:
    /// - the magic or version is unrecognized
    /// - the metadata section is truncated or its length disagrees with `meta_len`
    /// - a descriptor names an unknown quantization kind
    /// - a tensor span is misaligned, overlaps the metadata, runs past the end
    ///   of the file, or disagrees with its kind's block arithmetic
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let header = Self::parse_header(&mut cursor)?;
        let metadata_end = usize::try_from(header.meta_len)
            .ok()
            .and_then(|len| len.checked_add(PREAMBLE_LEN))
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                VargateError::format(format!(
                    "metadata length {} exceeds file size {}",
                    header.meta_len,
                    data.len()
                ))
            })?;

        // Parse only within the declared metadata section
        let mut meta_cursor = Cursor::new(&data[..metadata_end]);
        meta_cursor.set_position(PREAMBLE_LEN as u64);

        let metadata = Self::parse_metadata(&mut meta_cursor)?;
        let tensors = Self::parse_tensor_descriptors(&mut meta_cursor)?;

        let consumed = meta_cursor.position() as usize;
        if consumed != metadata_end {
            return Err(VargateError::format(format!(
                "metadata section declares {} bytes but {} were parsed",
                header.meta_len,
                consumed - PREAMBLE_LEN
            )));
        }

        let data_base = data_base_for(metadata_end);
        Self::validate_spans(&tensors, metadata_end, data_base, data.len())?;

        info!(
            tensors = tensors.len(),
            metadata_entries = metadata.len(),
            metadata_end,
            data_base,
            "parsed model container"
        );

        Ok(Self {
            header,
            metadata,
            tensors,
            metadata_end,
            data_base,
        })
    }

    fn parse_header(cursor: &mut Cursor<&[u8]>) -> Result<ContainerHeader> {
        let magic = read_u32(cursor)?;
        if magic != CONTAINER_MAGIC {
            return Err(VargateError::format(format!(
                "invalid container magic: 0x{magic:08X}, expected 0x{CONTAINER_MAGIC:08X}"
            )));
        }

        let version = read_u32(cursor)?;
        if version != CONTAINER_VERSION {
            return Err(VargateError::format(format!(
                "unsupported container version {version}, only {CONTAINER_VERSION} is supported"
            )));
        }

        let meta_len = read_u64(cursor)?;
        Ok(ContainerHeader {
            magic,
            version,
            meta_len,
        })
    }

    fn parse_metadata(cursor: &mut Cursor<&[u8]>) -> Result<HashMap<String, MetaValue>> {
        let count = read_u64(cursor)?;
        if count > MAX_METADATA_COUNT {
            return Err(VargateError::format(format!(
                "metadata count {count} exceeds maximum {MAX_METADATA_COUNT} (corrupted header?)"
            )));
        }

        let mut metadata = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            let key = read_string(cursor)?;
            let value_type = read_u32(cursor)?;
            let value = Self::read_value(cursor, value_type, true)?;
            if metadata.insert(key.clone(), value).is_some() {
                return Err(VargateError::format(format!("duplicate metadata key '{key}'")));
            }
        }
        Ok(metadata)
    }

    fn read_value(cursor: &mut Cursor<&[u8]>, value_type: u32, allow_array: bool) -> Result<MetaValue> {
        Ok(match value_type {
            0 => MetaValue::UInt8(read_u8(cursor)?),
            1 => MetaValue::Int8(read_i8(cursor)?),
            2 => MetaValue::UInt16(read_u16(cursor)?),
            3 => MetaValue::Int16(read_i16(cursor)?),
            4 => MetaValue::UInt32(read_u32(cursor)?),
            5 => MetaValue::Int32(read_i32(cursor)?),
            6 => MetaValue::Float32(read_f32(cursor)?),
            7 => MetaValue::Bool(read_bool(cursor)?),
            8 => MetaValue::String(read_string(cursor)?),
            9 if allow_array => {
                let elem_type = read_u32(cursor)?;
                let len = read_u64(cursor)?;
                if len > MAX_ARRAY_LEN {
                    return Err(VargateError::format(format!(
                        "array length {len} exceeds maximum {MAX_ARRAY_LEN}"
                    )));
                }
                // Every element takes at least one byte
                let remaining = cursor.get_ref().len().saturating_sub(cursor.position() as usize);
                let mut values = Vec::with_capacity((len as usize).min(remaining));
                for _ in 0..len {
                    values.push(Self::read_value(cursor, elem_type, false)?);
                }
                MetaValue::Array(values)
            },
            9 => return Err(VargateError::format("nested metadata arrays are not supported")),
            10 => MetaValue::UInt64(read_u64(cursor)?),
            11 => MetaValue::Int64(read_i64(cursor)?),
            12 => MetaValue::Float64(read_f64(cursor)?),
            other => {
                return Err(VargateError::format(format!("unknown metadata value type {other}")));
            },
        })
    }

    fn parse_tensor_descriptors(cursor: &mut Cursor<&[u8]>) -> Result<Vec<TensorDescriptor>> {
        let count = read_u64(cursor)?;
        if count > MAX_TENSOR_COUNT {
            return Err(VargateError::format(format!(
                "tensor count {count} exceeds maximum {MAX_TENSOR_COUNT} (corrupted header?)"
            )));
        }

        let mut seen = HashSet::with_capacity(count as usize);
        let mut tensors = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = read_string(cursor)?;
            let n_dims = read_u32(cursor)?;
            if n_dims == 0 || n_dims > MAX_DIMS {
                return Err(VargateError::format(format!(
                    "tensor '{name}' has {n_dims} dims, expected 1..={MAX_DIMS}"
                )));
            }

            let mut dims = Vec::with_capacity(n_dims as usize);
            for _ in 0..n_dims {
                let dim = read_u64(cursor)?;
                let dim = usize::try_from(dim).map_err(|_| {
                    VargateError::format(format!("tensor '{name}' dimension {dim} exceeds usize"))
                })?;
                dims.push(dim);
            }

            let kind_id = read_u32(cursor)?;
            let kind = QuantKind::from_id(kind_id).ok_or_else(|| {
                VargateError::format(format!(
                    "tensor '{name}' has unsupported quantization kind id {kind_id}"
                ))
            })?;
            let offset = read_u64(cursor)?;
            let byte_len = read_u64(cursor)?;

            if !seen.insert(name.clone()) {
                return Err(VargateError::format(format!("duplicate tensor name '{name}'")));
            }
            tensors.push(TensorDescriptor {
                name,
                dims,
                kind,
                offset,
                byte_len,
            });
        }
        Ok(tensors)
    }

    fn validate_spans(
        tensors: &[TensorDescriptor],
        metadata_end: usize,
        data_base: usize,
        file_len: usize,
    ) -> Result<()> {
        for desc in tensors {
            let name = &desc.name;
            let elements = desc
                .dims
                .iter()
                .try_fold(1usize, |acc, &d| acc.checked_mul(d))
                .ok_or_else(|| VargateError::format(format!("tensor '{name}' element count overflows")))?;

            let expected = desc.kind.byte_len(elements).ok_or_else(|| {
                VargateError::format(format!(
                    "tensor '{name}': {elements} elements is not a whole number of {} blocks",
                    desc.kind
                ))
            })?;
            if desc.byte_len != expected as u64 {
                return Err(VargateError::format(format!(
                    "tensor '{name}' declares {} bytes, {} x {elements} needs {expected}",
                    desc.byte_len, desc.kind
                )));
            }

            if desc.offset % ALIGNMENT as u64 != 0 {
                return Err(VargateError::format(format!(
                    "tensor '{name}' offset {} is not {ALIGNMENT}-byte aligned",
                    desc.offset
                )));
            }

            let start = (data_base as u64).checked_add(desc.offset);
            let end = start.and_then(|s| s.checked_add(desc.byte_len));
            match (start, end) {
                (Some(start), _) if start < metadata_end as u64 => {
                    return Err(VargateError::format(format!(
                        "tensor '{name}' starts at {start}, inside the metadata section (ends at {metadata_end})"
                    )));
                },
                (Some(_), Some(end)) if end <= file_len as u64 => {},
                _ => {
                    return Err(VargateError::format(format!(
                        "tensor '{name}' span (offset {}, {} bytes) runs past end of file ({file_len} bytes)",
                        desc.offset, desc.byte_len
                    )));
                },
            }
        }
        Ok(())
    }

    /// Borrow the byte span of a tensor out of the file bytes this container was parsed from
    ///
    /// # Errors
    ///
    /// Returns [`VargateError::FormatError`] if the span lies outside `data`.
    pub fn tensor_bytes<'a>(&self, desc: &TensorDescriptor, data: &'a [u8]) -> Result<&'a [u8]> {
        let start = self.data_base + desc.offset as usize;
        let end = start + desc.byte_len as usize;
        data.get(start..end).ok_or_else(|| {
            VargateError::format(format!(
                "tensor '{}' span {start}..{end} outside {} bytes",
                desc.name,
                data.len()
            ))
        })
    }

    /// Look up a tensor descriptor by name
    #[must_use]
    pub fn tensor(&self, name: &str) -> Option<&TensorDescriptor> {
        self.tensors.iter().find(|t| t.name == name)
    }

    /// Integer metadata value
    #[must_use]
    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.metadata.get(key).and_then(MetaValue::as_usize)
    }

    /// Float metadata value
    #[must_use]
    pub fn get_f32(&self, key: &str) -> Option<f32> {
        self.metadata.get(key).and_then(MetaValue::as_f32)
    }

    /// String metadata value
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(MetaValue::as_str)
    }

    /// String-array metadata value; `None` if absent or any element is not a string
    #[must_use]
    pub fn get_string_array(&self, key: &str) -> Option<Vec<&str>> {
        match self.metadata.get(key)? {
            MetaValue::Array(items) => items.iter().map(MetaValue::as_str).collect(),
            _ => None,
        }
    }
}
