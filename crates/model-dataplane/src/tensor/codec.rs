//! Wire codec for v2 tensors.
//!
//! Raw buffers are little-endian, fixed width per element. BOOL takes one
//! byte per element and BYTES is a sequence of 4-byte LE length prefixes
//! each followed by the element bytes. Structured contents use the typed
//! `InferTensorContents` lists; FP16 and BF16 have no structured field and
//! always travel raw.

use super::{element_count, DataType, InferRequest, InferResponse, InferTensor, ParamValue, Parameters, RequestedOutput, TensorData, BINARY_DATA_SIZE};
use crate::error::{DataplaneError, Result};
use crate::grpc::inference as pb;
use half::{bf16, f16};
use std::collections::HashMap;

macro_rules! to_le {
    ($values:expr) => {
        $values.iter().flat_map(|x| x.to_le_bytes()).collect()
    };
}

macro_rules! from_le {
    ($raw:expr, $t:ty) => {
        $raw.chunks_exact(std::mem::size_of::<$t>())
            .map(|chunk| {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(chunk);
                <$t>::from_le_bytes(buf)
            })
            .collect()
    };
}

pub fn encode_raw(data: &TensorData) -> Vec<u8> {
    match data {
        TensorData::Bool(v) => v.iter().map(|&b| b as u8).collect(),
        TensorData::Uint8(v) => v.clone(),
        TensorData::Uint16(v) => to_le!(v),
        TensorData::Uint32(v) => to_le!(v),
        TensorData::Uint64(v) => to_le!(v),
        TensorData::Int8(v) => v.iter().map(|&x| x as u8).collect(),
        TensorData::Int16(v) => to_le!(v),
        TensorData::Int32(v) => to_le!(v),
        TensorData::Int64(v) => to_le!(v),
        TensorData::Fp16(v) => to_le!(v),
        TensorData::Fp32(v) => to_le!(v),
        TensorData::Fp64(v) => to_le!(v),
        TensorData::Bf16(v) => to_le!(v),
        TensorData::Bytes(v) => {
            let mut out = Vec::with_capacity(v.iter().map(|e| e.len() + 4).sum());
            for element in v {
                out.extend_from_slice(&(element.len() as u32).to_le_bytes());
                out.extend_from_slice(element);
            }
            out
        }
    }
}

pub fn decode_raw(datatype: DataType, shape: &[i64], raw: &[u8]) -> Result<TensorData> {
    let count = element_count(shape)?;
    let data = match datatype.element_size() {
        None => TensorData::Bytes(decode_bytes(raw)?),
        Some(size) => {
            let expected = count.checked_mul(size).ok_or_else(|| {
                DataplaneError::invalid_input(format!("shape {:?} is too large for {} raw content", shape, datatype))
            })?;
            if raw.len() != expected {
                return Err(DataplaneError::invalid_input(format!(
                    "raw content for {} tensor of shape {:?} must be {} bytes, got {}",
                    datatype,
                    shape,
                    expected,
                    raw.len()
                )));
            }
            match datatype {
                DataType::Bool => TensorData::Bool(raw.iter().map(|&b| b != 0).collect()),
                DataType::Uint8 => TensorData::Uint8(raw.to_vec()),
                DataType::Uint16 => TensorData::Uint16(from_le!(raw, u16)),
                DataType::Uint32 => TensorData::Uint32(from_le!(raw, u32)),
                DataType::Uint64 => TensorData::Uint64(from_le!(raw, u64)),
                DataType::Int8 => TensorData::Int8(raw.iter().map(|&b| b as i8).collect()),
                DataType::Int16 => TensorData::Int16(from_le!(raw, i16)),
                DataType::Int32 => TensorData::Int32(from_le!(raw, i32)),
                DataType::Int64 => TensorData::Int64(from_le!(raw, i64)),
                DataType::Fp16 => TensorData::Fp16(from_le!(raw, f16)),
                DataType::Fp32 => TensorData::Fp32(from_le!(raw, f32)),
                DataType::Fp64 => TensorData::Fp64(from_le!(raw, f64)),
                DataType::Bf16 => TensorData::Bf16(from_le!(raw, bf16)),
                DataType::Bytes => unreachable!("BYTES has no fixed element size"),
            }
        }
    };
    if data.len() != count {
        return Err(DataplaneError::invalid_input(format!(
            "raw content holds {} elements, shape {:?} requires {}",
            data.len(),
            shape,
            count
        )));
    }
    Ok(data)
}

fn decode_bytes(raw: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut elements = Vec::new();
    let mut offset = 0;
    while offset < raw.len() {
        let Some(prefix) = raw.get(offset..offset + 4) else {
            return Err(DataplaneError::invalid_input("truncated BYTES length prefix"));
        };
        let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        offset += 4;
        let Some(element) = raw.get(offset..offset + len) else {
            return Err(DataplaneError::invalid_input(format!(
                "BYTES element declares {} bytes but only {} remain",
                len,
                raw.len() - offset
            )));
        };
        elements.push(element.to_vec());
        offset += len;
    }
    Ok(elements)
}

/// Structured encoding, `None` when the datatype has no contents field.
pub fn to_contents(data: &TensorData) -> Option<pb::InferTensorContents> {
    let mut contents = pb::InferTensorContents::default();
    match data {
        TensorData::Bool(v) => contents.bool_contents = v.clone(),
        TensorData::Uint8(v) => contents.uint_contents = v.iter().map(|&x| x as u32).collect(),
        TensorData::Uint16(v) => contents.uint_contents = v.iter().map(|&x| x as u32).collect(),
        TensorData::Uint32(v) => contents.uint_contents = v.clone(),
        TensorData::Uint64(v) => contents.uint64_contents = v.clone(),
        TensorData::Int8(v) => contents.int_contents = v.iter().map(|&x| x as i32).collect(),
        TensorData::Int16(v) => contents.int_contents = v.iter().map(|&x| x as i32).collect(),
        TensorData::Int32(v) => contents.int_contents = v.clone(),
        TensorData::Int64(v) => contents.int64_contents = v.clone(),
        TensorData::Fp32(v) => contents.fp32_contents = v.clone(),
        TensorData::Fp64(v) => contents.fp64_contents = v.clone(),
        TensorData::Bytes(v) => contents.bytes_contents = v.clone(),
        TensorData::Fp16(_) | TensorData::Bf16(_) => return None,
    }
    Some(contents)
}

fn narrow<S, T>(values: &[S], datatype: DataType) -> Result<Vec<T>>
where
    S: Copy + std::fmt::Display,
    T: TryFrom<S>,
{
    values
        .iter()
        .map(|&v| {
            T::try_from(v).map_err(|_| {
                DataplaneError::invalid_input(format!("value {} is out of range for {}", v, datatype))
            })
        })
        .collect()
}

pub fn from_contents(datatype: DataType, contents: &pb::InferTensorContents) -> Result<TensorData> {
    Ok(match datatype {
        DataType::Bool => TensorData::Bool(contents.bool_contents.clone()),
        DataType::Uint8 => TensorData::Uint8(narrow(&contents.uint_contents, datatype)?),
        DataType::Uint16 => TensorData::Uint16(narrow(&contents.uint_contents, datatype)?),
        DataType::Uint32 => TensorData::Uint32(contents.uint_contents.clone()),
        DataType::Uint64 => TensorData::Uint64(contents.uint64_contents.clone()),
        DataType::Int8 => TensorData::Int8(narrow(&contents.int_contents, datatype)?),
        DataType::Int16 => TensorData::Int16(narrow(&contents.int_contents, datatype)?),
        DataType::Int32 => TensorData::Int32(contents.int_contents.clone()),
        DataType::Int64 => TensorData::Int64(contents.int64_contents.clone()),
        DataType::Fp32 => TensorData::Fp32(contents.fp32_contents.clone()),
        DataType::Fp64 => TensorData::Fp64(contents.fp64_contents.clone()),
        DataType::Bytes => TensorData::Bytes(contents.bytes_contents.clone()),
        DataType::Fp16 | DataType::Bf16 => {
            return Err(DataplaneError::invalid_input(format!(
                "{} tensors must be sent in raw_input_contents",
                datatype
            )))
        }
    })
}

fn contents_is_empty(c: &pb::InferTensorContents) -> bool {
    c.bool_contents.is_empty()
        && c.int_contents.is_empty()
        && c.int64_contents.is_empty()
        && c.uint_contents.is_empty()
        && c.uint64_contents.is_empty()
        && c.fp32_contents.is_empty()
        && c.fp64_contents.is_empty()
        && c.bytes_contents.is_empty()
}

pub fn params_from_pb(params: HashMap<String, pb::InferParameter>) -> Parameters {
    use pb::infer_parameter::ParameterChoice;
    params
        .into_iter()
        .filter_map(|(key, p)| {
            let value = match p.parameter_choice? {
                ParameterChoice::BoolParam(b) => ParamValue::Bool(b),
                ParameterChoice::Int64Param(i) => ParamValue::Int64(i),
                ParameterChoice::StringParam(s) => ParamValue::String(s),
            };
            Some((key, value))
        })
        .collect()
}

pub fn params_to_pb(params: &Parameters) -> HashMap<String, pb::InferParameter> {
    use pb::infer_parameter::ParameterChoice;
    params
        .iter()
        .map(|(key, value)| {
            let choice = match value {
                ParamValue::Bool(b) => ParameterChoice::BoolParam(*b),
                ParamValue::Int64(i) => ParameterChoice::Int64Param(*i),
                ParamValue::String(s) => ParameterChoice::StringParam(s.clone()),
            };
            (key.clone(), pb::InferParameter { parameter_choice: Some(choice) })
        })
        .collect()
}

/// Decode a gRPC `ModelInferRequest`.
///
/// Raw buffers are matched to inputs by position. A request mixing raw and
/// structured contents for one input, or carrying a raw buffer count other
/// than the input count, is rejected.
pub fn decode_infer_request(request: pb::ModelInferRequest) -> Result<InferRequest> {
    let pb::ModelInferRequest {
        model_name,
        model_version: _,
        id,
        parameters,
        inputs,
        outputs,
        raw_input_contents,
    } = request;

    let use_raw = !raw_input_contents.is_empty();
    if use_raw && raw_input_contents.len() != inputs.len() {
        return Err(DataplaneError::invalid_input(format!(
            "expected {} raw_input_contents buffers, got {}",
            inputs.len(),
            raw_input_contents.len()
        )));
    }

    let mut decoded = Vec::with_capacity(inputs.len());
    for (idx, input) in inputs.into_iter().enumerate() {
        let datatype: DataType = input.datatype.parse()?;
        let data = match (use_raw, input.contents) {
            (true, Some(contents)) if !contents_is_empty(&contents) => {
                return Err(DataplaneError::invalid_input(format!(
                    "input '{}' sets both contents and raw_input_contents",
                    input.name
                )));
            }
            (true, _) => decode_raw(datatype, &input.shape, &raw_input_contents[idx])?,
            (false, contents) => from_contents(datatype, &contents.unwrap_or_default())?,
        };
        let tensor = InferTensor {
            name: input.name,
            shape: input.shape,
            parameters: params_from_pb(input.parameters),
            data,
        };
        tensor.validate()?;
        decoded.push(tensor);
    }

    Ok(InferRequest {
        id: (!id.is_empty()).then_some(id),
        model_name,
        parameters: params_from_pb(parameters),
        inputs: decoded,
        outputs: outputs
            .into_iter()
            .map(|o| RequestedOutput {
                name: o.name,
                parameters: params_from_pb(o.parameters),
            })
            .collect(),
        prefer_raw: use_raw,
    })
}

/// Encode an `InferResponse` for gRPC.
///
/// Raw encoding is all-or-nothing: if any output lacks a structured field,
/// or `prefer_raw` is set, every output goes to `raw_output_contents` and
/// carries a `binary_data_size` parameter with its exact byte length.
pub fn encode_infer_response(response: InferResponse, prefer_raw: bool) -> pb::ModelInferResponse {
    let use_raw = prefer_raw
        || response
            .outputs
            .iter()
            .any(|t| !t.datatype().has_structured_contents());

    let mut outputs = Vec::with_capacity(response.outputs.len());
    let mut raw_output_contents = Vec::new();
    for tensor in response.outputs {
        let datatype = tensor.datatype();
        let mut parameters = params_to_pb(&tensor.parameters);
        let contents = if use_raw {
            let raw = encode_raw(&tensor.data);
            parameters.insert(
                BINARY_DATA_SIZE.to_string(),
                pb::InferParameter {
                    parameter_choice: Some(pb::infer_parameter::ParameterChoice::Int64Param(raw.len() as i64)),
                },
            );
            raw_output_contents.push(raw);
            None
        } else {
            to_contents(&tensor.data)
        };
        outputs.push(pb::model_infer_response::InferOutputTensor {
            name: tensor.name,
            datatype: datatype.as_str().to_string(),
            shape: tensor.shape,
            parameters,
            contents,
        });
    }

    pb::ModelInferResponse {
        model_name: response.model_name,
        model_version: response.model_version.unwrap_or_default(),
        id: response.id.unwrap_or_default(),
        parameters: params_to_pb(&response.parameters),
        outputs,
        raw_output_contents,
    }
}
