//! JSON form of v2 tensors used by the REST binding and the remote
//! predictor client. `data` may be flat or nested; nested arrays are
//! flattened row-major. BYTES elements are JSON strings.

use super::{DataType, InferRequest, InferResponse, InferTensor, Parameters, RequestedOutput, TensorData};
use crate::error::{DataplaneError, Result};
use half::{bf16, f16};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize)]
pub struct RestTensor {
    pub name: String,
    pub shape: Vec<i64>,
    pub datatype: String,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    pub parameters: Parameters,
    pub data: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RestRequestedOutput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    pub parameters: Parameters,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RestInferRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    pub parameters: Parameters,
    pub inputs: Vec<RestTensor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<RestRequestedOutput>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RestInferResponse {
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    pub parameters: Parameters,
    pub outputs: Vec<RestTensor>,
}

pub fn decode_request(model_name: &str, body: &[u8]) -> Result<InferRequest> {
    let request: RestInferRequest = serde_json::from_slice(body)?;
    Ok(InferRequest {
        id: request.id,
        model_name: model_name.to_string(),
        parameters: request.parameters,
        inputs: request
            .inputs
            .into_iter()
            .map(tensor_from_rest)
            .collect::<Result<_>>()?,
        outputs: request
            .outputs
            .into_iter()
            .map(|o| RequestedOutput {
                name: o.name,
                parameters: o.parameters,
            })
            .collect(),
        prefer_raw: false,
    })
}

pub fn encode_request(request: &InferRequest) -> Result<RestInferRequest> {
    Ok(RestInferRequest {
        id: request.id.clone(),
        parameters: request.parameters.clone(),
        inputs: request.inputs.iter().map(tensor_to_rest).collect::<Result<_>>()?,
        outputs: request
            .outputs
            .iter()
            .map(|o| RestRequestedOutput {
                name: o.name.clone(),
                parameters: o.parameters.clone(),
            })
            .collect(),
    })
}

/// Fails with `Internal` when an output cannot be carried as JSON.
pub fn encode_response(response: &InferResponse) -> Result<RestInferResponse> {
    let outputs = response
        .outputs
        .iter()
        .map(tensor_to_rest)
        .collect::<Result<_>>()
        .map_err(|e| DataplaneError::Internal(format!("cannot encode response as JSON: {}", e)))?;
    Ok(RestInferResponse {
        model_name: response.model_name.clone(),
        model_version: response.model_version.clone(),
        id: response.id.clone(),
        parameters: response.parameters.clone(),
        outputs,
    })
}

pub fn decode_response(body: &[u8]) -> Result<InferResponse> {
    let response: RestInferResponse = serde_json::from_slice(body)?;
    Ok(InferResponse {
        id: response.id,
        model_name: response.model_name,
        model_version: response.model_version,
        parameters: response.parameters,
        outputs: response
            .outputs
            .into_iter()
            .map(tensor_from_rest)
            .collect::<Result<_>>()?,
    })
}

pub fn tensor_from_rest(tensor: RestTensor) -> Result<InferTensor> {
    let datatype: DataType = tensor.datatype.parse()?;
    let mut flat = Vec::new();
    flatten(&tensor.data, &mut flat);
    let data = values_to_data(datatype, &flat)?;
    let tensor = InferTensor {
        name: tensor.name,
        shape: tensor.shape,
        parameters: tensor.parameters,
        data,
    };
    tensor.validate()?;
    Ok(tensor)
}

/// BYTES elements must be UTF-8 to travel as JSON strings.
pub fn tensor_to_rest(tensor: &InferTensor) -> Result<RestTensor> {
    let data = data_to_value(&tensor.data).map_err(|index| {
        DataplaneError::invalid_input(format!(
            "BYTES element {} of tensor '{}' is not valid UTF-8",
            index, tensor.name
        ))
    })?;
    Ok(RestTensor {
        name: tensor.name.clone(),
        shape: tensor.shape.clone(),
        datatype: tensor.datatype().as_str().to_string(),
        parameters: tensor.parameters.clone(),
        data,
    })
}

fn flatten<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| flatten(v, out)),
        other => out.push(other),
    }
}

fn collect<T>(values: &[&Value], datatype: DataType, convert: impl Fn(&Value) -> Option<T>) -> Result<Vec<T>> {
    values
        .iter()
        .map(|v| {
            convert(v).ok_or_else(|| {
                DataplaneError::invalid_input(format!("invalid {} element: {}", datatype, v))
            })
        })
        .collect()
}

fn values_to_data(datatype: DataType, values: &[&Value]) -> Result<TensorData> {
    let unsigned = |v: &Value| v.as_u64();
    let signed = |v: &Value| v.as_i64();
    Ok(match datatype {
        DataType::Bool => TensorData::Bool(collect(values, datatype, Value::as_bool)?),
        DataType::Uint8 => TensorData::Uint8(collect(values, datatype, |v| unsigned(v)?.try_into().ok())?),
        DataType::Uint16 => TensorData::Uint16(collect(values, datatype, |v| unsigned(v)?.try_into().ok())?),
        DataType::Uint32 => TensorData::Uint32(collect(values, datatype, |v| unsigned(v)?.try_into().ok())?),
        DataType::Uint64 => TensorData::Uint64(collect(values, datatype, unsigned)?),
        DataType::Int8 => TensorData::Int8(collect(values, datatype, |v| signed(v)?.try_into().ok())?),
        DataType::Int16 => TensorData::Int16(collect(values, datatype, |v| signed(v)?.try_into().ok())?),
        DataType::Int32 => TensorData::Int32(collect(values, datatype, |v| signed(v)?.try_into().ok())?),
        DataType::Int64 => TensorData::Int64(collect(values, datatype, signed)?),
        DataType::Fp16 => TensorData::Fp16(collect(values, datatype, |v| v.as_f64().map(f16::from_f64))?),
        DataType::Fp32 => TensorData::Fp32(collect(values, datatype, |v| v.as_f64().map(|f| f as f32))?),
        DataType::Fp64 => TensorData::Fp64(collect(values, datatype, Value::as_f64)?),
        DataType::Bf16 => TensorData::Bf16(collect(values, datatype, |v| v.as_f64().map(bf16::from_f64))?),
        DataType::Bytes => TensorData::Bytes(collect(values, datatype, |v| {
            v.as_str().map(|s| s.as_bytes().to_vec())
        })?),
    })
}

/// Err carries the index of the first BYTES element that is not UTF-8.
fn data_to_value(data: &TensorData) -> std::result::Result<Value, usize> {
    Ok(match data {
        TensorData::Bool(v) => Value::from(v.clone()),
        TensorData::Uint8(v) => Value::from(v.clone()),
        TensorData::Uint16(v) => Value::from(v.clone()),
        TensorData::Uint32(v) => Value::from(v.clone()),
        TensorData::Uint64(v) => Value::from(v.clone()),
        TensorData::Int8(v) => Value::from(v.clone()),
        TensorData::Int16(v) => Value::from(v.clone()),
        TensorData::Int32(v) => Value::from(v.clone()),
        TensorData::Int64(v) => Value::from(v.clone()),
        TensorData::Fp16(v) => Value::from(v.iter().map(|x| x.to_f64()).collect::<Vec<_>>()),
        TensorData::Fp32(v) => Value::from(v.clone()),
        TensorData::Fp64(v) => Value::from(v.clone()),
        TensorData::Bf16(v) => Value::from(v.iter().map(|x| x.to_f64()).collect::<Vec<_>>()),
        TensorData::Bytes(v) => Value::from(
            v.iter()
                .enumerate()
                .map(|(i, b)| String::from_utf8(b.clone()).map_err(|_| i))
                .collect::<std::result::Result<Vec<_>, _>>()?,
        ),
    })
}
