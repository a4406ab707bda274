//! v2 typed tensors: datatype table, in-memory tensor values and the
//! request/response envelopes shared by the REST and gRPC bindings.

pub mod codec;
pub mod rest;

use crate::error::{DataplaneError, Result};
use half::{bf16, f16};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Fp16,
    Fp32,
    Fp64,
    Bf16,
    Bytes,
}

impl DataType {
    pub const ALL: [DataType; 14] = [
        DataType::Bool,
        DataType::Uint8,
        DataType::Uint16,
        DataType::Uint32,
        DataType::Uint64,
        DataType::Int8,
        DataType::Int16,
        DataType::Int32,
        DataType::Int64,
        DataType::Fp16,
        DataType::Fp32,
        DataType::Fp64,
        DataType::Bf16,
        DataType::Bytes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Bool => "BOOL",
            DataType::Uint8 => "UINT8",
            DataType::Uint16 => "UINT16",
            DataType::Uint32 => "UINT32",
            DataType::Uint64 => "UINT64",
            DataType::Int8 => "INT8",
            DataType::Int16 => "INT16",
            DataType::Int32 => "INT32",
            DataType::Int64 => "INT64",
            DataType::Fp16 => "FP16",
            DataType::Fp32 => "FP32",
            DataType::Fp64 => "FP64",
            DataType::Bf16 => "BF16",
            DataType::Bytes => "BYTES",
        }
    }

    /// Fixed element width in the raw encoding. `None` for BYTES.
    pub fn element_size(&self) -> Option<usize> {
        match self {
            DataType::Bool | DataType::Uint8 | DataType::Int8 => Some(1),
            DataType::Uint16 | DataType::Int16 | DataType::Fp16 | DataType::Bf16 => Some(2),
            DataType::Uint32 | DataType::Int32 | DataType::Fp32 => Some(4),
            DataType::Uint64 | DataType::Int64 | DataType::Fp64 => Some(8),
            DataType::Bytes => None,
        }
    }

    /// Whether `InferTensorContents` has a field for this type.
    pub fn has_structured_contents(&self) -> bool {
        !matches!(self, DataType::Fp16 | DataType::Bf16)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = DataplaneError;

    fn from_str(s: &str) -> Result<Self> {
        DataType::ALL
            .iter()
            .copied()
            .find(|dt| dt.as_str() == s)
            .ok_or_else(|| DataplaneError::invalid_input(format!("invalid datatype '{}'", s)))
    }
}

/// Flattened, typed tensor elements.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Bool(Vec<bool>),
    Uint8(Vec<u8>),
    Uint16(Vec<u16>),
    Uint32(Vec<u32>),
    Uint64(Vec<u64>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Fp16(Vec<f16>),
    Fp32(Vec<f32>),
    Fp64(Vec<f64>),
    Bf16(Vec<bf16>),
    Bytes(Vec<Vec<u8>>),
}

impl TensorData {
    pub fn datatype(&self) -> DataType {
        match self {
            TensorData::Bool(_) => DataType::Bool,
            TensorData::Uint8(_) => DataType::Uint8,
            TensorData::Uint16(_) => DataType::Uint16,
            TensorData::Uint32(_) => DataType::Uint32,
            TensorData::Uint64(_) => DataType::Uint64,
            TensorData::Int8(_) => DataType::Int8,
            TensorData::Int16(_) => DataType::Int16,
            TensorData::Int32(_) => DataType::Int32,
            TensorData::Int64(_) => DataType::Int64,
            TensorData::Fp16(_) => DataType::Fp16,
            TensorData::Fp32(_) => DataType::Fp32,
            TensorData::Fp64(_) => DataType::Fp64,
            TensorData::Bf16(_) => DataType::Bf16,
            TensorData::Bytes(_) => DataType::Bytes,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::Bool(v) => v.len(),
            TensorData::Uint8(v) => v.len(),
            TensorData::Uint16(v) => v.len(),
            TensorData::Uint32(v) => v.len(),
            TensorData::Uint64(v) => v.len(),
            TensorData::Int8(v) => v.len(),
            TensorData::Int16(v) => v.len(),
            TensorData::Int32(v) => v.len(),
            TensorData::Int64(v) => v.len(),
            TensorData::Fp16(v) => v.len(),
            TensorData::Fp32(v) => v.len(),
            TensorData::Fp64(v) => v.len(),
            TensorData::Bf16(v) => v.len(),
            TensorData::Bytes(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Out-of-band scalar parameter attached to a request, response or tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int64(i64),
    String(String),
}

pub type Parameters = BTreeMap<String, ParamValue>;

/// Parameter carrying the exact byte length of a raw-encoded tensor.
pub const BINARY_DATA_SIZE: &str = "binary_data_size";

#[derive(Debug, Clone, PartialEq)]
pub struct InferTensor {
    pub name: String,
    pub shape: Vec<i64>,
    pub parameters: Parameters,
    pub data: TensorData,
}

impl InferTensor {
    /// Builds a tensor, checking that the element count matches the shape.
    pub fn new(name: impl Into<String>, shape: Vec<i64>, data: TensorData) -> Result<Self> {
        let tensor = Self {
            name: name.into(),
            shape,
            parameters: Parameters::new(),
            data,
        };
        tensor.validate()?;
        Ok(tensor)
    }

    pub fn datatype(&self) -> DataType {
        self.data.datatype()
    }

    pub fn validate(&self) -> Result<()> {
        let expected = element_count(&self.shape)?;
        if expected != self.data.len() {
            return Err(DataplaneError::invalid_input(format!(
                "tensor '{}' has {} elements but shape {:?} requires {}",
                self.name,
                self.data.len(),
                self.shape,
                expected
            )));
        }
        Ok(())
    }
}

/// Product of the shape dimensions. Negative dimensions are rejected.
pub fn element_count(shape: &[i64]) -> Result<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| {
        let dim = usize::try_from(dim)
            .map_err(|_| DataplaneError::invalid_input(format!("invalid dimension {} in shape {:?}", dim, shape)))?;
        acc.checked_mul(dim)
            .ok_or_else(|| DataplaneError::invalid_input(format!("shape {:?} is too large", shape)))
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestedOutput {
    pub name: String,
    pub parameters: Parameters,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferRequest {
    pub id: Option<String>,
    pub model_name: String,
    pub parameters: Parameters,
    pub inputs: Vec<InferTensor>,
    pub outputs: Vec<RequestedOutput>,
    /// Set when the request arrived with raw contents; the reply mirrors it.
    pub prefer_raw: bool,
}

impl InferRequest {
    pub fn input(&self, name: &str) -> Option<&InferTensor> {
        self.inputs.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferResponse {
    pub id: Option<String>,
    pub model_name: String,
    pub model_version: Option<String>,
    pub parameters: Parameters,
    pub outputs: Vec<InferTensor>,
}

/// Declared input or output of a model, reported by metadata endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    pub datatype: String,
    pub shape: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datatype_names_round_trip() {
        for dt in DataType::ALL {
            assert_eq!(dt.as_str().parse::<DataType>().unwrap(), dt);
            assert_eq!(dt.to_string(), dt.as_str());
        }
        assert!("FLOAT".parse::<DataType>().is_err());
    }

    #[test]
    fn test_structured_contents_table() {
        assert!(!DataType::Fp16.has_structured_contents());
        assert!(!DataType::Bf16.has_structured_contents());
        assert!(DataType::Fp32.has_structured_contents());
        assert!(DataType::Bytes.has_structured_contents());
    }

    #[test]
    fn test_tensor_shape_validation() {
        let ok = InferTensor::new("x", vec![2, 3], TensorData::Int32(vec![0; 6]));
        assert!(ok.is_ok());

        let bad = InferTensor::new("x", vec![2, 3], TensorData::Int32(vec![0; 5]));
        assert!(matches!(bad, Err(DataplaneError::InvalidInput(_))));

        let negative = InferTensor::new("x", vec![-1], TensorData::Int32(vec![]));
        assert!(negative.is_err());
    }

    #[test]
    fn test_scalar_shape_has_one_element() {
        assert_eq!(element_count(&[]).unwrap(), 1);
        assert_eq!(element_count(&[0, 4]).unwrap(), 0);
    }

    #[test]
    fn test_param_value_json() {
        let params: Parameters = serde_json::from_str(r#"{"a":true,"b":7,"c":"x"}"#).unwrap();
        assert_eq!(params["a"], ParamValue::Bool(true));
        assert_eq!(params["b"], ParamValue::Int64(7));
        assert_eq!(params["c"], ParamValue::String("x".into()));
    }
}
