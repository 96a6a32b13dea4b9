//! Named device properties with type, limits and allowed-value checks.

use crate::error::AcquisitionError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub const PROP_CAMERA_NAME: &str = "CameraName";
pub const PROP_BINNING: &str = "Binning";
pub const PROP_PIXEL_TYPE: &str = "PixelType";
pub const PROP_EXPOSURE: &str = "Exposure";
pub const PROP_GAIN: &str = "HardwareGain";
pub const PROP_PIXEL_CLOCK: &str = "PixelClockMHz";
pub const PROP_FPS: &str = "FPS";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PropertyError {
    #[error("unknown property {0}")]
    UnknownProperty(String),
    #[error("{0} is read-only")]
    ReadOnly(String),
    #[error("{name} expects {expected:?}, got {value}")]
    TypeMismatch {
        name: String,
        expected: PropertyKind,
        value: PropertyValue,
    },
    #[error("{name} = {value} outside [{min}, {max}]")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{name} does not allow {value}")]
    NotAllowed { name: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PropertyKind {
    Integer,
    Float,
    String,
    /// String restricted to the property's allowed values.
    Enum,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl PropertyValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Float(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:.4}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// One property definition together with its current value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Property {
    pub name: &'static str,
    pub kind: PropertyKind,
    pub value: PropertyValue,
    pub read_only: bool,
    /// Changing it requires reprovisioning the frame buffer, so it is
    /// refused while a sequence runs.
    pub capture_affecting: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<(f64, f64)>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
}

impl Property {
    pub fn new(name: &'static str, kind: PropertyKind, value: impl Into<PropertyValue>) -> Self {
        Self {
            name,
            kind,
            value: value.into(),
            read_only: false,
            capture_affecting: false,
            limits: None,
            allowed: Vec::new(),
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn capture_affecting(mut self) -> Self {
        self.capture_affecting = true;
        self
    }

    pub fn with_limits(mut self, min: f64, max: f64) -> Self {
        self.limits = Some((min, max));
        self
    }

    pub fn with_allowed<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.allowed = values.into_iter().map(|v| v.to_string()).collect();
        self
    }

    /// Coerce `value` to this property's kind and check it against the
    /// limits and allowed values.
    pub fn validate(&self, value: &PropertyValue) -> Result<PropertyValue, PropertyError> {
        let mismatch = || PropertyError::TypeMismatch {
            name: self.name.to_string(),
            expected: self.kind,
            value: value.clone(),
        };
        let coerced = match self.kind {
            PropertyKind::Integer => PropertyValue::Integer(value.as_i64().ok_or_else(mismatch)?),
            PropertyKind::Float => PropertyValue::Float(value.as_f64().ok_or_else(mismatch)?),
            PropertyKind::String | PropertyKind::Enum => PropertyValue::Text(value.to_string()),
        };

        if let (Some((min, max)), Some(v)) = (self.limits, coerced.as_f64()) {
            if !(min..=max).contains(&v) {
                return Err(PropertyError::OutOfRange {
                    name: self.name.to_string(),
                    value: v,
                    min,
                    max,
                });
            }
        }

        if !self.allowed.is_empty() {
            let text = coerced.to_string();
            if !self.allowed.iter().any(|a| *a == text) {
                return Err(PropertyError::NotAllowed {
                    name: self.name.to_string(),
                    value: text,
                });
            }
        }
        Ok(coerced)
    }
}

/// The device's property table.
#[derive(Debug, Clone, Default)]
pub struct PropertyRegistry {
    props: BTreeMap<&'static str, Property>,
}

impl PropertyRegistry {
    pub fn define(&mut self, property: Property) {
        self.props.insert(property.name, property);
    }

    pub fn get(&self, name: &str) -> Result<&Property, PropertyError> {
        self.props
            .get(name)
            .ok_or_else(|| PropertyError::UnknownProperty(name.to_string()))
    }

    pub fn value(&self, name: &str) -> Result<PropertyValue, PropertyError> {
        self.get(name).map(|p| p.value.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.props.values()
    }

    /// Check a write request without applying it.
    ///
    /// Capture-affecting properties are refused with `DeviceBusy` while
    /// `capturing`.
    pub fn validate_set(
        &self,
        name: &str,
        value: &PropertyValue,
        capturing: bool,
    ) -> Result<PropertyValue, AcquisitionError> {
        let prop = self.get(name)?;
        if prop.read_only {
            return Err(PropertyError::ReadOnly(name.to_string()).into());
        }
        if prop.capture_affecting && capturing {
            return Err(AcquisitionError::DeviceBusy("sequence acquisition running"));
        }
        Ok(prop.validate(value)?)
    }

    /// Record the value now in effect on the device. Read-only properties
    /// are updated through here as well.
    pub fn store(&mut self, name: &str, value: impl Into<PropertyValue>) {
        if let Some(prop) = self.props.get_mut(name) {
            prop.value = value.into();
        }
    }

    pub fn set_limits(&mut self, name: &str, min: f64, max: f64) {
        if let Some(prop) = self.props.get_mut(name) {
            prop.limits = Some((min, max));
        }
    }

    pub fn set_allowed<I, S>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        if let Some(prop) = self.props.get_mut(name) {
            prop.allowed = values.into_iter().map(|v| v.to_string()).collect();
        }
    }
}
