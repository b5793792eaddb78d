//! Flight session options
//!
//! `SetSessionOptions` and `CloseSession` travel as Flight actions whose
//! bodies are the protobuf messages below, field-for-field as declared in
//! `Flight.proto`.

use std::collections::HashMap;
use std::fmt;

/// Action type for setting session options
pub const SET_SESSION_OPTIONS: &str = "SetSessionOptions";
/// Action type for closing the server-side session
pub const CLOSE_SESSION: &str = "CloseSession";
/// Session option naming the project queries run against
pub const PROJECT_ID: &str = "project_id";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SessionOptionValue {
    #[prost(oneof = "OptionValue", tags = "1, 2, 3, 4, 5")]
    pub option_value: Option<OptionValue>,
}

#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum OptionValue {
    #[prost(string, tag = "1")]
    StringValue(String),
    #[prost(bool, tag = "2")]
    BoolValue(bool),
    #[prost(sfixed64, tag = "3")]
    Int64Value(i64),
    #[prost(double, tag = "4")]
    DoubleValue(f64),
    #[prost(message, tag = "5")]
    StringListValue(StringListValue),
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StringListValue {
    #[prost(string, repeated, tag = "1")]
    pub values: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetSessionOptionsRequest {
    #[prost(map = "string, message", tag = "1")]
    pub session_options: HashMap<String, SessionOptionValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetSessionOptionsResult {
    #[prost(map = "string, message", tag = "1")]
    pub errors: HashMap<String, SessionOptionError>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SessionOptionError {
    #[prost(enumeration = "SessionOptionErrorValue", tag = "1")]
    pub value: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SessionOptionErrorValue {
    Unspecified = 0,
    InvalidName = 1,
    InvalidValue = 2,
    Error = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CloseSessionRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CloseSessionResult {
    #[prost(enumeration = "CloseSessionStatus", tag = "1")]
    pub status: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum CloseSessionStatus {
    Unspecified = 0,
    Closed = 1,
    Closing = 2,
    NotCloseable = 3,
}

impl From<&str> for SessionOptionValue {
    fn from(value: &str) -> Self {
        Self {
            option_value: Some(OptionValue::StringValue(value.to_string())),
        }
    }
}

impl From<bool> for SessionOptionValue {
    fn from(value: bool) -> Self {
        Self {
            option_value: Some(OptionValue::BoolValue(value)),
        }
    }
}

impl From<i64> for SessionOptionValue {
    fn from(value: i64) -> Self {
        Self {
            option_value: Some(OptionValue::Int64Value(value)),
        }
    }
}

impl SessionOptionValue {
    pub fn as_str(&self) -> Option<&str> {
        match &self.option_value {
            Some(OptionValue::StringValue(s)) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for SessionOptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.option_value {
            Some(OptionValue::StringValue(v)) => write!(f, "{}", v),
            Some(OptionValue::BoolValue(v)) => write!(f, "{}", v),
            Some(OptionValue::Int64Value(v)) => write!(f, "{}", v),
            Some(OptionValue::DoubleValue(v)) => write!(f, "{}", v),
            Some(OptionValue::StringListValue(list)) => write!(f, "[{}]", list.values.join(", ")),
            None => write!(f, "<unset>"),
        }
    }
}

impl SetSessionOptionsRequest {
    /// Request setting string-valued options
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        Self {
            session_options: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), SessionOptionValue::from(v)))
                .collect(),
        }
    }
}

impl SetSessionOptionsResult {
    /// Render rejected options as `name (reason)` in name order
    pub fn describe_errors(&self) -> String {
        let mut names: Vec<&String> = self.errors.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| {
                let reason = SessionOptionErrorValue::try_from(self.errors[name].value)
                    .unwrap_or(SessionOptionErrorValue::Unspecified);
                format!("{} ({:?})", name, reason)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}
