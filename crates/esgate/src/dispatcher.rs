//! 🧭 The Dispatcher — turns `/api/select/people/person/42` into "select, with three params".
//!
//! The path is the whole call: a fixed prefix, an operation name, then up to five
//! positional parameters, each URL-decoded. The set of operations is closed. A name
//! that isn't in [`Operation`] is an error with a number (705), not an adventure.

use axum::http::Method;
use percent_encoding::percent_decode_str;

use crate::envelope::GatewayError;

/// 🎯 How many positional parameters a call can carry.
pub const MAX_PARAMS: usize = 5;

/// 📋 Every operation the gateway knows. If it's not here, it doesn't exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    Select,
    DeleteDocument,
    Search,
    Import,
    DeleteDatabase,
    Reset,
    CurrentDb,
}

impl Operation {
    pub const ALL: [Operation; 9] = [
        Operation::Insert,
        Operation::Update,
        Operation::Select,
        Operation::DeleteDocument,
        Operation::Search,
        Operation::Import,
        Operation::DeleteDatabase,
        Operation::Reset,
        Operation::CurrentDb,
    ];

    /// The name callers put in the path. Case-sensitive, as it always was.
    pub fn wire_name(self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Select => "select",
            Operation::DeleteDocument => "deleteDocument",
            Operation::Search => "search",
            Operation::Import => "import",
            Operation::DeleteDatabase => "deleteDatabase",
            Operation::Reset => "reset",
            Operation::CurrentDb => "currentDB",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        Operation::ALL
            .into_iter()
            .find(|operation| operation.wire_name() == name)
    }

    /// 🔒 The verb an operation insists on. `None` means it isn't picky.
    pub fn expected_method(self) -> Option<Method> {
        match self {
            Operation::Insert | Operation::Update | Operation::Import => Some(Method::PUT),
            Operation::Select | Operation::Search => Some(Method::GET),
            Operation::DeleteDocument | Operation::DeleteDatabase => Some(Method::DELETE),
            Operation::Reset | Operation::CurrentDb => None,
        }
    }
}

/// 📦 Positional parameters. Absent ones are `None`; present-but-empty ones are `Some("")`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params([Option<String>; MAX_PARAMS]);

impl Params {
    pub fn get(&self, position: usize) -> Option<&str> {
        self.0.get(position).and_then(|param| param.as_deref())
    }

    /// 🎯 A parameter the operation can't live without. Missing → 707, named.
    pub fn require(&self, position: usize, name: &'static str) -> Result<&str, GatewayError> {
        self.get(position).ok_or(GatewayError::InvalidParameter(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedCall {
    pub operation: Operation,
    pub params: Params,
}

/// 🔡 Form-style decoding: `+` is a space, `%XX` is a byte. Invalid UTF-8 is replaced, not fatal.
fn decode_segment(segment: &str) -> String {
    let spaced = segment.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// 🧭 Split a request path into an operation and its parameters.
///
/// `prefix` is the first segment every call must start with; an empty prefix means the
/// operation name comes first. Segments past the fifth parameter are ignored.
pub fn route(path: &str, prefix: &str) -> Result<RoutedCall, GatewayError> {
    let mut segments = path.trim_start_matches('/').split('/');

    if !prefix.is_empty() {
        let first = segments.next().unwrap_or_default();
        if first != prefix {
            return Err(GatewayError::UnknownOperation(decode_segment(first)));
        }
    }

    let name = segments.next().map(decode_segment).unwrap_or_default();
    let operation = Operation::from_wire_name(&name).ok_or(GatewayError::UnknownOperation(name))?;

    let mut params = Params::default();
    for (slot, segment) in params.0.iter_mut().zip(segments) {
        *slot = Some(decode_segment(segment));
    }

    Ok(RoutedCall { operation, params })
}
