//! Protocol header names and the reserved header namespace.
//!
//! Outgoing calls carry an ordered list of header names to write plus the
//! values for those names ([`HeaderSet`]). Every header whose name starts with
//! [`RESERVED_PREFIX`] belongs to the propagation protocol: application code
//! may read such headers but never write them.

use http::{HeaderMap, HeaderName, HeaderValue};

/// Prefix owned exclusively by the header propagation protocol.
///
/// Header names are case-insensitive; this is the lowercase form.
pub const RESERVED_PREFIX: &str = "x-rpcweave-";

/// Remaining deadline budget in milliseconds, communicated to the callee.
pub const DEADLINE_BUDGET_HEADER: &str = "deadline-budget";

/// Name the calling client identifies itself with.
pub const USER_AGENT_HEADER: &str = "user-agent";

/// Serialized edge request context forwarded from the inbound request.
pub const EDGE_REQUEST_HEADER: &str = "edge-request";

/// Resolved hostname of the remote peer, when the transport knows it.
pub const HOSTNAME_HEADER: &str = "rpc-hostname";

/// Errors raised when writing outgoing headers.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    /// The name lives inside the reserved namespace.
    #[error("header {0:?} is inside the reserved {RESERVED_PREFIX:?} namespace")]
    Reserved(String),

    /// The name is not a valid header name.
    #[error("invalid header name: {0:?}")]
    InvalidName(String),

    /// The value is not a valid header value.
    #[error("invalid header value for {0:?}")]
    InvalidValue(String),
}

/// Returns whether `name` lives inside the reserved namespace.
pub fn is_reserved(name: &str) -> bool {
    name.len() >= RESERVED_PREFIX.len()
        && name.as_bytes()[..RESERVED_PREFIX.len()].eq_ignore_ascii_case(RESERVED_PREFIX.as_bytes())
}

/// Extract the reserved-namespace subset of a header map.
///
/// This is the decoding half of propagation: a service collects the reserved
/// headers it received so they can be forwarded on its own outgoing calls.
pub fn reserved_headers(headers: &HeaderMap) -> HeaderMap {
    let mut reserved = HeaderMap::new();
    for (name, value) in headers {
        if is_reserved(name.as_str()) {
            reserved.append(name.clone(), value.clone());
        }
    }
    reserved
}

/// Parse a name/value pair into typed header parts.
pub fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), HeaderError> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| HeaderError::InvalidName(name.to_string()))?;
    let header_value =
        HeaderValue::from_str(value).map_err(|_| HeaderError::InvalidValue(name.to_string()))?;
    Ok((header_name, header_value))
}

/// Outgoing headers for one call: the ordered list of names the transport
/// writes, plus the value for each name.
///
/// A value without an entry in the write list is not transmitted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HeaderSet {
    write_list: Vec<HeaderName>,
    values: HeaderMap,
}

impl HeaderSet {
    /// Create an empty header set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header value and make sure its name is on the write list.
    pub fn insert(&mut self, name: HeaderName, value: HeaderValue) {
        if !self.write_list.contains(&name) {
            self.write_list.push(name.clone());
        }
        self.values.insert(name, value);
    }

    /// Remove a header from both the write list and the value map.
    pub fn remove(&mut self, name: &str) {
        self.write_list.retain(|n| !n.as_str().eq_ignore_ascii_case(name));
        self.values.remove(name);
    }

    /// Drop every name for which `should_remove` returns true from the write
    /// list, along with its value.
    pub fn retain_write_list<F>(&mut self, mut should_remove: F)
    where
        F: FnMut(&HeaderName) -> bool,
    {
        let values = &mut self.values;
        self.write_list.retain(|name| {
            if should_remove(name) {
                values.remove(name);
                false
            } else {
                true
            }
        });
    }

    /// Look up a header value.
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.values.get(name)
    }

    /// Look up a header value as a string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.to_str().ok())
    }

    /// The ordered list of header names to write.
    pub fn write_list(&self) -> &[HeaderName] {
        &self.write_list
    }

    /// The header values.
    pub fn values(&self) -> &HeaderMap {
        &self.values
    }

    /// Headers that will actually be transmitted, in write-list order.
    pub fn to_wire(&self) -> Vec<(HeaderName, HeaderValue)> {
        self.write_list
            .iter()
            .filter_map(|name| self.values.get(name).map(|v| (name.clone(), v.clone())))
            .collect()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.write_list.is_empty()
    }

    /// Number of names on the write list.
    pub fn len(&self) -> usize {
        self.write_list.len()
    }
}
