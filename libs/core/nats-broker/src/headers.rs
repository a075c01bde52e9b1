//! Conversion between message headers and NATS headers.
//!
//! NATS header values are strings; numeric values arrive back as text.

use messaging::{HeaderValue, Headers};

pub fn to_nats(headers: &Headers) -> async_nats::HeaderMap {
    let mut map = async_nats::HeaderMap::new();
    for (key, value) in headers.iter() {
        map.insert(key, value.to_string().as_str());
    }
    map
}

pub fn from_nats(map: &async_nats::HeaderMap) -> Headers {
    map.iter()
        .filter_map(|(name, values)| {
            values
                .first()
                .map(|value| (name.to_string(), HeaderValue::Text(value.to_string())))
        })
        .collect()
}
