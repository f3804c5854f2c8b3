//! Helpers for narrowing `serde_cbor::Value` enums.

macro_rules! cbor_try_map {
    (
        $v:expr
    ) => {{
        match $v {
            serde_cbor::Value::Map(m) => Ok(m),
            _ => Err($crate::error::Fido2Error::parse("expected CBOR map")),
        }
    }};
}

macro_rules! cbor_try_array {
    (
        $v:expr
    ) => {{
        match $v {
            serde_cbor::Value::Array(m) => Ok(m),
            _ => Err($crate::error::Fido2Error::parse("expected CBOR array")),
        }
    }};
}

macro_rules! cbor_try_string {
    (
        $v:expr
    ) => {{
        match $v {
            serde_cbor::Value::Text(m) => Ok(m),
            _ => Err($crate::error::Fido2Error::parse("expected CBOR text string")),
        }
    }};
}

macro_rules! cbor_try_bytes {
    (
        $v:expr
    ) => {{
        match $v {
            serde_cbor::Value::Bytes(m) => Ok(m),
            _ => Err($crate::error::Fido2Error::parse("expected CBOR byte string")),
        }
    }};
}

macro_rules! cbor_try_i128 {
    (
        $v:expr
    ) => {{
        match $v {
            serde_cbor::Value::Integer(m) => Ok(*m),
            _ => Err($crate::error::Fido2Error::parse("expected CBOR integer")),
        }
    }};
}
