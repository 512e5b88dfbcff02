//! RakNet system address
//!
//! A version byte selects the layout: `4` is four inverted octets and a
//! big-endian port, `6` is a `sockaddr_in6`-shaped block.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use crate::core::cursor::hex_dump;
use crate::core::schema::{Record, Scalar, Schema, TaggedVariant, Value};
use crate::error::{ProtocolError, Result};

pub const VERSION_FIELD: &str = "version";

/// Schema for one system address field
pub fn system_address() -> Result<Schema> {
    let variant = TaggedVariant::new(
        VERSION_FIELD,
        Scalar::U8,
        vec![
            (
                4,
                vec![
                    ("address", Scalar::Ipv4.into()),
                    ("port", Scalar::U16Be.into()),
                ],
            ),
            (
                6,
                vec![
                    ("family", Scalar::U16Le.into()),
                    ("port", Scalar::U16Be.into()),
                    ("flowInfo", Scalar::U32Be.into()),
                    ("address", Scalar::Ipv6.into()),
                    ("scopeId", Scalar::U32Be.into()),
                ],
            ),
        ],
    )?;
    Ok(variant.into())
}

fn int_field<T: TryFrom<i128>>(record: &Record, name: &'static str) -> Result<T> {
    let raw = record.require(name)?.as_int()?;
    T::try_from(raw).map_err(|_| ProtocolError::ValueOutOfRange(format!("{name} = {raw}")))
}

/// Convert a decoded system address into a socket address
pub fn to_socket_addr(value: &Value) -> Result<SocketAddr> {
    let record = value.as_record()?;
    let port: u16 = int_field(record, "port")?;
    let text = record.require("address")?.as_str()?;
    match record.require(VERSION_FIELD)?.as_int()? {
        4 => {
            let ip: Ipv4Addr = text
                .parse()
                .map_err(|_| ProtocolError::ValueOutOfRange(format!("IPv4 {text:?}")))?;
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }
        6 => {
            let mut octets = [0u8; 16];
            let mut parts = text.split(':');
            for octet in octets.iter_mut() {
                let part = parts
                    .next()
                    .ok_or_else(|| ProtocolError::ValueOutOfRange(format!("IPv6 {text:?}")))?;
                *octet = u8::from_str_radix(part, 16)
                    .map_err(|_| ProtocolError::ValueOutOfRange(format!("IPv6 {text:?}")))?;
            }
            let flow_info: u32 = int_field(record, "flowInfo")?;
            let scope_id: u32 = int_field(record, "scopeId")?;
            Ok(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(octets),
                port,
                flow_info,
                scope_id,
            )))
        }
        other => Err(ProtocolError::UndefinedKey(other)),
    }
}

/// Build the decoded form of a socket address, suitable for encoding
pub fn from_socket_addr(addr: SocketAddr) -> Value {
    let record = match addr {
        SocketAddr::V4(v4) => Record::new()
            .with(VERSION_FIELD, Value::Int(4))
            .with("address", Value::Str(v4.ip().to_string()))
            .with("port", Value::Int(v4.port().into())),
        SocketAddr::V6(v6) => Record::new()
            .with(VERSION_FIELD, Value::Int(6))
            // AF_INET6 as RakNet writes it on Windows hosts
            .with("family", Value::Int(23))
            .with("port", Value::Int(v6.port().into()))
            .with("flowInfo", Value::Int(v6.flowinfo().into()))
            .with("address", Value::Str(hex_dump(&v6.ip().octets(), ":")))
            .with("scopeId", Value::Int(v6.scope_id().into())),
    };
    Value::Record(record)
}
